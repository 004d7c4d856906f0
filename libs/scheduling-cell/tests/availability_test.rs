mod common;

use assert_matches::assert_matches;
use uuid::Uuid;

use scheduling_cell::models::{
    ApprovalStatus, BlockSlotRequest, CreateExceptionRequest, ExceptionType, GenerateSlotsRequest, SchedulingError,
    SlotFilters, UpdateTemplateRequest,
};

use scheduling_cell::SchedulingStore;

use common::{booking, date, monday, new_slot, time, TestClinic};

fn one_day(clinic: &TestClinic, on: chrono::NaiveDate) -> GenerateSlotsRequest {
    GenerateSlotsRequest { staff_id: clinic.staff_id, branch_id: clinic.branch_id, from_date: on, to_date: on }
}

fn exception(clinic: &TestClinic, window: Option<(u32, u32)>, requires_approval: bool) -> CreateExceptionRequest {
    CreateExceptionRequest {
        staff_id: clinic.staff_id,
        branch_id: None,
        exception_date: monday(),
        start_time: window.map(|(h, _)| time(h, 0)),
        end_time: window.map(|(_, h)| time(h, 0)),
        exception_type: ExceptionType::Leave,
        reason: Some("family".to_string()),
        requires_approval: Some(requires_approval),
        created_by: None,
    }
}

async fn morning_clinic() -> TestClinic {
    let clinic = TestClinic::new();
    clinic
        .ctx
        .templates
        .create_template(clinic.template(1, time(9, 0), time(12, 0), 30))
        .await
        .unwrap();
    clinic
}

#[tokio::test]
async fn monday_template_generates_six_half_hour_slots() {
    let clinic = morning_clinic().await;

    let report = clinic.ctx.generator.generate_slots(one_day(&clinic, monday())).await.unwrap();

    let starts: Vec<_> = report.created.iter().map(|s| s.start_time).collect();
    assert_eq!(
        starts,
        vec![time(9, 0), time(9, 30), time(10, 0), time(10, 30), time(11, 0), time(11, 30)]
    );
    assert!(report.created.iter().all(|s| (s.end_time - s.start_time).num_minutes() == 30));
    assert!(report.created.iter().all(|s| s.max_bookings == 1 && s.current_bookings == 0));

    // Tuesday has no template.
    let tuesday = clinic.ctx.generator.generate_slots(one_day(&clinic, date(2025, 1, 7))).await.unwrap();
    assert!(tuesday.created.is_empty());
}

#[tokio::test]
async fn break_leaves_a_gap_instead_of_a_partial_slot() {
    let clinic = TestClinic::new();
    let mut request = clinic.template(1, time(9, 0), time(12, 0), 30);
    request.break_start = Some(time(10, 30));
    request.break_end = Some(time(11, 0));
    clinic.ctx.templates.create_template(request).await.unwrap();

    let report = clinic.ctx.generator.generate_slots(one_day(&clinic, monday())).await.unwrap();

    let starts: Vec<_> = report.created.iter().map(|s| s.start_time).collect();
    assert_eq!(starts, vec![time(9, 0), time(9, 30), time(10, 0), time(11, 0), time(11, 30)]);
}

#[tokio::test]
async fn regeneration_fills_gaps_and_keeps_bookings() {
    let clinic = morning_clinic().await;
    let first = clinic.ctx.generator.generate_slots(one_day(&clinic, monday())).await.unwrap();
    let booked_slot = first.created[2].id;
    clinic.ctx.booking.book(booking(Uuid::new_v4(), booked_slot)).await.unwrap();

    let second = clinic.ctx.generator.generate_slots(one_day(&clinic, monday())).await.unwrap();
    assert!(second.created.is_empty());
    assert_eq!(second.already_present, 6);

    let slot = clinic.slot(booked_slot).await;
    assert_eq!(slot.current_bookings, 1);
    assert!(!slot.is_available);

    let all = clinic
        .ctx
        .inventory
        .get_available_slots(clinic.staff_id, monday(), SlotFilters::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 5);
}

#[tokio::test]
async fn generate_upcoming_covers_the_configured_horizon() {
    let clinic = morning_clinic().await;

    let report = clinic
        .ctx
        .generator
        .generate_upcoming(clinic.staff_id, clinic.branch_id, monday())
        .await
        .unwrap();

    // 30 days from 2025-01-06 holds five Mondays.
    assert_eq!(report.created.len(), 30);
    assert_eq!(report.created.last().unwrap().slot_date, date(2025, 2, 3));
}

#[tokio::test]
async fn generation_range_is_bounded() {
    let clinic = morning_clinic().await;

    let backwards = GenerateSlotsRequest { from_date: date(2025, 1, 10), to_date: date(2025, 1, 1), ..one_day(&clinic, monday()) };
    assert_matches!(clinic.ctx.generator.generate_slots(backwards).await, Err(SchedulingError::Validation(_)));

    let too_long = GenerateSlotsRequest { from_date: date(2025, 1, 1), to_date: date(2025, 12, 31), ..one_day(&clinic, monday()) };
    assert_matches!(clinic.ctx.generator.generate_slots(too_long).await, Err(SchedulingError::Validation(_)));
}

#[tokio::test]
async fn overlapping_templates_are_rejected() {
    let clinic = morning_clinic().await;

    let clash = clinic.ctx.templates.create_template(clinic.template(1, time(11, 0), time(13, 0), 30)).await;
    assert_matches!(clash, Err(SchedulingError::Validation(_)));

    // Adjacent window and another weekday are fine.
    clinic.ctx.templates.create_template(clinic.template(1, time(12, 0), time(14, 0), 30)).await.unwrap();
    clinic.ctx.templates.create_template(clinic.template(2, time(9, 0), time(12, 0), 30)).await.unwrap();

    let templates = clinic.ctx.templates.list_templates(clinic.staff_id, None).await.unwrap();
    assert_eq!(templates.len(), 3);
}

#[tokio::test]
async fn invalid_template_windows_are_rejected() {
    let clinic = TestClinic::new();

    let inverted = clinic.template(1, time(12, 0), time(9, 0), 30);
    assert_matches!(clinic.ctx.templates.create_template(inverted).await, Err(SchedulingError::Validation(_)));

    let bad_day = clinic.template(7, time(9, 0), time(12, 0), 30);
    assert_matches!(clinic.ctx.templates.create_template(bad_day).await, Err(SchedulingError::Validation(_)));

    let mut half_break = clinic.template(1, time(9, 0), time(12, 0), 30);
    half_break.break_start = Some(time(10, 0));
    assert_matches!(clinic.ctx.templates.create_template(half_break).await, Err(SchedulingError::Validation(_)));
}

#[tokio::test]
async fn deactivated_template_stops_generating() {
    let clinic = TestClinic::new();
    let template = clinic
        .ctx
        .templates
        .create_template(clinic.template(1, time(9, 0), time(12, 0), 30))
        .await
        .unwrap();

    let longer = UpdateTemplateRequest { slot_duration_minutes: Some(60), ..Default::default() };
    let updated = clinic.ctx.templates.update_template(template.id, longer).await.unwrap();
    assert_eq!(updated.slot_duration_minutes, 60);

    let report = clinic.ctx.generator.generate_slots(one_day(&clinic, monday())).await.unwrap();
    assert_eq!(report.created.len(), 3);

    clinic.ctx.templates.deactivate_template(template.id).await.unwrap();
    let next_week = clinic.ctx.generator.generate_slots(one_day(&clinic, date(2025, 1, 13))).await.unwrap();
    assert!(next_week.created.is_empty());
    assert!(clinic.ctx.templates.list_templates(clinic.staff_id, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn full_day_exception_suppresses_generation() {
    let clinic = morning_clinic().await;
    clinic.ctx.exceptions.create_exception(exception(&clinic, None, false)).await.unwrap();

    let report = clinic.ctx.generator.generate_slots(one_day(&clinic, monday())).await.unwrap();

    assert!(report.created.is_empty());
    assert_eq!(report.days_skipped_full_exception, 1);
}

#[tokio::test]
async fn partial_exception_blocks_existing_slots_and_reports_bookings() {
    let clinic = morning_clinic().await;
    let generated = clinic.ctx.generator.generate_slots(one_day(&clinic, monday())).await.unwrap();
    let ten_o_clock = generated.created[2].id;
    clinic.ctx.booking.book(booking(Uuid::new_v4(), ten_o_clock)).await.unwrap();

    let outcome = clinic.ctx.exceptions.create_exception(exception(&clinic, Some((10, 11)), false)).await.unwrap();

    assert_eq!(outcome.exception.approval_status, ApprovalStatus::Approved);
    assert_eq!(outcome.blocked_slots.len(), 2);
    assert_eq!(outcome.slots_with_bookings.len(), 1);
    assert_eq!(outcome.slots_with_bookings[0].id, ten_o_clock);

    // The booking survives the block.
    let blocked = clinic.slot(ten_o_clock).await;
    assert!(blocked.is_blocked);
    assert_eq!(blocked.current_bookings, 1);

    let available = clinic
        .ctx
        .inventory
        .get_available_slots(clinic.staff_id, monday(), SlotFilters::default())
        .await
        .unwrap();
    let starts: Vec<_> = available.iter().map(|s| s.start_time).collect();
    assert_eq!(starts, vec![time(9, 0), time(9, 30), time(11, 0), time(11, 30)]);

    clinic.ctx.exceptions.delete_exception(outcome.exception.id).await.unwrap();
    let available = clinic
        .ctx
        .inventory
        .get_available_slots(clinic.staff_id, monday(), SlotFilters::default())
        .await
        .unwrap();
    assert_eq!(available.len(), 5);
    assert!(!clinic.slot(ten_o_clock).await.is_blocked);
}

#[tokio::test]
async fn exception_needing_approval_waits_for_it() {
    let clinic = morning_clinic().await;
    clinic.ctx.generator.generate_slots(one_day(&clinic, monday())).await.unwrap();

    let pending = clinic.ctx.exceptions.create_exception(exception(&clinic, Some((9, 10)), true)).await.unwrap();
    assert_eq!(pending.exception.approval_status, ApprovalStatus::Pending);
    assert!(pending.blocked_slots.is_empty());

    let before = clinic
        .ctx
        .inventory
        .get_available_slots(clinic.staff_id, monday(), SlotFilters::default())
        .await
        .unwrap();
    assert_eq!(before.len(), 6);

    let approver = Uuid::new_v4();
    let approved = clinic
        .ctx
        .exceptions
        .approve_exception(pending.exception.id, Some(approver))
        .await
        .unwrap();
    assert_eq!(approved.exception.approved_by, Some(approver));
    assert_eq!(approved.blocked_slots.len(), 2);

    let again = clinic.ctx.exceptions.reject_exception(pending.exception.id, None).await;
    assert_matches!(again, Err(SchedulingError::Validation(_)));
}

#[tokio::test]
async fn rejected_exception_never_blocks() {
    let clinic = morning_clinic().await;
    let pending = clinic.ctx.exceptions.create_exception(exception(&clinic, None, true)).await.unwrap();

    let rejected = clinic.ctx.exceptions.reject_exception(pending.exception.id, None).await.unwrap();
    assert_eq!(rejected.approval_status, ApprovalStatus::Rejected);

    let report = clinic.ctx.generator.generate_slots(one_day(&clinic, monday())).await.unwrap();
    assert_eq!(report.created.len(), 6);
    assert_eq!(report.days_skipped_full_exception, 0);
}

#[tokio::test]
async fn available_slots_honour_filters_and_manual_blocks() {
    let clinic = morning_clinic().await;
    let generated = clinic.ctx.generator.generate_slots(one_day(&clinic, monday())).await.unwrap();

    let late_morning = SlotFilters { earliest_start: Some(time(10, 0)), ..Default::default() };
    let slots = clinic
        .ctx
        .inventory
        .get_available_slots(clinic.staff_id, monday(), late_morning)
        .await
        .unwrap();
    assert_eq!(slots.len(), 4);

    let other_branch = SlotFilters { branch_id: Some(Uuid::new_v4()), ..Default::default() };
    let slots = clinic
        .ctx
        .inventory
        .get_available_slots(clinic.staff_id, monday(), other_branch)
        .await
        .unwrap();
    assert!(slots.is_empty());

    let first = generated.created[0].id;
    let empty_reason = BlockSlotRequest { reason: " ".to_string(), actor_id: None };
    assert_matches!(clinic.ctx.inventory.block_slot(first, empty_reason).await, Err(SchedulingError::Validation(_)));

    let block = BlockSlotRequest { reason: "equipment check".to_string(), actor_id: None };
    let blocked = clinic.ctx.inventory.block_slot(first, block).await.unwrap();
    assert_eq!(blocked.blocked_reason.as_deref(), Some("equipment check"));
    assert_matches!(
        clinic.ctx.booking.book(booking(Uuid::new_v4(), first)).await,
        Err(SchedulingError::SlotNotAvailable(_))
    );

    clinic.ctx.inventory.unblock_slot(first).await.unwrap();
    clinic.ctx.booking.book(booking(Uuid::new_v4(), first)).await.unwrap();
}

#[tokio::test]
async fn deleting_one_of_two_overlapping_exceptions_keeps_the_other_in_force() {
    let clinic = morning_clinic().await;
    let generated = clinic.ctx.generator.generate_slots(one_day(&clinic, monday())).await.unwrap();
    let ten_o_clock = generated.created[2].id;

    let first = clinic.ctx.exceptions.create_exception(exception(&clinic, Some((10, 11)), false)).await.unwrap();
    let second = clinic.ctx.exceptions.create_exception(exception(&clinic, Some((9, 11)), false)).await.unwrap();
    assert_eq!(clinic.slot(ten_o_clock).await.blocked_by_exception_id, Some(first.exception.id));

    clinic.ctx.exceptions.delete_exception(first.exception.id).await.unwrap();

    let still_blocked = clinic.slot(ten_o_clock).await;
    assert!(still_blocked.is_blocked);
    assert_eq!(still_blocked.blocked_by_exception_id, Some(second.exception.id));
    assert_matches!(
        clinic.ctx.booking.book(booking(Uuid::new_v4(), ten_o_clock)).await,
        Err(SchedulingError::SlotNotAvailable(_))
    );
    let available = clinic
        .ctx
        .inventory
        .get_available_slots(clinic.staff_id, monday(), SlotFilters::default())
        .await
        .unwrap();
    let starts: Vec<_> = available.iter().map(|s| s.start_time).collect();
    assert_eq!(starts, vec![time(11, 0), time(11, 30)]);

    clinic.ctx.exceptions.delete_exception(second.exception.id).await.unwrap();
    assert!(!clinic.slot(ten_o_clock).await.is_blocked);
    clinic.ctx.booking.book(booking(Uuid::new_v4(), ten_o_clock)).await.unwrap();
}

#[tokio::test]
async fn manual_block_under_an_exception_cannot_be_lifted_early() {
    let clinic = morning_clinic().await;
    let generated = clinic.ctx.generator.generate_slots(one_day(&clinic, monday())).await.unwrap();
    let ten_o_clock = generated.created[2].id;

    let block = BlockSlotRequest { reason: "equipment check".to_string(), actor_id: None };
    clinic.ctx.inventory.block_slot(ten_o_clock, block).await.unwrap();

    let pending = clinic.ctx.exceptions.create_exception(exception(&clinic, Some((10, 11)), true)).await.unwrap();
    let approved = clinic
        .ctx
        .exceptions
        .approve_exception(pending.exception.id, Some(Uuid::new_v4()))
        .await
        .unwrap();
    // Only the half hour that was still open changes hands.
    assert_eq!(approved.blocked_slots.len(), 1);
    let manual = clinic.slot(ten_o_clock).await;
    assert_eq!(manual.blocked_reason.as_deref(), Some("equipment check"));
    assert_eq!(manual.blocked_by_exception_id, None);

    assert_matches!(clinic.ctx.inventory.unblock_slot(ten_o_clock).await, Err(SchedulingError::Validation(_)));
    assert!(clinic.slot(ten_o_clock).await.is_blocked);
    assert_matches!(
        clinic.ctx.booking.book(booking(Uuid::new_v4(), ten_o_clock)).await,
        Err(SchedulingError::SlotNotAvailable(_))
    );

    // The manual block outlives the exception until someone lifts it.
    clinic.ctx.exceptions.delete_exception(pending.exception.id).await.unwrap();
    assert!(clinic.slot(ten_o_clock).await.is_blocked);
    clinic.ctx.inventory.unblock_slot(ten_o_clock).await.unwrap();
    clinic.ctx.booking.book(booking(Uuid::new_v4(), ten_o_clock)).await.unwrap();
}

#[tokio::test]
async fn reads_refuse_to_serve_a_slot_with_broken_counters() {
    let clinic = TestClinic::new();
    let mut corrupt = new_slot(clinic.staff_id, clinic.branch_id, monday(), time(9, 0), time(9, 30), 1);
    corrupt.current_bookings = 2;
    let corrupt = clinic.store.insert_slots_if_absent(vec![corrupt]).await.unwrap().remove(0);

    assert_matches!(
        clinic.ctx.inventory.get_slot(corrupt.id).await,
        Err(SchedulingError::ConsistencyViolation(_))
    );
    assert_matches!(
        clinic
            .ctx
            .inventory
            .get_available_slots(clinic.staff_id, monday(), SlotFilters::default())
            .await,
        Err(SchedulingError::ConsistencyViolation(_))
    );
}

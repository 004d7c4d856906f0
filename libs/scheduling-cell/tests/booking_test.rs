mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use uuid::Uuid;

use scheduling_cell::models::{
    AppointmentStatus, ChangeSource, RescheduleRequest, SchedulingError, SchedulingRules, TransitionRequest,
};

use common::{booking, date, time, TestClinic};

#[tokio::test]
async fn slot_with_two_places_fills_then_frees_one() {
    let clinic = TestClinic::new();
    let slot = clinic.insert_slot(date(2025, 1, 10), time(9, 0), time(9, 30), 2).await;

    clinic.ctx.inventory.reserve(slot.id).await.unwrap();
    let full = clinic.ctx.inventory.reserve(slot.id).await.unwrap();
    assert_eq!(full.current_bookings, 2);
    assert!(!full.is_available);

    let third = clinic.ctx.inventory.reserve(slot.id).await;
    assert_matches!(third, Err(SchedulingError::SlotNotAvailable(id)) if id == slot.id);

    let after_cancel = clinic.ctx.inventory.cancel_booking(slot.id).await.unwrap();
    assert_eq!(after_cancel.current_bookings, 1);
    assert!(after_cancel.is_available);
}

#[tokio::test]
async fn booking_creates_requested_appointment_on_the_slot_window() {
    let clinic = TestClinic::new();
    let slot = clinic.insert_slot(date(2025, 1, 10), time(9, 0), time(9, 30), 1).await;
    let patient = Uuid::new_v4();

    let appointment = clinic.ctx.booking.book(booking(patient, slot.id)).await.unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Requested);
    assert_eq!(appointment.slot_id, Some(slot.id));
    assert_eq!(appointment.staff_id, Some(clinic.staff_id));
    assert_eq!(appointment.window(), (time(9, 0), time(9, 30)));
    assert_eq!(appointment.estimated_duration_minutes, 30);

    let slot = clinic.slot(slot.id).await;
    assert_eq!(slot.current_bookings, 1);
    assert!(!slot.is_available);

    let history = clinic.ctx.lifecycle.status_history(appointment.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].from_status, None);
    assert_eq!(history[0].to_status, AppointmentStatus::Requested);
}

#[tokio::test]
async fn booking_requires_a_known_slot_and_a_purpose() {
    let clinic = TestClinic::new();
    let slot = clinic.insert_slot(date(2025, 1, 10), time(9, 0), time(9, 30), 1).await;

    let unknown = clinic.ctx.booking.book(booking(Uuid::new_v4(), Uuid::new_v4())).await;
    assert_matches!(unknown, Err(SchedulingError::Validation(_)));

    let mut request = booking(Uuid::new_v4(), slot.id);
    request.purpose = "  ".to_string();
    assert_matches!(clinic.ctx.booking.book(request).await, Err(SchedulingError::Validation(_)));

    assert_eq!(clinic.slot(slot.id).await.current_bookings, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_on_last_place_admit_exactly_one() {
    let clinic = TestClinic::new();
    let slot = clinic.insert_slot(date(2025, 1, 10), time(9, 0), time(9, 30), 1).await;

    let attempts = 16;
    let mut handles = Vec::new();
    for _ in 0..attempts {
        let ctx = Arc::clone(&clinic.ctx);
        let request = booking(Uuid::new_v4(), slot.id);
        handles.push(tokio::spawn(async move { ctx.booking.book(request).await }));
    }

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let booked = results.iter().filter(|r| r.is_ok()).count();
    let lost = results
        .iter()
        .filter(|r| matches!(r, Err(SchedulingError::SlotNotAvailable(_))))
        .count();
    assert_eq!(booked, 1);
    assert_eq!(lost, attempts - 1);

    let slot = clinic.slot(slot.id).await;
    assert_eq!(slot.current_bookings, 1);
    assert!(!slot.is_available);
    slot.check_invariants().unwrap();

    let appointments = clinic
        .ctx
        .booking
        .list_staff_appointments(clinic.staff_id, date(2025, 1, 10))
        .await
        .unwrap();
    assert_eq!(appointments.len(), 1);
}

#[tokio::test]
async fn overlapping_booking_for_same_patient_is_rejected() {
    let clinic = TestClinic::new();
    let day = date(2025, 1, 10);
    let first = clinic.insert_slot(day, time(10, 0), time(10, 30), 1).await;
    let other_staff = Uuid::new_v4();
    let overlapping = clinic.insert_slot_for(other_staff, day, time(10, 15), time(10, 45), 1).await;
    let adjacent = clinic.insert_slot_for(other_staff, day, time(10, 30), time(11, 0), 1).await;
    let patient = Uuid::new_v4();

    let existing = clinic.ctx.booking.book(booking(patient, first.id)).await.unwrap();

    let clash = clinic.ctx.booking.book(booking(patient, overlapping.id)).await;
    assert_matches!(clash, Err(SchedulingError::PatientConflict(id)) if id == existing.id);
    assert_eq!(clinic.slot(overlapping.id).await.current_bookings, 0);

    clinic.ctx.booking.book(booking(patient, adjacent.id)).await.unwrap();

    let conflicts = clinic
        .ctx
        .booking
        .find_patient_conflicts(patient, day, time(10, 20), time(10, 40), None)
        .await
        .unwrap();
    assert_eq!(conflicts.len(), 2);
}

#[tokio::test]
async fn overlap_check_can_be_switched_off() {
    let clinic = TestClinic::with_rules(SchedulingRules { reject_patient_overlap: false, ..Default::default() });
    let day = date(2025, 1, 10);
    let first = clinic.insert_slot(day, time(10, 0), time(10, 30), 1).await;
    let second = clinic.insert_slot_for(Uuid::new_v4(), day, time(10, 0), time(10, 30), 1).await;
    let patient = Uuid::new_v4();

    clinic.ctx.booking.book(booking(patient, first.id)).await.unwrap();
    clinic.ctx.booking.book(booking(patient, second.id)).await.unwrap();
}

#[tokio::test]
async fn complete_from_requested_is_rejected_and_nothing_changes() {
    let clinic = TestClinic::new();
    let slot = clinic.insert_slot(date(2025, 1, 10), time(9, 0), time(9, 30), 1).await;
    let appointment = clinic.ctx.booking.book(booking(Uuid::new_v4(), slot.id)).await.unwrap();

    let result = clinic.ctx.lifecycle.complete(appointment.id, TransitionRequest::default()).await;
    assert_matches!(
        result,
        Err(SchedulingError::InvalidTransition { status: AppointmentStatus::Requested, .. })
    );

    let stored = clinic.ctx.booking.get_appointment(appointment.id).await.unwrap();
    assert_eq!(stored.status, AppointmentStatus::Requested);
    assert_eq!(stored.completed_at, None);
    assert_eq!(clinic.ctx.lifecycle.status_history(appointment.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn happy_path_records_milestones_and_history() {
    let clinic = TestClinic::new();
    let slot = clinic.insert_slot(date(2025, 1, 10), time(9, 0), time(9, 30), 1).await;
    let actor = Uuid::new_v4();
    let appointment = clinic.ctx.booking.book(booking(Uuid::new_v4(), slot.id)).await.unwrap();
    let by_actor = || TransitionRequest { actor_id: Some(actor), ..Default::default() };

    let confirmed = clinic.ctx.lifecycle.confirm(appointment.id, by_actor()).await.unwrap();
    assert_eq!(confirmed.confirmed_by, Some(actor));

    let checked_in = clinic.ctx.lifecycle.check_in(appointment.id, by_actor()).await.unwrap();
    assert_eq!(checked_in.status, AppointmentStatus::CheckedIn);
    assert_eq!(checked_in.token_number, Some(1));

    let started = clinic.ctx.lifecycle.start(appointment.id, by_actor()).await.unwrap();
    assert!(started.actual_start_time.is_some());
    assert!(started.wait_time_minutes.unwrap() >= 0);

    let completed = clinic.ctx.lifecycle.complete(appointment.id, by_actor()).await.unwrap();
    assert_eq!(completed.status, AppointmentStatus::Completed);
    assert_eq!(completed.completed_by, Some(actor));

    // Completion keeps the slot unit consumed.
    assert_eq!(clinic.slot(slot.id).await.current_bookings, 1);

    let trail: Vec<_> = clinic
        .ctx
        .lifecycle
        .status_history(appointment.id)
        .await
        .unwrap()
        .into_iter()
        .map(|h| (h.from_status, h.to_status))
        .collect();
    assert_eq!(
        trail,
        vec![
            (None, AppointmentStatus::Requested),
            (Some(AppointmentStatus::Requested), AppointmentStatus::Confirmed),
            (Some(AppointmentStatus::Confirmed), AppointmentStatus::CheckedIn),
            (Some(AppointmentStatus::CheckedIn), AppointmentStatus::InProgress),
            (Some(AppointmentStatus::InProgress), AppointmentStatus::Completed),
        ]
    );

    assert!(clinic.ctx.lifecycle.valid_operations_for(appointment.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn cancel_releases_the_slot_once() {
    let clinic = TestClinic::new();
    let slot = clinic.insert_slot(date(2025, 1, 10), time(9, 0), time(9, 30), 1).await;
    let appointment = clinic.ctx.booking.book(booking(Uuid::new_v4(), slot.id)).await.unwrap();

    let request = TransitionRequest { reason: Some("travelling".to_string()), ..Default::default() };
    let cancelled = clinic.ctx.lifecycle.cancel(appointment.id, request).await.unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("travelling"));

    let slot_after = clinic.slot(slot.id).await;
    assert_eq!(slot_after.current_bookings, 0);
    assert!(slot_after.is_available);

    let again = clinic.ctx.lifecycle.cancel(appointment.id, TransitionRequest::default()).await;
    assert_matches!(again, Err(SchedulingError::InvalidTransition { .. }));
    assert_eq!(clinic.slot(slot.id).await.current_bookings, 0);

    // The freed place can be booked by someone else.
    clinic.ctx.booking.book(booking(Uuid::new_v4(), slot.id)).await.unwrap();
}

#[tokio::test]
async fn no_show_releases_the_slot() {
    let clinic = TestClinic::new();
    let slot = clinic.insert_slot(date(2025, 1, 10), time(9, 0), time(9, 30), 1).await;
    let appointment = clinic.ctx.booking.book(booking(Uuid::new_v4(), slot.id)).await.unwrap();
    clinic.ctx.lifecycle.confirm(appointment.id, TransitionRequest::default()).await.unwrap();

    let request = TransitionRequest { reason: Some("did not arrive".to_string()), ..Default::default() };
    let missed = clinic.ctx.lifecycle.mark_no_show(appointment.id, request).await.unwrap();

    assert_eq!(missed.status, AppointmentStatus::NoShow);
    assert!(missed.no_show_at.is_some());
    assert_eq!(clinic.slot(slot.id).await.current_bookings, 0);
}

#[tokio::test]
async fn check_in_tokens_count_up_per_staff_and_day() {
    let clinic = TestClinic::new();
    let day = date(2025, 1, 10);
    let mut ids = Vec::new();
    for hour in 9..12 {
        let slot = clinic.insert_slot(day, time(hour, 0), time(hour, 30), 1).await;
        ids.push(clinic.ctx.booking.book(booking(Uuid::new_v4(), slot.id)).await.unwrap().id);
    }

    let first = clinic.ctx.lifecycle.check_in(ids[0], TransitionRequest::default()).await.unwrap();
    let explicit = TransitionRequest { token_number: Some(10), ..Default::default() };
    let second = clinic.ctx.lifecycle.check_in(ids[1], explicit).await.unwrap();
    let third = clinic.ctx.lifecycle.check_in(ids[2], TransitionRequest::default()).await.unwrap();

    assert_eq!(first.token_number, Some(1));
    assert_eq!(second.token_number, Some(10));
    assert_eq!(third.token_number, Some(11));

    let invalid = TransitionRequest { token_number: Some(0), ..Default::default() };
    let slot = clinic.insert_slot(day, time(13, 0), time(13, 30), 1).await;
    let late = clinic.ctx.booking.book(booking(Uuid::new_v4(), slot.id)).await.unwrap();
    assert_matches!(
        clinic.ctx.lifecycle.check_in(late.id, invalid).await,
        Err(SchedulingError::Validation(_))
    );
}

#[tokio::test]
async fn reschedule_moves_the_booking_between_slots() {
    let clinic = TestClinic::new();
    let day = date(2025, 1, 10);
    let old_slot = clinic.insert_slot(day, time(9, 0), time(9, 30), 1).await;
    let new_slot = clinic.insert_slot(date(2025, 1, 13), time(11, 0), time(11, 30), 1).await;
    let original = clinic.ctx.booking.book(booking(Uuid::new_v4(), old_slot.id)).await.unwrap();
    clinic.ctx.lifecycle.confirm(original.id, TransitionRequest::default()).await.unwrap();

    let outcome = clinic
        .ctx
        .booking
        .reschedule(
            original.id,
            RescheduleRequest { new_slot_id: new_slot.id, actor_id: None, reason: Some("clash".to_string()) },
        )
        .await
        .unwrap();

    assert_eq!(outcome.original.status, AppointmentStatus::Rescheduled);
    assert_eq!(outcome.replacement.status, AppointmentStatus::Confirmed);
    assert_eq!(outcome.replacement.rescheduled_from_id, Some(original.id));
    assert_eq!(outcome.replacement.slot_id, Some(new_slot.id));
    assert_eq!(outcome.replacement.appointment_date, date(2025, 1, 13));

    assert_eq!(clinic.slot(old_slot.id).await.current_bookings, 0);
    assert_eq!(clinic.slot(new_slot.id).await.current_bookings, 1);

    let history = clinic.ctx.lifecycle.status_history(original.id).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.to_status, AppointmentStatus::Rescheduled);
    assert_eq!(last.source, ChangeSource::Reschedule);
}

#[tokio::test]
async fn reschedule_into_full_slot_leaves_everything_in_place() {
    let clinic = TestClinic::new();
    let day = date(2025, 1, 10);
    let old_slot = clinic.insert_slot(day, time(9, 0), time(9, 30), 1).await;
    let full_slot = clinic.insert_slot(day, time(14, 0), time(14, 30), 1).await;
    let original = clinic.ctx.booking.book(booking(Uuid::new_v4(), old_slot.id)).await.unwrap();
    clinic.ctx.booking.book(booking(Uuid::new_v4(), full_slot.id)).await.unwrap();

    let result = clinic
        .ctx
        .booking
        .reschedule(original.id, RescheduleRequest { new_slot_id: full_slot.id, actor_id: None, reason: None })
        .await;
    assert_matches!(result, Err(SchedulingError::SlotNotAvailable(_)));

    let stored = clinic.ctx.booking.get_appointment(original.id).await.unwrap();
    assert_eq!(stored.status, AppointmentStatus::Requested);
    assert_eq!(clinic.slot(old_slot.id).await.current_bookings, 1);
    assert_eq!(clinic.slot(full_slot.id).await.current_bookings, 1);
}

#[tokio::test]
async fn reschedule_of_terminal_appointment_is_rejected() {
    let clinic = TestClinic::new();
    let day = date(2025, 1, 10);
    let slot = clinic.insert_slot(day, time(9, 0), time(9, 30), 1).await;
    let other = clinic.insert_slot(day, time(10, 0), time(10, 30), 1).await;
    let appointment = clinic.ctx.booking.book(booking(Uuid::new_v4(), slot.id)).await.unwrap();
    clinic.ctx.lifecycle.cancel(appointment.id, TransitionRequest::default()).await.unwrap();

    let result = clinic
        .ctx
        .booking
        .reschedule(appointment.id, RescheduleRequest { new_slot_id: other.id, actor_id: None, reason: None })
        .await;
    assert_matches!(
        result,
        Err(SchedulingError::InvalidTransition { status: AppointmentStatus::Cancelled, .. })
    );
    assert_eq!(clinic.slot(other.id).await.current_bookings, 0);
}

#[tokio::test]
async fn follow_up_must_reference_an_existing_appointment() {
    let clinic = TestClinic::new();
    let day = date(2025, 1, 10);
    let first = clinic.insert_slot(day, time(9, 0), time(9, 30), 1).await;
    let second = clinic.insert_slot(day, time(15, 0), time(15, 30), 1).await;
    let patient = Uuid::new_v4();

    let mut orphan = booking(patient, second.id);
    orphan.parent_appointment_id = Some(Uuid::new_v4());
    assert_matches!(clinic.ctx.booking.book(orphan).await, Err(SchedulingError::Validation(_)));

    let parent = clinic.ctx.booking.book(booking(patient, first.id)).await.unwrap();
    let mut follow_up = booking(patient, second.id);
    follow_up.parent_appointment_id = Some(parent.id);
    let child = clinic.ctx.booking.book(follow_up).await.unwrap();
    assert_eq!(child.parent_appointment_id, Some(parent.id));
}

// libs/scheduling-cell/src/store/supabase.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, error, warn};
use uuid::Uuid;

use shared_database::{DatabaseError, SupabaseClient};

use crate::models::{
    Appointment, AppointmentOperation, AppointmentResource, AppointmentStatus, AppointmentStatusHistory,
    AvailabilityTemplate, ChangeSource, RescheduleOutcome, ResourceType, Room, ScheduleException,
    SchedulingError, ServiceResourceRequirement, Slot, SlotChange, StaffMember,
};
use crate::services::history::history_entry;
use crate::services::lifecycle::{apply_operation, resource_effect};
use crate::store::{NewBooking, RescheduleCommit, SchedulingStore, TransitionCommit};

/// PostgREST-backed store. Read-then-write commands go through the Postgres
/// functions in `migrations/0001_scheduling.sql`, which take the row locks.
pub struct SupabaseStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn select<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, SchedulingError> {
        self.supabase
            .request(Method::GET, path, None)
            .await
            .map_err(|e| map_db_error(e, None))
    }

    async fn select_one<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, SchedulingError> {
        let rows: Vec<T> = self.select(path).await?;
        Ok(rows.into_iter().next())
    }

    async fn write_returning<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Value,
        prefer: &'static str,
    ) -> Result<Vec<T>, SchedulingError> {
        let mut headers = HeaderMap::new();
        headers.insert("Prefer", HeaderValue::from_static(prefer));

        self.supabase
            .request_with_headers(method, path, Some(body), Some(headers))
            .await
            .map_err(|e| map_db_error(e, None))
    }

    async fn insert_one<T: DeserializeOwned>(&self, table: &str, body: Value) -> Result<T, SchedulingError> {
        let rows: Vec<T> = self
            .write_returning(Method::POST, &format!("/rest/v1/{}", table), body, "return=representation")
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| SchedulingError::ConsistencyViolation(format!("insert into {} returned no row", table)))
    }

    async fn update_one<T: DeserializeOwned>(&self, table: &str, id: Uuid, body: Value) -> Result<T, SchedulingError> {
        let rows: Vec<T> = self
            .write_returning(
                Method::PATCH,
                &format!("/rest/v1/{}?id=eq.{}", table, id),
                body,
                "return=representation",
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| SchedulingError::not_found(table, id))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        function: &str,
        args: Value,
        operation: Option<AppointmentOperation>,
    ) -> Result<T, SchedulingError> {
        debug!("Calling database function {}", function);
        self.supabase
            .rpc(function, args)
            .await
            .map_err(|e| map_db_error(e, operation))
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, SchedulingError> {
    serde_json::to_value(value).map_err(|e| SchedulingError::Database(DatabaseError::Decode(e)))
}

/// Translates database errors, including the tagged messages raised by the
/// scheduling functions (`TAG:detail`), into scheduling errors.
fn map_db_error(err: DatabaseError, operation: Option<AppointmentOperation>) -> SchedulingError {
    if let DatabaseError::Duplicate(message) = &err {
        return SchedulingError::Validation(format!("Duplicate record: {}", message));
    }

    let Some(message) = err.rejection_message().map(str::to_string) else {
        return SchedulingError::Database(err);
    };
    let (tag, detail) = message.split_once(':').unwrap_or((message.as_str(), ""));

    match tag {
        "SLOT_NOT_AVAILABLE" => SchedulingError::SlotNotAvailable(Uuid::parse_str(detail).unwrap_or_default()),
        "RESOURCE_NOT_AVAILABLE" => {
            let (kind, id) = detail.split_once(':').unwrap_or(("room", detail));
            let resource_type = if kind == "staff" { ResourceType::Staff } else { ResourceType::Room };
            SchedulingError::ResourceNotAvailable {
                resource_type,
                resource_id: Uuid::parse_str(id).unwrap_or_default(),
            }
        }
        "INVALID_TRANSITION" => {
            let status: Option<AppointmentStatus> = serde_json::from_value(Value::String(detail.to_string())).ok();
            match (operation, status) {
                (Some(operation), Some(status)) => SchedulingError::InvalidTransition { operation, status },
                _ => SchedulingError::Validation(format!("Invalid transition from {}", detail)),
            }
        }
        "CONSISTENCY_VIOLATION" => {
            error!("Database reported a slot invariant breach: {}", detail);
            SchedulingError::ConsistencyViolation(detail.to_string())
        }
        "NOT_FOUND" | "VALIDATION" => SchedulingError::Validation(detail.to_string()),
        _ => SchedulingError::Database(err),
    }
}

/// Lifecycle columns a transition is allowed to touch.
fn lifecycle_patch(appointment: &Appointment) -> Value {
    json!({
        "status": appointment.status,
        "token_number": appointment.token_number,
        "confirmed_at": appointment.confirmed_at,
        "confirmed_by": appointment.confirmed_by,
        "checked_in_at": appointment.checked_in_at,
        "checked_in_by": appointment.checked_in_by,
        "actual_start_time": appointment.actual_start_time,
        "wait_time_minutes": appointment.wait_time_minutes,
        "completed_at": appointment.completed_at,
        "completed_by": appointment.completed_by,
        "actual_end_time": appointment.actual_end_time,
        "cancelled_at": appointment.cancelled_at,
        "cancelled_by": appointment.cancelled_by,
        "cancellation_reason": appointment.cancellation_reason,
        "no_show_at": appointment.no_show_at,
        "no_show_reason": appointment.no_show_reason,
        "updated_at": appointment.updated_at,
    })
}

#[async_trait]
impl SchedulingStore for SupabaseStore {
    // ==========================================================================
    // TEMPLATES
    // ==========================================================================

    async fn insert_template(&self, template: AvailabilityTemplate) -> Result<AvailabilityTemplate, SchedulingError> {
        self.insert_one("availability_templates", to_json(&template)?).await
    }

    async fn update_template(&self, template: AvailabilityTemplate) -> Result<AvailabilityTemplate, SchedulingError> {
        self.update_one("availability_templates", template.id, to_json(&template)?).await
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<AvailabilityTemplate>, SchedulingError> {
        self.select_one(&format!("/rest/v1/availability_templates?id=eq.{}&select=*", id)).await
    }

    async fn list_templates(
        &self,
        staff_id: Uuid,
        branch_id: Option<Uuid>,
    ) -> Result<Vec<AvailabilityTemplate>, SchedulingError> {
        let mut path = format!(
            "/rest/v1/availability_templates?staff_id=eq.{}&deleted_at=is.null",
            staff_id
        );
        if let Some(branch_id) = branch_id {
            path.push_str(&format!("&branch_id=eq.{}", branch_id));
        }
        path.push_str("&order=day_of_week.asc,start_time.asc");
        self.select(&path).await
    }

    // ==========================================================================
    // EXCEPTIONS
    // ==========================================================================

    async fn insert_exception(&self, exception: ScheduleException) -> Result<ScheduleException, SchedulingError> {
        self.insert_one("schedule_exceptions", to_json(&exception)?).await
    }

    async fn update_exception(&self, exception: ScheduleException) -> Result<ScheduleException, SchedulingError> {
        self.update_one("schedule_exceptions", exception.id, to_json(&exception)?).await
    }

    async fn get_exception(&self, id: Uuid) -> Result<Option<ScheduleException>, SchedulingError> {
        self.select_one(&format!("/rest/v1/schedule_exceptions?id=eq.{}&select=*", id)).await
    }

    async fn list_exceptions(
        &self,
        staff_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ScheduleException>, SchedulingError> {
        self.select(&format!(
            "/rest/v1/schedule_exceptions?staff_id=eq.{}&exception_date=gte.{}&exception_date=lte.{}&deleted_at=is.null&order=exception_date.asc",
            staff_id, from, to
        ))
        .await
    }

    // ==========================================================================
    // SLOTS
    // ==========================================================================

    async fn insert_slots_if_absent(&self, slots: Vec<Slot>) -> Result<Vec<Slot>, SchedulingError> {
        if slots.is_empty() {
            return Ok(Vec::new());
        }
        // The unique key turns regeneration into gap filling.
        self.write_returning(
            Method::POST,
            "/rest/v1/slots?on_conflict=staff_id,branch_id,slot_date,start_time",
            to_json(&slots)?,
            "resolution=ignore-duplicates,return=representation",
        )
        .await
    }

    async fn get_slot(&self, id: Uuid) -> Result<Option<Slot>, SchedulingError> {
        self.select_one(&format!("/rest/v1/slots?id=eq.{}&select=*", id)).await
    }

    async fn list_slots(&self, staff_id: Uuid, from: NaiveDate, to: NaiveDate) -> Result<Vec<Slot>, SchedulingError> {
        self.select(&format!(
            "/rest/v1/slots?staff_id=eq.{}&slot_date=gte.{}&slot_date=lte.{}&order=slot_date.asc,start_time.asc",
            staff_id, from, to
        ))
        .await
    }

    async fn apply_slot_change(&self, slot_id: Uuid, change: SlotChange) -> Result<Slot, SchedulingError> {
        self.call(
            "scheduling_apply_slot_change",
            json!({ "p_slot_id": slot_id, "p_change": to_json(&change)? }),
            None,
        )
        .await
    }

    // ==========================================================================
    // APPOINTMENTS
    // ==========================================================================

    async fn create_booking(&self, booking: NewBooking) -> Result<Appointment, SchedulingError> {
        self.call(
            "scheduling_book_slot",
            json!({
                "p_appointment": to_json(&booking.appointment)?,
                "p_history": to_json(&booking.history)?,
            }),
            None,
        )
        .await
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, SchedulingError> {
        self.select_one(&format!("/rest/v1/appointments?id=eq.{}&select=*", id)).await
    }

    async fn list_patient_appointments(
        &self,
        patient_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        self.select(&format!(
            "/rest/v1/appointments?patient_id=eq.{}&appointment_date=eq.{}&deleted_at=is.null&order=start_time.asc",
            patient_id, date
        ))
        .await
    }

    async fn list_staff_appointments(&self, staff_id: Uuid, date: NaiveDate) -> Result<Vec<Appointment>, SchedulingError> {
        self.select(&format!(
            "/rest/v1/appointments?staff_id=eq.{}&appointment_date=eq.{}&deleted_at=is.null&order=start_time.asc",
            staff_id, date
        ))
        .await
    }

    async fn commit_transition(&self, commit: TransitionCommit) -> Result<Appointment, SchedulingError> {
        let TransitionCommit { appointment_id, operation, request, source, now } = commit;

        let snapshot = self
            .get_appointment(appointment_id)
            .await?
            .ok_or_else(|| SchedulingError::not_found("Appointment", appointment_id))?;
        let expected_status = snapshot.status;

        // Fields are computed from the snapshot; the function only commits
        // them if the row still holds the status they were computed from.
        let mut updated = snapshot;
        apply_operation(&mut updated, operation, &request, now)?;

        let assign_token = operation == AppointmentOperation::CheckIn && request.token_number.is_none();
        let history = history_entry(
            appointment_id,
            Some(expected_status),
            updated.status,
            request.actor_id,
            request.reason.clone(),
            source,
            now,
        );

        self.call(
            "scheduling_commit_transition",
            json!({
                "p_appointment_id": appointment_id,
                "p_expected_status": expected_status,
                "p_patch": lifecycle_patch(&updated),
                "p_history": to_json(&history)?,
                "p_release_slot": operation.releases_slot(),
                "p_resource_effect": resource_effect(operation),
                "p_assign_token": assign_token,
            }),
            Some(operation),
        )
        .await
    }

    async fn commit_reschedule(&self, commit: RescheduleCommit) -> Result<RescheduleOutcome, SchedulingError> {
        let RescheduleCommit { original_id, replacement, request, now } = commit;

        let snapshot = self
            .get_appointment(original_id)
            .await?
            .ok_or_else(|| SchedulingError::not_found("Appointment", original_id))?;
        let expected_status = snapshot.status;

        let mut original = snapshot;
        apply_operation(&mut original, AppointmentOperation::Reschedule, &request, now)?;

        let original_history = history_entry(
            original_id,
            Some(expected_status),
            original.status,
            request.actor_id,
            request.reason.clone(),
            ChangeSource::Reschedule,
            now,
        );
        let replacement_history = history_entry(
            replacement.id,
            None,
            replacement.status,
            request.actor_id,
            request.reason.clone(),
            ChangeSource::Reschedule,
            now,
        );

        self.call(
            "scheduling_commit_reschedule",
            json!({
                "p_original_id": original_id,
                "p_expected_status": expected_status,
                "p_patch": lifecycle_patch(&original),
                "p_replacement": to_json(&replacement)?,
                "p_history": [to_json(&original_history)?, to_json(&replacement_history)?],
            }),
            Some(AppointmentOperation::Reschedule),
        )
        .await
    }

    async fn list_status_history(&self, appointment_id: Uuid) -> Result<Vec<AppointmentStatusHistory>, SchedulingError> {
        self.select(&format!(
            "/rest/v1/appointment_status_history?appointment_id=eq.{}&order=changed_at.asc",
            appointment_id
        ))
        .await
    }

    // ==========================================================================
    // RESOURCE ALLOCATIONS
    // ==========================================================================

    async fn list_resource_allocations(
        &self,
        resource_type: ResourceType,
        resource_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AppointmentResource>, SchedulingError> {
        self.select(&format!(
            "/rest/v1/appointment_resources?resource_type=eq.{}&resource_id=eq.{}&allocation_date=eq.{}&order=start_time.asc",
            resource_type, resource_id, date
        ))
        .await
    }

    async fn list_appointment_allocations(&self, appointment_id: Uuid) -> Result<Vec<AppointmentResource>, SchedulingError> {
        self.select(&format!(
            "/rest/v1/appointment_resources?appointment_id=eq.{}&order=allocated_at.asc",
            appointment_id
        ))
        .await
    }

    async fn get_allocation(&self, id: Uuid) -> Result<Option<AppointmentResource>, SchedulingError> {
        self.select_one(&format!("/rest/v1/appointment_resources?id=eq.{}&select=*", id)).await
    }

    async fn commit_allocation(&self, allocation: AppointmentResource) -> Result<AppointmentResource, SchedulingError> {
        let result = self
            .call(
                "scheduling_allocate_resource",
                json!({ "p_allocation": to_json(&allocation)? }),
                None,
            )
            .await;
        if let Err(SchedulingError::ResourceNotAvailable { .. }) = &result {
            warn!(
                "Allocation of {} {} lost to a concurrent booking",
                allocation.resource_type, allocation.resource_id
            );
        }
        result
    }

    async fn cancel_allocation(&self, allocation_id: Uuid, now: DateTime<Utc>) -> Result<AppointmentResource, SchedulingError> {
        self.call(
            "scheduling_cancel_allocation",
            json!({ "p_allocation_id": allocation_id, "p_now": now }),
            None,
        )
        .await
    }

    // ==========================================================================
    // CATALOG
    // ==========================================================================

    async fn insert_room(&self, room: Room) -> Result<Room, SchedulingError> {
        self.insert_one("rooms", to_json(&room)?).await
    }

    async fn list_rooms(&self, branch_id: Uuid) -> Result<Vec<Room>, SchedulingError> {
        self.select(&format!("/rest/v1/rooms?branch_id=eq.{}&order=name.asc", branch_id)).await
    }

    async fn insert_staff_member(&self, staff: StaffMember) -> Result<StaffMember, SchedulingError> {
        self.insert_one("staff_members", to_json(&staff)?).await
    }

    async fn list_staff_members(&self, branch_id: Uuid) -> Result<Vec<StaffMember>, SchedulingError> {
        self.select(&format!("/rest/v1/staff_members?branch_id=eq.{}&order=name.asc", branch_id)).await
    }

    async fn insert_requirement(
        &self,
        requirement: ServiceResourceRequirement,
    ) -> Result<ServiceResourceRequirement, SchedulingError> {
        self.insert_one("service_resource_requirements", to_json(&requirement)?).await
    }

    async fn list_requirements(&self, service_id: Uuid) -> Result<Vec<ServiceResourceRequirement>, SchedulingError> {
        self.select(&format!(
            "/rest/v1/service_resource_requirements?service_id=eq.{}&order=is_mandatory.desc",
            service_id
        ))
        .await
    }
}

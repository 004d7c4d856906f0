// libs/scheduling-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentOperation, AppointmentPriority, AppointmentStatus, BookingRequest, BookingSource,
    ChangeSource, RescheduleOutcome, RescheduleRequest, ResourceAllocationStatus, SchedulingError, SchedulingRules,
    Slot, TransitionRequest,
};
use crate::services::exceptions::covering_exception;
use crate::services::history::history_entry;
use crate::services::notifications::{notify_status_change, sync_calendar, AppointmentNotifier, CalendarAction};
use crate::store::{NewBooking, RescheduleCommit, SchedulingStore};

/// Fields a new appointment takes from its booking context.
struct AppointmentDraft {
    patient_id: Uuid,
    purpose: String,
    service_id: Option<Uuid>,
    booking_source: BookingSource,
    priority: AppointmentPriority,
    parent_appointment_id: Option<Uuid>,
    rescheduled_from_id: Option<Uuid>,
    notes: Option<String>,
    status: AppointmentStatus,
    resource_allocation_status: ResourceAllocationStatus,
    created_by: Option<Uuid>,
}

/// The appointment window is the slot window.
fn appointment_for_slot(slot: &Slot, draft: AppointmentDraft, now: DateTime<Utc>) -> Appointment {
    Appointment {
        id: Uuid::new_v4(),
        patient_id: draft.patient_id,
        staff_id: Some(slot.staff_id),
        branch_id: slot.branch_id,
        slot_id: Some(slot.id),
        service_id: draft.service_id,
        purpose: draft.purpose,
        appointment_date: slot.slot_date,
        start_time: slot.start_time,
        end_time: Some(slot.end_time),
        estimated_duration_minutes: (slot.end_time - slot.start_time).num_minutes() as i32,
        status: draft.status,
        booking_source: draft.booking_source,
        priority: draft.priority,
        token_number: None,
        notes: draft.notes,
        confirmed_at: None,
        confirmed_by: None,
        checked_in_at: None,
        checked_in_by: None,
        actual_start_time: None,
        wait_time_minutes: None,
        completed_at: None,
        completed_by: None,
        actual_end_time: None,
        cancelled_at: None,
        cancelled_by: None,
        cancellation_reason: None,
        no_show_at: None,
        no_show_reason: None,
        parent_appointment_id: draft.parent_appointment_id,
        rescheduled_from_id: draft.rescheduled_from_id,
        room_id: slot.room_id,
        therapist_id: None,
        resource_allocation_status: draft.resource_allocation_status,
        created_by: draft.created_by,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}

pub struct BookingService {
    store: Arc<dyn SchedulingStore>,
    notifier: Arc<dyn AppointmentNotifier>,
    rules: SchedulingRules,
}

impl BookingService {
    pub fn new(store: Arc<dyn SchedulingStore>, notifier: Arc<dyn AppointmentNotifier>, rules: SchedulingRules) -> Self {
        Self { store, notifier, rules }
    }

    /// Consumes one unit of the slot and creates the appointment in a single
    /// store command. Losing the race surfaces as `SlotNotAvailable`; the
    /// caller decides which slot to try next.
    #[instrument(skip(self, request), fields(patient_id = %request.patient_id, slot_id = %request.slot_id))]
    pub async fn book(&self, request: BookingRequest) -> Result<Appointment, SchedulingError> {
        if request.purpose.trim().is_empty() {
            return Err(SchedulingError::Validation("Appointment purpose is required".to_string()));
        }

        let slot = self
            .store
            .get_slot(request.slot_id)
            .await?
            .ok_or_else(|| SchedulingError::not_found("Slot", request.slot_id))?;
        self.ensure_not_excepted(&slot).await?;

        if let Some(parent_id) = request.parent_appointment_id {
            if self.store.get_appointment(parent_id).await?.is_none() {
                return Err(SchedulingError::not_found("Parent appointment", parent_id));
            }
        }

        self.ensure_no_patient_conflict(request.patient_id, &slot, None).await?;

        let now = Utc::now();
        let appointment = appointment_for_slot(
            &slot,
            AppointmentDraft {
                patient_id: request.patient_id,
                purpose: request.purpose,
                service_id: request.service_id,
                booking_source: request.booking_source,
                priority: request.priority,
                parent_appointment_id: request.parent_appointment_id,
                rescheduled_from_id: None,
                notes: request.notes,
                status: AppointmentStatus::Requested,
                resource_allocation_status: self.initial_allocation_status(request.service_id).await?,
                created_by: request.actor_id,
            },
            now,
        );
        let history = history_entry(
            appointment.id,
            None,
            AppointmentStatus::Requested,
            request.actor_id,
            None,
            ChangeSource::Api,
            now,
        );

        let booked = match self.store.create_booking(NewBooking { appointment, history }).await {
            Ok(booked) => booked,
            Err(e @ SchedulingError::SlotNotAvailable(_)) => {
                info!("Slot {} no longer available", request.slot_id);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        info!("Appointment {} booked on slot {}", booked.id, request.slot_id);

        notify_status_change(self.notifier.as_ref(), &booked).await;
        sync_calendar(self.notifier.as_ref(), booked.id, CalendarAction::Created).await;

        Ok(booked)
    }

    /// Moves an active appointment to another slot. The original record ends
    /// as `rescheduled`; a new record linked through `rescheduled_from_id`
    /// takes the new slot. Both slot counters move in the same unit of work.
    #[instrument(skip(self, request))]
    pub async fn reschedule(
        &self,
        appointment_id: Uuid,
        request: RescheduleRequest,
    ) -> Result<RescheduleOutcome, SchedulingError> {
        let original = self.get_appointment(appointment_id).await?;
        if !AppointmentOperation::Reschedule.is_valid_from(original.status) {
            return Err(SchedulingError::InvalidTransition {
                operation: AppointmentOperation::Reschedule,
                status: original.status,
            });
        }

        let slot = self
            .store
            .get_slot(request.new_slot_id)
            .await?
            .ok_or_else(|| SchedulingError::not_found("Slot", request.new_slot_id))?;
        self.ensure_not_excepted(&slot).await?;

        self.ensure_no_patient_conflict(original.patient_id, &slot, Some(original.id)).await?;

        // An already confirmed booking stays confirmed on its new slot.
        let status = if original.status == AppointmentStatus::Requested {
            AppointmentStatus::Requested
        } else {
            AppointmentStatus::Confirmed
        };

        let now = Utc::now();
        let mut replacement = appointment_for_slot(
            &slot,
            AppointmentDraft {
                patient_id: original.patient_id,
                purpose: original.purpose.clone(),
                service_id: original.service_id,
                booking_source: original.booking_source,
                priority: original.priority,
                parent_appointment_id: original.parent_appointment_id,
                rescheduled_from_id: Some(original.id),
                notes: original.notes.clone(),
                status,
                resource_allocation_status: self.initial_allocation_status(original.service_id).await?,
                created_by: request.actor_id,
            },
            now,
        );
        if status == AppointmentStatus::Confirmed {
            replacement.confirmed_at = Some(now);
            replacement.confirmed_by = request.actor_id;
        }

        let commit = RescheduleCommit {
            original_id: original.id,
            replacement,
            request: TransitionRequest { actor_id: request.actor_id, reason: request.reason, token_number: None },
            now,
        };

        let outcome = match self.store.commit_reschedule(commit).await {
            Ok(outcome) => outcome,
            Err(e @ SchedulingError::SlotNotAvailable(_)) => {
                info!("Reschedule target slot {} no longer available", request.new_slot_id);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        info!(
            "Appointment {} rescheduled as {}",
            outcome.original.id, outcome.replacement.id
        );

        notify_status_change(self.notifier.as_ref(), &outcome.original).await;
        notify_status_change(self.notifier.as_ref(), &outcome.replacement).await;
        sync_calendar(self.notifier.as_ref(), outcome.original.id, CalendarAction::Cancelled).await;
        sync_calendar(self.notifier.as_ref(), outcome.replacement.id, CalendarAction::Created).await;

        Ok(outcome)
    }

    /// Active appointments of the patient on `date` overlapping `[start, end)`.
    pub async fn find_patient_conflicts(
        &self,
        patient_id: Uuid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        exclude_id: Option<Uuid>,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        if start >= end {
            return Err(SchedulingError::Validation("Start time must be before end time".to_string()));
        }

        let appointments = self.store.list_patient_appointments(patient_id, date).await?;
        Ok(appointments
            .into_iter()
            .filter(|a| Some(a.id) != exclude_id)
            .filter(|a| a.status.is_active() && a.overlaps(date, start, end))
            .collect())
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, SchedulingError> {
        self.store
            .get_appointment(appointment_id)
            .await?
            .ok_or_else(|| SchedulingError::not_found("Appointment", appointment_id))
    }

    pub async fn list_patient_appointments(
        &self,
        patient_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        self.store.list_patient_appointments(patient_id, date).await
    }

    pub async fn list_staff_appointments(&self, staff_id: Uuid, date: NaiveDate) -> Result<Vec<Appointment>, SchedulingError> {
        self.store.list_staff_appointments(staff_id, date).await
    }

    /// A slot under an effective schedule exception is never bookable,
    /// whatever its block flag says.
    async fn ensure_not_excepted(&self, slot: &Slot) -> Result<(), SchedulingError> {
        let exceptions = self.store.list_exceptions(slot.staff_id, slot.slot_date, slot.slot_date).await?;
        if let Some(exception) = covering_exception(&exceptions, slot, None) {
            info!("Slot {} is covered by exception {}", slot.id, exception.id);
            return Err(SchedulingError::SlotNotAvailable(slot.id));
        }
        Ok(())
    }

    async fn ensure_no_patient_conflict(
        &self,
        patient_id: Uuid,
        slot: &Slot,
        exclude_id: Option<Uuid>,
    ) -> Result<(), SchedulingError> {
        if !self.rules.reject_patient_overlap {
            return Ok(());
        }

        let conflicts = self
            .find_patient_conflicts(patient_id, slot.slot_date, slot.start_time, slot.end_time, exclude_id)
            .await?;
        if let Some(existing) = conflicts.first() {
            debug!("Patient {} already booked in appointment {}", patient_id, existing.id);
            return Err(SchedulingError::PatientConflict(existing.id));
        }
        Ok(())
    }

    async fn initial_allocation_status(
        &self,
        service_id: Option<Uuid>,
    ) -> Result<ResourceAllocationStatus, SchedulingError> {
        let requirements = match service_id {
            Some(service_id) => self.store.list_requirements(service_id).await?,
            None => Vec::new(),
        };
        Ok(ResourceAllocationStatus::derive(&requirements, &[]))
    }
}

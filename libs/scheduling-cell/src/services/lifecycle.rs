// libs/scheduling-cell/src/services/lifecycle.rs
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentOperation, AppointmentStatus, AppointmentStatusHistory, ChangeSource,
    ResourceEffect, SchedulingError, TransitionRequest,
};
use crate::services::notifications::{notify_status_change, sync_calendar, AppointmentNotifier, CalendarAction};
use crate::store::{SchedulingStore, TransitionCommit};

// ==============================================================================
// TRANSITION RULES
// ==============================================================================

/// Operations a client may invoke on an appointment in `status`.
pub fn valid_operations(status: AppointmentStatus) -> Vec<AppointmentOperation> {
    AppointmentOperation::ALL
        .into_iter()
        .filter(|op| op.is_valid_from(status))
        .collect()
}

pub fn resource_effect(operation: AppointmentOperation) -> ResourceEffect {
    match operation {
        AppointmentOperation::Start => ResourceEffect::MarkInUse,
        AppointmentOperation::Cancel
        | AppointmentOperation::MarkNoShow
        | AppointmentOperation::Reschedule => ResourceEffect::Cancel,
        _ => ResourceEffect::None,
    }
}

/// Applies `operation` to an appointment snapshot.
///
/// Fails with `InvalidTransition` and leaves the appointment untouched when
/// the operation is not allowed from the current status. Slot and resource
/// side effects are the caller's job.
pub fn apply_operation(
    appointment: &mut Appointment,
    operation: AppointmentOperation,
    request: &TransitionRequest,
    now: DateTime<Utc>,
) -> Result<(), SchedulingError> {
    let current = appointment.status;
    if !operation.is_valid_from(current) {
        return Err(SchedulingError::InvalidTransition { operation, status: current });
    }

    match operation {
        AppointmentOperation::Confirm => {
            appointment.confirmed_at = Some(now);
            appointment.confirmed_by = request.actor_id;
        }
        AppointmentOperation::CheckIn => {
            appointment.checked_in_at = Some(now);
            appointment.checked_in_by = request.actor_id;
            if request.token_number.is_some() {
                appointment.token_number = request.token_number;
            }
        }
        AppointmentOperation::Start => {
            appointment.actual_start_time = Some(now);
            appointment.wait_time_minutes = appointment
                .checked_in_at
                .map(|checked_in| (now - checked_in).num_minutes().max(0));
        }
        AppointmentOperation::Complete => {
            appointment.completed_at = Some(now);
            appointment.completed_by = request.actor_id;
            appointment.actual_end_time = Some(now);
        }
        AppointmentOperation::Cancel => {
            appointment.cancelled_at = Some(now);
            appointment.cancelled_by = request.actor_id;
            appointment.cancellation_reason = request.reason.clone();
        }
        AppointmentOperation::MarkNoShow => {
            appointment.no_show_at = Some(now);
            appointment.no_show_reason = request.reason.clone();
        }
        AppointmentOperation::Reschedule => {}
    }

    appointment.status = operation.target_status();
    appointment.updated_at = now;
    Ok(())
}

// ==============================================================================
// SERVICE
// ==============================================================================

pub struct AppointmentLifecycleService {
    store: Arc<dyn SchedulingStore>,
    notifier: Arc<dyn AppointmentNotifier>,
}

impl AppointmentLifecycleService {
    pub fn new(store: Arc<dyn SchedulingStore>, notifier: Arc<dyn AppointmentNotifier>) -> Self {
        Self { store, notifier }
    }

    pub async fn confirm(&self, appointment_id: Uuid, request: TransitionRequest) -> Result<Appointment, SchedulingError> {
        self.transition(appointment_id, AppointmentOperation::Confirm, request).await
    }

    /// Without an explicit token the store assigns the next token for the
    /// staff member and date.
    pub async fn check_in(&self, appointment_id: Uuid, request: TransitionRequest) -> Result<Appointment, SchedulingError> {
        if let Some(token) = request.token_number {
            if token <= 0 {
                return Err(SchedulingError::Validation("Token number must be positive".to_string()));
            }
        }
        self.transition(appointment_id, AppointmentOperation::CheckIn, request).await
    }

    pub async fn start(&self, appointment_id: Uuid, request: TransitionRequest) -> Result<Appointment, SchedulingError> {
        self.transition(appointment_id, AppointmentOperation::Start, request).await
    }

    pub async fn complete(&self, appointment_id: Uuid, request: TransitionRequest) -> Result<Appointment, SchedulingError> {
        self.transition(appointment_id, AppointmentOperation::Complete, request).await
    }

    pub async fn cancel(&self, appointment_id: Uuid, request: TransitionRequest) -> Result<Appointment, SchedulingError> {
        self.transition(appointment_id, AppointmentOperation::Cancel, request).await
    }

    pub async fn mark_no_show(&self, appointment_id: Uuid, request: TransitionRequest) -> Result<Appointment, SchedulingError> {
        self.transition(appointment_id, AppointmentOperation::MarkNoShow, request).await
    }

    pub async fn status_history(&self, appointment_id: Uuid) -> Result<Vec<AppointmentStatusHistory>, SchedulingError> {
        if self.store.get_appointment(appointment_id).await?.is_none() {
            return Err(SchedulingError::not_found("Appointment", appointment_id));
        }
        self.store.list_status_history(appointment_id).await
    }

    pub async fn valid_operations_for(&self, appointment_id: Uuid) -> Result<Vec<AppointmentOperation>, SchedulingError> {
        let appointment = self
            .store
            .get_appointment(appointment_id)
            .await?
            .ok_or_else(|| SchedulingError::not_found("Appointment", appointment_id))?;
        Ok(valid_operations(appointment.status))
    }

    #[instrument(skip(self, request))]
    async fn transition(
        &self,
        appointment_id: Uuid,
        operation: AppointmentOperation,
        request: TransitionRequest,
    ) -> Result<Appointment, SchedulingError> {
        debug!("Applying {} to appointment {}", operation, appointment_id);

        let commit = TransitionCommit {
            appointment_id,
            operation,
            request,
            source: ChangeSource::Api,
            now: Utc::now(),
        };

        let updated = match self.store.commit_transition(commit).await {
            Ok(appointment) => appointment,
            Err(e @ SchedulingError::InvalidTransition { .. }) => {
                warn!("Rejected transition on appointment {}: {}", appointment_id, e);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        info!("Appointment {} is now {}", appointment_id, updated.status);

        notify_status_change(self.notifier.as_ref(), &updated).await;
        let action = if operation.releases_slot() { CalendarAction::Cancelled } else { CalendarAction::Updated };
        sync_calendar(self.notifier.as_ref(), updated.id, action).await;

        Ok(updated)
    }
}

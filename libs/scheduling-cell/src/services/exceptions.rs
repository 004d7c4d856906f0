// libs/scheduling-cell/src/services/exceptions.rs
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::models::{
    ApprovalStatus, CreateExceptionRequest, ExceptionOutcome, ScheduleException, SchedulingError, Slot, SlotChange,
};
use crate::store::SchedulingStore;

pub struct ExceptionService {
    store: Arc<dyn SchedulingStore>,
}

impl ExceptionService {
    pub fn new(store: Arc<dyn SchedulingStore>) -> Self {
        Self { store }
    }

    /// Exceptions that don't need approval take effect at once and block
    /// the slots they cover.
    #[instrument(skip(self, request), fields(staff_id = %request.staff_id))]
    pub async fn create_exception(&self, request: CreateExceptionRequest) -> Result<ExceptionOutcome, SchedulingError> {
        let now = Utc::now();
        let requires_approval = request.requires_approval.unwrap_or(false);

        let exception = ScheduleException {
            id: Uuid::new_v4(),
            staff_id: request.staff_id,
            branch_id: request.branch_id,
            exception_date: request.exception_date,
            start_time: request.start_time,
            end_time: request.end_time,
            exception_type: request.exception_type,
            reason: request.reason,
            requires_approval,
            approval_status: if requires_approval { ApprovalStatus::Pending } else { ApprovalStatus::Approved },
            approved_by: None,
            approved_at: if requires_approval { None } else { Some(now) },
            created_by: request.created_by,
            created_at: now,
            deleted_at: None,
        };
        exception.validate()?;

        let exception = self.store.insert_exception(exception).await?;
        info!(
            "Schedule exception {} ({}) created for {}",
            exception.id, exception.exception_type, exception.exception_date
        );

        if exception.is_effective() {
            self.overlay(exception).await
        } else {
            debug!("Exception {} awaits approval", exception.id);
            Ok(ExceptionOutcome { exception, blocked_slots: Vec::new(), slots_with_bookings: Vec::new() })
        }
    }

    #[instrument(skip(self))]
    pub async fn approve_exception(
        &self,
        exception_id: Uuid,
        approver_id: Option<Uuid>,
    ) -> Result<ExceptionOutcome, SchedulingError> {
        let mut exception = self.pending(exception_id).await?;

        let now = Utc::now();
        exception.approval_status = ApprovalStatus::Approved;
        exception.approved_by = approver_id;
        exception.approved_at = Some(now);

        let exception = self.store.update_exception(exception).await?;
        info!("Schedule exception {} approved", exception_id);

        self.overlay(exception).await
    }

    pub async fn reject_exception(
        &self,
        exception_id: Uuid,
        approver_id: Option<Uuid>,
    ) -> Result<ScheduleException, SchedulingError> {
        let mut exception = self.pending(exception_id).await?;

        exception.approval_status = ApprovalStatus::Rejected;
        exception.approved_by = approver_id;
        exception.approved_at = Some(Utc::now());

        let exception = self.store.update_exception(exception).await?;
        info!("Schedule exception {} rejected", exception_id);
        Ok(exception)
    }

    /// Soft delete. Slots this exception blocked are handed to another
    /// effective exception that still covers them, or unblocked.
    #[instrument(skip(self))]
    pub async fn delete_exception(&self, exception_id: Uuid) -> Result<ScheduleException, SchedulingError> {
        let mut exception = self.get_exception(exception_id).await?;
        if exception.deleted_at.is_some() {
            return Ok(exception);
        }

        exception.deleted_at = Some(Utc::now());
        let exception = self.store.update_exception(exception).await?;

        let date = exception.exception_date;
        let remaining = self.store.list_exceptions(exception.staff_id, date, date).await?;
        let slots = self.store.list_slots(exception.staff_id, date, date).await?;

        let (mut released, mut handed_over) = (0, 0);
        for slot in slots.iter().filter(|s| s.blocked_by_exception_id == Some(exception_id)) {
            match covering_exception(&remaining, slot, Some(exception_id)) {
                Some(other) => {
                    self.store.apply_slot_change(slot.id, block_change(other)).await?;
                    handed_over += 1;
                }
                None => {
                    self.store.apply_slot_change(slot.id, SlotChange::Unblock).await?;
                    released += 1;
                }
            }
        }

        info!(
            "Schedule exception {} deleted, {} slots unblocked, {} still covered by other exceptions",
            exception_id, released, handed_over
        );
        Ok(exception)
    }

    pub async fn get_exception(&self, exception_id: Uuid) -> Result<ScheduleException, SchedulingError> {
        self.store
            .get_exception(exception_id)
            .await?
            .ok_or_else(|| SchedulingError::not_found("Exception", exception_id))
    }

    pub async fn list_exceptions(
        &self,
        staff_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ScheduleException>, SchedulingError> {
        if to < from {
            return Err(SchedulingError::Validation("to_date must not be before from_date".to_string()));
        }
        self.store.list_exceptions(staff_id, from, to).await
    }

    async fn pending(&self, exception_id: Uuid) -> Result<ScheduleException, SchedulingError> {
        let exception = self.get_exception(exception_id).await?;
        if exception.deleted_at.is_some() || exception.approval_status != ApprovalStatus::Pending {
            return Err(SchedulingError::Validation(format!(
                "Only pending exceptions can be approved or rejected (exception {} is {:?})",
                exception_id, exception.approval_status
            )));
        }
        Ok(exception)
    }

    /// Blocks every covered slot that is not blocked yet. Slots already
    /// blocked by hand or by another exception keep their owner. Covered
    /// slots that hold bookings are reported for manual follow-up; their
    /// appointments are left alone.
    async fn overlay(&self, exception: ScheduleException) -> Result<ExceptionOutcome, SchedulingError> {
        let slots = self
            .store
            .list_slots(exception.staff_id, exception.exception_date, exception.exception_date)
            .await?;

        let mut blocked_slots = Vec::new();
        let mut slots_with_bookings = Vec::new();

        for slot in slots.into_iter().filter(|s| exception.covers_slot(s)) {
            let slot = if slot.is_blocked && slot.blocked_by_exception_id != Some(exception.id) {
                debug!("Slot {} already blocked, left with its owner", slot.id);
                slot
            } else {
                let blocked = self.store.apply_slot_change(slot.id, block_change(&exception)).await?;
                blocked_slots.push(blocked.clone());
                blocked
            };

            if slot.current_bookings > 0 {
                warn!(
                    "Slot {} covered by exception {} still holds {} bookings",
                    slot.id, exception.id, slot.current_bookings
                );
                slots_with_bookings.push(slot);
            }
        }

        info!("Exception {} blocked {} slots", exception.id, blocked_slots.len());
        Ok(ExceptionOutcome { exception, blocked_slots, slots_with_bookings })
    }
}

/// First effective exception, other than `excluding`, covering the slot.
pub fn covering_exception<'a>(
    exceptions: &'a [ScheduleException],
    slot: &Slot,
    excluding: Option<Uuid>,
) -> Option<&'a ScheduleException> {
    exceptions
        .iter()
        .filter(|e| Some(e.id) != excluding)
        .find(|e| e.is_effective() && e.covers_slot(slot))
}

fn block_change(exception: &ScheduleException) -> SlotChange {
    let reason = match &exception.reason {
        Some(reason) => format!("{}: {}", exception.exception_type, reason),
        None => exception.exception_type.to_string(),
    };
    SlotChange::Block {
        reason,
        actor_id: exception.approved_by.or(exception.created_by),
        exception_id: Some(exception.id),
    }
}

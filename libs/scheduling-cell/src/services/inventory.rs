// libs/scheduling-cell/src/services/inventory.rs
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::models::{BlockSlotRequest, SchedulingError, Slot, SlotChange, SlotFilters};
use crate::services::exceptions::covering_exception;
use crate::store::SchedulingStore;

/// Capacity counters and administrative blocks on materialised slots. Every
/// mutation is a single atomic store command; nothing here reads a slot and
/// writes it back.
pub struct SlotInventoryService {
    store: Arc<dyn SchedulingStore>,
}

impl SlotInventoryService {
    pub fn new(store: Arc<dyn SchedulingStore>) -> Self {
        Self { store }
    }

    /// Takes one unit without creating an appointment. Appointment bookings
    /// go through `BookingService`, which reserves in the same unit of work.
    #[instrument(skip(self))]
    pub async fn reserve(&self, slot_id: Uuid) -> Result<Slot, SchedulingError> {
        match self.store.apply_slot_change(slot_id, SlotChange::Reserve).await {
            Err(e @ SchedulingError::SlotNotAvailable(_)) => {
                info!("Slot {} no longer available", slot_id);
                Err(e)
            }
            other => other,
        }
    }

    /// Gives one unit back. Releasing an empty slot is a no-op.
    #[instrument(skip(self))]
    pub async fn cancel_booking(&self, slot_id: Uuid) -> Result<Slot, SchedulingError> {
        self.store.apply_slot_change(slot_id, SlotChange::Release).await
    }

    pub async fn block_slot(&self, slot_id: Uuid, request: BlockSlotRequest) -> Result<Slot, SchedulingError> {
        if request.reason.trim().is_empty() {
            return Err(SchedulingError::Validation("A block reason is required".to_string()));
        }

        let slot = self
            .store
            .apply_slot_change(
                slot_id,
                SlotChange::Block { reason: request.reason, actor_id: request.actor_id, exception_id: None },
            )
            .await?;
        info!("Slot {} blocked", slot_id);
        Ok(slot)
    }

    /// Lifts a block. Refused while an effective exception still covers the
    /// slot; deleting the exception releases it.
    pub async fn unblock_slot(&self, slot_id: Uuid) -> Result<Slot, SchedulingError> {
        let slot = self.get_slot(slot_id).await?;
        let exceptions = self.store.list_exceptions(slot.staff_id, slot.slot_date, slot.slot_date).await?;
        if let Some(exception) = covering_exception(&exceptions, &slot, None) {
            warn!("Slot {} is covered by exception {}, not unblocking", slot_id, exception.id);
            return Err(SchedulingError::Validation(format!(
                "Slot {} is covered by schedule exception {}",
                slot_id, exception.id
            )));
        }

        let slot = self.store.apply_slot_change(slot_id, SlotChange::Unblock).await?;
        info!("Slot {} unblocked", slot_id);
        Ok(slot)
    }

    pub async fn get_slot(&self, slot_id: Uuid) -> Result<Slot, SchedulingError> {
        let slot = self
            .store
            .get_slot(slot_id)
            .await?
            .ok_or_else(|| SchedulingError::not_found("Slot", slot_id))?;
        checked(&slot)?;
        Ok(slot)
    }

    /// Bookable slots for a staff member on a date, after exception overlay
    /// and caller filters.
    pub async fn get_available_slots(
        &self,
        staff_id: Uuid,
        date: NaiveDate,
        filters: SlotFilters,
    ) -> Result<Vec<Slot>, SchedulingError> {
        let slots = self.store.list_slots(staff_id, date, date).await?;
        for slot in &slots {
            checked(slot)?;
        }
        let exceptions = self.store.list_exceptions(staff_id, date, date).await?;

        let available: Vec<Slot> = slots
            .into_iter()
            .filter(|s| s.is_bookable())
            .filter(|s| covering_exception(&exceptions, s, None).is_none())
            .filter(|s| filters.branch_id.map_or(true, |b| s.branch_id == b))
            .filter(|s| filters.earliest_start.map_or(true, |t| s.start_time >= t))
            .filter(|s| filters.latest_start.map_or(true, |t| s.start_time <= t))
            .filter(|s| filters.min_remaining_capacity.map_or(true, |n| s.remaining_capacity() >= n))
            .collect();

        debug!("{} bookable slots for staff {} on {}", available.len(), staff_id, date);
        Ok(available)
    }
}

/// A slot read back with broken counters is reported, never served.
fn checked(slot: &Slot) -> Result<(), SchedulingError> {
    slot.check_invariants().inspect_err(|e| error!("Slot invariant breach detected: {}", e))
}

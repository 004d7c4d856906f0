// libs/scheduling-cell/src/store/memory.rs
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::models::{
    AllocationStatus, Appointment, AppointmentOperation, AppointmentResource, AppointmentStatusHistory,
    AvailabilityTemplate, ChangeSource, RescheduleOutcome, ResourceAllocationStatus, ResourceEffect,
    ResourceType, Room, ScheduleException, SchedulingError, ServiceResourceRequirement, Slot, SlotChange,
    SlotKey, StaffMember,
};
use crate::services::history::{history_entry, order_trail};
use crate::services::lifecycle::{apply_operation, resource_effect};
use crate::store::{NewBooking, RescheduleCommit, SchedulingStore, TransitionCommit};

type Row<T> = Arc<Mutex<T>>;

#[derive(Default)]
struct SlotTable {
    rows: HashMap<Uuid, Row<Slot>>,
    by_key: HashMap<SlotKey, Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ResourceKey {
    resource_type: ResourceType,
    resource_id: Uuid,
    date: NaiveDate,
}

/// Process-local store. Each slot and appointment is its own lockable row;
/// resource allocations are serialised per resource and date.
#[derive(Default)]
pub struct InMemoryStore {
    templates: RwLock<HashMap<Uuid, AvailabilityTemplate>>,
    exceptions: RwLock<HashMap<Uuid, ScheduleException>>,
    slots: RwLock<SlotTable>,
    appointments: RwLock<HashMap<Uuid, Row<Appointment>>>,
    history: RwLock<Vec<AppointmentStatusHistory>>,
    allocations: RwLock<HashMap<Uuid, AppointmentResource>>,
    resource_locks: Mutex<HashMap<ResourceKey, Row<()>>>,
    token_counters: Mutex<HashMap<(Option<Uuid>, NaiveDate), i32>>,
    rooms: RwLock<HashMap<Uuid, Room>>,
    staff: RwLock<HashMap<Uuid, StaffMember>>,
    requirements: RwLock<HashMap<Uuid, ServiceResourceRequirement>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot_row(&self, id: Uuid) -> Result<Row<Slot>, SchedulingError> {
        self.slots
            .read()
            .await
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| SchedulingError::not_found("Slot", id))
    }

    async fn appointment_row(&self, id: Uuid) -> Result<Row<Appointment>, SchedulingError> {
        self.appointments
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| SchedulingError::not_found("Appointment", id))
    }

    async fn resource_lock(&self, key: ResourceKey) -> Row<()> {
        self.resource_locks.lock().await.entry(key).or_default().clone()
    }

    async fn next_token(&self, staff_id: Option<Uuid>, date: NaiveDate) -> i32 {
        let mut counters = self.token_counters.lock().await;
        let counter = counters.entry((staff_id, date)).or_insert(0);
        *counter += 1;
        *counter
    }

    async fn note_token(&self, staff_id: Option<Uuid>, date: NaiveDate, token: i32) {
        let mut counters = self.token_counters.lock().await;
        let counter = counters.entry((staff_id, date)).or_insert(0);
        *counter = (*counter).max(token);
    }

    /// Live allocations of the appointment measured against its service's
    /// requirements. Callers hold the appointment row and the allocation table.
    async fn allocation_summary(
        &self,
        appointment: &Appointment,
        allocations: &HashMap<Uuid, AppointmentResource>,
    ) -> ResourceAllocationStatus {
        let requirements: Vec<ServiceResourceRequirement> = match appointment.service_id {
            Some(service_id) => self
                .requirements
                .read()
                .await
                .values()
                .filter(|r| r.service_id == service_id)
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        let mut live: Vec<AppointmentResource> = allocations
            .values()
            .filter(|a| a.appointment_id == appointment.id && a.is_active())
            .cloned()
            .collect();
        live.sort_by_key(|a| a.allocated_at);
        ResourceAllocationStatus::derive(&requirements, &live)
    }

    /// Snapshot of every appointment row matching `filter`.
    async fn collect_appointments<F>(&self, filter: F) -> Vec<Appointment>
    where
        F: Fn(&Appointment) -> bool,
    {
        let rows: Vec<Row<Appointment>> = self.appointments.read().await.values().cloned().collect();
        let mut out = Vec::new();
        for row in rows {
            let appointment = row.lock().await;
            if filter(&*appointment) {
                out.push(appointment.clone());
            }
        }
        out.sort_by_key(|a| (a.appointment_date, a.start_time));
        out
    }
}

fn report_violation(e: &SchedulingError) {
    if let SchedulingError::ConsistencyViolation(msg) = e {
        error!("Slot invariant breach detected: {}", msg);
    }
}

fn apply_resource_effect(
    allocations: &mut HashMap<Uuid, AppointmentResource>,
    appointment_id: Uuid,
    effect: ResourceEffect,
    now: DateTime<Utc>,
) {
    for allocation in allocations.values_mut().filter(|a| a.appointment_id == appointment_id) {
        match (effect, allocation.status) {
            (ResourceEffect::MarkInUse, AllocationStatus::Allocated) => {
                allocation.status = AllocationStatus::InUse;
            }
            (ResourceEffect::Cancel, AllocationStatus::Allocated | AllocationStatus::InUse) => {
                allocation.status = AllocationStatus::Cancelled;
                allocation.cancelled_at = Some(now);
            }
            _ => {}
        }
    }
}

#[async_trait]
impl SchedulingStore for InMemoryStore {
    // ==========================================================================
    // TEMPLATES
    // ==========================================================================

    async fn insert_template(&self, template: AvailabilityTemplate) -> Result<AvailabilityTemplate, SchedulingError> {
        let mut templates = self.templates.write().await;
        let duplicate = templates.values().any(|t| {
            !t.is_deleted()
                && t.staff_id == template.staff_id
                && t.branch_id == template.branch_id
                && t.day_of_week == template.day_of_week
                && t.start_time == template.start_time
        });
        if duplicate {
            return Err(SchedulingError::Validation(
                "A template already exists for this staff, branch, day and start time".to_string(),
            ));
        }
        templates.insert(template.id, template.clone());
        Ok(template)
    }

    async fn update_template(&self, template: AvailabilityTemplate) -> Result<AvailabilityTemplate, SchedulingError> {
        let mut templates = self.templates.write().await;
        if !templates.contains_key(&template.id) {
            return Err(SchedulingError::not_found("Template", template.id));
        }
        templates.insert(template.id, template.clone());
        Ok(template)
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<AvailabilityTemplate>, SchedulingError> {
        Ok(self.templates.read().await.get(&id).cloned())
    }

    async fn list_templates(
        &self,
        staff_id: Uuid,
        branch_id: Option<Uuid>,
    ) -> Result<Vec<AvailabilityTemplate>, SchedulingError> {
        let mut templates: Vec<AvailabilityTemplate> = self
            .templates
            .read()
            .await
            .values()
            .filter(|t| !t.is_deleted() && t.staff_id == staff_id)
            .filter(|t| branch_id.map_or(true, |b| t.branch_id == b))
            .cloned()
            .collect();
        templates.sort_by_key(|t| (t.day_of_week, t.start_time));
        Ok(templates)
    }

    // ==========================================================================
    // EXCEPTIONS
    // ==========================================================================

    async fn insert_exception(&self, exception: ScheduleException) -> Result<ScheduleException, SchedulingError> {
        self.exceptions.write().await.insert(exception.id, exception.clone());
        Ok(exception)
    }

    async fn update_exception(&self, exception: ScheduleException) -> Result<ScheduleException, SchedulingError> {
        let mut exceptions = self.exceptions.write().await;
        if !exceptions.contains_key(&exception.id) {
            return Err(SchedulingError::not_found("Exception", exception.id));
        }
        exceptions.insert(exception.id, exception.clone());
        Ok(exception)
    }

    async fn get_exception(&self, id: Uuid) -> Result<Option<ScheduleException>, SchedulingError> {
        Ok(self.exceptions.read().await.get(&id).cloned())
    }

    async fn list_exceptions(
        &self,
        staff_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ScheduleException>, SchedulingError> {
        let mut exceptions: Vec<ScheduleException> = self
            .exceptions
            .read()
            .await
            .values()
            .filter(|e| {
                e.deleted_at.is_none() && e.staff_id == staff_id && e.exception_date >= from && e.exception_date <= to
            })
            .cloned()
            .collect();
        exceptions.sort_by_key(|e| (e.exception_date, e.start_time));
        Ok(exceptions)
    }

    // ==========================================================================
    // SLOTS
    // ==========================================================================

    async fn insert_slots_if_absent(&self, slots: Vec<Slot>) -> Result<Vec<Slot>, SchedulingError> {
        let mut table = self.slots.write().await;
        let mut inserted = Vec::new();

        for slot in slots {
            let key = slot.key();
            if table.by_key.contains_key(&key) {
                continue;
            }
            table.by_key.insert(key, slot.id);
            table.rows.insert(slot.id, Arc::new(Mutex::new(slot.clone())));
            inserted.push(slot);
        }

        debug!("Inserted {} new slots", inserted.len());
        Ok(inserted)
    }

    async fn get_slot(&self, id: Uuid) -> Result<Option<Slot>, SchedulingError> {
        let row = self.slots.read().await.rows.get(&id).cloned();
        match row {
            Some(row) => Ok(Some(row.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn list_slots(&self, staff_id: Uuid, from: NaiveDate, to: NaiveDate) -> Result<Vec<Slot>, SchedulingError> {
        let rows: Vec<Row<Slot>> = self.slots.read().await.rows.values().cloned().collect();
        let mut out = Vec::new();
        for row in rows {
            let slot = row.lock().await;
            if slot.staff_id == staff_id && slot.slot_date >= from && slot.slot_date <= to {
                out.push(slot.clone());
            }
        }
        out.sort_by_key(|s| (s.slot_date, s.start_time, s.branch_id));
        Ok(out)
    }

    async fn apply_slot_change(&self, slot_id: Uuid, change: SlotChange) -> Result<Slot, SchedulingError> {
        let row = self.slot_row(slot_id).await?;
        let mut guard = row.lock().await;

        let mut updated = guard.clone();
        updated.apply(&change, Utc::now()).inspect_err(report_violation)?;
        *guard = updated.clone();

        debug!("Slot {} now {}/{} (blocked: {})", slot_id, updated.current_bookings, updated.max_bookings, updated.is_blocked);
        Ok(updated)
    }

    // ==========================================================================
    // APPOINTMENTS
    // ==========================================================================

    async fn create_booking(&self, booking: NewBooking) -> Result<Appointment, SchedulingError> {
        let NewBooking { appointment, history } = booking;
        let slot_id = appointment
            .slot_id
            .ok_or_else(|| SchedulingError::Validation("Booking requires a slot".to_string()))?;

        let row = self.slot_row(slot_id).await?;
        let mut slot_guard = row.lock().await;

        let mut slot = slot_guard.clone();
        slot.reserve(appointment.created_at).inspect_err(report_violation)?;

        {
            let mut appointments = self.appointments.write().await;
            if appointments.contains_key(&appointment.id) {
                return Err(SchedulingError::Validation(format!("Appointment {} already exists", appointment.id)));
            }
            appointments.insert(appointment.id, Arc::new(Mutex::new(appointment.clone())));
        }
        self.history.write().await.push(history);
        *slot_guard = slot;

        Ok(appointment)
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, SchedulingError> {
        let row = self.appointments.read().await.get(&id).cloned();
        match row {
            Some(row) => Ok(Some(row.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn list_patient_appointments(
        &self,
        patient_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        Ok(self
            .collect_appointments(|a| a.deleted_at.is_none() && a.patient_id == patient_id && a.appointment_date == date)
            .await)
    }

    async fn list_staff_appointments(&self, staff_id: Uuid, date: NaiveDate) -> Result<Vec<Appointment>, SchedulingError> {
        Ok(self
            .collect_appointments(|a| a.deleted_at.is_none() && a.staff_id == Some(staff_id) && a.appointment_date == date)
            .await)
    }

    async fn commit_transition(&self, commit: TransitionCommit) -> Result<Appointment, SchedulingError> {
        let TransitionCommit { appointment_id, operation, mut request, source, now } = commit;

        let row = self.appointment_row(appointment_id).await?;
        let mut guard = row.lock().await;
        let from_status = guard.status;

        if !operation.is_valid_from(from_status) {
            return Err(SchedulingError::InvalidTransition { operation, status: from_status });
        }

        if operation == AppointmentOperation::CheckIn {
            match request.token_number {
                Some(token) => self.note_token(guard.staff_id, guard.appointment_date, token).await,
                None => request.token_number = Some(self.next_token(guard.staff_id, guard.appointment_date).await),
            }
        }

        let mut updated = guard.clone();
        apply_operation(&mut updated, operation, &request, now)?;

        // Slot release happens under the slot row lock, after the appointment row.
        let slot_row = match updated.slot_id {
            Some(slot_id) if operation.releases_slot() => Some(self.slot_row(slot_id).await?),
            _ => None,
        };
        let mut slot_guard = match &slot_row {
            Some(row) => Some(row.lock().await),
            None => None,
        };
        let released = match slot_guard.as_deref() {
            Some(current) => {
                let mut slot = current.clone();
                slot.release(now).inspect_err(report_violation)?;
                Some(slot)
            }
            None => None,
        };

        let effect = resource_effect(operation);
        if effect != ResourceEffect::None {
            let mut allocations = self.allocations.write().await;
            apply_resource_effect(&mut allocations, appointment_id, effect, now);
            updated.resource_allocation_status = self.allocation_summary(&updated, &allocations).await;
        }
        if let (Some(row), Some(slot)) = (slot_guard.as_deref_mut(), released) {
            *row = slot;
        }
        self.history.write().await.push(history_entry(
            appointment_id,
            Some(from_status),
            updated.status,
            request.actor_id,
            request.reason.clone(),
            source,
            now,
        ));
        *guard = updated.clone();

        Ok(updated)
    }

    async fn commit_reschedule(&self, commit: RescheduleCommit) -> Result<RescheduleOutcome, SchedulingError> {
        let RescheduleCommit { original_id, replacement, request, now } = commit;

        let row = self.appointment_row(original_id).await?;
        let mut guard = row.lock().await;
        let from_status = guard.status;

        if !AppointmentOperation::Reschedule.is_valid_from(from_status) {
            return Err(SchedulingError::InvalidTransition {
                operation: AppointmentOperation::Reschedule,
                status: from_status,
            });
        }

        let new_slot_id = replacement
            .slot_id
            .ok_or_else(|| SchedulingError::Validation("Replacement appointment requires a slot".to_string()))?;
        if guard.slot_id == Some(new_slot_id) {
            return Err(SchedulingError::Validation(
                "Cannot reschedule an appointment into its own slot".to_string(),
            ));
        }

        let new_row = self.slot_row(new_slot_id).await?;
        let old_row = match guard.slot_id {
            Some(id) => Some((id, self.slot_row(id).await?)),
            None => None,
        };

        // Both slot rows are locked in id order.
        let (mut new_guard, mut old_guard) = match &old_row {
            Some((old_id, old)) if *old_id < new_slot_id => {
                let o = old.lock().await;
                let n = new_row.lock().await;
                (n, Some(o))
            }
            Some((_, old)) => {
                let n = new_row.lock().await;
                let o = old.lock().await;
                (n, Some(o))
            }
            None => (new_row.lock().await, None),
        };

        let mut new_slot = new_guard.clone();
        new_slot.reserve(now).inspect_err(report_violation)?;

        let old_slot = match old_guard.as_deref() {
            Some(current) => {
                let mut slot = current.clone();
                slot.release(now).inspect_err(report_violation)?;
                Some(slot)
            }
            None => None,
        };

        let mut original = guard.clone();
        apply_operation(&mut original, AppointmentOperation::Reschedule, &request, now)?;

        {
            let mut appointments = self.appointments.write().await;
            if appointments.contains_key(&replacement.id) {
                return Err(SchedulingError::Validation(format!("Appointment {} already exists", replacement.id)));
            }
            appointments.insert(replacement.id, Arc::new(Mutex::new(replacement.clone())));
        }
        {
            let mut allocations = self.allocations.write().await;
            apply_resource_effect(&mut allocations, original_id, ResourceEffect::Cancel, now);
            original.resource_allocation_status = self.allocation_summary(&original, &allocations).await;
        }
        {
            let mut history = self.history.write().await;
            history.push(history_entry(
                original_id,
                Some(from_status),
                original.status,
                request.actor_id,
                request.reason.clone(),
                ChangeSource::Reschedule,
                now,
            ));
            history.push(history_entry(
                replacement.id,
                None,
                replacement.status,
                request.actor_id,
                request.reason.clone(),
                ChangeSource::Reschedule,
                now,
            ));
        }

        *new_guard = new_slot;
        if let (Some(row), Some(slot)) = (old_guard.as_deref_mut(), old_slot) {
            *row = slot;
        }
        *guard = original.clone();

        info!("Appointment {} rescheduled to {}", original_id, replacement.id);
        Ok(RescheduleOutcome { original, replacement })
    }

    async fn list_status_history(&self, appointment_id: Uuid) -> Result<Vec<AppointmentStatusHistory>, SchedulingError> {
        let entries: Vec<AppointmentStatusHistory> = self
            .history
            .read()
            .await
            .iter()
            .filter(|h| h.appointment_id == appointment_id)
            .cloned()
            .collect();
        Ok(order_trail(entries))
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
        let mut rows: Vec<AppointmentResource> = self
            .allocations
            .read()
            .await
            .values()
            .filter(|a| a.resource_type == resource_type && a.resource_id == resource_id && a.allocation_date == date)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.start_time);
        Ok(rows)
    }

    async fn list_appointment_allocations(&self, appointment_id: Uuid) -> Result<Vec<AppointmentResource>, SchedulingError> {
        let mut rows: Vec<AppointmentResource> = self
            .allocations
            .read()
            .await
            .values()
            .filter(|a| a.appointment_id == appointment_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.allocated_at);
        Ok(rows)
    }

    async fn get_allocation(&self, id: Uuid) -> Result<Option<AppointmentResource>, SchedulingError> {
        Ok(self.allocations.read().await.get(&id).cloned())
    }

    async fn commit_allocation(&self, allocation: AppointmentResource) -> Result<AppointmentResource, SchedulingError> {
        let row = self.appointment_row(allocation.appointment_id).await?;
        let mut appointment = row.lock().await;

        if !appointment.status.is_active() {
            return Err(SchedulingError::Validation(format!(
                "Resources can only be allocated to active appointments (status is {})",
                appointment.status
            )));
        }

        let key = ResourceKey {
            resource_type: allocation.resource_type,
            resource_id: allocation.resource_id,
            date: allocation.allocation_date,
        };
        let lock = self.resource_lock(key).await;
        let _resource_guard = lock.lock().await;

        let mut allocations = self.allocations.write().await;
        let conflict = allocations.values().any(|existing| {
            existing.resource_type == allocation.resource_type
                && existing.resource_id == allocation.resource_id
                && existing.conflicts_with(allocation.allocation_date, allocation.start_time, allocation.end_time)
        });
        if conflict {
            return Err(SchedulingError::ResourceNotAvailable {
                resource_type: allocation.resource_type,
                resource_id: allocation.resource_id,
            });
        }
        allocations.insert(allocation.id, allocation.clone());

        match allocation.resource_type {
            ResourceType::Room => appointment.room_id = Some(allocation.resource_id),
            ResourceType::Staff => appointment.therapist_id = Some(allocation.resource_id),
        }
        let summary = self.allocation_summary(&appointment, &allocations).await;
        appointment.resource_allocation_status = summary;
        appointment.updated_at = allocation.allocated_at;
        debug!(
            "Appointment {} allocation status now {:?}",
            appointment.id, appointment.resource_allocation_status
        );

        Ok(allocation)
    }

    async fn cancel_allocation(&self, allocation_id: Uuid, now: DateTime<Utc>) -> Result<AppointmentResource, SchedulingError> {
        let snapshot = self
            .get_allocation(allocation_id)
            .await?
            .ok_or_else(|| SchedulingError::not_found("Allocation", allocation_id))?;

        let row = self.appointment_row(snapshot.appointment_id).await?;
        let mut appointment = row.lock().await;

        let key = ResourceKey {
            resource_type: snapshot.resource_type,
            resource_id: snapshot.resource_id,
            date: snapshot.allocation_date,
        };
        let lock = self.resource_lock(key).await;
        let _resource_guard = lock.lock().await;

        let mut allocations = self.allocations.write().await;
        let allocation = allocations
            .get_mut(&allocation_id)
            .ok_or_else(|| SchedulingError::not_found("Allocation", allocation_id))?;
        if !allocation.is_active() {
            return Ok(allocation.clone());
        }

        allocation.status = AllocationStatus::Cancelled;
        allocation.cancelled_at = Some(now);
        let cancelled = allocation.clone();

        match cancelled.resource_type {
            ResourceType::Room if appointment.room_id == Some(cancelled.resource_id) => {
                appointment.room_id = None;
            }
            ResourceType::Staff if appointment.therapist_id == Some(cancelled.resource_id) => {
                appointment.therapist_id = None;
            }
            _ => {}
        }
        let summary = self.allocation_summary(&appointment, &allocations).await;
        appointment.resource_allocation_status = summary;
        appointment.updated_at = now;

        Ok(cancelled)
    }

    // ==========================================================================
    // CATALOG
    // ==========================================================================

    async fn insert_room(&self, room: Room) -> Result<Room, SchedulingError> {
        self.rooms.write().await.insert(room.id, room.clone());
        Ok(room)
    }

    async fn list_rooms(&self, branch_id: Uuid) -> Result<Vec<Room>, SchedulingError> {
        let mut rooms: Vec<Room> = self
            .rooms
            .read()
            .await
            .values()
            .filter(|r| r.branch_id == branch_id)
            .cloned()
            .collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rooms)
    }

    async fn insert_staff_member(&self, staff: StaffMember) -> Result<StaffMember, SchedulingError> {
        self.staff.write().await.insert(staff.id, staff.clone());
        Ok(staff)
    }

    async fn list_staff_members(&self, branch_id: Uuid) -> Result<Vec<StaffMember>, SchedulingError> {
        let mut staff: Vec<StaffMember> = self
            .staff
            .read()
            .await
            .values()
            .filter(|s| s.branch_id == branch_id)
            .cloned()
            .collect();
        staff.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(staff)
    }

    async fn insert_requirement(
        &self,
        requirement: ServiceResourceRequirement,
    ) -> Result<ServiceResourceRequirement, SchedulingError> {
        self.requirements.write().await.insert(requirement.id, requirement.clone());
        Ok(requirement)
    }

    async fn list_requirements(&self, service_id: Uuid) -> Result<Vec<ServiceResourceRequirement>, SchedulingError> {
        let mut requirements: Vec<ServiceResourceRequirement> = self
            .requirements
            .read()
            .await
            .values()
            .filter(|r| r.service_id == service_id)
            .cloned()
            .collect();
        requirements.sort_by_key(|r| (!r.is_mandatory, r.resource_type == ResourceType::Staff));
        Ok(requirements)
    }
}

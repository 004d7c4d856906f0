// libs/scheduling-cell/src/store/mod.rs
//! Persistence seam for the scheduling cell.
//!
//! Plain reads and writes sit next to a handful of atomic commands. Every
//! command that reads and then writes shared state (slot counters,
//! appointment status, resource allocations) runs as one unit inside the
//! store, serialised on the rows it touches:
//!
//! - booking locks the slot row, then inserts the appointment
//! - a transition locks the appointment row, then its slot, then its allocations
//! - a reschedule locks the original appointment, then both slots in id order
//! - an allocation locks the appointment row, then the resource+date key
//!
//! Locks are always taken in that order so two commands never wait on each
//! other in a cycle.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentOperation, AppointmentResource, AppointmentStatusHistory, AvailabilityTemplate,
    ChangeSource, RescheduleOutcome, ResourceType, Room, ScheduleException, SchedulingError,
    ServiceResourceRequirement, Slot, SlotChange, StaffMember, TransitionRequest,
};

pub mod memory;
pub mod supabase;

pub use memory::InMemoryStore;
pub use supabase::SupabaseStore;

/// A new appointment bound to the slot unit it consumes.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub appointment: Appointment,
    pub history: AppointmentStatusHistory,
}

#[derive(Debug, Clone)]
pub struct TransitionCommit {
    pub appointment_id: Uuid,
    pub operation: AppointmentOperation,
    pub request: TransitionRequest,
    pub source: ChangeSource,
    pub now: DateTime<Utc>,
}

/// Moves `original_id` to rescheduled and books `replacement` on its slot.
#[derive(Debug, Clone)]
pub struct RescheduleCommit {
    pub original_id: Uuid,
    pub replacement: Appointment,
    pub request: TransitionRequest,
    pub now: DateTime<Utc>,
}

#[async_trait]
pub trait SchedulingStore: Send + Sync {
    // Templates
    async fn insert_template(&self, template: AvailabilityTemplate) -> Result<AvailabilityTemplate, SchedulingError>;
    async fn update_template(&self, template: AvailabilityTemplate) -> Result<AvailabilityTemplate, SchedulingError>;
    async fn get_template(&self, id: Uuid) -> Result<Option<AvailabilityTemplate>, SchedulingError>;
    /// Non-deleted templates of a staff member, optionally narrowed to a branch.
    async fn list_templates(
        &self,
        staff_id: Uuid,
        branch_id: Option<Uuid>,
    ) -> Result<Vec<AvailabilityTemplate>, SchedulingError>;

    // Exceptions
    async fn insert_exception(&self, exception: ScheduleException) -> Result<ScheduleException, SchedulingError>;
    async fn update_exception(&self, exception: ScheduleException) -> Result<ScheduleException, SchedulingError>;
    async fn get_exception(&self, id: Uuid) -> Result<Option<ScheduleException>, SchedulingError>;
    /// Non-deleted exceptions for the staff member within `[from, to]`.
    async fn list_exceptions(
        &self,
        staff_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ScheduleException>, SchedulingError>;

    // Slots
    /// Inserts the slots whose (staff, branch, date, start) key is free and
    /// returns only those. Existing rows are left untouched.
    async fn insert_slots_if_absent(&self, slots: Vec<Slot>) -> Result<Vec<Slot>, SchedulingError>;
    async fn get_slot(&self, id: Uuid) -> Result<Option<Slot>, SchedulingError>;
    async fn list_slots(&self, staff_id: Uuid, from: NaiveDate, to: NaiveDate) -> Result<Vec<Slot>, SchedulingError>;
    async fn apply_slot_change(&self, slot_id: Uuid, change: SlotChange) -> Result<Slot, SchedulingError>;

    // Appointments
    async fn create_booking(&self, booking: NewBooking) -> Result<Appointment, SchedulingError>;
    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>, SchedulingError>;
    async fn list_patient_appointments(
        &self,
        patient_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, SchedulingError>;
    async fn list_staff_appointments(&self, staff_id: Uuid, date: NaiveDate) -> Result<Vec<Appointment>, SchedulingError>;
    /// Applies the operation under the appointment row lock, releases the
    /// slot when the operation frees it, updates allocations and their
    /// summary and appends history, all or nothing.
    async fn commit_transition(&self, commit: TransitionCommit) -> Result<Appointment, SchedulingError>;
    async fn commit_reschedule(&self, commit: RescheduleCommit) -> Result<RescheduleOutcome, SchedulingError>;
    async fn list_status_history(&self, appointment_id: Uuid) -> Result<Vec<AppointmentStatusHistory>, SchedulingError>;

    // Resource allocations
    async fn list_resource_allocations(
        &self,
        resource_type: ResourceType,
        resource_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AppointmentResource>, SchedulingError>;
    async fn list_appointment_allocations(&self, appointment_id: Uuid) -> Result<Vec<AppointmentResource>, SchedulingError>;
    async fn get_allocation(&self, id: Uuid) -> Result<Option<AppointmentResource>, SchedulingError>;
    /// Re-checks overlap under the resource+date lock, inserts the row,
    /// points the appointment's room/therapist at the resource and
    /// recomputes its `resource_allocation_status`.
    async fn commit_allocation(&self, allocation: AppointmentResource) -> Result<AppointmentResource, SchedulingError>;
    /// Idempotent. Clears the appointment pointer when it names this resource
    /// and recomputes the allocation summary.
    async fn cancel_allocation(&self, allocation_id: Uuid, now: DateTime<Utc>) -> Result<AppointmentResource, SchedulingError>;

    // Catalog
    async fn insert_room(&self, room: Room) -> Result<Room, SchedulingError>;
    async fn list_rooms(&self, branch_id: Uuid) -> Result<Vec<Room>, SchedulingError>;
    async fn insert_staff_member(&self, staff: StaffMember) -> Result<StaffMember, SchedulingError>;
    async fn list_staff_members(&self, branch_id: Uuid) -> Result<Vec<StaffMember>, SchedulingError>;
    async fn insert_requirement(
        &self,
        requirement: ServiceResourceRequirement,
    ) -> Result<ServiceResourceRequirement, SchedulingError>;
    async fn list_requirements(&self, service_id: Uuid) -> Result<Vec<ServiceResourceRequirement>, SchedulingError>;
}

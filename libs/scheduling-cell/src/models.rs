// libs/scheduling-cell/src/models.rs
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::DatabaseError;

// ==============================================================================
// TIME HELPERS
// ==============================================================================

/// Day index in the stored convention: 0 = Sunday ... 6 = Saturday.
///
/// chrono numbers days from Monday, so Monday (0) maps to 1 and Sunday (6)
/// wraps to 0.
pub fn day_of_week_index(date: NaiveDate) -> i32 {
    ((date.weekday().num_days_from_monday() + 1) % 7) as i32
}

/// Half-open interval overlap: [s1, e1) and [s2, e2).
pub fn intervals_overlap(s1: NaiveTime, e1: NaiveTime, s2: NaiveTime, e2: NaiveTime) -> bool {
    !(e1 <= s2 || e2 <= s1)
}

/// Adds minutes to a wall-clock time, saturating at the end of the day
/// instead of wrapping past midnight.
pub fn add_minutes_saturating(time: NaiveTime, minutes: i64) -> NaiveTime {
    let (end, wrapped_secs) = time.overflowing_add_signed(Duration::minutes(minutes));
    if wrapped_secs != 0 {
        NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap_or(time)
    } else {
        end
    }
}

// ==============================================================================
// AVAILABILITY TEMPLATES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilityTemplate {
    pub id: Uuid,
    pub staff_id: Uuid,
    pub branch_id: Uuid,
    pub day_of_week: i32, // 0 = Sunday, 1 = Monday, etc.
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_duration_minutes: i32,
    pub max_bookings_per_slot: i32,
    pub break_start: Option<NaiveTime>,
    pub break_end: Option<NaiveTime>,
    pub room_id: Option<Uuid>,
    pub effective_from: Option<NaiveDate>,
    pub effective_until: Option<NaiveDate>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl AvailabilityTemplate {
    pub fn validate(&self) -> Result<(), SchedulingError> {
        if !(0..=6).contains(&self.day_of_week) {
            return Err(SchedulingError::Validation(
                "Day of week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
            ));
        }
        if self.start_time >= self.end_time {
            return Err(SchedulingError::Validation("Start time must be before end time".to_string()));
        }
        if self.slot_duration_minutes <= 0 {
            return Err(SchedulingError::Validation("Slot duration must be positive".to_string()));
        }
        if self.max_bookings_per_slot <= 0 {
            return Err(SchedulingError::Validation("Max bookings per slot must be positive".to_string()));
        }

        match (self.break_start, self.break_end) {
            (None, None) => {}
            (Some(break_start), Some(break_end)) => {
                if break_start >= break_end {
                    return Err(SchedulingError::Validation(
                        "Break start must be before break end".to_string(),
                    ));
                }
                if break_start < self.start_time || break_end > self.end_time {
                    return Err(SchedulingError::Validation(
                        "Break window must lie within the working window".to_string(),
                    ));
                }
            }
            _ => {
                return Err(SchedulingError::Validation(
                    "Break start and break end must be given together".to_string(),
                ));
            }
        }

        if let (Some(from), Some(until)) = (self.effective_from, self.effective_until) {
            if from > until {
                return Err(SchedulingError::Validation(
                    "effective_from must not be after effective_until".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// True when this template produces slots on `date`.
    pub fn is_effective_on(&self, date: NaiveDate) -> bool {
        self.is_active
            && !self.is_deleted()
            && self.day_of_week == day_of_week_index(date)
            && self.effective_from.map_or(true, |from| date >= from)
            && self.effective_until.map_or(true, |until| date <= until)
    }

    pub fn break_window(&self) -> Option<(NaiveTime, NaiveTime)> {
        match (self.break_start, self.break_end) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }

    pub fn slot_duration(&self) -> Duration {
        Duration::minutes(self.slot_duration_minutes as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTemplateRequest {
    pub staff_id: Uuid,
    pub branch_id: Uuid,
    pub day_of_week: i32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_duration_minutes: i32,
    pub max_bookings_per_slot: Option<i32>,
    pub break_start: Option<NaiveTime>,
    pub break_end: Option<NaiveTime>,
    pub room_id: Option<Uuid>,
    pub effective_from: Option<NaiveDate>,
    pub effective_until: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTemplateRequest {
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub slot_duration_minutes: Option<i32>,
    pub max_bookings_per_slot: Option<i32>,
    pub break_start: Option<NaiveTime>,
    pub break_end: Option<NaiveTime>,
    pub clear_break: Option<bool>,
    pub room_id: Option<Uuid>,
    pub effective_from: Option<NaiveDate>,
    pub effective_until: Option<NaiveDate>,
    pub is_active: Option<bool>,
}

// ==============================================================================
// SCHEDULE EXCEPTIONS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionType {
    Leave,
    Holiday,
    Meeting,
    Training,
    Block,
    Other,
}

impl fmt::Display for ExceptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionType::Leave => write!(f, "leave"),
            ExceptionType::Holiday => write!(f, "holiday"),
            ExceptionType::Meeting => write!(f, "meeting"),
            ExceptionType::Training => write!(f, "training"),
            ExceptionType::Block => write!(f, "block"),
            ExceptionType::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleException {
    pub id: Uuid,
    pub staff_id: Uuid,
    /// `None` applies the exception to every branch.
    pub branch_id: Option<Uuid>,
    pub exception_date: NaiveDate,
    /// `None` on both ends means the whole day.
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub exception_type: ExceptionType,
    pub reason: Option<String>,
    pub requires_approval: bool,
    pub approval_status: ApprovalStatus,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ScheduleException {
    pub fn is_full_day(&self) -> bool {
        self.start_time.is_none() && self.end_time.is_none()
    }

    /// Whether the exception currently suppresses availability. Exceptions
    /// that need approval only take effect once approved.
    pub fn is_effective(&self) -> bool {
        if self.deleted_at.is_some() {
            return false;
        }
        match self.approval_status {
            ApprovalStatus::Approved => true,
            ApprovalStatus::Pending => !self.requires_approval,
            ApprovalStatus::Rejected => false,
        }
    }

    pub fn applies_to(&self, staff_id: Uuid, branch_id: Uuid, date: NaiveDate) -> bool {
        self.staff_id == staff_id
            && self.exception_date == date
            && self.branch_id.map_or(true, |b| b == branch_id)
    }

    /// Whether the exception window touches [start, end).
    pub fn covers(&self, start: NaiveTime, end: NaiveTime) -> bool {
        match (self.start_time, self.end_time) {
            (Some(ex_start), Some(ex_end)) => intervals_overlap(ex_start, ex_end, start, end),
            _ => true,
        }
    }

    pub fn covers_slot(&self, slot: &Slot) -> bool {
        self.applies_to(slot.staff_id, slot.branch_id, slot.slot_date) && self.covers(slot.start_time, slot.end_time)
    }

    pub fn validate(&self) -> Result<(), SchedulingError> {
        match (self.start_time, self.end_time) {
            (None, None) => Ok(()),
            (Some(start), Some(end)) if start < end => Ok(()),
            (Some(_), Some(_)) => Err(SchedulingError::Validation(
                "Exception start time must be before end time".to_string(),
            )),
            _ => Err(SchedulingError::Validation(
                "Exception window needs both start and end time, or neither for a full day".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateExceptionRequest {
    pub staff_id: Uuid,
    pub branch_id: Option<Uuid>,
    pub exception_date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub exception_type: ExceptionType,
    pub reason: Option<String>,
    pub requires_approval: Option<bool>,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionOutcome {
    pub exception: ScheduleException,
    pub blocked_slots: Vec<Slot>,
    /// Covered slots that already carry bookings and need manual follow-up.
    pub slots_with_bookings: Vec<Slot>,
}

// ==============================================================================
// SLOTS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub staff_id: Uuid,
    pub branch_id: Uuid,
    pub slot_date: NaiveDate,
    pub start_time: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slot {
    pub id: Uuid,
    pub staff_id: Uuid,
    pub branch_id: Uuid,
    pub slot_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub max_bookings: i32,
    pub current_bookings: i32,
    pub is_available: bool,
    pub is_blocked: bool,
    pub blocked_reason: Option<String>,
    pub blocked_by: Option<Uuid>,
    pub blocked_by_exception_id: Option<Uuid>,
    pub template_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Atomic mutations a slot row accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotChange {
    Reserve,
    Release,
    Block {
        reason: String,
        actor_id: Option<Uuid>,
        exception_id: Option<Uuid>,
    },
    Unblock,
}

impl Slot {
    pub fn key(&self) -> SlotKey {
        SlotKey {
            staff_id: self.staff_id,
            branch_id: self.branch_id,
            slot_date: self.slot_date,
            start_time: self.start_time,
        }
    }

    pub fn remaining_capacity(&self) -> i32 {
        (self.max_bookings - self.current_bookings).max(0)
    }

    pub fn is_bookable(&self) -> bool {
        self.is_available && !self.is_blocked && self.current_bookings < self.max_bookings
    }

    /// Counter invariants. A breach is reported, never repaired.
    pub fn check_invariants(&self) -> Result<(), SchedulingError> {
        if self.current_bookings < 0 || self.current_bookings > self.max_bookings {
            return Err(SchedulingError::ConsistencyViolation(format!(
                "slot {} has current_bookings {} outside 0..={}",
                self.id, self.current_bookings, self.max_bookings
            )));
        }
        if self.is_available != (self.current_bookings < self.max_bookings) {
            return Err(SchedulingError::ConsistencyViolation(format!(
                "slot {} is_available={} disagrees with {}/{} bookings",
                self.id, self.is_available, self.current_bookings, self.max_bookings
            )));
        }
        Ok(())
    }

    pub fn reserve(&mut self, now: DateTime<Utc>) -> Result<(), SchedulingError> {
        self.check_invariants()?;
        if !self.is_bookable() {
            return Err(SchedulingError::SlotNotAvailable(self.id));
        }
        self.current_bookings += 1;
        if self.current_bookings == self.max_bookings {
            self.is_available = false;
        }
        self.touch(now);
        Ok(())
    }

    /// Returns false when there was nothing to release.
    pub fn release(&mut self, now: DateTime<Utc>) -> Result<bool, SchedulingError> {
        self.check_invariants()?;
        if self.current_bookings == 0 {
            return Ok(false);
        }
        self.current_bookings -= 1;
        self.is_available = true;
        self.touch(now);
        Ok(true)
    }

    pub fn block(&mut self, reason: String, actor_id: Option<Uuid>, exception_id: Option<Uuid>, now: DateTime<Utc>) {
        self.is_blocked = true;
        self.blocked_reason = Some(reason);
        self.blocked_by = actor_id;
        self.blocked_by_exception_id = exception_id;
        self.touch(now);
    }

    pub fn unblock(&mut self, now: DateTime<Utc>) {
        self.is_blocked = false;
        self.blocked_reason = None;
        self.blocked_by = None;
        self.blocked_by_exception_id = None;
        self.touch(now);
    }

    pub fn apply(&mut self, change: &SlotChange, now: DateTime<Utc>) -> Result<(), SchedulingError> {
        match change {
            SlotChange::Reserve => self.reserve(now),
            SlotChange::Release => self.release(now).map(|_| ()),
            SlotChange::Block { reason, actor_id, exception_id } => {
                self.block(reason.clone(), *actor_id, *exception_id, now);
                Ok(())
            }
            SlotChange::Unblock => {
                self.unblock(now);
                Ok(())
            }
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateSlotsRequest {
    pub staff_id: Uuid,
    pub branch_id: Uuid,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationReport {
    pub created: Vec<Slot>,
    pub already_present: usize,
    pub suppressed_by_exception: usize,
    pub days_skipped_full_exception: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotFilters {
    pub branch_id: Option<Uuid>,
    pub earliest_start: Option<NaiveTime>,
    pub latest_start: Option<NaiveTime>,
    pub min_remaining_capacity: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockSlotRequest {
    pub reason: String,
    pub actor_id: Option<Uuid>,
}

// ==============================================================================
// APPOINTMENTS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Requested,
    Confirmed,
    CheckedIn,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
    Rescheduled,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 8] = [
        AppointmentStatus::Requested,
        AppointmentStatus::Confirmed,
        AppointmentStatus::CheckedIn,
        AppointmentStatus::InProgress,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::NoShow,
        AppointmentStatus::Rescheduled,
    ];

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Requested
                | AppointmentStatus::Confirmed
                | AppointmentStatus::CheckedIn
                | AppointmentStatus::InProgress
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Requested => write!(f, "requested"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::CheckedIn => write!(f, "checked_in"),
            AppointmentStatus::InProgress => write!(f, "in_progress"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
            AppointmentStatus::Rescheduled => write!(f, "rescheduled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentOperation {
    Confirm,
    CheckIn,
    Start,
    Complete,
    Cancel,
    MarkNoShow,
    Reschedule,
}

impl AppointmentOperation {
    pub const ALL: [AppointmentOperation; 7] = [
        AppointmentOperation::Confirm,
        AppointmentOperation::CheckIn,
        AppointmentOperation::Start,
        AppointmentOperation::Complete,
        AppointmentOperation::Cancel,
        AppointmentOperation::MarkNoShow,
        AppointmentOperation::Reschedule,
    ];

    pub fn target_status(&self) -> AppointmentStatus {
        match self {
            AppointmentOperation::Confirm => AppointmentStatus::Confirmed,
            AppointmentOperation::CheckIn => AppointmentStatus::CheckedIn,
            AppointmentOperation::Start => AppointmentStatus::InProgress,
            AppointmentOperation::Complete => AppointmentStatus::Completed,
            AppointmentOperation::Cancel => AppointmentStatus::Cancelled,
            AppointmentOperation::MarkNoShow => AppointmentStatus::NoShow,
            AppointmentOperation::Reschedule => AppointmentStatus::Rescheduled,
        }
    }

    /// The transition table.
    pub fn is_valid_from(&self, status: AppointmentStatus) -> bool {
        match self {
            AppointmentOperation::Confirm => status == AppointmentStatus::Requested,
            AppointmentOperation::CheckIn => {
                matches!(status, AppointmentStatus::Requested | AppointmentStatus::Confirmed)
            }
            AppointmentOperation::Start => status == AppointmentStatus::CheckedIn,
            AppointmentOperation::Complete => status == AppointmentStatus::InProgress,
            AppointmentOperation::Cancel
            | AppointmentOperation::MarkNoShow
            | AppointmentOperation::Reschedule => status.is_active(),
        }
    }

    /// Operations that give the appointment's slot unit back.
    pub fn releases_slot(&self) -> bool {
        matches!(
            self,
            AppointmentOperation::Cancel | AppointmentOperation::MarkNoShow | AppointmentOperation::Reschedule
        )
    }
}

impl fmt::Display for AppointmentOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentOperation::Confirm => write!(f, "confirm"),
            AppointmentOperation::CheckIn => write!(f, "check_in"),
            AppointmentOperation::Start => write!(f, "start"),
            AppointmentOperation::Complete => write!(f, "complete"),
            AppointmentOperation::Cancel => write!(f, "cancel"),
            AppointmentOperation::MarkNoShow => write!(f, "mark_no_show"),
            AppointmentOperation::Reschedule => write!(f, "reschedule"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BookingSource {
    #[default]
    Online,
    WalkIn,
    Phone,
    Admin,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentPriority {
    #[default]
    Normal,
    Urgent,
    Emergency,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceAllocationStatus {
    Pending,
    Partial,
    Complete,
    NotRequired,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub staff_id: Option<Uuid>,
    pub branch_id: Uuid,
    pub slot_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub purpose: String,
    pub appointment_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
    pub estimated_duration_minutes: i32,
    pub status: AppointmentStatus,
    pub booking_source: BookingSource,
    pub priority: AppointmentPriority,
    pub token_number: Option<i32>,
    pub notes: Option<String>,

    pub confirmed_at: Option<DateTime<Utc>>,
    pub confirmed_by: Option<Uuid>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub checked_in_by: Option<Uuid>,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub wait_time_minutes: Option<i64>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<Uuid>,
    pub actual_end_time: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
    pub cancellation_reason: Option<String>,
    pub no_show_at: Option<DateTime<Utc>>,
    pub no_show_reason: Option<String>,

    pub parent_appointment_id: Option<Uuid>,
    pub rescheduled_from_id: Option<Uuid>,

    pub room_id: Option<Uuid>,
    pub therapist_id: Option<Uuid>,
    pub resource_allocation_status: ResourceAllocationStatus,

    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Appointment {
    /// Scheduled end, falling back to start + estimated duration.
    pub fn scheduled_end_time(&self) -> NaiveTime {
        self.end_time.unwrap_or_else(|| {
            add_minutes_saturating(self.start_time, self.estimated_duration_minutes as i64)
        })
    }

    pub fn window(&self) -> (NaiveTime, NaiveTime) {
        (self.start_time, self.scheduled_end_time())
    }

    pub fn overlaps(&self, date: NaiveDate, start: NaiveTime, end: NaiveTime) -> bool {
        let (own_start, own_end) = self.window();
        self.appointment_date == date && intervals_overlap(own_start, own_end, start, end)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub patient_id: Uuid,
    pub slot_id: Uuid,
    pub purpose: String,
    pub service_id: Option<Uuid>,
    #[serde(default)]
    pub booking_source: BookingSource,
    #[serde(default)]
    pub priority: AppointmentPriority,
    pub parent_appointment_id: Option<Uuid>,
    pub notes: Option<String>,
    pub actor_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub actor_id: Option<Uuid>,
    pub reason: Option<String>,
    /// Only used by check-in; assigned automatically when absent.
    pub token_number: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleRequest {
    pub new_slot_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleOutcome {
    pub original: Appointment,
    pub replacement: Appointment,
}

// ==============================================================================
// STATUS HISTORY
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    Api,
    System,
    Reschedule,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentStatusHistory {
    pub id: Uuid,
    pub appointment_id: Uuid,
    /// `None` for the entry written when the appointment is created.
    pub from_status: Option<AppointmentStatus>,
    pub to_status: AppointmentStatus,
    pub changed_by: Option<Uuid>,
    pub reason: Option<String>,
    pub source: ChangeSource,
    pub changed_at: DateTime<Utc>,
}

// ==============================================================================
// RESOURCES
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Room,
    Staff,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceType::Room => write!(f, "room"),
            ResourceType::Staff => write!(f, "staff"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    Allocated,
    InUse,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentResource {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub resource_type: ResourceType,
    pub resource_id: Uuid,
    pub allocation_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: AllocationStatus,
    /// For staff allocations, e.g. `primary_therapist`.
    pub role: Option<String>,
    pub allocated_by: Option<Uuid>,
    pub allocated_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl AppointmentResource {
    pub fn is_active(&self) -> bool {
        matches!(self.status, AllocationStatus::Allocated | AllocationStatus::InUse)
    }

    /// Whether this row blocks another allocation of the same resource.
    pub fn conflicts_with(&self, date: NaiveDate, start: NaiveTime, end: NaiveTime) -> bool {
        self.is_active()
            && self.allocation_date == date
            && intervals_overlap(self.start_time, self.end_time, start, end)
    }
}

/// Allocation side effect carried by a status transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceEffect {
    None,
    MarkInUse,
    Cancel,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Room {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub name: String,
    pub room_type: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaffMember {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub name: String,
    pub staff_type: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceResourceRequirement {
    pub id: Uuid,
    pub service_id: Uuid,
    pub resource_type: ResourceType,
    pub room_type: Option<String>,
    pub staff_type: Option<String>,
    pub is_mandatory: bool,
    pub role: Option<String>,
}

impl ServiceResourceRequirement {
    pub fn matches_room(&self, room: &Room) -> bool {
        self.resource_type == ResourceType::Room
            && room.is_active
            && self.room_type.as_ref().map_or(true, |t| t.eq_ignore_ascii_case(&room.room_type))
    }

    pub fn matches_staff(&self, staff: &StaffMember) -> bool {
        self.resource_type == ResourceType::Staff
            && staff.is_active
            && self.staff_type.as_ref().map_or(true, |t| t.eq_ignore_ascii_case(&staff.staff_type))
    }

    fn is_satisfied_by(&self, allocation: &AppointmentResource) -> bool {
        allocation.is_active()
            && allocation.resource_type == self.resource_type
            && match (&self.role, &allocation.role) {
                (Some(wanted), Some(given)) => wanted == given,
                (Some(_), None) => false,
                (None, _) => true,
            }
    }
}

impl ResourceAllocationStatus {
    /// Compares live allocations against a service's requirements. Each
    /// allocation satisfies at most one requirement; mandatory ones are
    /// matched first.
    pub fn derive(
        requirements: &[ServiceResourceRequirement],
        allocations: &[AppointmentResource],
    ) -> ResourceAllocationStatus {
        if requirements.is_empty() {
            return ResourceAllocationStatus::NotRequired;
        }

        let mut ordered: Vec<&ServiceResourceRequirement> = requirements.iter().collect();
        ordered.sort_by_key(|r| !r.is_mandatory);

        let mut used = vec![false; allocations.len()];
        let mut mandatory_missing = 0;
        let mut matched_any = false;

        for requirement in ordered {
            let found = allocations
                .iter()
                .enumerate()
                .find(|(idx, alloc)| !used[*idx] && requirement.is_satisfied_by(alloc));

            match found {
                Some((idx, _)) => {
                    used[idx] = true;
                    matched_any = true;
                }
                None if requirement.is_mandatory => mandatory_missing += 1,
                None => {}
            }
        }

        if mandatory_missing == 0 {
            ResourceAllocationStatus::Complete
        } else if matched_any {
            ResourceAllocationStatus::Partial
        } else {
            ResourceAllocationStatus::Pending
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocateResourceRequest {
    pub resource_id: Uuid,
    pub role: Option<String>,
    pub actor_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceSuggestion {
    pub requirement_id: Uuid,
    pub resource_type: ResourceType,
    pub resource_id: Uuid,
    pub resource_name: String,
    pub role: Option<String>,
    pub is_mandatory: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceSuggestions {
    pub appointment_id: Option<Uuid>,
    pub suggestions: Vec<ResourceSuggestion>,
    pub warnings: Vec<String>,
}

// ==============================================================================
// RULES
// ==============================================================================

#[derive(Debug, Clone)]
pub struct SchedulingRules {
    pub reject_patient_overlap: bool,
    pub max_generation_range_days: i64,
    pub slot_generation_horizon_days: i64,
    pub default_estimated_duration_minutes: i32,
}

impl Default for SchedulingRules {
    fn default() -> Self {
        Self {
            reject_patient_overlap: true,
            max_generation_range_days: 90,
            slot_generation_horizon_days: 30,
            default_estimated_duration_minutes: 15,
        }
    }
}

impl SchedulingRules {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_generation_range_days: config.max_generation_range_days,
            slot_generation_horizon_days: config.slot_generation_horizon_days,
            ..Self::default()
        }
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Cannot {operation} an appointment in status {status}")]
    InvalidTransition {
        operation: AppointmentOperation,
        status: AppointmentStatus,
    },

    #[error("Slot {0} is no longer available")]
    SlotNotAvailable(Uuid),

    #[error("{resource_type} {resource_id} is not available for the requested window")]
    ResourceNotAvailable {
        resource_type: ResourceType,
        resource_id: Uuid,
    },

    #[error("Patient already has an overlapping appointment {0}")]
    PatientConflict(Uuid),

    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl SchedulingError {
    pub fn not_found(entity: &str, id: Uuid) -> Self {
        SchedulingError::Validation(format!("{} {} not found", entity, id))
    }

    /// Lost a race against another caller; the caller may retry elsewhere.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            SchedulingError::SlotNotAvailable(_) | SchedulingError::ResourceNotAvailable { .. }
        )
    }
}

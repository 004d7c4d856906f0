// libs/scheduling-cell/src/services/history.rs
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{AppointmentStatus, AppointmentStatusHistory, ChangeSource};

/// Builds one immutable history row. Stores append it in the same unit of
/// work as the status change it describes.
pub fn history_entry(
    appointment_id: Uuid,
    from_status: Option<AppointmentStatus>,
    to_status: AppointmentStatus,
    changed_by: Option<Uuid>,
    reason: Option<String>,
    source: ChangeSource,
    changed_at: DateTime<Utc>,
) -> AppointmentStatusHistory {
    AppointmentStatusHistory {
        id: Uuid::new_v4(),
        appointment_id,
        from_status,
        to_status,
        changed_by,
        reason,
        source,
        changed_at,
    }
}

/// Sorts a trail oldest first. Entries written in the same instant keep
/// their insertion order.
pub fn order_trail(mut entries: Vec<AppointmentStatusHistory>) -> Vec<AppointmentStatusHistory> {
    entries.sort_by_key(|e| e.changed_at);
    entries
}

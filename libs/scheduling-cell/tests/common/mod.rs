#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use scheduling_cell::models::{
    AppointmentStatus, BookingRequest, CreateTemplateRequest, Room, SchedulingRules, Slot, StaffMember,
};
use scheduling_cell::services::notifications::{
    AppointmentNotifier, CalendarAction, NoopNotifier, NotificationError,
};
use scheduling_cell::{InMemoryStore, SchedulingContext, SchedulingStore};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// 2025-01-06 is a Monday (day index 1).
pub fn monday() -> NaiveDate {
    date(2025, 1, 6)
}

/// In-memory context plus a handle on its store for seeding rows directly.
pub struct TestClinic {
    pub store: Arc<InMemoryStore>,
    pub ctx: Arc<SchedulingContext>,
    pub staff_id: Uuid,
    pub branch_id: Uuid,
}

impl TestClinic {
    pub fn new() -> Self {
        Self::with_rules(SchedulingRules::default())
    }

    pub fn with_rules(rules: SchedulingRules) -> Self {
        Self::with_notifier(rules, Arc::new(NoopNotifier))
    }

    pub fn with_notifier(rules: SchedulingRules, notifier: Arc<dyn AppointmentNotifier>) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let ctx = Arc::new(SchedulingContext::new(store.clone(), notifier, rules));
        Self { store, ctx, staff_id: Uuid::new_v4(), branch_id: Uuid::new_v4() }
    }

    pub async fn insert_slot(&self, on: NaiveDate, start: NaiveTime, end: NaiveTime, max_bookings: i32) -> Slot {
        self.insert_slot_for(self.staff_id, on, start, end, max_bookings).await
    }

    pub async fn insert_slot_for(
        &self,
        staff_id: Uuid,
        on: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        max_bookings: i32,
    ) -> Slot {
        let slot = new_slot(staff_id, self.branch_id, on, start, end, max_bookings);
        let mut inserted = self.store.insert_slots_if_absent(vec![slot]).await.unwrap();
        inserted.remove(0)
    }

    pub async fn slot(&self, slot_id: Uuid) -> Slot {
        self.ctx.inventory.get_slot(slot_id).await.unwrap()
    }

    pub fn template(&self, day_of_week: i32, start: NaiveTime, end: NaiveTime, minutes: i32) -> CreateTemplateRequest {
        CreateTemplateRequest {
            staff_id: self.staff_id,
            branch_id: self.branch_id,
            day_of_week,
            start_time: start,
            end_time: end,
            slot_duration_minutes: minutes,
            max_bookings_per_slot: None,
            break_start: None,
            break_end: None,
            room_id: None,
            effective_from: None,
            effective_until: None,
        }
    }

    pub async fn room(&self, name: &str, room_type: &str) -> Room {
        self.ctx
            .allocator
            .register_room(Room {
                id: Uuid::new_v4(),
                branch_id: self.branch_id,
                name: name.to_string(),
                room_type: room_type.to_string(),
                is_active: true,
            })
            .await
            .unwrap()
    }

    pub async fn staff_member(&self, name: &str, staff_type: &str) -> StaffMember {
        self.ctx
            .allocator
            .register_staff_member(StaffMember {
                id: Uuid::new_v4(),
                branch_id: self.branch_id,
                name: name.to_string(),
                staff_type: staff_type.to_string(),
                is_active: true,
            })
            .await
            .unwrap()
    }
}

/// Keeps every outbound hook call so tests can assert on what was sent.
#[derive(Default)]
pub struct RecordingNotifier {
    pub statuses: Mutex<Vec<(Uuid, AppointmentStatus)>>,
    pub calendar: Mutex<Vec<(Uuid, CalendarAction)>>,
}

impl RecordingNotifier {
    pub fn calendar_for(&self, appointment_id: Uuid) -> Vec<CalendarAction> {
        self.calendar
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == appointment_id)
            .map(|(_, action)| *action)
            .collect()
    }
}

#[async_trait]
impl AppointmentNotifier for RecordingNotifier {
    async fn status_changed(&self, appointment_id: Uuid, status: AppointmentStatus) -> Result<(), NotificationError> {
        self.statuses.lock().unwrap().push((appointment_id, status));
        Ok(())
    }

    async fn calendar_sync(&self, appointment_id: Uuid, action: CalendarAction) -> Result<(), NotificationError> {
        self.calendar.lock().unwrap().push((appointment_id, action));
        Ok(())
    }
}

pub fn booking(patient_id: Uuid, slot_id: Uuid) -> BookingRequest {
    BookingRequest {
        patient_id,
        slot_id,
        purpose: "consultation".to_string(),
        service_id: None,
        booking_source: Default::default(),
        priority: Default::default(),
        parent_appointment_id: None,
        notes: None,
        actor_id: None,
    }
}

/// A fresh, empty slot row that has not been stored anywhere.
pub fn new_slot(
    staff_id: Uuid,
    branch_id: Uuid,
    on: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
    max_bookings: i32,
) -> Slot {
    let now = Utc::now();
    Slot {
        id: Uuid::new_v4(),
        staff_id,
        branch_id,
        slot_date: on,
        start_time: start,
        end_time: end,
        max_bookings,
        current_bookings: 0,
        is_available: true,
        is_blocked: false,
        blocked_reason: None,
        blocked_by: None,
        blocked_by_exception_id: None,
        template_id: None,
        room_id: None,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}

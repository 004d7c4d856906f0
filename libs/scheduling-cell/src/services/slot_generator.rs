// libs/scheduling-cell/src/services/slot_generator.rs
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::models::{
    intervals_overlap, AvailabilityTemplate, GenerateSlotsRequest, GenerationReport, ScheduleException,
    SchedulingError, SchedulingRules, Slot,
};
use crate::store::SchedulingStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Cuts a template's working window into fixed-size slots.
///
/// A candidate that runs into the break is dropped and the walk resumes at
/// the end of the break, so no partial slot is ever emitted. A candidate
/// that would run past `end_time` ends the walk.
pub fn expand_template(template: &AvailabilityTemplate) -> Vec<SlotWindow> {
    let step = template.slot_duration();
    if step <= Duration::zero() {
        return Vec::new();
    }

    let mut windows = Vec::new();
    let mut cursor = template.start_time;

    loop {
        let (end, wrapped) = cursor.overflowing_add_signed(step);
        if wrapped != 0 || end > template.end_time {
            break;
        }

        if let Some((break_start, break_end)) = template.break_window() {
            if intervals_overlap(cursor, end, break_start, break_end) {
                cursor = break_end;
                continue;
            }
        }

        windows.push(SlotWindow { start: cursor, end });
        cursor = end;
    }

    windows
}

/// Outcome of laying one template over one date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayPlan {
    /// A full-day exception suppresses the whole date.
    Suppressed,
    Windows {
        emit: Vec<SlotWindow>,
        suppressed: usize,
    },
}

pub fn plan_day(template: &AvailabilityTemplate, date: NaiveDate, exceptions: &[ScheduleException]) -> DayPlan {
    let applicable: Vec<&ScheduleException> = exceptions
        .iter()
        .filter(|e| e.is_effective() && e.applies_to(template.staff_id, template.branch_id, date))
        .collect();

    if applicable.iter().any(|e| e.is_full_day()) {
        return DayPlan::Suppressed;
    }

    let mut emit = Vec::new();
    let mut suppressed = 0;
    for window in expand_template(template) {
        if applicable.iter().any(|e| e.covers(window.start, window.end)) {
            suppressed += 1;
        } else {
            emit.push(window);
        }
    }

    DayPlan::Windows { emit, suppressed }
}

pub struct SlotGenerator {
    store: Arc<dyn SchedulingStore>,
    rules: SchedulingRules,
}

impl SlotGenerator {
    pub fn new(store: Arc<dyn SchedulingStore>, rules: SchedulingRules) -> Self {
        Self { store, rules }
    }

    /// Fills gaps in `[from_date, to_date]`. Existing slots, and their
    /// booking counters, are never touched.
    #[instrument(skip(self, request), fields(staff_id = %request.staff_id, branch_id = %request.branch_id))]
    pub async fn generate_slots(&self, request: GenerateSlotsRequest) -> Result<GenerationReport, SchedulingError> {
        self.validate_range(request.from_date, request.to_date)?;

        let templates = self
            .store
            .list_templates(request.staff_id, Some(request.branch_id))
            .await?;
        let exceptions = self
            .store
            .list_exceptions(request.staff_id, request.from_date, request.to_date)
            .await?;

        debug!(
            "Generating slots {}..={} from {} templates and {} exceptions",
            request.from_date,
            request.to_date,
            templates.len(),
            exceptions.len()
        );

        let now = Utc::now();
        let mut report = GenerationReport::default();
        let mut candidates = Vec::new();

        for date in request.from_date.iter_days().take_while(|d| *d <= request.to_date) {
            for template in templates.iter().filter(|t| t.is_effective_on(date)) {
                match plan_day(template, date, &exceptions) {
                    DayPlan::Suppressed => report.days_skipped_full_exception += 1,
                    DayPlan::Windows { emit, suppressed } => {
                        report.suppressed_by_exception += suppressed;
                        candidates.extend(emit.into_iter().map(|w| slot_from_window(template, date, w, now)));
                    }
                }
            }
        }

        let candidate_count = candidates.len();
        report.created = self.store.insert_slots_if_absent(candidates).await?;
        report.already_present = candidate_count - report.created.len();

        info!(
            "Generated {} slots ({} already present, {} suppressed by exceptions)",
            report.created.len(),
            report.already_present,
            report.suppressed_by_exception
        );
        Ok(report)
    }

    /// Generates the configured horizon starting at `today`.
    pub async fn generate_upcoming(
        &self,
        staff_id: Uuid,
        branch_id: Uuid,
        today: NaiveDate,
    ) -> Result<GenerationReport, SchedulingError> {
        let horizon = self.rules.slot_generation_horizon_days.max(1);
        let to_date = today + Duration::days(horizon - 1);

        self.generate_slots(GenerateSlotsRequest { staff_id, branch_id, from_date: today, to_date })
            .await
    }

    fn validate_range(&self, from: NaiveDate, to: NaiveDate) -> Result<(), SchedulingError> {
        if to < from {
            return Err(SchedulingError::Validation("to_date must not be before from_date".to_string()));
        }
        let days = (to - from).num_days() + 1;
        if days > self.rules.max_generation_range_days {
            return Err(SchedulingError::Validation(format!(
                "Cannot generate {} days at once (limit is {})",
                days, self.rules.max_generation_range_days
            )));
        }
        Ok(())
    }
}

fn slot_from_window(
    template: &AvailabilityTemplate,
    date: NaiveDate,
    window: SlotWindow,
    now: chrono::DateTime<Utc>,
) -> Slot {
    Slot {
        id: Uuid::new_v4(),
        staff_id: template.staff_id,
        branch_id: template.branch_id,
        slot_date: date,
        start_time: window.start,
        end_time: window.end,
        max_bookings: template.max_bookings_per_slot,
        current_bookings: 0,
        is_available: true,
        is_blocked: false,
        blocked_reason: None,
        blocked_by: None,
        blocked_by_exception_id: None,
        template_id: Some(template.id),
        room_id: template.room_id,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}

// libs/scheduling-cell/src/services/templates.rs
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::models::{
    intervals_overlap, AvailabilityTemplate, CreateTemplateRequest, SchedulingError, UpdateTemplateRequest,
};
use crate::store::SchedulingStore;

pub struct TemplateService {
    store: Arc<dyn SchedulingStore>,
}

impl TemplateService {
    pub fn new(store: Arc<dyn SchedulingStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self, request), fields(staff_id = %request.staff_id))]
    pub async fn create_template(&self, request: CreateTemplateRequest) -> Result<AvailabilityTemplate, SchedulingError> {
        debug!("Creating availability template for day {}", request.day_of_week);

        let now = Utc::now();
        let template = AvailabilityTemplate {
            id: Uuid::new_v4(),
            staff_id: request.staff_id,
            branch_id: request.branch_id,
            day_of_week: request.day_of_week,
            start_time: request.start_time,
            end_time: request.end_time,
            slot_duration_minutes: request.slot_duration_minutes,
            max_bookings_per_slot: request.max_bookings_per_slot.unwrap_or(1),
            break_start: request.break_start,
            break_end: request.break_end,
            room_id: request.room_id,
            effective_from: request.effective_from,
            effective_until: request.effective_until,
            is_active: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        template.validate()?;
        self.ensure_no_overlap(&template).await?;

        let created = self.store.insert_template(template).await?;
        info!("Availability template {} created", created.id);
        Ok(created)
    }

    #[instrument(skip(self, request))]
    pub async fn update_template(
        &self,
        template_id: Uuid,
        request: UpdateTemplateRequest,
    ) -> Result<AvailabilityTemplate, SchedulingError> {
        let mut template = self.get_template(template_id).await?;
        if template.is_deleted() {
            return Err(SchedulingError::Validation(format!("Template {} has been deleted", template_id)));
        }

        if let Some(start_time) = request.start_time {
            template.start_time = start_time;
        }
        if let Some(end_time) = request.end_time {
            template.end_time = end_time;
        }
        if let Some(duration) = request.slot_duration_minutes {
            template.slot_duration_minutes = duration;
        }
        if let Some(max) = request.max_bookings_per_slot {
            template.max_bookings_per_slot = max;
        }
        if request.clear_break.unwrap_or(false) {
            template.break_start = None;
            template.break_end = None;
        } else {
            if request.break_start.is_some() {
                template.break_start = request.break_start;
            }
            if request.break_end.is_some() {
                template.break_end = request.break_end;
            }
        }
        if request.room_id.is_some() {
            template.room_id = request.room_id;
        }
        if request.effective_from.is_some() {
            template.effective_from = request.effective_from;
        }
        if request.effective_until.is_some() {
            template.effective_until = request.effective_until;
        }
        if let Some(is_active) = request.is_active {
            template.is_active = is_active;
        }
        template.updated_at = Utc::now();

        template.validate()?;
        self.ensure_no_overlap(&template).await?;

        let updated = self.store.update_template(template).await?;
        info!("Availability template {} updated", updated.id);
        Ok(updated)
    }

    /// Soft delete. Slots generated from the template keep their provenance.
    pub async fn deactivate_template(&self, template_id: Uuid) -> Result<AvailabilityTemplate, SchedulingError> {
        let mut template = self.get_template(template_id).await?;
        if template.is_deleted() {
            return Ok(template);
        }

        let now = Utc::now();
        template.is_active = false;
        template.deleted_at = Some(now);
        template.updated_at = now;

        let updated = self.store.update_template(template).await?;
        info!("Availability template {} deactivated", template_id);
        Ok(updated)
    }

    pub async fn get_template(&self, template_id: Uuid) -> Result<AvailabilityTemplate, SchedulingError> {
        self.store
            .get_template(template_id)
            .await?
            .ok_or_else(|| SchedulingError::not_found("Template", template_id))
    }

    pub async fn list_templates(
        &self,
        staff_id: Uuid,
        branch_id: Option<Uuid>,
    ) -> Result<Vec<AvailabilityTemplate>, SchedulingError> {
        self.store.list_templates(staff_id, branch_id).await
    }

    async fn ensure_no_overlap(&self, template: &AvailabilityTemplate) -> Result<(), SchedulingError> {
        let existing = self.store.list_templates(template.staff_id, Some(template.branch_id)).await?;

        if let Some(clash) = existing.iter().find(|other| windows_clash(template, other)) {
            warn!(
                "Template for staff {} on day {} overlaps template {}",
                template.staff_id, template.day_of_week, clash.id
            );
            return Err(SchedulingError::Validation(format!(
                "Template window {}-{} overlaps existing template {} ({}-{})",
                template.start_time, template.end_time, clash.id, clash.start_time, clash.end_time
            )));
        }
        Ok(())
    }
}

/// Two live templates of the same staff, branch and weekday clash when both
/// their time windows and their effective date ranges intersect.
fn windows_clash(a: &AvailabilityTemplate, b: &AvailabilityTemplate) -> bool {
    if a.id == b.id || b.is_deleted() || a.day_of_week != b.day_of_week {
        return false;
    }
    if a.staff_id != b.staff_id || a.branch_id != b.branch_id {
        return false;
    }

    let ranges_meet = match (a.effective_until, b.effective_from) {
        (Some(until), Some(from)) if until < from => false,
        _ => match (b.effective_until, a.effective_from) {
            (Some(until), Some(from)) if until < from => false,
            _ => true,
        },
    };

    ranges_meet
        && (a.start_time == b.start_time || intervals_overlap(a.start_time, a.end_time, b.start_time, b.end_time))
}

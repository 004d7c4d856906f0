// libs/scheduling-cell/src/services/allocator.rs
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::models::{
    AllocateResourceRequest, AllocationStatus, Appointment, AppointmentResource, ResourceSuggestion,
    ResourceSuggestions, ResourceType, Room, SchedulingError, ServiceResourceRequirement, StaffMember,
};
use crate::services::notifications::{sync_calendar, AppointmentNotifier, CalendarAction};
use crate::store::SchedulingStore;

/// Assigns rooms and secondary staff to appointment windows. Suggestions are
/// advisory; every allocation re-checks availability under the store's
/// resource lock, and the store recomputes the appointment's allocation
/// summary in the same unit of work.
pub struct ResourceAllocatorService {
    store: Arc<dyn SchedulingStore>,
    notifier: Arc<dyn AppointmentNotifier>,
}

impl ResourceAllocatorService {
    pub fn new(store: Arc<dyn SchedulingStore>, notifier: Arc<dyn AppointmentNotifier>) -> Self {
        Self { store, notifier }
    }

    /// True iff no active allocation of the resource overlaps `[start, end)`.
    pub async fn is_available(
        &self,
        resource_type: ResourceType,
        resource_id: Uuid,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<bool, SchedulingError> {
        let allocations = self.store.list_resource_allocations(resource_type, resource_id, date).await?;
        Ok(!allocations.iter().any(|a| a.conflicts_with(date, start, end)))
    }

    pub async fn allocate_room(
        &self,
        appointment_id: Uuid,
        request: AllocateResourceRequest,
    ) -> Result<AppointmentResource, SchedulingError> {
        self.allocate(appointment_id, ResourceType::Room, request).await
    }

    pub async fn allocate_staff(
        &self,
        appointment_id: Uuid,
        request: AllocateResourceRequest,
    ) -> Result<AppointmentResource, SchedulingError> {
        self.allocate(appointment_id, ResourceType::Staff, request).await
    }

    #[instrument(skip(self, request), fields(resource_id = %request.resource_id))]
    pub async fn allocate(
        &self,
        appointment_id: Uuid,
        resource_type: ResourceType,
        request: AllocateResourceRequest,
    ) -> Result<AppointmentResource, SchedulingError> {
        let appointment = self.get_appointment(appointment_id).await?;
        if !appointment.status.is_active() {
            return Err(SchedulingError::Validation(format!(
                "Resources can only be allocated to active appointments (status is {})",
                appointment.status
            )));
        }
        self.ensure_resource_exists(&appointment, resource_type, request.resource_id).await?;

        // Window is derived now, not taken from an earlier suggestion.
        let (start, end) = appointment.window();
        if !self
            .is_available(resource_type, request.resource_id, appointment.appointment_date, start, end)
            .await?
        {
            info!("{} {} is busy {}-{}", resource_type, request.resource_id, start, end);
            return Err(SchedulingError::ResourceNotAvailable {
                resource_type,
                resource_id: request.resource_id,
            });
        }

        let allocation = AppointmentResource {
            id: Uuid::new_v4(),
            appointment_id,
            resource_type,
            resource_id: request.resource_id,
            allocation_date: appointment.appointment_date,
            start_time: start,
            end_time: end,
            status: AllocationStatus::Allocated,
            role: request.role,
            allocated_by: request.actor_id,
            allocated_at: Utc::now(),
            cancelled_at: None,
        };

        let allocation = match self.store.commit_allocation(allocation).await {
            Ok(allocation) => allocation,
            Err(e @ SchedulingError::ResourceNotAvailable { .. }) => {
                warn!("Lost allocation race for {} {}", resource_type, request.resource_id);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        info!(
            "{} {} allocated to appointment {} ({}-{})",
            resource_type, allocation.resource_id, appointment_id, start, end
        );
        sync_calendar(self.notifier.as_ref(), appointment_id, CalendarAction::Updated).await;
        Ok(allocation)
    }

    /// First-fit suggestion per requirement of the appointment's service.
    /// Never allocates.
    pub async fn suggest(&self, appointment_id: Uuid) -> Result<ResourceSuggestions, SchedulingError> {
        let appointment = self.get_appointment(appointment_id).await?;
        let mut result = ResourceSuggestions { appointment_id: Some(appointment_id), ..Default::default() };

        let Some(service_id) = appointment.service_id else {
            debug!("Appointment {} has no service, nothing to suggest", appointment_id);
            return Ok(result);
        };

        let requirements = self.store.list_requirements(service_id).await?;
        if requirements.is_empty() {
            return Ok(result);
        }

        let (start, end) = appointment.window();
        let date = appointment.appointment_date;
        let rooms = self.store.list_rooms(appointment.branch_id).await?;
        let staff = self.store.list_staff_members(appointment.branch_id).await?;
        let mut taken: HashSet<Uuid> = HashSet::new();

        for requirement in &requirements {
            let candidates: Vec<(Uuid, String)> = match requirement.resource_type {
                ResourceType::Room => rooms
                    .iter()
                    .filter(|r| requirement.matches_room(r))
                    .map(|r| (r.id, r.name.clone()))
                    .collect(),
                ResourceType::Staff => staff
                    .iter()
                    .filter(|s| requirement.matches_staff(s) && Some(s.id) != appointment.staff_id)
                    .map(|s| (s.id, s.name.clone()))
                    .collect(),
            };

            let mut found = None;
            for (id, name) in candidates {
                if taken.contains(&id) {
                    continue;
                }
                if self.is_available(requirement.resource_type, id, date, start, end).await? {
                    found = Some((id, name));
                    break;
                }
            }

            match found {
                Some((resource_id, resource_name)) => {
                    taken.insert(resource_id);
                    result.suggestions.push(ResourceSuggestion {
                        requirement_id: requirement.id,
                        resource_type: requirement.resource_type,
                        resource_id,
                        resource_name,
                        role: requirement.role.clone(),
                        is_mandatory: requirement.is_mandatory,
                    });
                }
                None if requirement.is_mandatory => {
                    result.warnings.push(format!(
                        "No available {} for mandatory requirement{}",
                        requirement.resource_type,
                        describe_filter(requirement)
                    ));
                }
                None => {}
            }
        }

        Ok(result)
    }

    /// Cancels the allocation. Cancelling it again changes nothing.
    #[instrument(skip(self))]
    pub async fn deallocate(&self, allocation_id: Uuid) -> Result<AppointmentResource, SchedulingError> {
        let was_active = self
            .store
            .get_allocation(allocation_id)
            .await?
            .is_some_and(|a| a.is_active());

        let allocation = self.store.cancel_allocation(allocation_id, Utc::now()).await?;
        if was_active {
            info!("Allocation {} cancelled", allocation_id);
            sync_calendar(self.notifier.as_ref(), allocation.appointment_id, CalendarAction::Updated).await;
        } else {
            debug!("Allocation {} was already cancelled", allocation_id);
        }
        Ok(allocation)
    }

    // ==========================================================================
    // CATALOG
    // ==========================================================================

    pub async fn register_room(&self, room: Room) -> Result<Room, SchedulingError> {
        if room.name.trim().is_empty() || room.room_type.trim().is_empty() {
            return Err(SchedulingError::Validation("Room name and type are required".to_string()));
        }
        self.store.insert_room(room).await
    }

    pub async fn register_staff_member(&self, staff: StaffMember) -> Result<StaffMember, SchedulingError> {
        if staff.name.trim().is_empty() || staff.staff_type.trim().is_empty() {
            return Err(SchedulingError::Validation("Staff name and type are required".to_string()));
        }
        self.store.insert_staff_member(staff).await
    }

    pub async fn add_requirement(
        &self,
        requirement: ServiceResourceRequirement,
    ) -> Result<ServiceResourceRequirement, SchedulingError> {
        let misfiled = match requirement.resource_type {
            ResourceType::Room => requirement.staff_type.is_some(),
            ResourceType::Staff => requirement.room_type.is_some(),
        };
        if misfiled {
            return Err(SchedulingError::Validation(format!(
                "A {} requirement cannot filter on the other resource type",
                requirement.resource_type
            )));
        }
        self.store.insert_requirement(requirement).await
    }

    pub async fn list_requirements(&self, service_id: Uuid) -> Result<Vec<ServiceResourceRequirement>, SchedulingError> {
        self.store.list_requirements(service_id).await
    }

    pub async fn list_allocations(&self, appointment_id: Uuid) -> Result<Vec<AppointmentResource>, SchedulingError> {
        self.store.list_appointment_allocations(appointment_id).await
    }

    async fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, SchedulingError> {
        self.store
            .get_appointment(appointment_id)
            .await?
            .ok_or_else(|| SchedulingError::not_found("Appointment", appointment_id))
    }

    async fn ensure_resource_exists(
        &self,
        appointment: &Appointment,
        resource_type: ResourceType,
        resource_id: Uuid,
    ) -> Result<(), SchedulingError> {
        let known = match resource_type {
            ResourceType::Room => self
                .store
                .list_rooms(appointment.branch_id)
                .await?
                .iter()
                .any(|r| r.id == resource_id && r.is_active),
            ResourceType::Staff => self
                .store
                .list_staff_members(appointment.branch_id)
                .await?
                .iter()
                .any(|s| s.id == resource_id && s.is_active),
        };

        if known {
            Ok(())
        } else {
            Err(SchedulingError::Validation(format!(
                "No active {} {} in branch {}",
                resource_type, resource_id, appointment.branch_id
            )))
        }
    }
}

fn describe_filter(requirement: &ServiceResourceRequirement) -> String {
    let filter = match requirement.resource_type {
        ResourceType::Room => requirement.room_type.as_deref(),
        ResourceType::Staff => requirement.staff_type.as_deref(),
    };
    match (filter, requirement.role.as_deref()) {
        (Some(kind), Some(role)) => format!(" ({}, {})", kind, role),
        (Some(kind), None) => format!(" ({})", kind),
        (None, Some(role)) => format!(" ({})", role),
        (None, None) => String::new(),
    }
}

// libs/scheduling-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::error::AppError;

use crate::context::SchedulingContext;
use crate::models::{
    AllocateResourceRequest, BlockSlotRequest, BookingRequest, CreateExceptionRequest, CreateTemplateRequest,
    GenerateSlotsRequest, RescheduleRequest, ResourceType, Room, SchedulingError, ServiceResourceRequirement,
    SlotFilters, StaffMember, TransitionRequest, UpdateTemplateRequest,
};

type Ctx = State<Arc<SchedulingContext>>;

// ==============================================================================
// ERROR MAPPING
// ==============================================================================

/// Race losses read as "no longer available", distinct from bad input.
pub fn to_app_error(e: SchedulingError) -> AppError {
    match e {
        SchedulingError::Validation(msg) => AppError::ValidationError(msg),
        SchedulingError::InvalidTransition { operation, status } => {
            AppError::Conflict(format!("Cannot {} an appointment that is {}", operation, status))
        }
        SchedulingError::SlotNotAvailable(_) => AppError::Conflict("Slot no longer available".to_string()),
        SchedulingError::ResourceNotAvailable { resource_type, .. } => {
            AppError::Conflict(format!("The {} is no longer available for this time", resource_type))
        }
        SchedulingError::PatientConflict(existing) => AppError::Conflict(format!(
            "Patient already has an overlapping appointment ({})",
            existing
        )),
        e @ SchedulingError::ConsistencyViolation(_) => AppError::Internal(e.to_string()),
        SchedulingError::Database(e) => AppError::Database(e.to_string()),
    }
}

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct TemplateQuery {
    pub staff_id: Uuid,
    pub branch_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ExceptionQuery {
    pub staff_id: Uuid,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct AvailableSlotsQuery {
    pub staff_id: Uuid,
    pub date: NaiveDate,
    pub branch_id: Option<Uuid>,
    pub earliest_start: Option<NaiveTime>,
    pub latest_start: Option<NaiveTime>,
    pub min_remaining_capacity: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct ConflictQuery {
    pub patient_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub exclude_appointment_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateUpcomingRequest {
    pub staff_id: Uuid,
    pub branch_id: Uuid,
    pub today: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActorBody {
    pub actor_id: Option<Uuid>,
}

// ==============================================================================
// TEMPLATE HANDLERS
// ==============================================================================

pub async fn create_template(
    State(ctx): Ctx,
    Json(request): Json<CreateTemplateRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let template = ctx.templates.create_template(request).await.map_err(to_app_error)?;
    Ok((StatusCode::CREATED, Json(json!(template))))
}

pub async fn list_templates(State(ctx): Ctx, Query(query): Query<TemplateQuery>) -> Result<Json<Value>, AppError> {
    let templates = ctx
        .templates
        .list_templates(query.staff_id, query.branch_id)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "templates": templates,
        "total": templates.len(),
    })))
}

pub async fn get_template(State(ctx): Ctx, Path(template_id): Path<Uuid>) -> Result<Json<Value>, AppError> {
    let template = ctx.templates.get_template(template_id).await.map_err(to_app_error)?;
    Ok(Json(json!(template)))
}

pub async fn update_template(
    State(ctx): Ctx,
    Path(template_id): Path<Uuid>,
    Json(request): Json<UpdateTemplateRequest>,
) -> Result<Json<Value>, AppError> {
    let template = ctx
        .templates
        .update_template(template_id, request)
        .await
        .map_err(to_app_error)?;
    Ok(Json(json!(template)))
}

pub async fn deactivate_template(State(ctx): Ctx, Path(template_id): Path<Uuid>) -> Result<Json<Value>, AppError> {
    let template = ctx.templates.deactivate_template(template_id).await.map_err(to_app_error)?;
    Ok(Json(json!(template)))
}

// ==============================================================================
// EXCEPTION HANDLERS
// ==============================================================================

pub async fn create_exception(
    State(ctx): Ctx,
    Json(request): Json<CreateExceptionRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let outcome = ctx.exceptions.create_exception(request).await.map_err(to_app_error)?;
    Ok((StatusCode::CREATED, Json(json!(outcome))))
}

pub async fn list_exceptions(State(ctx): Ctx, Query(query): Query<ExceptionQuery>) -> Result<Json<Value>, AppError> {
    let exceptions = ctx
        .exceptions
        .list_exceptions(query.staff_id, query.from_date, query.to_date)
        .await
        .map_err(to_app_error)?;
    Ok(Json(json!({ "exceptions": exceptions })))
}

pub async fn approve_exception(
    State(ctx): Ctx,
    Path(exception_id): Path<Uuid>,
    Json(body): Json<ActorBody>,
) -> Result<Json<Value>, AppError> {
    let outcome = ctx
        .exceptions
        .approve_exception(exception_id, body.actor_id)
        .await
        .map_err(to_app_error)?;
    Ok(Json(json!(outcome)))
}

pub async fn reject_exception(
    State(ctx): Ctx,
    Path(exception_id): Path<Uuid>,
    Json(body): Json<ActorBody>,
) -> Result<Json<Value>, AppError> {
    let exception = ctx
        .exceptions
        .reject_exception(exception_id, body.actor_id)
        .await
        .map_err(to_app_error)?;
    Ok(Json(json!(exception)))
}

pub async fn delete_exception(State(ctx): Ctx, Path(exception_id): Path<Uuid>) -> Result<Json<Value>, AppError> {
    let exception = ctx.exceptions.delete_exception(exception_id).await.map_err(to_app_error)?;
    Ok(Json(json!(exception)))
}

// ==============================================================================
// SLOT HANDLERS
// ==============================================================================

pub async fn generate_slots(
    State(ctx): Ctx,
    Json(request): Json<GenerateSlotsRequest>,
) -> Result<Json<Value>, AppError> {
    let report = ctx.generator.generate_slots(request).await.map_err(to_app_error)?;
    Ok(Json(json!(report)))
}

pub async fn generate_upcoming(
    State(ctx): Ctx,
    Json(request): Json<GenerateUpcomingRequest>,
) -> Result<Json<Value>, AppError> {
    let today = request.today.unwrap_or_else(|| Utc::now().date_naive());
    let report = ctx
        .generator
        .generate_upcoming(request.staff_id, request.branch_id, today)
        .await
        .map_err(to_app_error)?;
    Ok(Json(json!(report)))
}

pub async fn get_available_slots(
    State(ctx): Ctx,
    Query(query): Query<AvailableSlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let filters = SlotFilters {
        branch_id: query.branch_id,
        earliest_start: query.earliest_start,
        latest_start: query.latest_start,
        min_remaining_capacity: query.min_remaining_capacity,
    };
    let slots = ctx
        .inventory
        .get_available_slots(query.staff_id, query.date, filters)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "slots": slots,
        "total": slots.len(),
    })))
}

pub async fn get_slot(State(ctx): Ctx, Path(slot_id): Path<Uuid>) -> Result<Json<Value>, AppError> {
    let slot = ctx.inventory.get_slot(slot_id).await.map_err(to_app_error)?;
    Ok(Json(json!(slot)))
}

pub async fn block_slot(
    State(ctx): Ctx,
    Path(slot_id): Path<Uuid>,
    Json(request): Json<BlockSlotRequest>,
) -> Result<Json<Value>, AppError> {
    let slot = ctx.inventory.block_slot(slot_id, request).await.map_err(to_app_error)?;
    Ok(Json(json!(slot)))
}

pub async fn unblock_slot(State(ctx): Ctx, Path(slot_id): Path<Uuid>) -> Result<Json<Value>, AppError> {
    let slot = ctx.inventory.unblock_slot(slot_id).await.map_err(to_app_error)?;
    Ok(Json(json!(slot)))
}

// ==============================================================================
// APPOINTMENT HANDLERS
// ==============================================================================

pub async fn book_appointment(
    State(ctx): Ctx,
    Json(request): Json<BookingRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let appointment = ctx.booking.book(request).await.map_err(to_app_error)?;
    Ok((StatusCode::CREATED, Json(json!(appointment))))
}

pub async fn get_appointment(State(ctx): Ctx, Path(appointment_id): Path<Uuid>) -> Result<Json<Value>, AppError> {
    let appointment = ctx.booking.get_appointment(appointment_id).await.map_err(to_app_error)?;
    Ok(Json(json!(appointment)))
}

pub async fn check_patient_conflicts(
    State(ctx): Ctx,
    Query(query): Query<ConflictQuery>,
) -> Result<Json<Value>, AppError> {
    let conflicts = ctx
        .booking
        .find_patient_conflicts(
            query.patient_id,
            query.date,
            query.start_time,
            query.end_time,
            query.exclude_appointment_id,
        )
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "has_conflicts": !conflicts.is_empty(),
        "conflicts": conflicts,
    })))
}

pub async fn confirm_appointment(
    State(ctx): Ctx,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = ctx.lifecycle.confirm(appointment_id, request).await.map_err(to_app_error)?;
    Ok(Json(json!(appointment)))
}

pub async fn check_in_appointment(
    State(ctx): Ctx,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = ctx.lifecycle.check_in(appointment_id, request).await.map_err(to_app_error)?;
    Ok(Json(json!(appointment)))
}

pub async fn start_appointment(
    State(ctx): Ctx,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = ctx.lifecycle.start(appointment_id, request).await.map_err(to_app_error)?;
    Ok(Json(json!(appointment)))
}

pub async fn complete_appointment(
    State(ctx): Ctx,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = ctx.lifecycle.complete(appointment_id, request).await.map_err(to_app_error)?;
    Ok(Json(json!(appointment)))
}

pub async fn cancel_appointment(
    State(ctx): Ctx,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = ctx.lifecycle.cancel(appointment_id, request).await.map_err(to_app_error)?;
    Ok(Json(json!(appointment)))
}

pub async fn mark_no_show(
    State(ctx): Ctx,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = ctx.lifecycle.mark_no_show(appointment_id, request).await.map_err(to_app_error)?;
    Ok(Json(json!(appointment)))
}

pub async fn reschedule_appointment(
    State(ctx): Ctx,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleRequest>,
) -> Result<Json<Value>, AppError> {
    let outcome = ctx.booking.reschedule(appointment_id, request).await.map_err(to_app_error)?;
    Ok(Json(json!(outcome)))
}

pub async fn get_status_history(State(ctx): Ctx, Path(appointment_id): Path<Uuid>) -> Result<Json<Value>, AppError> {
    let history = ctx.lifecycle.status_history(appointment_id).await.map_err(to_app_error)?;
    Ok(Json(json!({ "history": history })))
}

pub async fn get_valid_operations(State(ctx): Ctx, Path(appointment_id): Path<Uuid>) -> Result<Json<Value>, AppError> {
    let operations = ctx.lifecycle.valid_operations_for(appointment_id).await.map_err(to_app_error)?;
    Ok(Json(json!({ "operations": operations })))
}

// ==============================================================================
// RESOURCE HANDLERS
// ==============================================================================

pub async fn suggest_resources(State(ctx): Ctx, Path(appointment_id): Path<Uuid>) -> Result<Json<Value>, AppError> {
    let suggestions = ctx.allocator.suggest(appointment_id).await.map_err(to_app_error)?;
    Ok(Json(json!(suggestions)))
}

pub async fn list_appointment_resources(
    State(ctx): Ctx,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let allocations = ctx.allocator.list_allocations(appointment_id).await.map_err(to_app_error)?;
    Ok(Json(json!({ "allocations": allocations })))
}

pub async fn allocate_room(
    State(ctx): Ctx,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<AllocateResourceRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let allocation = ctx
        .allocator
        .allocate(appointment_id, ResourceType::Room, request)
        .await
        .map_err(to_app_error)?;
    Ok((StatusCode::CREATED, Json(json!(allocation))))
}

pub async fn allocate_staff(
    State(ctx): Ctx,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<AllocateResourceRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let allocation = ctx
        .allocator
        .allocate_staff(appointment_id, request)
        .await
        .map_err(to_app_error)?;
    Ok((StatusCode::CREATED, Json(json!(allocation))))
}

pub async fn deallocate_resource(State(ctx): Ctx, Path(allocation_id): Path<Uuid>) -> Result<Json<Value>, AppError> {
    let allocation = ctx.allocator.deallocate(allocation_id).await.map_err(to_app_error)?;
    Ok(Json(json!(allocation)))
}

// ==============================================================================
// CATALOG HANDLERS
// ==============================================================================

pub async fn register_room(
    State(ctx): Ctx,
    Json(room): Json<Room>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let room = ctx.allocator.register_room(room).await.map_err(to_app_error)?;
    Ok((StatusCode::CREATED, Json(json!(room))))
}

pub async fn register_staff_member(
    State(ctx): Ctx,
    Json(staff): Json<StaffMember>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let staff = ctx.allocator.register_staff_member(staff).await.map_err(to_app_error)?;
    Ok((StatusCode::CREATED, Json(json!(staff))))
}

pub async fn add_service_requirement(
    State(ctx): Ctx,
    Json(requirement): Json<ServiceResourceRequirement>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let requirement = ctx.allocator.add_requirement(requirement).await.map_err(to_app_error)?;
    Ok((StatusCode::CREATED, Json(json!(requirement))))
}

pub async fn list_service_requirements(
    State(ctx): Ctx,
    Path(service_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let requirements = ctx.allocator.list_requirements(service_id).await.map_err(to_app_error)?;
    Ok(Json(json!({ "requirements": requirements })))
}

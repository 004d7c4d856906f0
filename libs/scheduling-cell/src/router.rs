// libs/scheduling-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::context::SchedulingContext;
use crate::handlers;

pub fn scheduling_routes(state: Arc<SchedulingContext>) -> Router {
    let template_routes = Router::new()
        .route("/templates", post(handlers::create_template).get(handlers::list_templates))
        .route(
            "/templates/{template_id}",
            get(handlers::get_template)
                .put(handlers::update_template)
                .delete(handlers::deactivate_template),
        );

    let exception_routes = Router::new()
        .route("/exceptions", post(handlers::create_exception).get(handlers::list_exceptions))
        .route("/exceptions/{exception_id}", delete(handlers::delete_exception))
        .route("/exceptions/{exception_id}/approve", post(handlers::approve_exception))
        .route("/exceptions/{exception_id}/reject", post(handlers::reject_exception));

    let slot_routes = Router::new()
        .route("/slots/generate", post(handlers::generate_slots))
        .route("/slots/generate-upcoming", post(handlers::generate_upcoming))
        .route("/slots/available", get(handlers::get_available_slots))
        .route("/slots/{slot_id}", get(handlers::get_slot))
        .route("/slots/{slot_id}/block", post(handlers::block_slot))
        .route("/slots/{slot_id}/unblock", post(handlers::unblock_slot));

    let appointment_routes = Router::new()
        .route("/appointments", post(handlers::book_appointment))
        .route("/appointments/conflicts", get(handlers::check_patient_conflicts))
        .route("/appointments/{appointment_id}", get(handlers::get_appointment))
        .route("/appointments/{appointment_id}/confirm", post(handlers::confirm_appointment))
        .route("/appointments/{appointment_id}/check-in", post(handlers::check_in_appointment))
        .route("/appointments/{appointment_id}/start", post(handlers::start_appointment))
        .route("/appointments/{appointment_id}/complete", post(handlers::complete_appointment))
        .route("/appointments/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/appointments/{appointment_id}/no-show", post(handlers::mark_no_show))
        .route("/appointments/{appointment_id}/reschedule", post(handlers::reschedule_appointment))
        .route("/appointments/{appointment_id}/history", get(handlers::get_status_history))
        .route("/appointments/{appointment_id}/operations", get(handlers::get_valid_operations));

    let resource_routes = Router::new()
        .route("/appointments/{appointment_id}/resources", get(handlers::list_appointment_resources))
        .route("/appointments/{appointment_id}/resources/suggestions", get(handlers::suggest_resources))
        .route("/appointments/{appointment_id}/resources/room", post(handlers::allocate_room))
        .route("/appointments/{appointment_id}/resources/staff", post(handlers::allocate_staff))
        .route("/resources/{allocation_id}", delete(handlers::deallocate_resource))
        .route("/rooms", post(handlers::register_room))
        .route("/staff-members", post(handlers::register_staff_member))
        .route("/service-requirements", post(handlers::add_service_requirement))
        .route("/services/{service_id}/requirements", get(handlers::list_service_requirements));

    Router::new()
        .merge(template_routes)
        .merge(exception_routes)
        .merge(slot_routes)
        .merge(appointment_routes)
        .merge(resource_routes)
        .with_state(state)
}

use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use scheduling_cell::router::scheduling_routes;
use scheduling_cell::SchedulingContext;

pub fn create_router(state: Arc<SchedulingContext>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic Scheduling API is running!" }))
        .nest("/scheduling", scheduling_routes(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use scheduling_cell::SchedulingRules;
    use tower::ServiceExt;

    #[tokio::test]
    async fn scheduling_routes_are_nested() {
        let app = create_router(Arc::new(SchedulingContext::in_memory(SchedulingRules::default())));

        let root = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(root.status(), StatusCode::OK);

        let uri = "/scheduling/templates?staff_id=5d1f3c2e-9a4b-4c1d-8e2f-0a1b2c3d4e5f";
        let templates = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(templates.status(), StatusCode::OK);
    }
}

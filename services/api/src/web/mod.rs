pub mod enroll;
pub mod middleware;
pub mod rest;
pub mod state;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use middleware::require_learner;
pub use rest::ApiDoc;
pub use state::AppState;

/// Builds the application router. CORS and the Swagger UI are layered on by the binary.
pub fn router(app_state: Arc<AppState>) -> Router {
    // Catalog browsing and authoring need no learner.
    let public_routes = Router::new()
        .route("/health", get(rest::health_handler))
        .route(
            "/courses",
            get(rest::list_courses_handler).post(rest::create_course_handler),
        )
        .route(
            "/courses/{course_id}",
            get(rest::course_detail_handler)
                .put(rest::update_course_handler)
                .delete(rest::delete_course_handler),
        )
        .route("/payment/cancel", get(enroll::payment_cancel_handler));

    let learner_routes = Router::new()
        .route("/courses/{course_id}/enroll", post(enroll::enroll_handler))
        .route("/courses/{course_id}/complete", post(enroll::complete_handler))
        .route("/courses/{course_id}/drop", post(enroll::drop_handler))
        .route("/payment", get(enroll::payment_page_handler))
        .route("/payment/success", get(enroll::payment_success_handler))
        .route(
            "/checkout-session/{course_id}",
            post(enroll::checkout_session_handler),
        )
        .route("/me/enrollments", get(enroll::my_enrollments_handler))
        .route_layer(axum_middleware::from_fn(require_learner));

    Router::new()
        .merge(public_routes)
        .merge(learner_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

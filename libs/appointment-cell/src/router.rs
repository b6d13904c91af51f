// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::AllocationEngine;

pub fn appointment_routes(config: Arc<AppConfig>, engine: Arc<AllocationEngine>) -> Router {
    let public_routes = Router::new()
        .route("/available", get(handlers::get_available_doctors))
        .route("/availability", get(handlers::check_availability));

    // Anything touching a patient's booking requires a token
    let protected_routes = Router::new()
        .route("/", post(handlers::book_appointment))
        .route(
            "/{appointment_id}",
            get(handlers::get_appointment)
                .put(handlers::reschedule_appointment)
                .delete(handlers::cancel_appointment),
        )
        .route("/user/{user_id}", get(handlers::get_user_appointments))
        .route("/doctor/{doctor_id}", get(handlers::get_doctor_appointments))
        .layer(middleware::from_fn_with_state(config, auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(engine)
}

//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store selection and engine assembly
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use axum::{
    routing::{get, post},
    Extension, Router,
};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::SharedEngine;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(engine: SharedEngine) -> Router {
    // Protected routes: require a valid session for a still-existing account.
    let protected = routes::router()
        .layer(Extension(engine.clone()))
        .layer(axum::middleware::from_fn_with_state(
            engine.clone(),
            middleware::auth_middleware,
        ));

    let public = Router::new()
        .route("/health", get(routes::system::health))
        .route("/auth/sign-up", post(routes::auth::sign_up))
        .route("/auth/sign-in", post(routes::auth::sign_in))
        .layer(Extension(engine));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(ServiceBuilder::new())
}

use axum::{routing::get, Router};

pub mod auth;
pub mod pages;
pub mod roles;
pub mod system;
pub mod users;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/auth/session", get(auth::session))
        .nest("/pages", pages::router())
        .nest("/users", users::router())
        .nest("/roles", roles::router())
}

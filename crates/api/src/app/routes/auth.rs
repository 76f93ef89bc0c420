use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use orgdesk_auth::Principal;

use crate::app::services::SharedEngine;
use crate::app::{dto, errors};

/// POST /auth/sign-up
pub async fn sign_up(
    Extension(engine): Extension<SharedEngine>,
    Json(body): Json<dto::CredentialsRequest>,
) -> axum::response::Response {
    match engine.sign_up(&body.email, &body.password).await {
        Ok(user) => (StatusCode::CREATED, Json(user)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// POST /auth/sign-in
pub async fn sign_in(
    Extension(engine): Extension<SharedEngine>,
    Json(body): Json<dto::CredentialsRequest>,
) -> axum::response::Response {
    match engine.sign_in(&body.email, &body.password).await {
        Ok(signed_in) => (StatusCode::OK, Json(signed_in)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// GET /auth/session - the caller as currently stored
pub async fn session(Extension(principal): Extension<Principal>) -> axum::response::Response {
    (StatusCode::OK, Json(principal)).into_response()
}

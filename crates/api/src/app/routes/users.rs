use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use orgdesk_auth::{Principal, UserPatch};
use orgdesk_core::UserId;

use crate::app::services::SharedEngine;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_users).post(invite_user))
        .route("/:id", get(get_user).patch(update_user).delete(delete_user))
}

fn parse_user_id(id: &str) -> Result<UserId, axum::response::Response> {
    id.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid user id"))
}

/// GET /users (admin)
pub async fn list_users(
    Extension(engine): Extension<SharedEngine>,
    Extension(principal): Extension<Principal>,
) -> axum::response::Response {
    match engine.list_users(&principal).await {
        Ok(users) => (StatusCode::OK, Json(serde_json::json!({ "users": users }))).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// POST /users - provision an account (admin)
pub async fn invite_user(
    Extension(engine): Extension<SharedEngine>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<dto::InviteUserRequest>,
) -> axum::response::Response {
    match engine.invite_user(&principal, body.into()).await {
        Ok(user) => (StatusCode::CREATED, Json(user)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// GET /users/:id (admin, or self)
pub async fn get_user(
    Extension(engine): Extension<SharedEngine>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_user_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match engine.get_user(&principal, id).await {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// PATCH /users/:id
///
/// Body fields are all optional; `"role_id": null` clears the role.
pub async fn update_user(
    Extension(engine): Extension<SharedEngine>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    Json(patch): Json<UserPatch>,
) -> axum::response::Response {
    let id = match parse_user_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match engine.update_user(&principal, id, patch).await {
        Ok(user) => (StatusCode::OK, Json(user)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// DELETE /users/:id (admin)
pub async fn delete_user(
    Extension(engine): Extension<SharedEngine>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_user_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match engine.delete_user(&principal, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

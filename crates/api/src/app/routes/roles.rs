use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use orgdesk_auth::Principal;
use orgdesk_core::RoleId;

use crate::app::services::SharedEngine;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_roles).post(create_role))
        .route("/:id", get(get_role).patch(update_role).delete(delete_role))
}

fn parse_role_id(id: &str) -> Result<RoleId, axum::response::Response> {
    id.parse()
        .map_err(|_| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid role id"))
}

/// GET /roles - ordered by name
pub async fn list_roles(Extension(engine): Extension<SharedEngine>) -> axum::response::Response {
    match engine.list_roles().await {
        Ok(roles) => (StatusCode::OK, Json(serde_json::json!({ "roles": roles }))).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// GET /roles/:id - role attributes plus its grant set
pub async fn get_role(
    Extension(engine): Extension<SharedEngine>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_role_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match engine.get_role(id).await {
        Ok(role) => (StatusCode::OK, Json(role)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// POST /roles (admin)
pub async fn create_role(
    Extension(engine): Extension<SharedEngine>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<dto::CreateRoleRequest>,
) -> axum::response::Response {
    let draft = match body.into_draft() {
        Ok(d) => d,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match engine.create_role(&principal, draft).await {
        Ok(role) => (StatusCode::CREATED, Json(role)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// PATCH /roles/:id (admin)
///
/// A present `pages` list replaces the whole grant set.
pub async fn update_role(
    Extension(engine): Extension<SharedEngine>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateRoleRequest>,
) -> axum::response::Response {
    let id = match parse_role_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let patch = match body.into_patch() {
        Ok(p) => p,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match engine.update_role(&principal, id, patch).await {
        Ok(role) => (StatusCode::OK, Json(role)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// DELETE /roles/:id (admin)
pub async fn delete_role(
    Extension(engine): Extension<SharedEngine>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_role_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match engine.delete_role(&principal, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

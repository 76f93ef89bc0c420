use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use orgdesk_auth::{Page, Principal};

use crate::app::services::SharedEngine;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(allowed_pages))
        .route("/:page/access", get(page_access))
}

/// GET /pages - every page the caller may reach (navigation)
pub async fn allowed_pages(
    Extension(engine): Extension<SharedEngine>,
    Extension(principal): Extension<Principal>,
) -> axum::response::Response {
    let pages = engine.allowed_pages(&principal).await;

    (
        StatusCode::OK,
        Json(serde_json::json!({ "pages": dto::page_views(&pages) })),
    )
        .into_response()
}

/// GET /pages/:page/access
pub async fn page_access(
    Extension(engine): Extension<SharedEngine>,
    Extension(principal): Extension<Principal>,
    Path(page): Path<String>,
) -> axum::response::Response {
    let page: Page = match page.parse() {
        Ok(p) => p,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let allowed = engine.check_page_access(&principal, page).await;
    (StatusCode::OK, Json(dto::PageAccessResponse { page, allowed })).into_response()
}

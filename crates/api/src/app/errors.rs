use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use orgdesk_core::DomainError;
use orgdesk_infra::AuthError;

pub fn auth_error_to_response(err: AuthError) -> axum::response::Response {
    match err {
        AuthError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        AuthError::AlreadyExists(msg) => json_error(StatusCode::CONFLICT, "already_exists", msg),
        AuthError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        AuthError::InvalidCredentials => json_error(
            StatusCode::UNAUTHORIZED,
            "invalid_credentials",
            "invalid email or password",
        ),
        AuthError::Unauthenticated => {
            json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "authentication required")
        }
        AuthError::PermissionDenied(msg) => json_error(StatusCode::FORBIDDEN, "forbidden", msg),
        AuthError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        AuthError::Store(e) => {
            tracing::error!(error = %e, "store failure");
            json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "store_unavailable",
                "storage temporarily unavailable; retry later",
            )
        }
        AuthError::Internal(msg) => {
            tracing::error!(error = %msg, "internal failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    auth_error_to_response(AuthError::from(err))
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

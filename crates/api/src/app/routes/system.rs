use axum::http::StatusCode;
use axum::response::Response;

use crate::app::dto::Envelope;
use crate::app::errors::ApiError;

/// Liveness only; does not touch the credential store.
pub async fn health() -> Response {
    Envelope::message(StatusCode::OK, "ok")
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound("route not found")
}

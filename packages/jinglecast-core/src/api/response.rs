//! JSON response helpers shared by the HTTP and WebSocket handlers.

use std::fmt::Display;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

/// 200 OK with `body` as JSON.
pub fn api_success<T: Serialize>(body: T) -> (StatusCode, Json<T>) {
    (StatusCode::OK, Json(body))
}

/// Error in the same `{error, message, status}` shape as [`JingleError`](crate::JingleError).
pub fn api_error(status: StatusCode, code: &str, message: impl Display) -> Response {
    (
        status,
        Json(json!({
            "error": code,
            "message": message.to_string(),
            "status": status.as_u16(),
        })),
    )
        .into_response()
}

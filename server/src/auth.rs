//! Optional shared-secret gate.
//!
//! When `server.api_key` is configured, every request must present it as
//! `Authorization: Bearer <key>` or `x-api-key: <key>`. The 401 body is the
//! OpenAI-style envelope regardless of dialect; clients that cannot reach
//! the dialect router yet get one stable shape.

use axum::Json;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Check the headers against the configured key; `None` means pass.
#[must_use]
pub fn check(headers: &HeaderMap, expected: Option<&str>) -> Option<Response> {
    let Some(expected) = expected else {
        return None;
    };

    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let api_key = headers.get("x-api-key").and_then(|v| v.to_str().ok());

    if bearer == Some(expected) || api_key == Some(expected) {
        return None;
    }

    Some(
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"message": "Invalid API Key"}})),
        )
            .into_response(),
    )
}

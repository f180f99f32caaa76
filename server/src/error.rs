//! Gateway error taxonomy and per-dialect rendering.
//!
//! Every failure that reaches a client is classified first and rendered in
//! the dialect's native envelope: `{"type":"error","error":{…}}` for
//! Anthropic, `{"error":{…}}` for the OpenAI surfaces. Nothing here ever
//! carries a stack trace.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use slipstream_translate::{Dialect, TranslateError};
use slipstream_upstream::UpstreamError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Malformed body or unsupported construct; the client's fault.
    #[error("{0}")]
    Client(String),
    /// Every pooled account is disabled or cooling down.
    #[error("no available accounts")]
    NoAccounts,
    /// The retry budget ran out on auth failures.
    #[error("all accounts were rejected by the upstream: {0}")]
    AuthExhausted(String),
    /// An upstream error surfaced after the retry state machine gave up.
    #[error("upstream returned {status}")]
    Upstream { status: u16, body: String },
    /// The configured hard request timeout fired.
    #[error("request timed out")]
    Timeout,
    /// A bug on our side; details stay in the log.
    #[error("internal error")]
    Internal(String),
}

impl From<TranslateError> for GatewayError {
    fn from(value: TranslateError) -> Self {
        GatewayError::Client(value.to_string())
    }
}

impl GatewayError {
    /// Terminal classification of an upstream error, once retries are
    /// exhausted or the error is not retryable.
    #[must_use]
    pub fn from_upstream(error: &UpstreamError) -> Self {
        match error {
            UpstreamError::Status { status, body } => GatewayError::Upstream {
                status: *status,
                body: body.clone(),
            },
            other => GatewayError::Internal(other.to_string()),
        }
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Client(_) => StatusCode::BAD_REQUEST,
            GatewayError::NoAccounts => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::AuthExhausted(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self, dialect: Dialect) -> &'static str {
        let anthropic = dialect == Dialect::Anthropic;
        match self {
            GatewayError::Client(_) => "invalid_request_error",
            GatewayError::NoAccounts => {
                if anthropic {
                    "overloaded_error"
                } else {
                    "server_error"
                }
            }
            GatewayError::AuthExhausted(_) => "authentication_error",
            GatewayError::Upstream { status, .. } if *status == 429 => {
                if anthropic {
                    "rate_limit_error"
                } else {
                    "rate_limit_exceeded"
                }
            }
            GatewayError::Upstream { .. }
            | GatewayError::Timeout
            | GatewayError::Internal(_) => "api_error",
        }
    }

    /// Client-visible message. Internal errors are collapsed; everything
    /// else keeps its detail.
    fn message(&self) -> String {
        match self {
            GatewayError::Upstream { status, body } => {
                format!("upstream error {status}: {body}")
            }
            GatewayError::Internal(detail) => {
                tracing::error!(detail = %detail, "internal error reached the wire");
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// The error body in the dialect's native envelope.
    #[must_use]
    pub fn body(&self, dialect: Dialect) -> Value {
        let kind = self.kind(dialect);
        let message = self.message();
        match dialect {
            Dialect::Anthropic => json!({
                "type": "error",
                "error": {"type": kind, "message": message},
            }),
            Dialect::OpenAiChat | Dialect::OpenAiResponses => json!({
                "error": {"message": message, "type": kind},
            }),
        }
    }

    #[must_use]
    pub fn into_response(self, dialect: Dialect) -> Response {
        (self.status_code(), Json(self.body(dialect))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_envelope_shape() {
        let body = GatewayError::Client("bad".into()).body(Dialect::Anthropic);
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert_eq!(body["error"]["message"], "bad");
    }

    #[test]
    fn openai_envelope_shape() {
        let body = GatewayError::NoAccounts.body(Dialect::OpenAiChat);
        assert!(body.get("type").is_none());
        assert_eq!(body["error"]["message"], "no available accounts");
    }

    #[test]
    fn upstream_status_passes_through_when_sane() {
        let error = GatewayError::Upstream {
            status: 429,
            body: "slow down".into(),
        };
        assert_eq!(error.status_code(), StatusCode::TOO_MANY_REQUESTS);
        let body = error.body(Dialect::Anthropic);
        assert_eq!(body["error"]["type"], "rate_limit_error");
    }

    #[test]
    fn internal_detail_never_reaches_the_wire() {
        let error = GatewayError::Internal("secret path /root/x panicked".into());
        let body = error.body(Dialect::OpenAiChat);
        assert_eq!(body["error"]["message"], "internal server error");
    }
}

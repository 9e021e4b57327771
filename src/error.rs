//! Error types for the OLT gateway.
//!
//! One `thiserror` enum covers the whole device-protocol layer. Variants map
//! onto how a failure is treated: validation, connection and table-walk
//! errors abort an operation, attribute-read errors are absorbed by the
//! driver, and the HTTP layer turns the rest into status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

/// Result alias used across the gateway.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport or handshake failure. Never retried internally.
    #[error("connection error: {0}")]
    Connection(String),

    /// An id outside the model's bounds, rejected before any wire traffic.
    #[error("validation error: {0}")]
    Validation(String),

    /// A single point read failed. Drivers absorb this inside aggregates.
    #[error("attribute read failed for {oid}: {reason}")]
    AttributeRead { oid: String, reason: String },

    /// A whole subtree enumeration failed.
    #[error("table walk failed for {oid}: {reason}")]
    TableWalk { oid: String, reason: String },

    /// Interactive credentials were rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A bounded wait ran out. `partial` holds whatever text was captured.
    #[error("timed out waiting for {waiting_for}")]
    Timeout { waiting_for: String, partial: String },

    /// No pool slot was acquired before the caller gave up.
    #[error("connection pool exhausted: {0}")]
    Capacity(String),

    /// Malformed or unexpected wire data.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The model is declared but has no driver.
    #[error("unsupported OLT model: {0}")]
    UnsupportedModel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Partial output carried by a timeout, empty for every other variant.
    pub fn partial_output(&self) -> &str {
        match self {
            GatewayError::Timeout { partial, .. } => partial,
            _ => "",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Capacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UnsupportedModel(_) => StatusCode::NOT_IMPLEMENTED,
            GatewayError::Connection(_)
            | GatewayError::AttributeRead { .. }
            | GatewayError::TableWalk { .. }
            | GatewayError::Authentication(_)
            | GatewayError::Protocol(_)
            | GatewayError::Io(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

// HTTP response conversion for Axum
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut data = json!({ "error": self.to_string() });
        if !self.partial_output().is_empty() {
            data["partial"] = json!(self.partial_output());
        }
        let body = Json(json!({
            "code": status.as_u16(),
            "status": status.canonical_reason().unwrap_or("Error"),
            "data": data,
        }));
        (status, body).into_response()
    }
}

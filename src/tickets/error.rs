use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use super::TicketStatus;

/// Everything a ticket operation can refuse with. Each variant maps to a
/// stable HTTP status so callers can branch without parsing messages.
#[derive(Debug, Error)]
pub enum TicketError {
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: TicketStatus,
        to: TicketStatus,
    },

    #[error("no SLA policy for category `{category}` priority `{priority}`")]
    PolicyNotFound { category: String, priority: String },

    #[error("stale write on ticket {id}: expected version {expected}, found {found}")]
    StaleWrite { id: Uuid, expected: u64, found: u64 },

    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("ticket {0} not found")]
    NotFound(Uuid),
}

impl TicketError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            TicketError::InvalidTransition { .. } => StatusCode::CONFLICT,
            TicketError::PolicyNotFound { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            TicketError::StaleWrite { .. } => StatusCode::CONFLICT,
            TicketError::Validation { .. } => StatusCode::BAD_REQUEST,
            TicketError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for TicketError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("ticket operation failed: {self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

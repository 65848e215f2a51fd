use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::trip::TripStatus;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Lost a race on a conditional write. Safe to retry against fresh state.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("no driver available for trip {trip_id}")]
    NoDriverAvailable { trip_id: Uuid },

    /// A caller tried to write a field owned by another component.
    #[error("field `{0}` cannot be written through this operation")]
    ForbiddenField(String),

    #[error("trip {trip_id} cannot move from {from} to {to}")]
    InvalidTransition {
        trip_id: Uuid,
        from: TripStatus,
        to: TripStatus,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether repeating the call with fresh state may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Conflict(_) | AppError::Store(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::NoDriverAvailable { .. } => "no_driver_available",
            AppError::ForbiddenField(_) => "forbidden_field",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::Store(_) => "store_unavailable",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) | AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
            AppError::NoDriverAvailable { .. } | AppError::Store(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::ForbiddenField(_) => StatusCode::FORBIDDEN,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code()
        }));

        (status, body).into_response()
    }
}

//! HTTP error mapping.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dispatch_contract::ValidationError;
use dispatch_core::spatial::SpatialError;
use dispatch_core::DispatchError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `{ "error": { "code", "message" } }`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// Body or query did not decode, or a field is out of range (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// The request is well-formed but cannot be acted on (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The message bus did not take the message (502).
    #[error("message bus unavailable: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Upstream(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            Self::Upstream(_) => "The message bus did not accept the request, retry later".to_string(),
            other => other.to_string(),
        };

        match &self {
            Self::Internal(_) => tracing::error!(error = %self, "internal server error"),
            Self::Upstream(_) => tracing::error!(error = %self, "message bus failure"),
            _ => {}
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.message().to_string())
    }
}

impl From<SpatialError> for ApiError {
    fn from(err: SpatialError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Validation(err) => err.into(),
            DispatchError::Spatial(err) => err.into(),
            DispatchError::NoCandidates(_) => Self::BadRequest(err.to_string()),
            DispatchError::Bus(_) => Self::Upstream(err.to_string()),
            DispatchError::Malformed { .. } => Self::Internal(err.to_string()),
        }
    }
}

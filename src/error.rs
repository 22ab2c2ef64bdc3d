use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::future::Future;

use crate::db::StoreError;
use crate::scheduling::AppointmentStatus;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str, String),
    Forbidden(&'static str, String),
    BadRequest(&'static str, String),
    NotFound(&'static str, String),
    Conflict(&'static str, String),
    Internal(String),
}

impl ApiError {
    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized("INVALID_CREDENTIALS", "Username or password is incorrect".into())
    }

    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", "Session expired".into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::BadRequest("VALIDATION_ERROR", message.into())
    }

    fn to_error_response(code: &str, message: &str) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message: message.to_string(),
            },
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(code, msg) => {
                (StatusCode::UNAUTHORIZED, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Forbidden(code, msg) => {
                (StatusCode::FORBIDDEN, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::BadRequest(code, msg) => {
                (StatusCode::BAD_REQUEST, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::NotFound(code, msg) => {
                (StatusCode::NOT_FOUND, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Conflict(code, msg) => {
                (StatusCode::CONFLICT, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::to_error_response("INTERNAL", &msg),
            )
                .into_response(),
        }
    }
}

/// Failures raised by the scheduling and medical record services.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("The selected time slot is not available")]
    SlotUnavailable,

    #[error("Cannot {action} an appointment that is already {status}")]
    AlreadyFinal {
        action: &'static str,
        status: AppointmentStatus,
    },

    #[error("{0} was changed by another request")]
    Concurrent(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation(message.into())
    }

    /// Maps a storage failure, naming `entity` when the row is missing.
    pub fn from_store(entity: &'static str, err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ServiceError::NotFound(entity),
            StoreError::SlotTaken => ServiceError::SlotUnavailable,
            StoreError::Stale => ServiceError::Concurrent(entity),
            StoreError::Referenced => {
                ServiceError::validation(format!("{entity} is still referenced by other records"))
            }
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

pub const MAX_WRITE_ATTEMPTS: usize = 3;

/// Runs a read-modify-write again from a fresh read when its conditional
/// write lost to a concurrent change.
pub async fn retry_on_conflict<T, F, Fut>(mut op: F) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(ServiceError::Concurrent(entity)) if attempt < MAX_WRITE_ATTEMPTS => {
                tracing::debug!(entity, attempt, "concurrent write, retrying");
                attempt += 1;
            }
            other => return other,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        ServiceError::from_store("Appointment", err)
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::NotFound(_) => ApiError::NotFound("NOT_FOUND", message),
            ServiceError::SlotUnavailable => ApiError::Conflict("SLOT_NOT_AVAILABLE", message),
            ServiceError::AlreadyFinal { .. } => ApiError::Conflict("APPOINTMENT_FINAL", message),
            ServiceError::Concurrent(_) => ApiError::Conflict("CONCURRENT_UPDATE", message),
            ServiceError::Validation(_) => ApiError::BadRequest("VALIDATION_ERROR", message),
            ServiceError::Internal(_) => {
                tracing::error!(error = %message, "service failure");
                ApiError::Internal(message)
            }
        }
    }
}

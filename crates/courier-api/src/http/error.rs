//! Application error type mapping to HTTP status codes and envelope format.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use courier_types::error::{DeliveryError, RepositoryError, StreamError};

use super::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Delivery(DeliveryError),
    Stream(StreamError),
    Repository(RepositoryError),
    NotFound(String),
    Validation(String),
    Internal(String),
}

impl From<DeliveryError> for AppError {
    fn from(e: DeliveryError) -> Self {
        AppError::Delivery(e)
    }
}

impl From<StreamError> for AppError {
    fn from(e: StreamError) -> Self {
        AppError::Stream(e)
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        AppError::Repository(e)
    }
}

impl AppError {
    /// HTTP status, machine-readable code, and message.
    pub fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Delivery(e @ DeliveryError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "MESSAGE_NOT_FOUND", e.to_string())
            }
            AppError::Delivery(e @ DeliveryError::InvalidTransition { .. }) => {
                (StatusCode::CONFLICT, "INVALID_TRANSITION", e.to_string())
            }
            AppError::Delivery(e @ DeliveryError::NotRetryable { .. }) => {
                (StatusCode::CONFLICT, "NOT_RETRYABLE", e.to_string())
            }
            AppError::Delivery(DeliveryError::Validation(msg)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Stream(e @ StreamError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "STREAM_NOT_FOUND", e.to_string())
            }
            AppError::Stream(StreamError::Validation(msg)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Stream(e @ StreamError::Provider(_)) => {
                (StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", e.to_string())
            }
            AppError::Stream(e @ StreamError::BackpressureTimeout(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "BACKPRESSURE", e.to_string())
            }
            AppError::Stream(e @ StreamError::Cancelled) => {
                (StatusCode::CONFLICT, "STREAM_CANCELLED", e.to_string())
            }
            AppError::Repository(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", e.to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(code, %message, "request failed");
        }
        let body = ApiResponse::error(code, &message, uuid::Uuid::now_v7().to_string());
        (status, Json(body)).into_response()
    }
}

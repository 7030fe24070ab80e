use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::delivery::DeliveryStatus;
use crate::llm::LlmError;

/// Retry eligibility of an error, assigned where the error originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network/timeout-class trouble; retry with backoff.
    Transient,
    /// Validation, permission, malformed input; never retried.
    Permanent,
    /// Buffer or mailbox at capacity. Retried like a transient error.
    ResourceExhausted,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorClass::Permanent)
    }
}

/// Errors raised by a transport channel.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("channel {0} is not connected")]
    NotConnected(String),

    #[error("transport unreachable: {0}")]
    Unreachable(String),

    #[error("publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("channel {0} is full")]
    ChannelFull(String),

    #[error("envelope rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TransportError::NotConnected(_)
            | TransportError::Unreachable(_)
            | TransportError::Timeout(_) => ErrorClass::Transient,
            TransportError::ChannelFull(_) => ErrorClass::ResourceExhausted,
            TransportError::Rejected(_) => ErrorClass::Permanent,
        }
    }
}

/// Errors from repository operations (used by store traits in courier-core).
#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Connection and query failures are worth another attempt; a conflict
    /// or a missing row will not change on retry.
    pub fn class(&self) -> ErrorClass {
        match self {
            RepositoryError::Connection | RepositoryError::Query(_) => ErrorClass::Transient,
            RepositoryError::NotFound | RepositoryError::Conflict(_) => ErrorClass::Permanent,
        }
    }
}

/// Errors returned by delivery coordinator operations.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("delivery record {0} not found")]
    NotFound(Uuid),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    #[error("message {id} cannot be retried while {status}")]
    NotRetryable { id: Uuid, status: DeliveryStatus },

    #[error("invalid delivery request: {0}")]
    Validation(String),
}

/// Why a single delivery attempt failed.
#[derive(Debug, Clone, Error)]
pub enum AttemptError {
    #[error("persist failed: {0}")]
    Persist(#[from] RepositoryError),

    #[error("publish to {recipient} failed: {source}")]
    Publish {
        recipient: String,
        #[source]
        source: TransportError,
    },
}

impl AttemptError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AttemptError::Persist(e) => e.class(),
            AttemptError::Publish { source, .. } => source.class(),
        }
    }
}

/// Errors from stream session operations.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    #[error(transparent)]
    Provider(#[from] LlmError),

    #[error("backpressure sustained for {0:?}")]
    BackpressureTimeout(Duration),

    #[error("stream cancelled")]
    Cancelled,

    #[error("stream {0} not found")]
    NotFound(String),

    #[error("invalid stream request: {0}")]
    Validation(String),
}

impl StreamError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StreamError::Provider(e) => e.class(),
            StreamError::BackpressureTimeout(_) => ErrorClass::ResourceExhausted,
            StreamError::Cancelled | StreamError::NotFound(_) | StreamError::Validation(_) => {
                ErrorClass::Permanent
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_classes() {
        assert_eq!(
            TransportError::Timeout(Duration::from_secs(1)).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            TransportError::ChannelFull("u1".into()).class(),
            ErrorClass::ResourceExhausted
        );
        assert_eq!(
            TransportError::Rejected("bad payload".into()).class(),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn test_resource_exhausted_is_retryable() {
        assert!(ErrorClass::Transient.is_retryable());
        assert!(ErrorClass::ResourceExhausted.is_retryable());
        assert!(!ErrorClass::Permanent.is_retryable());
    }

    #[test]
    fn test_attempt_error_inherits_class() {
        let err = AttemptError::Persist(RepositoryError::Connection);
        assert_eq!(err.class(), ErrorClass::Transient);

        let err = AttemptError::Publish {
            recipient: "r1".into(),
            source: TransportError::Rejected("forbidden".into()),
        };
        assert_eq!(err.class(), ErrorClass::Permanent);
        assert!(err.to_string().contains("r1"));
    }

    #[test]
    fn test_stream_error_classes() {
        assert_eq!(
            StreamError::BackpressureTimeout(Duration::from_secs(30)).class(),
            ErrorClass::ResourceExhausted
        );
        assert_eq!(StreamError::Cancelled.class(), ErrorClass::Permanent);
        assert_eq!(
            StreamError::from(LlmError::Network("reset".into())).class(),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }
}

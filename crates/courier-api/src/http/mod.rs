//! HTTP/REST API layer for Courier.
//!
//! Axum-based REST API at `/api/v1/` with the envelope response format,
//! Server-Sent Events for streams, and CORS support.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;

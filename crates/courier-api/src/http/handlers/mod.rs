//! HTTP request handlers for the REST API.

pub mod channel;
pub mod delivery;
pub mod health;
pub mod stream;

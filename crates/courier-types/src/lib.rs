//! Shared domain types for Courier.
//!
//! This crate contains the core domain types used across the Courier transport
//! layer: chat messages, delivery records and read receipts, stream sessions and
//! their updates, transport envelopes, LLM request shapes, configuration, and the
//! typed error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod chat;
pub mod config;
pub mod delivery;
pub mod error;
pub mod llm;
pub mod stream;
pub mod transport;

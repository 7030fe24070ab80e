//! Delivery pipeline, stream transport, and port trait definitions for Courier.
//!
//! This crate defines the "ports" (transport, completion provider, durable
//! store) that the infrastructure layer implements, plus the two subsystems
//! built on top of them:
//! - `delivery` -- at-least-once message delivery with acks, retries, and read receipts
//! - `stream` -- incremental assistant output with backpressure, recovery, and multiplexing
//!
//! It depends only on `courier-types` -- never on `courier-infra` or any
//! database/IO crate.

pub mod delivery;
pub mod llm;
pub mod repository;
pub mod retry;
pub mod stream;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

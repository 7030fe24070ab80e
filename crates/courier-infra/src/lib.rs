//! Infrastructure layer for Courier.
//!
//! Contains implementations of the port traits defined in `courier-core`:
//! SQLite storage for message bodies and read receipts, the in-process
//! envelope transport, completion providers, and config/data-dir loading.

pub mod config;
pub mod filesystem;
pub mod llm;
pub mod sqlite;
pub mod transport;

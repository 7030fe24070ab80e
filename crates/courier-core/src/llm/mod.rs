//! Completion provider port.
//!
//! - `provider` -- `CompletionProvider` trait implemented by courier-infra backends

pub mod provider;

pub use provider::CompletionProvider;

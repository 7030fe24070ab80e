//! Incremental delivery of assistant responses.
//!
//! - `manager` -- `StreamManager` owning every in-flight stream
//! - `backpressure` -- `FlowBuffer` with high/low watermark flow control
//! - `recovery` -- `RecoveryStore` of time-bounded resume checkpoints
//! - `chunker` -- Word chunking of completed responses
//! - `multiplexer` -- `StreamMultiplexer` merging per-agent streams

pub mod backpressure;
pub mod chunker;
pub mod manager;
pub mod multiplexer;
pub mod recovery;

pub use backpressure::FlowBuffer;
pub use manager::{AgentRequest, StreamManager, UpdateStream};
pub use multiplexer::StreamMultiplexer;
pub use recovery::RecoveryStore;

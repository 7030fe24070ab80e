//! Streaming-response domain types.
//!
//! A stream session delivers one incrementally generated assistant response.
//! Consumers observe a sequence of [`StreamUpdate`]s ending with exactly one
//! terminal `Done` or `Error` update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::Usage;

/// Accumulated per-stream metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMetrics {
    pub bytes: u64,
    pub chunk_count: u64,
    pub error_count: u32,
    pub reconnect_count: u32,
    /// Rolling average of emitted chunk sizes in bytes.
    pub average_chunk_size: f64,
    /// Time from stream start to the first emitted chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_chunk_latency_ms: Option<u64>,
}

impl StreamMetrics {
    /// Fold one emitted chunk into the running totals.
    pub fn record_chunk(&mut self, size: usize) {
        self.bytes += size as u64;
        self.chunk_count += 1;
        let n = self.chunk_count as f64;
        self.average_chunk_size += (size as f64 - self.average_chunk_size) / n;
    }
}

/// Read-only snapshot of an in-flight stream session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSession {
    pub stream_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub content: String,
    pub last_chunk_index: u64,
    /// Chunks produced but not yet taken by the consumer.
    pub buffered_chunks: usize,
    pub backpressure: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub metrics: StreamMetrics,
}

/// Saved (offset, content) snapshot used to resume a stream.
///
/// Only the (session, agent) pair that wrote it may resume from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryCheckpoint {
    pub stream_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub last_chunk_index: u64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Metadata carried by the terminal `Done` update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDoneMetadata {
    /// Full accumulated response text.
    pub content: String,
    pub last_chunk_index: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Estimated cost in USD when pricing is configured for the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    pub duration_ms: u64,
    pub metrics: StreamMetrics,
}

/// One event observed by a stream consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamUpdate {
    /// An incremental chunk of content.
    Content {
        stream_id: String,
        chunk_index: u64,
        content: String,
    },
    /// The stream completed normally.
    Done {
        stream_id: String,
        metadata: StreamDoneMetadata,
    },
    /// The stream ended with an error. Always the last update.
    Error {
        stream_id: String,
        error: String,
        /// Whether a checkpoint was kept so the caller may resume.
        resumable: bool,
    },
}

impl StreamUpdate {
    pub fn stream_id(&self) -> &str {
        match self {
            StreamUpdate::Content { stream_id, .. }
            | StreamUpdate::Done { stream_id, .. }
            | StreamUpdate::Error { stream_id, .. } => stream_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamUpdate::Content { .. })
    }
}

/// A stream update tagged with its originating agent, as yielded by the
/// multiplexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedUpdate {
    pub agent_id: String,
    #[serde(flatten)]
    pub update: StreamUpdate,
}

/// Caller options for opening a stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamOptions {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Resume this stream ID from its checkpoint when one is still valid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_stream_id: Option<String>,
}

impl RecoveryCheckpoint {
    /// Whether `options` addresses the same session and agent.
    pub fn belongs_to(&self, options: &StreamOptions) -> bool {
        self.session_id == options.session_id && self.agent_id == options.agent_id
    }
}

impl StreamOptions {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn resuming(mut self, stream_id: impl Into<String>) -> Self {
        self.resume_stream_id = Some(stream_id.into());
        self
    }
}

//! Configuration types for Courier.
//!
//! `CourierConfig` represents the top-level `config.toml` that tunes the
//! delivery pipeline, the stream transport, the HTTP server, and the
//! completion provider. Every field has a default, so an empty file (or no
//! file) yields a working configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for Courier.
///
/// Loaded from `~/.courier/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourierConfig {
    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    /// Pricing information for cost estimation per provider/model.
    #[serde(default)]
    pub provider_pricing: Vec<ProviderPricing>,
}

/// Delivery pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Attempts per message before it is marked failed.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Upper bound of the random jitter as a fraction of the delay.
    pub jitter_ratio: f64,
    /// How long to wait for a recipient ack before logging a timeout.
    pub delivery_timeout_ms: u64,
    pub cleanup_interval_secs: u64,
    /// Settled records older than this are purged.
    pub retention_secs: u64,
    /// Maximum concurrent background side effects (broadcasts, receipt writes).
    pub side_effect_concurrency: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_ratio: 0.3,
            delivery_timeout_ms: 30_000,
            cleanup_interval_secs: 300,
            retention_secs: 3_600,
            side_effect_concurrency: 32,
        }
    }
}

impl DeliveryConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Stream transport tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Hard cap on buffered, unconsumed chunks per stream.
    pub buffer_capacity: usize,
    pub high_water_ratio: f64,
    pub low_water_ratio: f64,
    /// Poll interval while the producer is paused by backpressure.
    pub backpressure_poll_ms: u64,
    /// Sustained backpressure beyond this becomes a transient error.
    pub backpressure_timeout_ms: u64,
    /// Pacing delay between synthesized chunks.
    pub chunk_delay_ms: u64,
    /// Write a recovery checkpoint every N chunks.
    pub checkpoint_interval: u64,
    pub recovery_window_secs: u64,
    pub max_reconnects: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 100,
            high_water_ratio: 0.8,
            low_water_ratio: 0.2,
            backpressure_poll_ms: 10,
            backpressure_timeout_ms: 30_000,
            chunk_delay_ms: 20,
            checkpoint_interval: 10,
            recovery_window_secs: 30,
            max_reconnects: 3,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 10_000,
        }
    }
}

impl StreamConfig {
    /// Buffered chunk count at which the producer pauses. Always below capacity.
    pub fn high_water_mark(&self) -> usize {
        let capacity = self.buffer_capacity.max(2);
        let mark = (capacity as f64 * self.high_water_ratio).floor() as usize;
        mark.clamp(1, capacity - 1)
    }

    /// Buffered chunk count at or below which a paused producer resumes.
    pub fn low_water_mark(&self) -> usize {
        let capacity = self.buffer_capacity.max(2);
        let mark = (capacity as f64 * self.low_water_ratio).floor() as usize;
        mark.min(self.high_water_mark() - 1)
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn backpressure_poll(&self) -> Duration {
        Duration::from_millis(self.backpressure_poll_ms.max(1))
    }

    pub fn backpressure_timeout(&self) -> Duration {
        Duration::from_millis(self.backpressure_timeout_ms)
    }

    pub fn recovery_window(&self) -> Duration {
        Duration::from_secs(self.recovery_window_secs)
    }
}

/// HTTP server bind address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Which completion backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Local echo backend (no network), useful for development.
    #[default]
    Echo,
    /// Any OpenAI-compatible chat completions API.
    OpenaiCompatible,
}

/// Completion provider settings. The API key comes from `COURIER_API_KEY`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub name: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Echo,
            name: "echo".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 4_096,
        }
    }
}

/// Cost information for a specific provider/model pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderPricing {
    /// Name of the provider (e.g., "anthropic", "openai").
    pub provider_name: String,
    /// Glob-like pattern for matching model names (e.g., "gpt-4o*").
    pub model_pattern: String,
    /// Cost per million input tokens in USD.
    pub input_cost_per_million: f64,
    /// Cost per million output tokens in USD.
    pub output_cost_per_million: f64,
}

impl ProviderPricing {
    /// Match `model` against the pattern. Only a trailing `*` wildcard is supported.
    pub fn matches(&self, model: &str) -> bool {
        match self.model_pattern.strip_suffix('*') {
            Some(prefix) => model.starts_with(prefix),
            None => model == self.model_pattern,
        }
    }

    pub fn cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        (prompt_tokens as f64 * self.input_cost_per_million
            + completion_tokens as f64 * self.output_cost_per_million)
            / 1_000_000.0
    }
}

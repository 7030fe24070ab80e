//! Configuration loader for Courier.
//!
//! Reads `config.toml` from the data directory (`~/.courier/` in production)
//! and deserializes it into [`CourierConfig`]. Falls back to defaults when the
//! file is missing or malformed, then clamps values that would break the
//! retry or flow-control arithmetic.

use std::path::Path;

use courier_types::config::CourierConfig;

/// Load configuration from `{data_dir}/config.toml`.
///
/// - Missing file: returns [`CourierConfig::default()`].
/// - Unreadable or unparsable file: logs a warning and returns the default.
/// - Otherwise: returns the parsed config after [`normalize`].
pub async fn load_config(data_dir: &Path) -> CourierConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return CourierConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return CourierConfig::default();
        }
    };

    match toml::from_str::<CourierConfig>(&content) {
        Ok(config) => normalize(config),
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            CourierConfig::default()
        }
    }
}

/// Clamp out-of-range tuning values, warning for each one changed.
pub fn normalize(mut config: CourierConfig) -> CourierConfig {
    let delivery = &mut config.delivery;
    if delivery.max_attempts == 0 {
        tracing::warn!("delivery.max_attempts must be at least 1, using 1");
        delivery.max_attempts = 1;
    }
    if delivery.backoff_multiplier < 1.0 {
        tracing::warn!(
            value = delivery.backoff_multiplier,
            "delivery.backoff_multiplier below 1.0, using 1.0"
        );
        delivery.backoff_multiplier = 1.0;
    }
    if !(0.0..=1.0).contains(&delivery.jitter_ratio) {
        let clamped = delivery.jitter_ratio.clamp(0.0, 1.0);
        tracing::warn!(value = delivery.jitter_ratio, clamped, "delivery.jitter_ratio out of range");
        delivery.jitter_ratio = clamped;
    }
    if delivery.max_delay_ms < delivery.base_delay_ms {
        tracing::warn!("delivery.max_delay_ms below base_delay_ms, raising it");
        delivery.max_delay_ms = delivery.base_delay_ms;
    }

    let stream = &mut config.stream;
    if stream.buffer_capacity < 2 {
        tracing::warn!("stream.buffer_capacity must be at least 2, using 2");
        stream.buffer_capacity = 2;
    }
    if stream.checkpoint_interval == 0 {
        tracing::warn!("stream.checkpoint_interval must be at least 1, using 1");
        stream.checkpoint_interval = 1;
    }
    if stream.reconnect_max_delay_ms < stream.reconnect_base_delay_ms {
        tracing::warn!("stream.reconnect_max_delay_ms below base delay, raising it");
        stream.reconnect_max_delay_ms = stream.reconnect_base_delay_ms;
    }

    config
}

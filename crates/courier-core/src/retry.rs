//! Exponential backoff with jitter, shared by delivery retries, stream
//! reconnects, and best-effort side effects.
//!
//! Delay for 1-based attempt `k` is `min(base * multiplier^(k-1), max)` plus a
//! random jitter of up to `jitter_ratio` of that capped value.

use std::future::Future;
use std::time::Duration;

use courier_types::config::{DeliveryConfig, StreamConfig};
use tracing::debug;

/// Jitter applied to stream reconnect delays.
const RECONNECT_JITTER_RATIO: f64 = 0.3;

/// Backoff schedule parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Upper bound of the random jitter as a fraction of the capped delay.
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_delivery_config(&DeliveryConfig::default())
    }
}

impl BackoffPolicy {
    pub fn from_delivery_config(config: &DeliveryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.backoff_multiplier,
            jitter_ratio: config.jitter_ratio,
        }
    }

    pub fn for_reconnects(config: &StreamConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(config.reconnect_max_delay_ms),
            multiplier: 2.0,
            jitter_ratio: RECONNECT_JITTER_RATIO,
        }
    }

    /// Capped delay for `attempt` before jitter. `attempt` is 1-based; 0 is
    /// treated as 1.
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.base_delay.as_secs_f64() * 1_000.0;
        let max_ms = self.max_delay.as_secs_f64() * 1_000.0;
        let raw_ms = base_ms * self.multiplier.max(1.0).powi(exponent);
        let capped_ms = if raw_ms.is_finite() {
            raw_ms.min(max_ms)
        } else {
            max_ms
        };
        Duration::from_secs_f64(capped_ms.max(0.0) / 1_000.0)
    }

    /// Delay for `attempt` with a fresh random jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_with_jitter(attempt, rand::random::<f64>())
    }

    /// Delay for `attempt` where `unit` in `[0, 1)` selects the jitter share.
    pub fn delay_with_jitter(&self, attempt: u32, unit: f64) -> Duration {
        let capped = self.capped_delay(attempt);
        let ratio = self.jitter_ratio.max(0.0) * unit.clamp(0.0, 1.0);
        capped + capped.mul_f64(ratio)
    }
}

/// Run `op` until it succeeds, `is_retryable` rejects the error, or
/// `max_attempts` calls have been made. Returns the last error on give-up.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: &BackoffPolicy,
    max_attempts: u32,
    is_retryable: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_retryable(&e) => {
                let delay = policy.delay_for(attempt);
                debug!(attempt, ?delay, error = %e, "operation failed, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
            jitter_ratio: 0.3,
        }
    }

    #[test]
    fn test_capped_delay_grows_then_caps() {
        let p = policy();
        assert_eq!(p.capped_delay(1), Duration::from_millis(1_000));
        assert_eq!(p.capped_delay(2), Duration::from_millis(2_000));
        assert_eq!(p.capped_delay(3), Duration::from_millis(4_000));
        assert_eq!(p.capped_delay(6), Duration::from_millis(30_000));
        assert_eq!(p.capped_delay(500), Duration::from_millis(30_000));
    }

    #[test]
    fn test_zero_attempt_treated_as_first() {
        let p = policy();
        assert_eq!(p.capped_delay(0), p.capped_delay(1));
    }

    #[test]
    fn test_jitter_bounds() {
        let p = policy();
        for attempt in 1..8 {
            let capped = p.capped_delay(attempt);
            let upper = capped.mul_f64(1.3);
            for _ in 0..200 {
                let d = p.delay_for(attempt);
                assert!(d >= capped, "attempt {attempt}: {d:?} < {capped:?}");
                assert!(d <= upper, "attempt {attempt}: {d:?} > {upper:?}");
            }
        }
    }

    #[test]
    fn test_explicit_jitter_unit() {
        let p = policy();
        assert_eq!(p.delay_with_jitter(1, 0.0), Duration::from_millis(1_000));
        assert_eq!(p.delay_with_jitter(1, 1.0), Duration::from_millis(1_300));
    }

    #[test]
    fn test_reconnect_policy_from_stream_config() {
        let p = BackoffPolicy::for_reconnects(&StreamConfig::default());
        assert_eq!(p.capped_delay(1), Duration::from_millis(1_000));
        assert_eq!(p.capped_delay(5), Duration::from_millis(10_000));
    }

    fn fast() -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
            jitter_ratio: 0.0,
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_with_backoff(&fast(), 5, |_| true, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { if n < 3 { Err(format!("fail {n}")) } else { Ok(n) } }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_non_retryable() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry_with_backoff(
            &fast(),
            5,
            |e: &String| e != "fatal",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal".to_string()) }
            },
        )
        .await;
        assert_eq!(result.unwrap_err(), "fatal");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry_with_backoff(&fast(), 3, |_| true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("down".to_string()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}

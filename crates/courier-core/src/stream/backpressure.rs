//! Watermark-based flow control between a stream producer and its consumer.
//!
//! The producer pauses once the buffer holds `high_water` items and resumes
//! only after the consumer drains it to `low_water`. While paused it polls at
//! a fixed interval; staying paused past the timeout fails the push with a
//! retryable [`StreamError::BackpressureTimeout`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use courier_types::config::StreamConfig;
use courier_types::error::StreamError;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct FlowBuffer<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    high_water: usize,
    low_water: usize,
    poll_interval: Duration,
    timeout: Duration,
    paused: AtomicBool,
    ready: Notify,
}

impl<T> FlowBuffer<T> {
    pub fn new(config: &StreamConfig) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity: config.buffer_capacity.max(2),
            high_water: config.high_water_mark(),
            low_water: config.low_water_mark(),
            poll_interval: config.backpressure_poll(),
            timeout: config.backpressure_timeout(),
            paused: AtomicBool::new(false),
            ready: Notify::new(),
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True while a producer is waiting for the consumer to drain.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Append `item`, first waiting out backpressure if the buffer is at the
    /// high-water mark.
    pub async fn push(&self, item: T, cancel: &CancellationToken) -> Result<(), StreamError> {
        if self.len() >= self.high_water {
            self.wait_for_drain(cancel).await?;
        }
        self.queue().push_back(item);
        self.ready.notify_one();
        Ok(())
    }

    async fn wait_for_drain(&self, cancel: &CancellationToken) -> Result<(), StreamError> {
        self.paused.store(true, Ordering::SeqCst);
        debug!(
            buffered = self.len(),
            high_water = self.high_water,
            "backpressure engaged, producer paused"
        );

        let started = Instant::now();
        let result = loop {
            if cancel.is_cancelled() {
                break Err(StreamError::Cancelled);
            }
            if self.len() <= self.low_water {
                break Ok(());
            }
            if started.elapsed() >= self.timeout {
                break Err(StreamError::BackpressureTimeout(self.timeout));
            }
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        };

        self.paused.store(false, Ordering::SeqCst);
        if result.is_ok() {
            debug!(buffered = self.len(), "backpressure released");
        }
        result
    }

    /// Append a terminal item without waiting. Pushes never let the buffer
    /// exceed the high-water mark, which sits below capacity, so one final
    /// item always fits.
    pub fn push_final(&self, item: T) {
        self.queue().push_back(item);
        self.ready.notify_one();
    }

    /// Take the oldest item, waiting until one is available.
    pub async fn pop(&self) -> T {
        loop {
            let next = self.queue().pop_front();
            if let Some(item) = next {
                return item;
            }
            self.ready.notified().await;
        }
    }
}

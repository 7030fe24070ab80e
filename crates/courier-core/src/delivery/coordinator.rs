//! Delivery coordinator: drives every tracked message from `Pending` to a
//! settled state.
//!
//! Each message gets one worker task that runs attempts in a loop: persist the
//! body (until it succeeds once), publish to every recipient, then either mark
//! the record `Sent` or schedule the next attempt with exponential backoff.
//! Acks and read receipts arrive through the public methods or, once
//! [`DeliveryCoordinator::listen_for_acks`] is called, straight off the
//! transport.
//!
//! Status changes are broadcast as best-effort side effects. A failed
//! broadcast is logged and never rolls back the ledger.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use courier_types::chat::ChatMessage;
use courier_types::config::DeliveryConfig;
use courier_types::delivery::{
    DeliveryConfirmation, DeliveryOptions, DeliveryRecord, DeliveryStatistics, DeliveryStatus,
    ReadReceipt,
};
use courier_types::error::{AttemptError, DeliveryError, RepositoryError, TransportError};
use courier_types::transport::{Envelope, EnvelopeKind};
use futures_util::future::join_all;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::ledger::DeliveryLedger;
use super::receipts::ReceiptBook;
use super::side_effects::SideEffects;
use crate::repository::DeliveryStore;
use crate::retry::{BackoffPolicy, retry_with_backoff};
use crate::transport::{EnvelopeHandler, Transport, envelope};

/// Attempts per best-effort side effect (status broadcast, receipt write).
const SIDE_EFFECT_ATTEMPTS: u32 = 2;

/// Floor on the cleanup period so a zero config cannot spin.
const MIN_CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

fn side_effect_backoff() -> BackoffPolicy {
    BackoffPolicy {
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        multiplier: 2.0,
        jitter_ratio: 0.3,
    }
}

/// Everything one attempt needs, copied out of the ledger so no entry is
/// held across an await.
struct Attempt {
    id: Uuid,
    number: u32,
    message: ChatMessage,
    recipients: Vec<String>,
    persist: bool,
}

/// Inbound read receipt payload. `reader_id` falls back to the envelope sender.
#[derive(Debug, Deserialize)]
struct InboundReceipt {
    message_id: Uuid,
    #[serde(default)]
    reader_id: Option<String>,
    #[serde(default)]
    device: Option<serde_json::Value>,
}

pub struct DeliveryCoordinator<T: Transport, S: DeliveryStore> {
    transport: Arc<T>,
    store: Arc<S>,
    ledger: DeliveryLedger,
    receipts: ReceiptBook,
    side_effects: SideEffects,
    backoff: BackoffPolicy,
    config: DeliveryConfig,
}

impl<T: Transport, S: DeliveryStore> DeliveryCoordinator<T, S> {
    pub fn new(transport: Arc<T>, store: Arc<S>, config: DeliveryConfig) -> Arc<Self> {
        Arc::new(Self {
            transport,
            store,
            ledger: DeliveryLedger::new(),
            receipts: ReceiptBook::new(),
            side_effects: SideEffects::new(config.side_effect_concurrency),
            backoff: BackoffPolicy::from_delivery_config(&config),
            config,
        })
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Start tracking `message` and hand it to a delivery worker.
    ///
    /// Returns the `Pending` record immediately; delivery proceeds in the
    /// background.
    pub fn send_message(
        self: &Arc<Self>,
        message: ChatMessage,
        recipients: Vec<String>,
        options: DeliveryOptions,
    ) -> Result<DeliveryRecord, DeliveryError> {
        if message.session_id.trim().is_empty() {
            return Err(DeliveryError::Validation("session_id must not be empty".into()));
        }
        if recipients.is_empty() {
            return Err(DeliveryError::Validation(
                "at least one recipient is required".into(),
            ));
        }
        if recipients.iter().any(|r| r.trim().is_empty()) {
            return Err(DeliveryError::Validation(
                "recipient IDs must not be empty".into(),
            ));
        }

        let max_attempts = options.max_attempts.unwrap_or(self.config.max_attempts);
        let ack_window = options
            .delivery_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.delivery_timeout());
        let record = DeliveryRecord::new(&message, &recipients, max_attempts, &options);
        let id = record.message_id;
        let snapshot = record.clone();

        self.ledger.insert(record, message, ack_window)?;
        info!(
            message_id = %id,
            session_id = %snapshot.session_id,
            recipients = snapshot.recipients.len(),
            max_attempts = snapshot.max_attempts,
            "tracking message for delivery"
        );

        self.broadcast_status(&snapshot);
        self.spawn_worker(id);
        Ok(snapshot)
    }

    fn spawn_worker(self: &Arc<Self>, id: Uuid) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_delivery(id).await });
        self.ledger.update(&id, |entry| {
            entry.abort_worker();
            entry.worker = Some(handle.abort_handle());
        });
    }

    async fn run_delivery(self: Arc<Self>, id: Uuid) {
        loop {
            let Some(attempt) = self.begin_attempt(&id) else {
                return;
            };
            match self.execute_attempt(&attempt).await {
                Ok(()) => {
                    self.complete_attempt(&id);
                    return;
                }
                Err(err) => match self.fail_attempt(&id, attempt.number, err) {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => return,
                },
            }
        }
    }

    /// Move `Pending -> Sending`. `None` if the record is gone or was settled
    /// by an ack in the meantime.
    fn begin_attempt(&self, id: &Uuid) -> Option<Attempt> {
        let (attempt, snapshot) = self
            .ledger
            .update(id, |entry| {
                if entry.record.status != DeliveryStatus::Pending {
                    return None;
                }
                entry.transition(DeliveryStatus::Sending).ok()?;
                let attempt = Attempt {
                    id: *id,
                    number: entry.record.attempt_count + 1,
                    message: entry.message.clone(),
                    recipients: entry.record.recipients.clone(),
                    persist: !entry.persisted,
                };
                Some((attempt, entry.record.clone()))
            })
            .flatten()?;

        debug!(message_id = %id, attempt = attempt.number, "delivery attempt started");
        self.broadcast_status(&snapshot);
        Some(attempt)
    }

    async fn execute_attempt(&self, attempt: &Attempt) -> Result<(), AttemptError> {
        if attempt.persist {
            self.store.insert_message(&attempt.message).await?;
            self.ledger.update(&attempt.id, |entry| entry.persisted = true);
        }

        let publishes = attempt.recipients.iter().map(|recipient| {
            let envelope = envelope::chat_message(&attempt.message, recipient);
            async move {
                self.transport
                    .send(recipient, envelope)
                    .await
                    .map_err(|source| AttemptError::Publish {
                        recipient: recipient.clone(),
                        source,
                    })
            }
        });

        for result in join_all(publishes).await {
            result?;
        }
        Ok(())
    }

    /// Publish succeeded: `Sending -> Sent`, then `Delivered` straight away
    /// when the caller did not ask for acks.
    fn complete_attempt(self: &Arc<Self>, id: &Uuid) {
        let outcome = self
            .ledger
            .update(id, |entry| {
                if entry.record.status != DeliveryStatus::Sending {
                    return None;
                }
                entry.transition(DeliveryStatus::Sent).ok()?;
                let mut changes = vec![entry.record.clone()];
                if !entry.record.requires_ack {
                    entry.transition(DeliveryStatus::Delivered).ok()?;
                    changes.push(entry.record.clone());
                }
                Some((changes, entry.ack_window))
            })
            .flatten();

        let Some((changes, ack_window)) = outcome else {
            return;
        };
        for snapshot in &changes {
            self.broadcast_status(snapshot);
        }

        let awaiting_ack = changes
            .last()
            .is_some_and(|r| r.status == DeliveryStatus::Sent);
        if awaiting_ack {
            debug!(message_id = %id, "message sent, awaiting ack");
            self.arm_ack_timeout(*id, ack_window);
        } else {
            info!(message_id = %id, "message delivered without ack");
        }
    }

    /// Record a failed attempt. Returns the backoff delay when another
    /// attempt is scheduled, `None` when the record is now `Failed` (or was
    /// settled concurrently).
    fn fail_attempt(&self, id: &Uuid, attempt: u32, err: AttemptError) -> Option<Duration> {
        let class = err.class();
        let reason = err.to_string();

        let (snapshot, retry_in) = self
            .ledger
            .update(id, |entry| {
                if entry.record.status != DeliveryStatus::Sending {
                    return None;
                }
                entry.record.attempt_count += 1;
                entry.record.last_error = Some(reason.clone());
                if class.is_retryable() && entry.record.attempts_remaining() {
                    entry.transition(DeliveryStatus::Pending).ok()?;
                    let delay = self.backoff.delay_for(entry.record.attempt_count);
                    Some((entry.record.clone(), Some(delay)))
                } else {
                    entry.transition(DeliveryStatus::Failed).ok()?;
                    Some((entry.record.clone(), None))
                }
            })
            .flatten()?;

        match retry_in {
            Some(delay) => warn!(
                message_id = %id,
                attempt,
                max_attempts = snapshot.max_attempts,
                ?delay,
                error = %reason,
                "delivery attempt failed, retry scheduled"
            ),
            None => error!(
                message_id = %id,
                attempts = snapshot.attempt_count,
                ?class,
                error = %reason,
                "delivery failed"
            ),
        }

        self.broadcast_status(&snapshot);
        retry_in
    }

    /// Log (and only log) when no ack arrives within `after`.
    fn arm_ack_timeout(self: &Arc<Self>, id: Uuid, after: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let Some(this) = weak.upgrade() else {
                return;
            };
            let still_waiting = this
                .ledger
                .update(&id, |entry| {
                    entry.ack_timeout = None;
                    entry.record.status == DeliveryStatus::Sent
                })
                .unwrap_or(false);
            if still_waiting {
                warn!(
                    message_id = %id,
                    timeout_ms = after.as_millis() as u64,
                    "no delivery ack within timeout, still accepting a late ack"
                );
            }
        });
        self.ledger.update(&id, |entry| {
            entry.abort_ack_timeout();
            entry.ack_timeout = Some(handle.abort_handle());
        });
    }

    // -----------------------------------------------------------------------
    // Acks and receipts
    // -----------------------------------------------------------------------

    /// Apply a recipient ack.
    ///
    /// The first ack moves the record to `Delivered` and cancels any pending
    /// retry or ack timeout. Later acks, and acks for failed records, leave it
    /// unchanged. A confirmation carrying `Read` records a read receipt.
    pub fn confirm_delivery(
        self: &Arc<Self>,
        confirmation: DeliveryConfirmation,
    ) -> Result<DeliveryRecord, DeliveryError> {
        let id = confirmation.message_id;
        match confirmation.status {
            DeliveryStatus::Delivered => {}
            DeliveryStatus::Read => {
                let session_id = self
                    .ledger
                    .get(&id)
                    .ok_or(DeliveryError::NotFound(id))?
                    .session_id;
                return self.mark_as_read(id, &confirmation.recipient_id, &session_id, None);
            }
            other => {
                return Err(DeliveryError::Validation(format!(
                    "confirmation status must be delivered or read, got {other}"
                )));
            }
        }

        let (snapshot, changed) = self
            .ledger
            .update(&id, |entry| {
                let status = entry.record.status;
                if status.is_confirmed() || status == DeliveryStatus::Failed {
                    return Ok((entry.record.clone(), false));
                }
                entry.abort_ack_timeout();
                if status == DeliveryStatus::Pending {
                    entry.abort_worker();
                }
                entry.transition(DeliveryStatus::Delivered)?;
                entry.record.delivered_at = Some(confirmation.timestamp);
                Ok((entry.record.clone(), true))
            })
            .ok_or(DeliveryError::NotFound(id))??;

        if changed {
            info!(
                message_id = %id,
                recipient_id = %confirmation.recipient_id,
                "delivery confirmed"
            );
            self.broadcast_status(&snapshot);
        } else {
            debug!(
                message_id = %id,
                status = %snapshot.status,
                "ack ignored for settled message"
            );
        }
        Ok(snapshot)
    }

    /// Record that `reader_id` has seen the message.
    ///
    /// Idempotent per reader. Once every recipient has a receipt the record
    /// becomes `Read`. Receipts for failed records are ignored.
    pub fn mark_as_read(
        self: &Arc<Self>,
        message_id: Uuid,
        reader_id: &str,
        session_id: &str,
        device: Option<serde_json::Value>,
    ) -> Result<DeliveryRecord, DeliveryError> {
        if reader_id.trim().is_empty() {
            return Err(DeliveryError::Validation("reader_id must not be empty".into()));
        }

        // The receipt is recorded under the ledger entry lock, so a
        // concurrent cancel or cleanup either sees it and drops it or
        // removes the entry first and this call reports NotFound.
        let (record, receipt) = self
            .ledger
            .update(&message_id, |entry| {
                let record = entry.record.clone();
                if record.status == DeliveryStatus::Failed {
                    debug!(%message_id, reader_id, "read receipt ignored for failed message");
                    return (record, None);
                }
                let session_id = if session_id.trim().is_empty() {
                    record.session_id.clone()
                } else {
                    session_id.to_string()
                };
                let receipt = ReadReceipt {
                    message_id,
                    reader_id: reader_id.to_string(),
                    session_id,
                    read_at: Utc::now(),
                    device,
                };
                if !self.receipts.record(receipt.clone()) {
                    debug!(%message_id, reader_id, "duplicate read receipt ignored");
                    return (record, None);
                }
                (record, Some(receipt))
            })
            .ok_or(DeliveryError::NotFound(message_id))?;
        let Some(receipt) = receipt else {
            return Ok(record);
        };

        debug!(%message_id, reader_id, "read receipt recorded");
        self.persist_receipt(&receipt);
        self.broadcast_receipt(&receipt);

        if !self.receipts.covers(&message_id, &record.recipients) {
            return self
                .ledger
                .get(&message_id)
                .ok_or(DeliveryError::NotFound(message_id));
        }

        let read = self
            .ledger
            .update(&message_id, |entry| {
                if entry.record.status.is_terminal() {
                    return None;
                }
                entry.abort_ack_timeout();
                entry.abort_worker();
                entry.transition(DeliveryStatus::Read).ok()?;
                Some(entry.record.clone())
            })
            .flatten();

        match read {
            Some(snapshot) => {
                info!(%message_id, "message read by all recipients");
                self.broadcast_status(&snapshot);
                Ok(snapshot)
            }
            None => self
                .ledger
                .get(&message_id)
                .ok_or(DeliveryError::NotFound(message_id)),
        }
    }

    /// Subscribe to ack and read-receipt envelopes on the transport.
    ///
    /// Handlers hold a weak reference, so subscribing does not keep the
    /// coordinator alive.
    pub fn listen_for_acks(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let on_ack: EnvelopeHandler = Arc::new(move |env: &Envelope| {
            let Some(this) = weak.upgrade() else {
                return;
            };
            match serde_json::from_value::<DeliveryConfirmation>(env.payload.clone()) {
                Ok(confirmation) => {
                    if let Err(e) = this.confirm_delivery(confirmation) {
                        warn!(envelope_id = %env.id, error = %e, "failed to apply delivery ack");
                    }
                }
                Err(e) => warn!(envelope_id = %env.id, error = %e, "malformed delivery ack"),
            }
        });
        self.transport.on_message(EnvelopeKind::DeliveryAck, on_ack);

        let weak = Arc::downgrade(self);
        let on_receipt: EnvelopeHandler = Arc::new(move |env: &Envelope| {
            let Some(this) = weak.upgrade() else {
                return;
            };
            match serde_json::from_value::<InboundReceipt>(env.payload.clone()) {
                Ok(inbound) => {
                    let reader_id = inbound.reader_id.as_deref().unwrap_or(&env.sender_id);
                    if let Err(e) = this.mark_as_read(
                        inbound.message_id,
                        reader_id,
                        &env.session_id,
                        inbound.device,
                    ) {
                        warn!(envelope_id = %env.id, error = %e, "failed to apply read receipt");
                    }
                }
                Err(e) => warn!(envelope_id = %env.id, error = %e, "malformed read receipt"),
            }
        });
        self.transport.on_message(EnvelopeKind::ReadReceipt, on_receipt);

        info!("listening for delivery acks and read receipts");
    }

    // -----------------------------------------------------------------------
    // Manual control
    // -----------------------------------------------------------------------

    /// Put a `Failed` record back to `Pending` with a fresh attempt budget.
    pub fn retry_message(self: &Arc<Self>, id: Uuid) -> Result<DeliveryRecord, DeliveryError> {
        let snapshot = self
            .ledger
            .update(&id, |entry| {
                let status = entry.record.status;
                if status != DeliveryStatus::Failed {
                    return Err(DeliveryError::NotRetryable { id, status });
                }
                entry.transition(DeliveryStatus::Pending)?;
                entry.record.attempt_count = 0;
                entry.record.failed_at = None;
                entry.record.last_error = None;
                Ok(entry.record.clone())
            })
            .ok_or(DeliveryError::NotFound(id))??;

        info!(message_id = %id, "manual retry requested");
        self.broadcast_status(&snapshot);
        self.spawn_worker(id);
        Ok(snapshot)
    }

    /// Stop tracking a message, cancelling its worker and timers.
    pub fn cancel_delivery(&self, id: Uuid) -> Result<DeliveryRecord, DeliveryError> {
        let record = self.ledger.remove(&id).ok_or(DeliveryError::NotFound(id))?;
        self.receipts.remove(&id);
        info!(message_id = %id, status = %record.status, "delivery cancelled");
        Ok(record)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get_delivery_status(&self, id: &Uuid) -> Option<DeliveryRecord> {
        self.ledger.get(id)
    }

    pub fn status_history(
        &self,
        id: &Uuid,
    ) -> Option<Vec<(DeliveryStatus, chrono::DateTime<Utc>)>> {
        self.ledger.history(id)
    }

    pub fn read_receipts(&self, id: &Uuid) -> Vec<ReadReceipt> {
        self.receipts.get(id)
    }

    pub fn get_statistics(&self) -> DeliveryStatistics {
        self.ledger.statistics()
    }

    /// The durably stored message body, which outlives ledger cleanup.
    pub async fn stored_message(&self, id: &Uuid) -> Result<Option<ChatMessage>, RepositoryError> {
        self.store.get_message(id).await
    }

    pub async fn stored_receipts(&self, id: &Uuid) -> Result<Vec<ReadReceipt>, RepositoryError> {
        self.store.list_read_receipts(id).await
    }

    // -----------------------------------------------------------------------
    // Cleanup
    // -----------------------------------------------------------------------

    /// Purge records that settled longer ago than the retention window.
    pub fn cleanup_expired(&self) -> usize {
        let retention = chrono::Duration::from_std(self.config.retention())
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let cutoff = Utc::now() - retention;

        let mut purged = 0;
        for id in self.ledger.settled_before(cutoff) {
            if self.ledger.remove(&id).is_some() {
                self.receipts.remove(&id);
                purged += 1;
            }
        }
        if purged > 0 {
            info!(purged, remaining = self.ledger.len(), "purged settled delivery records");
        }
        purged
    }

    /// Run [`cleanup_expired`](Self::cleanup_expired) on the configured
    /// interval until `shutdown` fires.
    pub fn spawn_cleanup(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let period = self.config.cleanup_interval().max(MIN_CLEANUP_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        this.cleanup_expired();
                    }
                }
            }
            debug!("delivery cleanup task stopped");
        })
    }

    /// Abort every worker and timer. Records stay queryable.
    pub fn shutdown(&self) {
        let halted = self.ledger.halt();
        info!(halted, "delivery coordinator stopped");
    }

    // -----------------------------------------------------------------------
    // Side effects
    // -----------------------------------------------------------------------

    fn broadcast_status(&self, record: &DeliveryRecord) {
        let envelope = envelope::delivery_status(record);
        self.publish_best_effort("broadcast_status", envelope);
    }

    fn broadcast_receipt(&self, receipt: &ReadReceipt) {
        let envelope = envelope::read_receipt(receipt);
        self.publish_best_effort("broadcast_receipt", envelope);
    }

    fn publish_best_effort(&self, label: &'static str, envelope: Envelope) {
        let transport = Arc::clone(&self.transport);
        self.side_effects.spawn(label, async move {
            let policy = side_effect_backoff();
            retry_with_backoff(
                &policy,
                SIDE_EFFECT_ATTEMPTS,
                |e: &TransportError| e.class().is_retryable(),
                || transport.broadcast(envelope.clone()),
            )
            .await
        });
    }

    fn persist_receipt(&self, receipt: &ReadReceipt) {
        let store = Arc::clone(&self.store);
        let receipt = receipt.clone();
        self.side_effects.spawn("persist_receipt", async move {
            let policy = side_effect_backoff();
            retry_with_backoff(
                &policy,
                SIDE_EFFECT_ATTEMPTS,
                |e: &RepositoryError| e.class().is_retryable(),
                || store.insert_read_receipt(&receipt),
            )
            .await
        });
    }
}

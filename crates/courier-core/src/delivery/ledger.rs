//! In-memory delivery ledger: one entry per tracked message.
//!
//! Each entry owns the delivery record, the message body, and the handles of
//! the background tasks driving it (the attempt worker and the ack timeout).
//! DashMap gives per-key exclusive access; callers never hold an entry across
//! an `.await`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use courier_types::chat::ChatMessage;
use courier_types::delivery::{DeliveryRecord, DeliveryStatistics, DeliveryStatus};
use courier_types::error::DeliveryError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::AbortHandle;
use uuid::Uuid;

/// One tracked message.
pub(crate) struct LedgerEntry {
    pub record: DeliveryRecord,
    pub message: ChatMessage,
    /// Set once the message body is durably stored.
    pub persisted: bool,
    /// Status changes in order, starting with `Pending`.
    pub history: Vec<(DeliveryStatus, DateTime<Utc>)>,
    /// How long to wait for an ack once the message is `Sent`.
    pub ack_window: Duration,
    pub worker: Option<AbortHandle>,
    pub ack_timeout: Option<AbortHandle>,
}

impl LedgerEntry {
    /// Transition the record and append to the history.
    pub fn transition(&mut self, next: DeliveryStatus) -> Result<(), DeliveryError> {
        self.record.transition(next)?;
        self.history.push((next, Utc::now()));
        Ok(())
    }

    pub fn abort_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            handle.abort();
        }
    }

    pub fn abort_ack_timeout(&mut self) {
        if let Some(handle) = self.ack_timeout.take() {
            handle.abort();
        }
    }

    fn abort_all(&mut self) {
        self.abort_worker();
        self.abort_ack_timeout();
    }
}

/// Concurrent map of message ID to ledger entry.
#[derive(Default)]
pub struct DeliveryLedger {
    entries: DashMap<Uuid, LedgerEntry>,
}

impl DeliveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `record`. Fails if the message ID is already tracked.
    pub(crate) fn insert(
        &self,
        record: DeliveryRecord,
        message: ChatMessage,
        ack_window: Duration,
    ) -> Result<(), DeliveryError> {
        match self.entries.entry(record.message_id) {
            Entry::Occupied(_) => Err(DeliveryError::Validation(format!(
                "message {} is already tracked",
                record.message_id
            ))),
            Entry::Vacant(slot) => {
                let history = vec![(record.status, record.created_at)];
                slot.insert(LedgerEntry {
                    record,
                    message,
                    persisted: false,
                    history,
                    ack_window,
                    worker: None,
                    ack_timeout: None,
                });
                Ok(())
            }
        }
    }

    /// Run `f` with exclusive access to the entry for `id`.
    pub(crate) fn update<R>(&self, id: &Uuid, f: impl FnOnce(&mut LedgerEntry) -> R) -> Option<R> {
        self.entries.get_mut(id).map(|mut entry| f(&mut entry))
    }

    /// Snapshot of the record for `id`.
    pub fn get(&self, id: &Uuid) -> Option<DeliveryRecord> {
        self.entries.get(id).map(|e| e.record.clone())
    }

    /// Status changes recorded for `id`, oldest first.
    pub fn history(&self, id: &Uuid) -> Option<Vec<(DeliveryStatus, DateTime<Utc>)>> {
        self.entries.get(id).map(|e| e.history.clone())
    }

    /// Abort every background task without dropping any record.
    pub fn halt(&self) -> usize {
        let mut halted = 0;
        for mut entry in self.entries.iter_mut() {
            if entry.worker.is_some() || entry.ack_timeout.is_some() {
                halted += 1;
            }
            entry.abort_all();
        }
        halted
    }

    /// Stop tracking `id`, aborting its background tasks.
    pub fn remove(&self, id: &Uuid) -> Option<DeliveryRecord> {
        self.entries.remove(id).map(|(_, mut entry)| {
            entry.abort_all();
            entry.record
        })
    }

    /// IDs of records that settled (delivered, read, or failed) before `cutoff`.
    pub fn settled_before(&self, cutoff: DateTime<Utc>) -> Vec<Uuid> {
        self.entries
            .iter()
            .filter(|e| e.record.settled_at().is_some_and(|at| at < cutoff))
            .map(|e| *e.key())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Aggregate counts over every tracked record.
    pub fn statistics(&self) -> DeliveryStatistics {
        let mut stats = DeliveryStatistics::default();
        let mut attempts: u64 = 0;

        for entry in self.entries.iter() {
            let record = &entry.record;
            stats.total += 1;
            attempts += u64::from(record.attempt_count);
            match record.status {
                DeliveryStatus::Pending => stats.pending += 1,
                DeliveryStatus::Sending => stats.sending += 1,
                DeliveryStatus::Sent => stats.sent += 1,
                DeliveryStatus::Delivered => stats.delivered += 1,
                DeliveryStatus::Read => stats.read += 1,
                DeliveryStatus::Failed => stats.failed += 1,
            }
        }

        if stats.total > 0 {
            let total = stats.total as f64;
            stats.average_attempts = attempts as f64 / total;
            stats.success_rate = (stats.delivered + stats.read) as f64 / total;
        }
        stats
    }
}

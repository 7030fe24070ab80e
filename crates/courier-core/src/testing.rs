//! In-memory doubles for the core ports, shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use courier_types::chat::ChatMessage;
use courier_types::delivery::ReadReceipt;
use courier_types::error::{RepositoryError, TransportError};
use courier_types::llm::{CompletionRequest, CompletionResponse, LlmError, Usage};
use courier_types::transport::{Envelope, EnvelopeKind};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::llm::CompletionProvider;
use crate::repository::DeliveryStore;
use crate::transport::{EnvelopeHandler, Transport};

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

/// Records every publish. `send` fails with the queued errors first.
#[derive(Default)]
pub struct MockTransport {
    pub sent: Mutex<Vec<(String, Envelope)>>,
    pub broadcasts: Mutex<Vec<Envelope>>,
    send_failures: Mutex<VecDeque<TransportError>>,
    always_fail: Mutex<Option<TransportError>>,
    handlers: Mutex<HashMap<EnvelopeKind, Vec<EnvelopeHandler>>>,
}

impl MockTransport {
    pub fn failing_times(errors: Vec<TransportError>) -> Self {
        let t = Self::default();
        *t.send_failures.lock().unwrap() = errors.into();
        t
    }

    pub fn always_failing(error: TransportError) -> Self {
        let t = Self::default();
        *t.always_fail.lock().unwrap() = Some(error);
        t
    }

    pub fn heal(&self) {
        *self.always_fail.lock().unwrap() = None;
        self.send_failures.lock().unwrap().clear();
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn broadcasts_of(&self, kind: EnvelopeKind) -> Vec<Envelope> {
        self.broadcasts
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Simulate an inbound envelope from a remote peer.
    pub fn inject(&self, envelope: &Envelope) {
        let handlers = self
            .handlers
            .lock()
            .unwrap()
            .get(&envelope.kind)
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler(envelope);
        }
    }
}

impl Transport for MockTransport {
    async fn send(&self, channel_id: &str, envelope: Envelope) -> Result<(), TransportError> {
        if let Some(err) = self.always_fail.lock().unwrap().clone() {
            return Err(err);
        }
        if let Some(err) = self.send_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.sent
            .lock()
            .unwrap()
            .push((channel_id.to_string(), envelope));
        Ok(())
    }

    async fn broadcast(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.broadcasts.lock().unwrap().push(envelope);
        Ok(())
    }

    fn on_message(&self, kind: EnvelopeKind, handler: EnvelopeHandler) {
        self.handlers
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push(handler);
    }

    fn connect(
        &self,
        _channel_id: &str,
        _session_id: &str,
    ) -> Result<mpsc::Receiver<Envelope>, TransportError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    fn disconnect(&self, _channel_id: &str) -> bool {
        false
    }

    fn is_connected(&self, _channel_id: &str) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockStore {
    pub messages: Mutex<Vec<ChatMessage>>,
    pub receipts: Mutex<Vec<ReadReceipt>>,
    insert_failures: Mutex<VecDeque<RepositoryError>>,
}

impl MockStore {
    pub fn failing_times(errors: Vec<RepositoryError>) -> Self {
        let s = Self::default();
        *s.insert_failures.lock().unwrap() = errors.into();
        s
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

impl DeliveryStore for MockStore {
    async fn insert_message(&self, message: &ChatMessage) -> Result<(), RepositoryError> {
        if let Some(err) = self.insert_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn insert_read_receipt(&self, receipt: &ReadReceipt) -> Result<(), RepositoryError> {
        self.receipts.lock().unwrap().push(receipt.clone());
        Ok(())
    }

    async fn get_message(&self, id: &Uuid) -> Result<Option<ChatMessage>, RepositoryError> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == *id)
            .cloned())
    }

    async fn list_read_receipts(
        &self,
        message_id: &Uuid,
    ) -> Result<Vec<ReadReceipt>, RepositoryError> {
        Ok(self
            .receipts
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.message_id == *message_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MockProvider
// ---------------------------------------------------------------------------

/// Plays back scripted results, then answers with `fallback` forever.
pub struct MockProvider {
    script: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
    fallback: Result<CompletionResponse, LlmError>,
    latency: Duration,
    pub calls: AtomicU32,
}

impl MockProvider {
    pub fn replying(content: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(response(content)),
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing(error: LlmError) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Err(error),
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub fn then(self, results: Vec<Result<CompletionResponse, LlmError>>) -> Self {
        *self.script.lock().unwrap() = results.into();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn response(content: &str) -> CompletionResponse {
    CompletionResponse {
        content: content.to_string(),
        usage: Some(Usage::new(10, 5)),
        model: Some("mock-model".to_string()),
    }
}

impl CompletionProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

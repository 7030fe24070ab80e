//! In-process envelope transport built on tokio channels.
//!
//! Each connected channel gets a bounded `mpsc` mailbox. `send` targets one
//! mailbox, `broadcast` fans out to every mailbox in the envelope's session,
//! and `dispatch` hands inbound envelopes (acks, receipts) to the handlers
//! registered for their kind.

use courier_core::transport::{EnvelopeHandler, Transport};
use courier_types::error::TransportError;
use courier_types::transport::{Envelope, EnvelopeKind};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Buffer size for per-channel mailboxes.
pub const MAILBOX_BUFFER: usize = 256;

struct Connection {
    session_id: String,
    tx: mpsc::Sender<Envelope>,
}

/// Transport that keeps every participant inside the current process.
pub struct LocalTransport {
    connections: DashMap<String, Connection>,
    handlers: DashMap<EnvelopeKind, Vec<EnvelopeHandler>>,
    mailbox_buffer: usize,
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::with_mailbox_buffer(MAILBOX_BUFFER)
    }

    pub fn with_mailbox_buffer(mailbox_buffer: usize) -> Self {
        Self {
            connections: DashMap::new(),
            handlers: DashMap::new(),
            mailbox_buffer: mailbox_buffer.max(1),
        }
    }

    /// Deliver an inbound envelope to every handler registered for its kind.
    /// Returns how many handlers ran.
    pub fn dispatch(&self, envelope: &Envelope) -> usize {
        // Clone the list so no map guard is held while handlers run.
        let handlers: Vec<EnvelopeHandler> = self
            .handlers
            .get(&envelope.kind)
            .map(|list| list.clone())
            .unwrap_or_default();

        if handlers.is_empty() {
            debug!(kind = %envelope.kind, "no handler for inbound envelope");
        }
        for handler in &handlers {
            handler(envelope);
        }
        handlers.len()
    }

    /// Number of open channels.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Channel IDs connected to `session_id`, sorted.
    pub fn session_channels(&self, session_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .connections
            .iter()
            .filter(|c| c.session_id == session_id)
            .map(|c| c.key().clone())
            .collect();
        ids.sort();
        ids
    }

    fn try_deliver(&self, channel_id: &str, envelope: Envelope) -> Result<(), TransportError> {
        let result = {
            let conn = self
                .connections
                .get(channel_id)
                .ok_or_else(|| TransportError::NotConnected(channel_id.to_string()))?;
            conn.tx.try_send(envelope)
        };

        match result {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(TransportError::ChannelFull(channel_id.to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Receiver dropped without a disconnect; forget the channel.
                self.connections
                    .remove_if(channel_id, |_, conn| conn.tx.is_closed());
                Err(TransportError::NotConnected(channel_id.to_string()))
            }
        }
    }
}

impl Transport for LocalTransport {
    async fn send(&self, channel_id: &str, envelope: Envelope) -> Result<(), TransportError> {
        self.try_deliver(channel_id, envelope)
    }

    async fn broadcast(&self, envelope: Envelope) -> Result<(), TransportError> {
        let targets = self.session_channels(&envelope.session_id);
        for channel_id in targets {
            if let Err(e) = self.try_deliver(&channel_id, envelope.clone()) {
                // One slow or vanished listener must not block the rest.
                warn!(channel_id, kind = %envelope.kind, error = %e, "broadcast skipped channel");
            }
        }
        Ok(())
    }

    fn on_message(&self, kind: EnvelopeKind, handler: EnvelopeHandler) {
        self.handlers.entry(kind).or_default().push(handler);
    }

    fn connect(
        &self,
        channel_id: &str,
        session_id: &str,
    ) -> Result<mpsc::Receiver<Envelope>, TransportError> {
        if channel_id.trim().is_empty() {
            return Err(TransportError::Rejected("channel id must not be empty".into()));
        }
        let (tx, rx) = mpsc::channel(self.mailbox_buffer);
        let replaced = self
            .connections
            .insert(
                channel_id.to_string(),
                Connection {
                    session_id: session_id.to_string(),
                    tx,
                },
            )
            .is_some();
        debug!(channel_id, session_id, replaced, "channel connected");
        Ok(rx)
    }

    fn disconnect(&self, channel_id: &str) -> bool {
        let removed = self.connections.remove(channel_id).is_some();
        if removed {
            debug!(channel_id, "channel disconnected");
        }
        removed
    }

    fn is_connected(&self, channel_id: &str) -> bool {
        self.connections
            .get(channel_id)
            .is_some_and(|c| !c.tx.is_closed())
    }
}

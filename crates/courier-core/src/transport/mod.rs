//! Publish/subscribe transport port.
//!
//! - `envelope` -- Helper constructors for the envelopes Courier publishes
//!
//! The concrete transport (in-process channels, WebSocket fan-out, a broker)
//! lives in courier-infra. The delivery coordinator only sees this trait.

pub mod envelope;

use std::future::Future;
use std::sync::Arc;

use courier_types::error::TransportError;
use courier_types::transport::{Envelope, EnvelopeKind};
use tokio::sync::mpsc;

/// Callback invoked for every inbound envelope of a subscribed kind.
pub type EnvelopeHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Trait for the envelope transport.
///
/// Uses native async fn in traits (RPITIT) for the publishing methods.
pub trait Transport: Send + Sync + 'static {
    /// Publish `envelope` to the channel owned by `channel_id`.
    fn send(
        &self,
        channel_id: &str,
        envelope: Envelope,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Publish `envelope` to every channel connected to its session.
    fn broadcast(&self, envelope: Envelope)
    -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Register `handler` for inbound envelopes of `kind` (acks and receipts
    /// reported by peers). Outbound publishes never reach handlers.
    fn on_message(&self, kind: EnvelopeKind, handler: EnvelopeHandler);

    /// Open (or replace) the channel for `channel_id` and return its receiver.
    fn connect(
        &self,
        channel_id: &str,
        session_id: &str,
    ) -> Result<mpsc::Receiver<Envelope>, TransportError>;

    /// Close the channel for `channel_id`. Returns `true` if it was open.
    fn disconnect(&self, channel_id: &str) -> bool;

    /// Whether a channel is currently open for `channel_id`.
    fn is_connected(&self, channel_id: &str) -> bool;
}

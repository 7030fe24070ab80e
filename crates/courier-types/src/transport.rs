//! Transport envelope exchanged over the publish/subscribe channel.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message type tag carried by every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    ChatMessage,
    DeliveryAck,
    ReadReceipt,
    DeliveryStatus,
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeKind::ChatMessage => write!(f, "chat_message"),
            EnvelopeKind::DeliveryAck => write!(f, "delivery_ack"),
            EnvelopeKind::ReadReceipt => write!(f, "read_receipt"),
            EnvelopeKind::DeliveryStatus => write!(f, "delivery_status"),
        }
    }
}

/// A frame on the transport: a type tag, a JSON payload, and routing IDs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// UUIDv7 envelope ID.
    pub id: Uuid,
    pub kind: EnvelopeKind,
    pub session_id: String,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

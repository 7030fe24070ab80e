//! Helper constructors for transport envelopes.

use chrono::Utc;
use courier_types::chat::ChatMessage;
use courier_types::delivery::{DeliveryRecord, ReadReceipt};
use courier_types::transport::{Envelope, EnvelopeKind};
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

fn to_payload<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn build(
    kind: EnvelopeKind,
    session_id: &str,
    sender_id: &str,
    recipient_id: Option<&str>,
    payload: Value,
) -> Envelope {
    Envelope {
        id: Uuid::now_v7(),
        kind,
        session_id: session_id.to_string(),
        sender_id: sender_id.to_string(),
        recipient_id: recipient_id.map(str::to_string),
        payload,
        timestamp: Utc::now(),
    }
}

/// A chat message addressed to one recipient.
pub fn chat_message(message: &ChatMessage, recipient_id: &str) -> Envelope {
    build(
        EnvelopeKind::ChatMessage,
        &message.session_id,
        &message.sender_id,
        Some(recipient_id),
        to_payload(message),
    )
}

/// Status snapshot of a delivery record, for observers of the session.
pub fn delivery_status(record: &DeliveryRecord) -> Envelope {
    build(
        EnvelopeKind::DeliveryStatus,
        &record.session_id,
        &record.sender_id,
        None,
        json!({
            "message_id": record.message_id,
            "status": record.status,
            "attempt_count": record.attempt_count,
            "last_error": record.last_error,
        }),
    )
}

/// A reader's receipt, sent on behalf of the reader.
pub fn read_receipt(receipt: &ReadReceipt) -> Envelope {
    build(
        EnvelopeKind::ReadReceipt,
        &receipt.session_id,
        &receipt.reader_id,
        None,
        to_payload(receipt),
    )
}

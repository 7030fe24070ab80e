//! Delivery tracking domain types.
//!
//! A `DeliveryRecord` tracks one outbound chat message through the state
//! machine `Pending -> Sending -> Sent -> Delivered -> Read`, with
//! `Sending -> Pending` for a scheduled retry and `Sending -> Failed` once
//! attempts are exhausted.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::ChatMessage;
use crate::error::DeliveryError;

/// Transport lifecycle status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryStatus {
    /// Position along the forward path. `Failed` sits outside it.
    fn rank(self) -> Option<u8> {
        match self {
            DeliveryStatus::Pending => Some(0),
            DeliveryStatus::Sending => Some(1),
            DeliveryStatus::Sent => Some(2),
            DeliveryStatus::Delivered => Some(3),
            DeliveryStatus::Read => Some(4),
            DeliveryStatus::Failed => None,
        }
    }

    /// `Read` and `Failed` records are immutable apart from cleanup.
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Read | DeliveryStatus::Failed)
    }

    /// True once the message has reached at least one recipient.
    pub fn is_confirmed(self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Read)
    }

    /// Whether `self -> next` is a legal edge.
    ///
    /// Forward moves may skip states (an ack can arrive while a publish is
    /// still in flight). The only backward edges are `Sending -> Pending`
    /// (retry scheduled) and `Failed -> Pending` (manual retry).
    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        match (self, next) {
            (DeliveryStatus::Sending, DeliveryStatus::Pending) => true,
            (DeliveryStatus::Sending, DeliveryStatus::Failed) => true,
            (DeliveryStatus::Failed, DeliveryStatus::Pending) => true,
            (DeliveryStatus::Read, _) | (DeliveryStatus::Failed, _) => false,
            (from, to) => match (from.rank(), to.rank()) {
                (Some(a), Some(b)) => b > a,
                _ => false,
            },
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Sending => write!(f, "sending"),
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Delivered => write!(f, "delivered"),
            DeliveryStatus::Read => write!(f, "read"),
            DeliveryStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(DeliveryStatus::Pending),
            "sending" => Ok(DeliveryStatus::Sending),
            "sent" => Ok(DeliveryStatus::Sent),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "read" => Ok(DeliveryStatus::Read),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("invalid delivery status: '{other}'")),
        }
    }
}

/// Priority tag carried on a delivery record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Per-send options supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOptions {
    /// Wait for an explicit recipient ack before marking `Delivered`.
    #[serde(default = "default_requires_ack")]
    pub requires_ack: bool,
    /// Overrides the configured attempt cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub priority: DeliveryPriority,
    /// Overrides the configured ack timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_timeout_ms: Option<u64>,
}

fn default_requires_ack() -> bool {
    true
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            requires_ack: default_requires_ack(),
            max_attempts: None,
            priority: DeliveryPriority::default(),
            delivery_timeout_ms: None,
        }
    }
}

/// Tracked state of one outbound message's transport lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub message_id: Uuid,
    pub session_id: String,
    pub sender_id: String,
    /// Recipient IDs in the order given, duplicates removed.
    pub recipients: Vec<String>,
    pub status: DeliveryStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub priority: DeliveryPriority,
    pub requires_ack: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl DeliveryRecord {
    /// Create a `Pending` record for `message`.
    pub fn new(
        message: &ChatMessage,
        recipients: &[String],
        max_attempts: u32,
        options: &DeliveryOptions,
    ) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(recipients.len());
        for r in recipients {
            if !unique.contains(r) {
                unique.push(r.clone());
            }
        }

        Self {
            message_id: message.id,
            session_id: message.session_id.clone(),
            sender_id: message.sender_id.clone(),
            recipients: unique,
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            max_attempts: max_attempts.max(1),
            priority: options.priority,
            requires_ack: options.requires_ack,
            created_at: Utc::now(),
            sent_at: None,
            delivered_at: None,
            read_at: None,
            failed_at: None,
            last_error: None,
        }
    }

    /// Move to `next`, stamping the matching timestamp.
    pub fn transition(&mut self, next: DeliveryStatus) -> Result<(), DeliveryError> {
        if !self.status.can_transition_to(next) {
            return Err(DeliveryError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            DeliveryStatus::Sent => self.sent_at = Some(now),
            DeliveryStatus::Delivered => {
                self.delivered_at = Some(now);
            }
            DeliveryStatus::Read => {
                if self.delivered_at.is_none() {
                    self.delivered_at = Some(now);
                }
                self.read_at = Some(now);
            }
            DeliveryStatus::Failed => self.failed_at = Some(now),
            DeliveryStatus::Pending | DeliveryStatus::Sending => {}
        }
        self.status = next;
        Ok(())
    }

    /// Timestamp at which the record reached its current settled state, used
    /// for age-based cleanup. `None` while the record is still in flight.
    pub fn settled_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            DeliveryStatus::Delivered => self.delivered_at,
            DeliveryStatus::Read => self.read_at,
            DeliveryStatus::Failed => self.failed_at,
            _ => None,
        }
    }

    pub fn attempts_remaining(&self) -> bool {
        self.attempt_count < self.max_attempts
    }
}

/// External acknowledgment from a recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfirmation {
    pub message_id: Uuid,
    pub recipient_id: String,
    /// `Delivered`, or `Read` to record a receipt in the same call.
    pub status: DeliveryStatus,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Confirmation that a specific recipient has seen a specific message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub message_id: Uuid,
    pub reader_id: String,
    pub session_id: String,
    pub read_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<serde_json::Value>,
}

/// Aggregate counts over the delivery ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryStatistics {
    pub total: usize,
    pub pending: usize,
    pub sending: usize,
    pub sent: usize,
    pub delivered: usize,
    pub read: usize,
    pub failed: usize,
    pub average_attempts: f64,
    /// Share of records that reached `Delivered` or `Read`.
    pub success_rate: f64,
}

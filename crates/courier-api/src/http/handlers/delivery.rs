//! Delivery endpoints.
//!
//! POST   /api/v1/messages               - Send a message to its recipients
//! GET    /api/v1/messages/{id}          - Delivery status, history, receipts
//! DELETE /api/v1/messages/{id}          - Stop tracking a message
//! POST   /api/v1/messages/{id}/confirm  - Recipient ack
//! POST   /api/v1/messages/{id}/read     - Read receipt
//! POST   /api/v1/messages/{id}/retry    - Retry a failed message
//! GET    /api/v1/deliveries/stats       - Aggregate delivery statistics

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use courier_types::chat::ChatMessage;
use courier_types::delivery::{
    DeliveryConfirmation, DeliveryOptions, DeliveryRecord, DeliveryStatistics, DeliveryStatus,
    ReadReceipt,
};
use courier_types::llm::MessageRole;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Request body for sending a message.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub session_id: String,
    pub sender_id: String,
    pub content: String,
    pub recipients: Vec<String>,
    /// Defaults to `user`.
    pub role: Option<MessageRole>,
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub options: DeliveryOptions,
}

/// Request body for an ack.
#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub recipient_id: String,
    /// `delivered` (default) or `read`.
    pub status: Option<DeliveryStatus>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Request body for a read receipt.
#[derive(Debug, Deserialize)]
pub struct ReadRequest {
    pub reader_id: String,
    /// Defaults to the message's own session.
    pub session_id: Option<String>,
    pub device: Option<serde_json::Value>,
}

/// One entry of a record's status history.
#[derive(Debug, Serialize)]
pub struct StatusChange {
    pub status: DeliveryStatus,
    pub at: DateTime<Utc>,
}

/// Everything known about a message.
///
/// `record` is `None` once the ledger entry has been cleaned up; the stored
/// message and receipts remain available from the database.
#[derive(Debug, Serialize)]
pub struct MessageStatusView {
    pub record: Option<DeliveryRecord>,
    pub history: Vec<StatusChange>,
    pub receipts: Vec<ReadReceipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatMessage>,
}

fn message_link(id: &Uuid) -> String {
    format!("/api/v1/messages/{id}")
}

/// POST /api/v1/messages
pub async fn send_message(
    State(state): State<AppState>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<ApiResponse<DeliveryRecord>>, AppError> {
    let start = Instant::now();

    let mut message = ChatMessage::new(body.session_id, body.sender_id, body.content)
        .with_role(body.role.unwrap_or(MessageRole::User));
    message.metadata = body.metadata;

    let record = state
        .coordinator
        .send_message(message, body.recipients, body.options)?;
    let link = message_link(&record.message_id);

    Ok(Json(ApiResponse::timed(record, start).with_link("self", &link)))
}

/// GET /api/v1/messages/{id}
pub async fn get_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<MessageStatusView>>, AppError> {
    let start = Instant::now();

    let view = match state.coordinator.get_delivery_status(&id) {
        Some(record) => {
            let history = state
                .coordinator
                .status_history(&id)
                .unwrap_or_default()
                .into_iter()
                .map(|(status, at)| StatusChange { status, at })
                .collect();
            MessageStatusView {
                record: Some(record),
                history,
                receipts: state.coordinator.read_receipts(&id),
                message: None,
            }
        }
        None => {
            // Purged from the ledger; fall back to durable storage.
            let message = state
                .coordinator
                .stored_message(&id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("message {id} not found")))?;
            MessageStatusView {
                record: None,
                history: Vec::new(),
                receipts: state.coordinator.stored_receipts(&id).await?,
                message: Some(message),
            }
        }
    };

    Ok(Json(
        ApiResponse::timed(view, start).with_link("self", &message_link(&id)),
    ))
}

/// DELETE /api/v1/messages/{id}
pub async fn cancel_delivery(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<DeliveryRecord>>, AppError> {
    let start = Instant::now();
    let record = state.coordinator.cancel_delivery(id)?;
    Ok(Json(ApiResponse::timed(record, start)))
}

/// POST /api/v1/messages/{id}/confirm
pub async fn confirm_delivery(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ConfirmRequest>,
) -> Result<Json<ApiResponse<DeliveryRecord>>, AppError> {
    let start = Instant::now();
    let confirmation = DeliveryConfirmation {
        message_id: id,
        recipient_id: body.recipient_id,
        status: body.status.unwrap_or(DeliveryStatus::Delivered),
        timestamp: body.timestamp.unwrap_or_else(Utc::now),
    };
    let record = state.coordinator.confirm_delivery(confirmation)?;
    Ok(Json(ApiResponse::timed(record, start)))
}

/// POST /api/v1/messages/{id}/read
pub async fn mark_as_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReadRequest>,
) -> Result<Json<ApiResponse<DeliveryRecord>>, AppError> {
    let start = Instant::now();
    let session_id = match body.session_id {
        Some(session_id) => session_id,
        None => {
            state
                .coordinator
                .get_delivery_status(&id)
                .ok_or_else(|| AppError::NotFound(format!("message {id} not found")))?
                .session_id
        }
    };
    let record =
        state
            .coordinator
            .mark_as_read(id, &body.reader_id, &session_id, body.device)?;
    Ok(Json(ApiResponse::timed(record, start)))
}

/// POST /api/v1/messages/{id}/retry
pub async fn retry_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<DeliveryRecord>>, AppError> {
    let start = Instant::now();
    let record = state.coordinator.retry_message(id)?;
    Ok(Json(
        ApiResponse::timed(record, start).with_link("self", &message_link(&id)),
    ))
}

/// GET /api/v1/deliveries/stats
pub async fn get_statistics(
    State(state): State<AppState>,
) -> Json<ApiResponse<DeliveryStatistics>> {
    let start = Instant::now();
    Json(ApiResponse::timed(state.coordinator.get_statistics(), start))
}

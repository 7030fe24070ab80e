//! Transport channel endpoints.
//!
//! GET    /api/v1/channels/{id}/events?session_id=  - Subscribe a channel (SSE)
//! DELETE /api/v1/channels/{id}                     - Disconnect a channel
//! POST   /api/v1/envelopes                         - Inbound ack or receipt
//!
//! A connected channel receives chat messages addressed to it plus every
//! status and receipt broadcast in its session. Peers report acks and read
//! receipts back through `/envelopes`.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use courier_core::transport::Transport;
use courier_types::transport::{Envelope, EnvelopeKind};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    pub session_id: String,
}

/// An envelope reported by a peer. The server assigns its ID and timestamp.
#[derive(Debug, Deserialize)]
pub struct InboundEnvelope {
    pub kind: EnvelopeKind,
    pub session_id: String,
    pub sender_id: String,
    pub recipient_id: Option<String>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct DispatchResult {
    pub envelope_id: Uuid,
    pub handlers: usize,
}

#[derive(Debug, Serialize)]
pub struct DisconnectResult {
    pub disconnected: bool,
}

/// GET /api/v1/channels/{id}/events
///
/// Reconnecting with the same channel ID replaces the previous mailbox.
pub async fn subscribe(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    Query(query): Query<SubscribeQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if query.session_id.trim().is_empty() {
        return Err(AppError::Validation("session_id must not be empty".into()));
    }
    let rx = state
        .transport
        .connect(&channel_id, &query.session_id)
        .map_err(|e| AppError::Validation(e.to_string()))?;

    tracing::info!(%channel_id, session_id = %query.session_id, "channel subscribed");

    let events = ReceiverStream::new(rx).map(|envelope| {
        let data = serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".to_string());
        Ok::<_, Infallible>(
            Event::default()
                .event(envelope.kind.to_string())
                .id(envelope.id.to_string())
                .data(data),
        )
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

/// DELETE /api/v1/channels/{id}
pub async fn disconnect(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Json<ApiResponse<DisconnectResult>> {
    let start = Instant::now();
    let disconnected = state.transport.disconnect(&channel_id);
    Json(ApiResponse::timed(DisconnectResult { disconnected }, start))
}

/// POST /api/v1/envelopes
pub async fn receive_envelope(
    State(state): State<AppState>,
    Json(body): Json<InboundEnvelope>,
) -> Result<Json<ApiResponse<DispatchResult>>, AppError> {
    let start = Instant::now();
    if !matches!(body.kind, EnvelopeKind::DeliveryAck | EnvelopeKind::ReadReceipt) {
        return Err(AppError::Validation(format!(
            "inbound envelopes must be delivery_ack or read_receipt, got {}",
            body.kind
        )));
    }

    let envelope = Envelope {
        id: Uuid::now_v7(),
        kind: body.kind,
        session_id: body.session_id,
        sender_id: body.sender_id,
        recipient_id: body.recipient_id,
        payload: body.payload,
        timestamp: Utc::now(),
    };
    let handlers = state.transport.dispatch(&envelope);

    Ok(Json(ApiResponse::timed(
        DispatchResult {
            envelope_id: envelope.id,
            handlers,
        },
        start,
    )))
}

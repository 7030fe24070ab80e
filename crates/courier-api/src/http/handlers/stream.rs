//! Streaming endpoints (Server-Sent Events).
//!
//! POST   /api/v1/streams                 - Stream one assistant response
//! POST   /api/v1/streams/multiplex       - Stream several agents at once
//! DELETE /api/v1/streams/{id}            - Cancel a stream
//! GET    /api/v1/sessions/{id}/streams   - Active streams of a session
//! DELETE /api/v1/sessions/{id}/streams   - Cancel every stream of a session
//!
//! SSE event names follow the update type: `content`, `done`, `error`. The
//! event data is the JSON form of the update.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use courier_core::stream::{AgentRequest, StreamMultiplexer, UpdateStream};
use courier_types::llm::Message;
use courier_types::stream::{StreamOptions, StreamSession, StreamUpdate};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

const KEEP_ALIVE_SECS: u64 = 15;

/// Request body for opening a stream.
#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    pub session_id: String,
    /// Full conversation. Takes precedence over `prompt`.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Shorthand for a single user message.
    pub prompt: Option<String>,
    pub agent_id: Option<String>,
    pub user_id: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Resume a stream that ended with a resumable error.
    pub resume_stream_id: Option<String>,
}

/// One agent in a multiplex request.
#[derive(Debug, Deserialize)]
pub struct AgentStreamRequest {
    pub agent_id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub prompt: Option<String>,
}

/// Request body for a multiplexed stream.
#[derive(Debug, Deserialize)]
pub struct MultiplexRequest {
    pub session_id: String,
    pub agents: Vec<AgentStreamRequest>,
    pub user_id: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
}

/// Result of a cancel call.
#[derive(Debug, Serialize)]
pub struct CancelResult {
    pub cancelled: usize,
}

fn conversation(messages: Vec<Message>, prompt: Option<String>) -> Result<Vec<Message>, AppError> {
    if !messages.is_empty() {
        return Ok(messages);
    }
    match prompt {
        Some(prompt) if !prompt.trim().is_empty() => Ok(vec![Message::user(prompt)]),
        _ => Err(AppError::Validation(
            "either messages or a non-empty prompt is required".into(),
        )),
    }
}

fn event_name(update: &StreamUpdate) -> &'static str {
    match update {
        StreamUpdate::Content { .. } => "content",
        StreamUpdate::Done { .. } => "done",
        StreamUpdate::Error { .. } => "error",
    }
}

fn to_event<T: Serialize>(name: &str, payload: &T) -> Event {
    let data = serde_json::to_string(payload).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "error": e.to_string(), "resumable": false })
            .to_string()
    });
    Event::default().event(name).data(data)
}

fn sse<S>(events: S) -> Sse<KeepAliveStream<S>>
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(KEEP_ALIVE_SECS)))
}

/// Validate `body` and open the underlying stream.
pub fn open_stream(state: &AppState, body: StreamRequest) -> Result<UpdateStream, AppError> {
    let messages = conversation(body.messages, body.prompt)?;
    let options = StreamOptions {
        session_id: body.session_id,
        agent_id: body.agent_id,
        user_id: body.user_id,
        provider: body.provider,
        model: body.model,
        resume_stream_id: body.resume_stream_id,
    };
    Ok(state.streams.stream_message(messages, options)?)
}

/// Validate `body` and open one stream per agent.
pub fn open_multiplex(
    state: &AppState,
    body: MultiplexRequest,
) -> Result<StreamMultiplexer, AppError> {
    let agents = body
        .agents
        .into_iter()
        .map(|agent| {
            Ok(AgentRequest {
                messages: conversation(agent.messages, agent.prompt)?,
                agent_id: agent.agent_id,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    let base = StreamOptions {
        session_id: body.session_id,
        user_id: body.user_id,
        provider: body.provider,
        model: body.model,
        ..Default::default()
    };
    Ok(state.streams.multiplex_streams(base, agents)?)
}

/// POST /api/v1/streams
pub async fn create_stream(
    State(state): State<AppState>,
    Json(body): Json<StreamRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let updates = open_stream(&state, body)?;
    let events =
        updates.map(|update| Ok::<_, Infallible>(to_event(event_name(&update), &update)));
    Ok(sse(events))
}

/// POST /api/v1/streams/multiplex
pub async fn create_multiplex(
    State(state): State<AppState>,
    Json(body): Json<MultiplexRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let agents = body.agents.len();
    let mux = open_multiplex(&state, body)?;

    let events = async_stream::stream! {
        let mut mux = mux;
        while let Some(tagged) = mux.next().await {
            yield Ok::<_, Infallible>(to_event(event_name(&tagged.update), &tagged));
        }
        tracing::debug!(agents, "multiplexed stream drained");
    };
    Ok(sse(events))
}

/// DELETE /api/v1/streams/{id}
pub async fn cancel_stream(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<Json<ApiResponse<CancelResult>>, AppError> {
    let start = Instant::now();
    if !state.streams.cancel_stream(&stream_id) {
        return Err(AppError::NotFound(format!("stream {stream_id} is not active")));
    }
    Ok(Json(ApiResponse::timed(CancelResult { cancelled: 1 }, start)))
}

/// GET /api/v1/sessions/{id}/streams
pub async fn list_session_streams(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<ApiResponse<Vec<StreamSession>>> {
    let start = Instant::now();
    let streams = state.streams.get_active_streams(&session_id);
    Json(ApiResponse::timed(streams, start))
}

/// DELETE /api/v1/sessions/{id}/streams
pub async fn cancel_session_streams(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<ApiResponse<CancelResult>> {
    let start = Instant::now();
    let cancelled = state.streams.cancel_session_streams(&session_id);
    Json(ApiResponse::timed(CancelResult { cancelled }, start))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handlers::testing::test_state;
    use courier_types::stream::TaggedUpdate;

    fn request(prompt: &str) -> StreamRequest {
        StreamRequest {
            session_id: "s1".into(),
            messages: Vec::new(),
            prompt: Some(prompt.into()),
            agent_id: None,
            user_id: None,
            provider: None,
            model: None,
            resume_stream_id: None,
        }
    }

    #[tokio::test]
    async fn test_open_stream_yields_content_then_done() {
        let (state, _dir) = test_state().await;
        let updates: Vec<StreamUpdate> = open_stream(&state, request("hello world"))
            .unwrap()
            .collect()
            .await;

        let last = updates.last().unwrap();
        assert_eq!(event_name(last), "done");
        assert!(updates[..updates.len() - 1]
            .iter()
            .all(|u| event_name(u) == "content"));
        match last {
            StreamUpdate::Done { metadata, .. } => {
                assert_eq!(metadata.content, "You said: hello world");
            }
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_without_prompt_is_rejected() {
        let (state, _dir) = test_state().await;
        let mut body = request("");
        body.prompt = None;
        let err = open_stream(&state, body).err().unwrap();
        assert!(matches!(err, AppError::Validation(_)));

        let err = open_stream(&state, request("   ")).err().unwrap();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_multiplex_tags_every_agent() {
        let (state, _dir) = test_state().await;
        let body = MultiplexRequest {
            session_id: "s1".into(),
            agents: vec![
                AgentStreamRequest {
                    agent_id: "planner".into(),
                    messages: Vec::new(),
                    prompt: Some("plan".into()),
                },
                AgentStreamRequest {
                    agent_id: "critic".into(),
                    messages: vec![Message::user("review")],
                    prompt: None,
                },
            ],
            user_id: None,
            provider: None,
            model: None,
        };

        let updates: Vec<TaggedUpdate> = open_multiplex(&state, body).unwrap().collect().await;
        for agent in ["planner", "critic"] {
            let done = updates
                .iter()
                .filter(|t| t.agent_id == agent && event_name(&t.update) == "done")
                .count();
            assert_eq!(done, 1, "agent {agent} should finish exactly once");
        }
    }

    #[tokio::test]
    async fn test_cancel_unknown_stream_is_not_found() {
        let (state, _dir) = test_state().await;
        let err = cancel_stream(State(state), Path("nope".into()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_session_streams_listing_and_cancel() {
        let (state, _dir) = test_state().await;
        let Json(resp) = list_session_streams(State(state.clone()), Path("empty".into())).await;
        assert!(resp.data.unwrap().is_empty());

        let Json(resp) = cancel_session_streams(State(state), Path("empty".into())).await;
        assert_eq!(resp.data.unwrap().cancelled, 0);
    }

    #[tokio::test]
    async fn test_sse_response_is_event_stream() {
        use axum::response::IntoResponse;

        let update = StreamUpdate::Content {
            stream_id: "st".into(),
            chunk_index: 1,
            content: "hi".into(),
        };
        let events = futures_util::stream::iter(vec![Ok::<_, Infallible>(to_event(
            event_name(&update),
            &update,
        ))]);
        let response = sse(events).into_response();
        assert_eq!(
            response.headers()[axum::http::header::CONTENT_TYPE],
            "text/event-stream"
        );
    }

    #[test]
    fn test_event_payload_carries_update_type() {
        let update = StreamUpdate::Content {
            stream_id: "st".into(),
            chunk_index: 1,
            content: "hi".into(),
        };
        assert_eq!(event_name(&update), "content");
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "content");
    }
}

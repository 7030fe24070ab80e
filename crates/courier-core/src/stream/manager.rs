//! Stream manager: owns every in-flight streaming response.
//!
//! Each stream runs as a producer task that fetches a completion, splits it
//! into word chunks, and pushes them through a [`FlowBuffer`] to the
//! consumer. Transient failures reconnect with backoff from the last
//! checkpoint. The consumer sees `Content` updates with consecutive chunk
//! indices, then exactly one terminal `Done` or `Error`.
//!
//! One stream runs per (session, agent) pair; opening a second one cancels
//! the first. Dropping the consumer cancels the producer.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use courier_types::config::{ProviderPricing, StreamConfig};
use courier_types::error::StreamError;
use courier_types::llm::{CompletionRequest, Message, Usage};
use courier_types::stream::{
    RecoveryCheckpoint, StreamDoneMetadata, StreamOptions, StreamSession, StreamUpdate,
};
use dashmap::DashMap;
use futures_util::Stream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backpressure::FlowBuffer;
use super::chunker::word_chunks;
use super::multiplexer::StreamMultiplexer;
use super::recovery::RecoveryStore;
use crate::llm::CompletionProvider;
use crate::retry::BackoffPolicy;

/// Agent key used when the caller does not name one.
const DEFAULT_AGENT: &str = "default";

/// Floor on the checkpoint sweep period.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Consumer side of one stream.
pub type UpdateStream = Pin<Box<dyn Stream<Item = StreamUpdate> + Send>>;

/// One agent's share of a multiplexed request.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub agent_id: String,
    pub messages: Vec<Message>,
}

struct ActiveStream {
    session_id: String,
    agent_key: String,
    state: Arc<Mutex<StreamSession>>,
    buffer: Arc<FlowBuffer<StreamUpdate>>,
    cancel: CancellationToken,
}

/// Producer task context.
struct Producer {
    stream_id: String,
    request: CompletionRequest,
    state: Arc<Mutex<StreamSession>>,
    buffer: Arc<FlowBuffer<StreamUpdate>>,
    cancel: CancellationToken,
    started: Instant,
}

/// What a successful provider round trip reports back.
struct Completion {
    usage: Option<Usage>,
    model: Option<String>,
}

fn lock(state: &Mutex<StreamSession>) -> MutexGuard<'_, StreamSession> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn new_stream_id(session_id: &str, agent_key: &str) -> String {
    format!(
        "stream_{session_id}_{agent_key}_{}_{:08x}",
        Utc::now().timestamp_millis(),
        rand::random::<u32>()
    )
}

pub struct StreamManager<P: CompletionProvider> {
    provider: Arc<P>,
    config: StreamConfig,
    pricing: Vec<ProviderPricing>,
    reconnect_backoff: BackoffPolicy,
    streams: DashMap<String, ActiveStream>,
    recovery: RecoveryStore,
}

impl<P: CompletionProvider> StreamManager<P> {
    pub fn new(provider: Arc<P>, config: StreamConfig, pricing: Vec<ProviderPricing>) -> Arc<Self> {
        Arc::new(Self {
            reconnect_backoff: BackoffPolicy::for_reconnects(&config),
            recovery: RecoveryStore::new(config.recovery_window()),
            provider,
            config,
            pricing,
            streams: DashMap::new(),
        })
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn recovery(&self) -> &RecoveryStore {
        &self.recovery
    }

    // -----------------------------------------------------------------------
    // Opening streams
    // -----------------------------------------------------------------------

    /// Open a stream for `messages`.
    ///
    /// When `options.resume_stream_id` names a checkpoint still inside the
    /// recovery window, the stream keeps that ID and continues after the
    /// checkpointed chunk. A missing or expired checkpoint starts fresh, as
    /// does one written by another session or agent.
    pub fn stream_message(
        self: &Arc<Self>,
        messages: Vec<Message>,
        options: StreamOptions,
    ) -> Result<UpdateStream, StreamError> {
        if options.session_id.trim().is_empty() {
            return Err(StreamError::Validation("session_id must not be empty".into()));
        }
        if messages.is_empty() {
            return Err(StreamError::Validation(
                "at least one message is required".into(),
            ));
        }

        let agent_key = options
            .agent_id
            .clone()
            .unwrap_or_else(|| DEFAULT_AGENT.to_string());

        let checkpoint = match options.resume_stream_id.as_deref() {
            Some(id) if self.streams.contains_key(id) => {
                return Err(StreamError::Validation(format!(
                    "stream {id} is still active"
                )));
            }
            Some(id) => match self.recovery.load(id) {
                Some(cp) if cp.belongs_to(&options) => Some(cp),
                Some(cp) => {
                    warn!(
                        stream_id = id,
                        session_id = %options.session_id,
                        owner_session = %cp.session_id,
                        "checkpoint belongs to another session or agent, starting a fresh stream"
                    );
                    None
                }
                None => {
                    info!(stream_id = id, "no valid checkpoint, starting a fresh stream");
                    None
                }
            },
            None => None,
        };

        self.supersede(&options.session_id, &agent_key);

        let stream_id = checkpoint
            .as_ref()
            .map(|cp| cp.stream_id.clone())
            .unwrap_or_else(|| new_stream_id(&options.session_id, &agent_key));

        let mut session = StreamSession {
            stream_id: stream_id.clone(),
            session_id: options.session_id.clone(),
            agent_id: options.agent_id.clone(),
            content: String::new(),
            last_chunk_index: 0,
            buffered_chunks: 0,
            backpressure: false,
            started_at: Utc::now(),
            ended_at: None,
            metrics: Default::default(),
        };
        if let Some(cp) = checkpoint {
            info!(
                %stream_id,
                last_chunk_index = cp.last_chunk_index,
                "resuming stream from checkpoint"
            );
            session.content = cp.content;
            session.last_chunk_index = cp.last_chunk_index;
        }

        let state = Arc::new(Mutex::new(session));
        let buffer = Arc::new(FlowBuffer::new(&self.config));
        let cancel = CancellationToken::new();

        self.streams.insert(
            stream_id.clone(),
            ActiveStream {
                session_id: options.session_id.clone(),
                agent_key: agent_key.clone(),
                state: Arc::clone(&state),
                buffer: Arc::clone(&buffer),
                cancel: cancel.clone(),
            },
        );

        let request = CompletionRequest {
            messages,
            session_id: Some(options.session_id.clone()),
            user_id: options.user_id,
            provider: options.provider,
            model: options.model,
            ..Default::default()
        };
        let producer = Producer {
            stream_id: stream_id.clone(),
            request,
            state,
            buffer: Arc::clone(&buffer),
            cancel: cancel.clone(),
            started: Instant::now(),
        };

        info!(
            %stream_id,
            session_id = %options.session_id,
            agent = %agent_key,
            provider = self.provider.name(),
            "stream opened"
        );
        tokio::spawn(Arc::clone(self).run_producer(producer));

        Ok(Self::consumer(buffer, cancel))
    }

    /// Open one stream per agent and merge them.
    ///
    /// `base` supplies the session and provider options; each agent's ID
    /// replaces its `agent_id`. If any stream fails to open, the ones already
    /// opened are cancelled.
    pub fn multiplex_streams(
        self: &Arc<Self>,
        base: StreamOptions,
        agents: Vec<AgentRequest>,
    ) -> Result<StreamMultiplexer, StreamError> {
        if agents.is_empty() {
            return Err(StreamError::Validation("at least one agent is required".into()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = agents.iter().find(|a| !seen.insert(a.agent_id.as_str())) {
            return Err(StreamError::Validation(format!(
                "agent {} listed twice",
                dup.agent_id
            )));
        }

        let mut mux = StreamMultiplexer::new();
        for agent in agents {
            let options = StreamOptions {
                agent_id: Some(agent.agent_id.clone()),
                resume_stream_id: None,
                ..base.clone()
            };
            // On error `mux` drops here, cancelling every stream opened so far.
            let stream = self.stream_message(agent.messages, options)?;
            mux.push(agent.agent_id, stream);
        }
        debug!(agents = mux.active(), "multiplexed stream opened");
        Ok(mux)
    }

    fn consumer(buffer: Arc<FlowBuffer<StreamUpdate>>, cancel: CancellationToken) -> UpdateStream {
        // Created outside the generator so it fires even if never polled.
        let guard = cancel.drop_guard();
        Box::pin(async_stream::stream! {
            let _cancel_on_drop = guard;
            loop {
                let update = buffer.pop().await;
                let terminal = update.is_terminal();
                yield update;
                if terminal {
                    break;
                }
            }
        })
    }

    /// Cancel whatever stream currently owns the (session, agent) pair.
    fn supersede(&self, session_id: &str, agent_key: &str) {
        let previous: Vec<String> = self
            .streams
            .iter()
            .filter(|s| s.session_id == session_id && s.agent_key == agent_key)
            .map(|s| s.key().clone())
            .collect();
        for stream_id in previous {
            warn!(%stream_id, "superseded by a new stream for the same agent");
            self.cancel_stream(&stream_id);
        }
    }

    // -----------------------------------------------------------------------
    // Producer
    // -----------------------------------------------------------------------

    async fn run_producer(self: Arc<Self>, producer: Producer) {
        let mut reconnects = 0u32;
        let outcome = loop {
            let err = match self.produce_once(&producer).await {
                Ok(completion) => break Ok(completion),
                Err(err) => err,
            };
            lock(&producer.state).metrics.error_count += 1;

            if !err.class().is_retryable() || reconnects >= self.config.max_reconnects {
                break Err(err);
            }
            reconnects += 1;
            lock(&producer.state).metrics.reconnect_count = reconnects;
            self.checkpoint(&producer);

            let delay = self.reconnect_backoff.delay_for(reconnects);
            warn!(
                stream_id = %producer.stream_id,
                attempt = reconnects,
                max_reconnects = self.config.max_reconnects,
                ?delay,
                error = %err,
                "stream interrupted, reconnecting"
            );
            tokio::select! {
                _ = producer.cancel.cancelled() => break Err(StreamError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        };
        self.finish(&producer, outcome);
    }

    /// One provider round trip, emitting every chunk past the last one the
    /// consumer already has.
    async fn produce_once(&self, p: &Producer) -> Result<Completion, StreamError> {
        let response = tokio::select! {
            biased;
            _ = p.cancel.cancelled() => return Err(StreamError::Cancelled),
            result = self.provider.complete(&p.request) => result?,
        };

        let resume_after = lock(&p.state).last_chunk_index;
        let pacing = self.config.chunk_delay();
        let checkpoint_every = self.config.checkpoint_interval.max(1);
        let mut emitted = 0u64;

        for (offset, chunk) in word_chunks(&response.content).into_iter().enumerate() {
            let chunk_index = offset as u64 + 1;
            if chunk_index <= resume_after {
                continue;
            }
            if emitted > 0 && !pacing.is_zero() {
                tokio::select! {
                    biased;
                    _ = p.cancel.cancelled() => return Err(StreamError::Cancelled),
                    _ = tokio::time::sleep(pacing) => {}
                }
            }
            if p.cancel.is_cancelled() {
                return Err(StreamError::Cancelled);
            }

            let update = StreamUpdate::Content {
                stream_id: p.stream_id.clone(),
                chunk_index,
                content: chunk.clone(),
            };
            p.buffer.push(update, &p.cancel).await?;
            emitted += 1;

            let due = {
                let mut state = lock(&p.state);
                state.content.push_str(&chunk);
                state.last_chunk_index = chunk_index;
                state.metrics.record_chunk(chunk.len());
                if state.metrics.first_chunk_latency_ms.is_none() {
                    state.metrics.first_chunk_latency_ms = Some(p.started.elapsed().as_millis() as u64);
                }
                chunk_index % checkpoint_every == 0
            };
            if due {
                self.checkpoint(p);
            }
        }

        Ok(Completion {
            usage: response.usage,
            model: response.model,
        })
    }

    fn checkpoint(&self, p: &Producer) {
        let checkpoint = {
            let state = lock(&p.state);
            if state.last_chunk_index == 0 {
                return;
            }
            RecoveryCheckpoint {
                stream_id: p.stream_id.clone(),
                session_id: state.session_id.clone(),
                agent_id: state.agent_id.clone(),
                last_chunk_index: state.last_chunk_index,
                content: state.content.clone(),
                created_at: Utc::now(),
            }
        };
        self.recovery.save(checkpoint);
    }

    /// Release the stream's state and hand the consumer its terminal update.
    fn finish(&self, p: &Producer, outcome: Result<Completion, StreamError>) {
        let snapshot = {
            let mut state = lock(&p.state);
            state.ended_at = Some(Utc::now());
            state.clone()
        };
        self.streams
            .remove_if(&p.stream_id, |_, active| Arc::ptr_eq(&active.state, &p.state));
        let duration_ms = p.started.elapsed().as_millis() as u64;

        let update = match outcome {
            Ok(completion) => {
                self.recovery.remove(&p.stream_id);
                let model = completion.model.or_else(|| p.request.model.clone());
                let cost_usd = completion
                    .usage
                    .as_ref()
                    .and_then(|usage| self.estimate_cost(model.as_deref(), usage));
                info!(
                    stream_id = %p.stream_id,
                    chunks = snapshot.last_chunk_index,
                    duration_ms,
                    "stream completed"
                );
                StreamUpdate::Done {
                    stream_id: p.stream_id.clone(),
                    metadata: StreamDoneMetadata {
                        content: snapshot.content,
                        last_chunk_index: snapshot.last_chunk_index,
                        usage: completion.usage,
                        model,
                        cost_usd,
                        duration_ms,
                        metrics: snapshot.metrics,
                    },
                }
            }
            Err(StreamError::Cancelled) => {
                self.recovery.remove(&p.stream_id);
                info!(stream_id = %p.stream_id, "stream cancelled");
                StreamUpdate::Error {
                    stream_id: p.stream_id.clone(),
                    error: StreamError::Cancelled.to_string(),
                    resumable: false,
                }
            }
            Err(err) => {
                let resumable = err.class().is_retryable() && snapshot.last_chunk_index > 0;
                if resumable {
                    self.checkpoint(p);
                } else {
                    self.recovery.remove(&p.stream_id);
                }
                error!(
                    stream_id = %p.stream_id,
                    error = %err,
                    resumable,
                    "stream failed"
                );
                StreamUpdate::Error {
                    stream_id: p.stream_id.clone(),
                    error: err.to_string(),
                    resumable,
                }
            }
        };
        p.buffer.push_final(update);
    }

    fn estimate_cost(&self, model: Option<&str>, usage: &Usage) -> Option<f64> {
        let model = model?;
        let provider = self.provider.name();
        self.pricing
            .iter()
            .find(|p| p.provider_name.eq_ignore_ascii_case(provider) && p.matches(model))
            .map(|p| p.cost(usage.prompt_tokens, usage.completion_tokens))
    }

    // -----------------------------------------------------------------------
    // Control and queries
    // -----------------------------------------------------------------------

    /// Cancel one stream. Its consumer receives a terminal error and its
    /// checkpoint is discarded. Returns `false` if the stream is not active.
    pub fn cancel_stream(&self, stream_id: &str) -> bool {
        let Some((_, active)) = self.streams.remove(stream_id) else {
            return false;
        };
        active.cancel.cancel();
        self.recovery.remove(stream_id);
        info!(stream_id, "stream cancellation requested");
        true
    }

    /// Cancel every stream in `session_id`. Returns how many were cancelled.
    pub fn cancel_session_streams(&self, session_id: &str) -> usize {
        let ids: Vec<String> = self
            .streams
            .iter()
            .filter(|s| s.session_id == session_id)
            .map(|s| s.key().clone())
            .collect();
        ids.iter().filter(|id| self.cancel_stream(id)).count()
    }

    fn snapshot(active: &ActiveStream) -> StreamSession {
        let mut session = lock(&active.state).clone();
        session.buffered_chunks = active.buffer.len();
        session.backpressure = active.buffer.is_paused();
        session
    }

    /// Snapshots of the in-flight streams of `session_id`, oldest first.
    pub fn get_active_streams(&self, session_id: &str) -> Vec<StreamSession> {
        let mut sessions: Vec<StreamSession> = self
            .streams
            .iter()
            .filter(|s| s.session_id == session_id)
            .map(|s| Self::snapshot(&s))
            .collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    pub fn get_stream(&self, stream_id: &str) -> Option<StreamSession> {
        self.streams.get(stream_id).map(|s| Self::snapshot(&s))
    }

    pub fn active_count(&self) -> usize {
        self.streams.len()
    }

    /// Purge expired checkpoints on an interval until `shutdown` fires.
    pub fn spawn_recovery_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let period = self.recovery.window().max(MIN_SWEEP_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        this.recovery.purge_expired();
                    }
                }
            }
            debug!("checkpoint sweeper stopped");
        })
    }

    /// Cancel every active stream.
    pub fn shutdown(&self) -> usize {
        let ids: Vec<String> = self.streams.iter().map(|s| s.key().clone()).collect();
        let cancelled = ids.iter().filter(|id| self.cancel_stream(id)).count();
        info!(cancelled, "stream manager stopped");
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use chrono::Duration as ChronoDuration;
    use courier_types::llm::LlmError;
    use futures_util::StreamExt;

    fn fast_config() -> StreamConfig {
        StreamConfig {
            chunk_delay_ms: 0,
            backpressure_poll_ms: 1,
            reconnect_base_delay_ms: 1,
            reconnect_max_delay_ms: 2,
            max_reconnects: 2,
            ..Default::default()
        }
    }

    fn manager(provider: MockProvider) -> Arc<StreamManager<MockProvider>> {
        StreamManager::new(Arc::new(provider), fast_config(), vec![])
    }

    fn prompt() -> Vec<Message> {
        vec![Message::user("say something")]
    }

    async fn collect(stream: UpdateStream) -> Vec<StreamUpdate> {
        tokio::time::timeout(Duration::from_secs(5), stream.collect::<Vec<_>>())
            .await
            .expect("stream should terminate")
    }

    fn contents(updates: &[StreamUpdate]) -> Vec<(u64, String)> {
        updates
            .iter()
            .filter_map(|u| match u {
                StreamUpdate::Content {
                    chunk_index,
                    content,
                    ..
                } => Some((*chunk_index, content.clone())),
                _ => None,
            })
            .collect()
    }

    fn done_metadata(update: &StreamUpdate) -> &StreamDoneMetadata {
        match update {
            StreamUpdate::Done { metadata, .. } => metadata,
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_words_stream_then_done() {
        let m = manager(MockProvider::replying("hello world foo"));
        let stream = m
            .stream_message(prompt(), StreamOptions::new("s1"))
            .unwrap();
        let updates = collect(stream).await;

        assert_eq!(
            contents(&updates),
            vec![
                (1, "hello ".to_string()),
                (2, "world ".to_string()),
                (3, "foo".to_string()),
            ]
        );
        assert_eq!(updates.len(), 4);
        let meta = done_metadata(updates.last().unwrap());
        assert_eq!(meta.content, "hello world foo");
        assert_eq!(meta.last_chunk_index, 3);
        assert_eq!(meta.metrics.chunk_count, 3);
        assert!(meta.metrics.first_chunk_latency_ms.is_some());
        assert_eq!(meta.usage.unwrap().total_tokens, 15);
        assert_eq!(m.active_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_ids_are_prefixed_and_unique() {
        let m = manager(MockProvider::replying("hi"));
        let a = collect(m.stream_message(prompt(), StreamOptions::new("s1")).unwrap()).await;
        let b = collect(m.stream_message(prompt(), StreamOptions::new("s1")).unwrap()).await;
        let id_a = a[0].stream_id().to_string();
        let id_b = b[0].stream_id().to_string();
        assert!(id_a.starts_with("stream_s1_default_"));
        assert_ne!(id_a, id_b);
    }

    #[tokio::test]
    async fn test_every_update_carries_stream_id_and_single_terminal() {
        let text = (1..=25).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let m = manager(MockProvider::replying(&text));
        let updates = collect(m.stream_message(prompt(), StreamOptions::new("s1")).unwrap()).await;

        let id = updates[0].stream_id().to_string();
        assert!(updates.iter().all(|u| u.stream_id() == id));
        assert_eq!(updates.iter().filter(|u| u.is_terminal()).count(), 1);
        assert!(updates.last().unwrap().is_terminal());

        let indices: Vec<u64> = contents(&updates).into_iter().map(|(i, _)| i).collect();
        assert_eq!(indices, (1..=25).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_validation() {
        let m = manager(MockProvider::replying("x"));
        assert!(matches!(
            m.stream_message(vec![], StreamOptions::new("s1")),
            Err(StreamError::Validation(_))
        ));
        assert!(matches!(
            m.stream_message(prompt(), StreamOptions::new(" ")),
            Err(StreamError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_transient_failure_reconnects() {
        let provider = MockProvider::replying("recovered fine")
            .then(vec![Err(LlmError::Network("reset".into()))]);
        let m = manager(provider);
        let updates = collect(m.stream_message(prompt(), StreamOptions::new("s1")).unwrap()).await;

        let meta = done_metadata(updates.last().unwrap());
        assert_eq!(meta.content, "recovered fine");
        assert_eq!(meta.metrics.reconnect_count, 1);
        assert_eq!(meta.metrics.error_count, 1);
        assert_eq!(m.provider().call_count(), 2);
    }

    #[tokio::test]
    async fn test_reconnects_are_bounded() {
        let m = manager(MockProvider::failing(LlmError::Overloaded("busy".into())));
        let updates = collect(m.stream_message(prompt(), StreamOptions::new("s1")).unwrap()).await;

        assert_eq!(updates.len(), 1);
        match &updates[0] {
            StreamUpdate::Error {
                error, resumable, ..
            } => {
                assert!(error.contains("busy"));
                // Nothing was emitted, so there is nothing to resume from.
                assert!(!resumable);
            }
            other => panic!("expected error, got {other:?}"),
        }
        // One initial call plus max_reconnects.
        assert_eq!(m.provider().call_count(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let m = manager(MockProvider::failing(LlmError::InvalidRequest("bad".into())));
        let updates = collect(m.stream_message(prompt(), StreamOptions::new("s1")).unwrap()).await;
        assert!(matches!(updates[0], StreamUpdate::Error { .. }));
        assert_eq!(m.provider().call_count(), 1);
    }

    #[tokio::test]
    async fn test_checkpoints_written_and_cleared_on_done() {
        let text = (1..=25).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let mut config = fast_config();
        // Keep the producer from racing to the end while we look.
        config.buffer_capacity = 15;
        let m = StreamManager::new(Arc::new(MockProvider::replying(&text)), config, vec![]);
        let mut stream = m.stream_message(prompt(), StreamOptions::new("s1")).unwrap();

        let first = stream.next().await.unwrap();
        let stream_id = first.stream_id().to_string();
        for _ in 0..9 {
            stream.next().await.unwrap();
        }
        // Chunk 10 has been pushed; its checkpoint follows right after.
        let mut found = None;
        for _ in 0..200 {
            found = m.recovery().load(&stream_id);
            if found.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let cp = found.expect("checkpoint after 10 chunks");
        assert_eq!(cp.last_chunk_index % 10, 0);
        assert!(cp.content.starts_with("w1 w2 "));

        let rest: Vec<StreamUpdate> = stream.collect().await;
        assert!(matches!(rest.last(), Some(StreamUpdate::Done { .. })));
        assert!(m.recovery().load(&stream_id).is_none());
    }

    #[tokio::test]
    async fn test_resume_from_checkpoint_skips_delivered_chunks() {
        let m = manager(MockProvider::replying("one two three four"));
        m.recovery().save(RecoveryCheckpoint {
            stream_id: "stream_prev".into(),
            session_id: "s1".into(),
            agent_id: None,
            last_chunk_index: 2,
            content: "one two ".into(),
            created_at: Utc::now(),
        });

        let updates = collect(
            m.stream_message(prompt(), StreamOptions::new("s1").resuming("stream_prev"))
                .unwrap(),
        )
        .await;

        assert_eq!(
            contents(&updates),
            vec![(3, "three ".to_string()), (4, "four".to_string())]
        );
        assert!(updates.iter().all(|u| u.stream_id() == "stream_prev"));
        let meta = done_metadata(updates.last().unwrap());
        assert_eq!(meta.content, "one two three four");
        assert!(m.recovery().is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_of_another_session_is_not_resumed() {
        let m = manager(MockProvider::replying("one two three"));
        m.recovery().save(RecoveryCheckpoint {
            stream_id: "stream_s2_default_1_aa".into(),
            session_id: "s2".into(),
            agent_id: None,
            last_chunk_index: 1,
            content: "SECRET ".into(),
            created_at: Utc::now(),
        });

        let updates = collect(
            m.stream_message(
                prompt(),
                StreamOptions::new("s1").resuming("stream_s2_default_1_aa"),
            )
            .unwrap(),
        )
        .await;

        assert!(updates.iter().all(|u| u.stream_id() != "stream_s2_default_1_aa"));
        assert!(updates[0].stream_id().starts_with("stream_s1_default_"));
        assert_eq!(contents(&updates)[0].0, 1);
        let meta = done_metadata(updates.last().unwrap());
        assert_eq!(meta.content, "one two three");
        // The owner can still resume from it.
        assert!(m.recovery().load("stream_s2_default_1_aa").is_some());
    }

    #[tokio::test]
    async fn test_checkpoint_of_another_agent_is_not_resumed() {
        let m = manager(MockProvider::replying("one two"));
        m.recovery().save(RecoveryCheckpoint {
            stream_id: "stream_s1_planner_1_aa".into(),
            session_id: "s1".into(),
            agent_id: Some("planner".into()),
            last_chunk_index: 1,
            content: "plan ".into(),
            created_at: Utc::now(),
        });

        let options = StreamOptions::new("s1")
            .with_agent("critic")
            .resuming("stream_s1_planner_1_aa");
        let updates = collect(m.stream_message(prompt(), options).unwrap()).await;
        assert_ne!(updates[0].stream_id(), "stream_s1_planner_1_aa");
        assert_eq!(done_metadata(updates.last().unwrap()).content, "one two");
    }

    #[tokio::test]
    async fn test_expired_checkpoint_starts_fresh() {
        let m = manager(MockProvider::replying("one two"));
        m.recovery().save(RecoveryCheckpoint {
            stream_id: "stream_old".into(),
            session_id: "s1".into(),
            agent_id: None,
            last_chunk_index: 1,
            content: "one ".into(),
            created_at: Utc::now() - ChronoDuration::seconds(60),
        });

        let updates = collect(
            m.stream_message(prompt(), StreamOptions::new("s1").resuming("stream_old"))
                .unwrap(),
        )
        .await;
        assert_eq!(contents(&updates)[0].0, 1);
        assert_ne!(updates[0].stream_id(), "stream_old");
    }

    #[tokio::test]
    async fn test_cancel_stream_ends_consumer_and_frees_state() {
        let provider = MockProvider::replying("never seen").with_latency(Duration::from_secs(5));
        let m = manager(provider);
        let stream = m
            .stream_message(prompt(), StreamOptions::new("s1").with_agent("writer"))
            .unwrap();

        let active = m.get_active_streams("s1");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].agent_id.as_deref(), Some("writer"));
        let stream_id = active[0].stream_id.clone();

        assert!(m.cancel_stream(&stream_id));
        assert!(!m.cancel_stream(&stream_id));
        assert!(m.get_active_streams("s1").is_empty());

        let updates = collect(stream).await;
        assert_eq!(updates.len(), 1);
        assert!(matches!(
            &updates[0],
            StreamUpdate::Error { resumable: false, .. }
        ));
        assert!(m.recovery().load(&stream_id).is_none());
    }

    #[tokio::test]
    async fn test_cancel_session_streams() {
        let provider = MockProvider::replying("slow").with_latency(Duration::from_secs(5));
        let m = manager(provider);
        let _a = m
            .stream_message(prompt(), StreamOptions::new("s1").with_agent("a"))
            .unwrap();
        let _b = m
            .stream_message(prompt(), StreamOptions::new("s1").with_agent("b"))
            .unwrap();
        let _other = m
            .stream_message(prompt(), StreamOptions::new("s2"))
            .unwrap();

        assert_eq!(m.cancel_session_streams("s1"), 2);
        assert!(m.get_active_streams("s1").is_empty());
        assert_eq!(m.get_active_streams("s2").len(), 1);
    }

    #[tokio::test]
    async fn test_new_stream_supersedes_same_agent() {
        let provider = MockProvider::replying("slow").with_latency(Duration::from_millis(200));
        let m = manager(provider);
        let first = m
            .stream_message(prompt(), StreamOptions::new("s1").with_agent("a"))
            .unwrap();
        let second = m
            .stream_message(prompt(), StreamOptions::new("s1").with_agent("a"))
            .unwrap();

        let first = collect(first).await;
        assert!(matches!(first[0], StreamUpdate::Error { .. }));
        let second = collect(second).await;
        assert!(matches!(second.last(), Some(StreamUpdate::Done { .. })));
    }

    #[tokio::test]
    async fn test_dropping_consumer_cancels_producer() {
        let provider = MockProvider::replying("slow").with_latency(Duration::from_secs(5));
        let m = manager(provider);
        let stream = m.stream_message(prompt(), StreamOptions::new("s1")).unwrap();
        assert_eq!(m.active_count(), 1);
        drop(stream);

        for _ in 0..200 {
            if m.active_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("producer kept running after the consumer went away");
    }

    #[tokio::test]
    async fn test_slow_consumer_sees_every_chunk() {
        let text = (1..=40).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let mut config = fast_config();
        config.buffer_capacity = 5;
        let m = StreamManager::new(Arc::new(MockProvider::replying(&text)), config, vec![]);
        let mut stream = m.stream_message(prompt(), StreamOptions::new("s1")).unwrap();

        let mut indices = Vec::new();
        let mut saw_pressure = false;
        while let Some(update) = stream.next().await {
            if let Some(active) = m.get_active_streams("s1").first() {
                assert!(active.buffered_chunks <= 5);
                saw_pressure |= active.backpressure;
            }
            if let StreamUpdate::Content { chunk_index, .. } = update {
                indices.push(chunk_index);
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(indices, (1..=40).collect::<Vec<u64>>());
        assert!(saw_pressure);
    }

    #[tokio::test]
    async fn test_backpressure_timeout_reconnects_without_repeating_chunks() {
        let words: Vec<String> = (1..=12).map(|i| format!("w{i}")).collect();
        let text = words.join(" ");
        let mut config = fast_config();
        config.buffer_capacity = 4;
        config.backpressure_timeout_ms = 15;
        config.max_reconnects = 1_000;
        let m = StreamManager::new(Arc::new(MockProvider::replying(&text)), config, vec![]);
        let mut stream = m.stream_message(prompt(), StreamOptions::new("s1")).unwrap();

        let mut indices = Vec::new();
        let mut received = String::new();
        let mut last = None;
        while let Some(update) = tokio::time::timeout(Duration::from_secs(10), stream.next())
            .await
            .expect("stream stalled")
        {
            if let StreamUpdate::Content {
                chunk_index,
                content,
                ..
            } = &update
            {
                indices.push(*chunk_index);
                received.push_str(content);
            }
            last = Some(update);
            // Slower than the hard timeout, so the producer keeps giving up.
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        assert_eq!(indices, (1..=12).collect::<Vec<u64>>());
        assert_eq!(received, text);
        let meta = done_metadata(last.as_ref().unwrap());
        assert_eq!(meta.content, text);
        assert_eq!(meta.last_chunk_index, 12);
        assert!(meta.metrics.reconnect_count >= 1);
        assert!(m.provider().call_count() >= 2);
    }

    #[tokio::test]
    async fn test_cost_estimated_from_pricing() {
        let pricing = vec![ProviderPricing {
            provider_name: "mock".into(),
            model_pattern: "mock-*".into(),
            input_cost_per_million: 1_000_000.0,
            output_cost_per_million: 2_000_000.0,
        }];
        let m = StreamManager::new(
            Arc::new(MockProvider::replying("priced")),
            fast_config(),
            pricing,
        );
        let updates = collect(m.stream_message(prompt(), StreamOptions::new("s1")).unwrap()).await;
        let meta = done_metadata(updates.last().unwrap());
        // 10 prompt tokens at $1 each, 5 completion tokens at $2 each.
        assert!((meta.cost_usd.unwrap() - 20.0).abs() < 1e-9);
        assert_eq!(meta.model.as_deref(), Some("mock-model"));
    }

    #[tokio::test]
    async fn test_multiplex_two_agents() {
        let m = manager(MockProvider::replying("alpha beta gamma"));
        let mux = m
            .multiplex_streams(
                StreamOptions::new("s1"),
                vec![
                    AgentRequest {
                        agent_id: "planner".into(),
                        messages: prompt(),
                    },
                    AgentRequest {
                        agent_id: "critic".into(),
                        messages: prompt(),
                    },
                ],
            )
            .unwrap();
        assert_eq!(mux.active(), 2);

        let updates = tokio::time::timeout(Duration::from_secs(5), mux.collect::<Vec<_>>())
            .await
            .unwrap();
        for agent in ["planner", "critic"] {
            let mine: Vec<&StreamUpdate> = updates
                .iter()
                .filter(|t| t.agent_id == agent)
                .map(|t| &t.update)
                .collect();
            assert_eq!(mine.len(), 4);
            assert!(matches!(mine.last(), Some(StreamUpdate::Done { .. })));
            assert!(mine[0].stream_id().contains(agent));
        }
    }

    #[tokio::test]
    async fn test_multiplex_rejects_duplicate_agents() {
        let m = manager(MockProvider::replying("x"));
        let agent = AgentRequest {
            agent_id: "a".into(),
            messages: prompt(),
        };
        let err = m
            .multiplex_streams(StreamOptions::new("s1"), vec![agent.clone(), agent])
            .err()
            .unwrap();
        assert!(matches!(err, StreamError::Validation(_)));
        assert!(matches!(
            m.multiplex_streams(StreamOptions::new("s1"), vec![]),
            Err(StreamError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_resume_of_active_stream_rejected() {
        let provider = MockProvider::replying("slow").with_latency(Duration::from_secs(5));
        let m = manager(provider);
        let _stream = m.stream_message(prompt(), StreamOptions::new("s1")).unwrap();
        let id = m.get_active_streams("s1")[0].stream_id.clone();
        let err = m
            .stream_message(prompt(), StreamOptions::new("s1").resuming(id))
            .err()
            .unwrap();
        assert!(matches!(err, StreamError::Validation(_)));
    }
}

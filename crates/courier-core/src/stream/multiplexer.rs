//! Merges several per-agent update streams into one, tagging each update
//! with its agent.
//!
//! Updates from one agent keep their order. A stream leaves the race set
//! after its terminal update, and the merged stream ends once every agent
//! has finished.

use std::pin::Pin;
use std::task::{Context, Poll};

use courier_types::stream::{StreamUpdate, TaggedUpdate};
use futures_util::stream::{BoxStream, SelectAll};
use futures_util::{Stream, StreamExt};

#[derive(Default)]
pub struct StreamMultiplexer {
    streams: SelectAll<BoxStream<'static, TaggedUpdate>>,
}

impl StreamMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `stream` to the race set under `agent_id`.
    pub fn push<S>(&mut self, agent_id: impl Into<String>, stream: S)
    where
        S: Stream<Item = StreamUpdate> + Send + 'static,
    {
        let agent_id = agent_id.into();
        let tagged = async_stream::stream! {
            let mut stream = Box::pin(stream);
            while let Some(update) = stream.next().await {
                let terminal = update.is_terminal();
                yield TaggedUpdate {
                    agent_id: agent_id.clone(),
                    update,
                };
                if terminal {
                    break;
                }
            }
        };
        self.streams.push(tagged.boxed());
    }

    /// Agents still producing.
    pub fn active(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

impl Stream for StreamMultiplexer {
    type Item = TaggedUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.streams.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn content(stream_id: &str, chunk_index: u64) -> StreamUpdate {
        StreamUpdate::Content {
            stream_id: stream_id.into(),
            chunk_index,
            content: format!("c{chunk_index} "),
        }
    }

    fn error(stream_id: &str) -> StreamUpdate {
        StreamUpdate::Error {
            stream_id: stream_id.into(),
            error: "boom".into(),
            resumable: false,
        }
    }

    #[tokio::test]
    async fn test_tags_and_preserves_per_agent_order() {
        let mut mux = StreamMultiplexer::new();
        mux.push(
            "planner",
            stream::iter(vec![content("a", 1), content("a", 2), content("a", 3)]),
        );
        mux.push("critic", stream::iter(vec![content("b", 1), content("b", 2)]));
        assert_eq!(mux.active(), 2);

        let updates: Vec<TaggedUpdate> = mux.collect().await;
        assert_eq!(updates.len(), 5);

        for agent in ["planner", "critic"] {
            let indices: Vec<u64> = updates
                .iter()
                .filter(|t| t.agent_id == agent)
                .map(|t| match &t.update {
                    StreamUpdate::Content { chunk_index, .. } => *chunk_index,
                    other => panic!("unexpected {other:?}"),
                })
                .collect();
            let mut sorted = indices.clone();
            sorted.sort_unstable();
            assert_eq!(indices, sorted, "{agent} out of order");
        }
    }

    #[tokio::test]
    async fn test_errored_agent_leaves_without_stopping_others() {
        let mut mux = StreamMultiplexer::new();
        // Anything after the terminal update is never forwarded.
        mux.push("flaky", stream::iter(vec![error("a"), content("a", 9)]));
        mux.push("steady", stream::iter(vec![content("b", 1), content("b", 2)]));

        let updates: Vec<TaggedUpdate> = mux.collect().await;
        let flaky: Vec<_> = updates.iter().filter(|t| t.agent_id == "flaky").collect();
        assert_eq!(flaky.len(), 1);
        assert!(flaky[0].update.is_terminal());
        assert_eq!(updates.iter().filter(|t| t.agent_id == "steady").count(), 2);
    }

    #[tokio::test]
    async fn test_empty_multiplexer_ends_immediately() {
        let mut mux = StreamMultiplexer::new();
        assert!(mux.is_empty());
        assert!(mux.next().await.is_none());
    }
}

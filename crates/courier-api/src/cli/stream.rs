//! `courier stream`: print one streamed response to stdout.

use std::io::Write;

use futures_util::StreamExt;

use courier_types::llm::Message;
use courier_types::stream::{StreamOptions, StreamUpdate};

use crate::state::ConcreteStreamManager;

/// Stream `prompt` through `manager`, writing chunks as they arrive.
///
/// With `json`, every update is printed as one JSON line instead. A terminal
/// error update becomes the command's error.
pub async fn stream_prompt(
    manager: &std::sync::Arc<ConcreteStreamManager>,
    prompt: String,
    options: StreamOptions,
    json: bool,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let mut updates = manager.stream_message(vec![Message::user(prompt)], options)?;

    while let Some(update) = updates.next().await {
        if json {
            writeln!(out, "{}", serde_json::to_string(&update)?)?;
        }
        match update {
            StreamUpdate::Content { content, .. } => {
                if !json {
                    write!(out, "{content}")?;
                    out.flush()?;
                }
            }
            StreamUpdate::Done { metadata, .. } => {
                if !json {
                    writeln!(out)?;
                }
                tracing::debug!(
                    chunks = metadata.metrics.chunk_count,
                    duration_ms = metadata.duration_ms,
                    cost_usd = ?metadata.cost_usd,
                    "stream complete"
                );
            }
            StreamUpdate::Error {
                stream_id,
                error,
                resumable,
            } => {
                if !json {
                    writeln!(out)?;
                }
                if resumable {
                    anyhow::bail!("stream {stream_id} failed (resumable): {error}");
                }
                anyhow::bail!("stream {stream_id} failed: {error}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::build_stream_manager;
    use courier_types::config::CourierConfig;

    fn manager() -> std::sync::Arc<ConcreteStreamManager> {
        let mut config = CourierConfig::default();
        config.stream.chunk_delay_ms = 0;
        build_stream_manager(&config).unwrap()
    }

    #[tokio::test]
    async fn test_plain_output_is_the_full_reply() {
        let mut out = Vec::new();
        stream_prompt(
            &manager(),
            "hello there".into(),
            StreamOptions::new("cli"),
            false,
            &mut out,
        )
        .await
        .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "You said: hello there\n");
    }

    #[tokio::test]
    async fn test_json_output_is_one_update_per_line() {
        let mut out = Vec::new();
        stream_prompt(
            &manager(),
            "hi".into(),
            StreamOptions::new("cli"),
            true,
            &mut out,
        )
        .await
        .unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.last().unwrap()["type"], "done");
        assert!(lines[..lines.len() - 1].iter().all(|l| l["type"] == "content"));
    }

    #[tokio::test]
    async fn test_invalid_options_fail_before_output() {
        let mut out = Vec::new();
        let result = stream_prompt(
            &manager(),
            "hi".into(),
            StreamOptions::new(" "),
            false,
            &mut out,
        )
        .await;
        assert!(result.is_err());
        assert!(out.is_empty());
    }
}

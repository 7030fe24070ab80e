//! Offline completion provider that answers by echoing the last user turn.
//!
//! Lets the server and CLI run end to end with no network or API key.

use courier_core::llm::provider::CompletionProvider;
use courier_types::llm::{CompletionRequest, CompletionResponse, LlmError, MessageRole, Usage};

pub const ECHO_MODEL: &str = "echo-1";

#[derive(Debug, Clone, Default)]
pub struct EchoProvider;

impl EchoProvider {
    pub fn new() -> Self {
        Self
    }
}

/// Whitespace-delimited word count, used as a stand-in token count.
fn approx_tokens(text: &str) -> u32 {
    u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX)
}

impl CompletionProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .ok_or_else(|| LlmError::InvalidRequest("no user message to echo".into()))?;

        let content = format!("You said: {}", last_user.content.trim());
        let prompt_tokens = request
            .messages
            .iter()
            .map(|m| approx_tokens(&m.content))
            .fold(0u32, u32::saturating_add);

        Ok(CompletionResponse {
            usage: Some(Usage::new(prompt_tokens, approx_tokens(&content))),
            content,
            model: Some(request.model.clone().unwrap_or_else(|| ECHO_MODEL.to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::llm::Message;

    #[tokio::test]
    async fn test_echoes_last_user_message() {
        let request = CompletionRequest {
            messages: vec![
                Message::system("be nice"),
                Message::user("first"),
                Message::assistant("ok"),
                Message::user("  hello world  "),
            ],
            ..Default::default()
        };
        let response = EchoProvider::new().complete(&request).await.unwrap();
        assert_eq!(response.content, "You said: hello world");
        assert_eq!(response.model.as_deref(), Some(ECHO_MODEL));

        let usage = response.usage.unwrap();
        // be nice (2) + first (1) + ok (1) + hello world (2)
        assert_eq!(usage.prompt_tokens, 6);
        assert_eq!(usage.completion_tokens, 4);
    }

    #[tokio::test]
    async fn test_requires_a_user_message() {
        let request = CompletionRequest {
            messages: vec![Message::system("only system")],
            ..Default::default()
        };
        let err = EchoProvider::new().complete(&request).await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
    }
}

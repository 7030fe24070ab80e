//! Completion provider implementations.
//!
//! Contains the concrete [`CompletionProvider`] backends and
//! [`ConfiguredProvider`], which picks one from a [`ProviderConfig`].

pub mod echo;
pub mod openai_compat;

use courier_core::llm::provider::CompletionProvider;
use courier_types::config::{ProviderConfig, ProviderKind};
use courier_types::llm::{CompletionRequest, CompletionResponse, LlmError};
use secrecy::SecretString;

use self::echo::EchoProvider;
use self::openai_compat::OpenAiCompatibleProvider;

/// Environment variable holding the provider API key.
pub const API_KEY_ENV: &str = "COURIER_API_KEY";

/// Read the provider API key from [`API_KEY_ENV`]. Blank values count as unset.
pub fn api_key_from_env() -> Option<SecretString> {
    std::env::var(API_KEY_ENV)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .map(SecretString::from)
}

/// The provider selected by configuration.
///
/// An enum rather than a trait object because `CompletionProvider` uses
/// native async fn and is not dyn-compatible.
pub enum ConfiguredProvider {
    Echo(EchoProvider),
    OpenAiCompatible(OpenAiCompatibleProvider),
}

impl ConfiguredProvider {
    /// Build the provider described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::AuthenticationFailed`] when an API-backed provider
    /// is configured without a key.
    pub fn from_config(
        config: &ProviderConfig,
        api_key: Option<SecretString>,
    ) -> Result<Self, LlmError> {
        match config.kind {
            ProviderKind::Echo => Ok(Self::Echo(EchoProvider::new())),
            ProviderKind::OpenaiCompatible => {
                let key = api_key.ok_or(LlmError::AuthenticationFailed)?;
                Ok(Self::OpenAiCompatible(OpenAiCompatibleProvider::new(
                    config.name.clone(),
                    &config.base_url,
                    &key,
                    config.model.clone(),
                    config.max_tokens,
                )))
            }
        }
    }
}

impl CompletionProvider for ConfiguredProvider {
    fn name(&self) -> &str {
        match self {
            Self::Echo(p) => p.name(),
            Self::OpenAiCompatible(p) => p.name(),
        }
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        match self {
            Self::Echo(p) => p.complete(request).await,
            Self::OpenAiCompatible(p) => p.complete(request).await,
        }
    }
}

//! # skillroom-assist
//!
//! Answers learners' questions for the room's AI-help tool. The relay
//! server owns one [`AnswerProvider`] and exposes it over HTTP; the provider
//! is an OpenAI-compatible client wrapped in retry, or a scripted mock.

#![deny(unsafe_code)]

pub mod error;
pub mod history;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod reliable;

pub use error::AssistError;
pub use history::window_history;
pub use mock::{MockAnswer, MockProvider};
pub use openai::{ChatCompletionsConfig, ChatCompletionsProvider};
pub use provider::AnswerProvider;
pub use reliable::{RetryConfig, RetryingProvider};

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use skillroom_settings::{AssistantProvider, AssistantSettings};
use tracing::info;

/// Build the configured provider. The API key is read from the env var
/// named in `settings.api_key_env` through `lookup`.
pub fn build_provider<F>(
    settings: &AssistantSettings,
    lookup: F,
) -> Result<Arc<dyn AnswerProvider>, AssistError>
where
    F: Fn(&str) -> Option<String>,
{
    match settings.provider {
        AssistantProvider::Mock => {
            info!("using mock answer provider");
            Ok(Arc::new(MockProvider::new(Vec::new())))
        }
        AssistantProvider::OpenAi => {
            let key = lookup(&settings.api_key_env)
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| AssistError::MissingApiKey(settings.api_key_env.clone()))?;
            let inner = ChatCompletionsProvider::new(
                ChatCompletionsConfig {
                    base_url: settings.base_url.clone(),
                    model: settings.model.clone(),
                    system_prompt: settings.system_prompt.clone(),
                    timeout: Duration::from_millis(settings.timeout_ms),
                },
                SecretString::from(key),
            )?;
            info!(base_url = %settings.base_url, model = %settings.model, "using chat-completions provider");
            Ok(Arc::new(RetryingProvider::new(
                inner,
                RetryConfig {
                    max_retries: settings.max_retries,
                    ..RetryConfig::default()
                },
            )))
        }
    }
}

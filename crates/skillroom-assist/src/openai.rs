//! OpenAI-compatible `/chat/completions` client (OpenRouter by default).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use skillroom_core::assist::{AiRole, AiTurn};

use crate::error::AssistError;
use crate::provider::AnswerProvider;

/// Answer used when the API returns no choices.
pub const NO_RESPONSE: &str = "No response from AI.";

#[derive(Clone, Debug)]
pub struct ChatCompletionsConfig {
    pub base_url: String,
    pub model: String,
    pub system_prompt: String,
    pub timeout: Duration,
}

pub struct ChatCompletionsProvider {
    client: reqwest::Client,
    config: ChatCompletionsConfig,
    api_key: SecretString,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionsProvider {
    pub fn new(config: ChatCompletionsConfig, api_key: SecretString) -> Result<Self, AssistError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AssistError::InvalidRequest(format!("http client: {e}")))?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn build_messages<'a>(&'a self, history: &'a [AiTurn], question: &'a str) -> Vec<WireMessage<'a>> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(WireMessage {
            role: "system",
            content: &self.config.system_prompt,
        });
        for turn in history {
            messages.push(WireMessage {
                role: match turn.role {
                    AiRole::User => "user",
                    AiRole::Assistant => "assistant",
                },
                content: &turn.content,
            });
        }
        messages.push(WireMessage {
            role: "user",
            content: question,
        });
        messages
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl AnswerProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        "chat-completions"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip_all, fields(model = %self.config.model, history = history.len()))]
    async fn answer(&self, history: &[AiTurn], question: &str) -> Result<String, AssistError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: self.build_messages(history, question),
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| match AssistError::from(e) {
                AssistError::Timeout(_) => AssistError::Timeout(self.config.timeout),
                other => other,
            })?;

        let status = response.status();
        if !status.is_success() {
            let wait = retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(AssistError::from_status(status.as_u16(), text, wait));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AssistError::Decode(e.to_string()))?;

        let answer = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| NO_RESPONSE.to_string());
        debug!(chars = answer.len(), "answer received");
        Ok(answer)
    }
}

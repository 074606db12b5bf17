use serde::{Deserialize, Serialize};

/// Default system prompt for the learning assistant.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an AI learning assistant helping a student. \
Provide clear, helpful explanations that guide the student toward understanding. \
Be encouraging and patient.";

/// Which answer backend the server uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssistantProvider {
    /// OpenAI-compatible `/chat/completions` endpoint.
    #[default]
    OpenAi,
    /// Canned answers, no network.
    Mock,
}

/// AI question-answering settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssistantSettings {
    pub provider: AssistantProvider,
    /// Base URL of the OpenAI-compatible API (without `/chat/completions`).
    pub base_url: String,
    pub model: String,
    /// Name of the env var holding the API key. The key itself never lives
    /// in the settings file.
    pub api_key_env: String,
    pub system_prompt: String,
    /// Per-request timeout.
    pub timeout_ms: u64,
    /// Retries for retryable failures (rate limit, 5xx, network).
    pub max_retries: u32,
    /// Prior turns forwarded with each question.
    pub max_history_turns: usize,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            provider: AssistantProvider::OpenAi,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            timeout_ms: 30_000,
            max_retries: 2,
            max_history_turns: 20,
        }
    }
}

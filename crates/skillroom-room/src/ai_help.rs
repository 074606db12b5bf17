//! AI-help conversation: one question in flight at a time.
//!
//! [`AiHelpTool::ask`] hands out an [`AskTicket`] that holds the request and
//! keeps the tool in the responding state until it is resolved or dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use skillroom_core::assist::{AiTurn, AskFailure, AskRequest, AskResponse, APOLOGY, GREETING};

use crate::error::{AskError, AskRejected};

/// Where questions are answered.
#[async_trait]
pub trait AskEndpoint: Send + Sync {
    async fn ask(&self, request: &AskRequest) -> Result<String, AskError>;
}

/// `POST <server>/api/ai/ask` on the relay server.
pub struct HttpAskEndpoint {
    client: reqwest::Client,
    url: String,
}

impl HttpAskEndpoint {
    pub fn new(server_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/api/ai/ask", server_url.trim_end_matches('/')),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AskEndpoint for HttpAskEndpoint {
    async fn ask(&self, request: &AskRequest) -> Result<String, AskError> {
        let response = self.client.post(&self.url).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<AskFailure>().await {
                Ok(failure) => failure.error,
                Err(_) => status.canonical_reason().unwrap_or("request failed").to_string(),
            };
            return Err(AskError::Http {
                status: status.as_u16(),
                message,
            });
        }
        let body: AskResponse = response
            .json()
            .await
            .map_err(|e| AskError::Decode(e.to_string()))?;
        Ok(body.response)
    }
}

/// An accepted question. Dropping it, resolved or not, ends the responding
/// state.
#[derive(Debug)]
pub struct AskTicket {
    request: AskRequest,
    responding: Arc<AtomicBool>,
}

impl AskTicket {
    pub fn request(&self) -> &AskRequest {
        &self.request
    }

    pub fn question(&self) -> &str {
        &self.request.question
    }
}

impl Drop for AskTicket {
    fn drop(&mut self) {
        self.responding.store(false, Ordering::Release);
    }
}

pub struct AiHelpTool {
    turns: Vec<AiTurn>,
    responding: Arc<AtomicBool>,
    max_history: usize,
}

impl AiHelpTool {
    /// `max_history` bounds the prior turns sent with each question.
    pub fn new(max_history: usize) -> Self {
        Self {
            turns: vec![AiTurn::assistant(GREETING)],
            responding: Arc::new(AtomicBool::new(false)),
            max_history,
        }
    }

    pub fn turns(&self) -> &[AiTurn] {
        &self.turns
    }

    pub fn is_responding(&self) -> bool {
        self.responding.load(Ordering::Acquire)
    }

    /// Record the question and start waiting for its answer.
    pub fn ask(&mut self, question: &str) -> Result<AskTicket, AskRejected> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AskRejected::Empty);
        }
        if self.is_responding() {
            debug!("question rejected while an answer is pending");
            return Err(AskRejected::Busy);
        }
        let start = self.turns.len().saturating_sub(self.max_history);
        let history = self.turns[start..].to_vec();
        self.turns.push(AiTurn::user(question));
        self.responding.store(true, Ordering::Release);
        Ok(AskTicket {
            request: AskRequest {
                question: question.to_string(),
                history,
            },
            responding: Arc::clone(&self.responding),
        })
    }

    /// Append the answer, or the apology when the request failed. A
    /// cancelled request appends nothing.
    pub fn resolve(&mut self, ticket: AskTicket, result: Result<String, AskError>) -> Option<&AiTurn> {
        drop(ticket);
        let turn = match result {
            Ok(answer) => AiTurn::assistant(answer),
            Err(AskError::Cancelled) => {
                debug!("question abandoned");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "AI answer unavailable");
                AiTurn::assistant(APOLOGY)
            }
        };
        self.turns.push(turn);
        self.turns.last()
    }

    /// Ask and wait up to `timeout` for the answer.
    pub async fn ask_and_wait(
        &mut self,
        endpoint: &dyn AskEndpoint,
        question: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<&AiTurn>, AskRejected> {
        let ticket = self.ask(question)?;
        info!(history = ticket.request().history.len(), "asking AI");
        let result = tokio::select! {
            answer = tokio::time::timeout(timeout, endpoint.ask(ticket.request())) => {
                answer.unwrap_or(Err(AskError::Timeout(timeout)))
            }
            () = cancel.cancelled() => Err(AskError::Cancelled),
        };
        Ok(self.resolve(ticket, result))
    }
}

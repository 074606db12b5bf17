use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use skillroom_core::assist::AiTurn;

use crate::error::AssistError;
use crate::provider::AnswerProvider;

/// Pre-programmed answers for deterministic runs without network access.
#[derive(Clone, Debug)]
pub enum MockAnswer {
    Text(String),
    Error(AssistError),
    /// Wait, then resolve the inner answer.
    Delay(Duration, Box<MockAnswer>),
}

impl MockAnswer {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    pub fn delayed(delay: Duration, inner: MockAnswer) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// A recorded call, for assertions.
#[derive(Clone, Debug)]
pub struct MockCall {
    pub history: Vec<AiTurn>,
    pub question: String,
}

/// Returns scripted answers in sequence. When the script runs out it falls
/// back to an echo of the question, which keeps offline servers usable.
pub struct MockProvider {
    answers: Vec<MockAnswer>,
    call_count: AtomicUsize,
    calls: Mutex<Vec<MockCall>>,
}

impl MockProvider {
    pub fn new(answers: Vec<MockAnswer>) -> Self {
        Self {
            answers,
            call_count: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl AnswerProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn answer(&self, history: &[AiTurn], question: &str) -> Result<String, AssistError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.calls.lock().push(MockCall {
            history: history.to_vec(),
            question: question.to_string(),
        });

        let Some(mut current) = self.answers.get(idx).cloned() else {
            return Ok(format!("[Mock answer] You asked: {question}"));
        };
        loop {
            match current {
                MockAnswer::Text(text) => return Ok(text),
                MockAnswer::Error(e) => return Err(e),
                MockAnswer::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    current = *inner;
                }
            }
        }
    }
}

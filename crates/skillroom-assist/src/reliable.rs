use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use skillroom_core::assist::AiTurn;

use crate::error::AssistError;
use crate::provider::AnswerProvider;

/// Retry behaviour for [`RetryingProvider`].
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.2,
        }
    }
}

/// Wraps an [`AnswerProvider`] with retry on retryable errors.
///
/// - exponential backoff with jitter between attempts
/// - a server-supplied `Retry-After` wins over the computed delay
/// - fatal errors are returned immediately
pub struct RetryingProvider<P> {
    inner: P,
    config: RetryConfig,
    total_retries: AtomicU64,
}

impl<P: AnswerProvider> RetryingProvider<P> {
    pub fn new(inner: P, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    fn retry_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay.min(self.config.max_delay);
        }

        let base_ms = self.config.base_delay.as_millis() as f64;
        let exp = base_ms * 2f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let capped = exp.min(self.config.max_delay.as_millis() as f64);

        let spread = capped * self.config.jitter_factor;
        let jitter = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

#[async_trait]
impl<P: AnswerProvider> AnswerProvider for RetryingProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn answer(&self, history: &[AiTurn], question: &str) -> Result<String, AssistError> {
        let mut attempt = 0;
        loop {
            match self.inner.answer(history, question).await {
                Ok(answer) => return Ok(answer),
                Err(e) if !e.is_retryable() || attempt >= self.config.max_retries => return Err(e),
                Err(e) => {
                    let delay = self.retry_delay(attempt, e.suggested_delay());
                    let _ = self.total_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error_kind = e.error_kind(),
                        error = %e,
                        "retrying answer request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

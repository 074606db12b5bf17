use async_trait::async_trait;

use skillroom_core::assist::AiTurn;

use crate::error::AssistError;

/// A backend that answers a learner's question given prior turns.
#[async_trait]
pub trait AnswerProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// `history` excludes `question` itself.
    async fn answer(&self, history: &[AiTurn], question: &str) -> Result<String, AssistError>;
}

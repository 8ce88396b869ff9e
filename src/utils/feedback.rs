use std::sync::Arc;
use crate::bot::transport::{Transport, TransportResult};

/// Feedback types for different outcomes
#[derive(Debug, Clone, Copy)]
pub enum FeedbackType {
    Success,
    Warning,
    Error,
    Info,
    Processing,
}

impl FeedbackType {
    fn emoji(&self) -> &'static str {
        match self {
            FeedbackType::Success => "✅",
            FeedbackType::Warning => "⚠️",
            FeedbackType::Error => "❌",
            FeedbackType::Info => "ℹ️",
            FeedbackType::Processing => "⏳",
        }
    }
}

/// Prefixes a message with the emoji for its feedback type.
pub fn format_feedback(feedback_type: FeedbackType, message: &str) -> String {
    format!("{} {}", feedback_type.emoji(), message)
}

/// Centralized feedback for one chat
#[derive(Clone)]
pub struct CommandFeedback {
    transport: Arc<dyn Transport>,
    chat_id: i64,
}

impl CommandFeedback {
    pub fn new(transport: Arc<dyn Transport>, chat_id: i64) -> Self {
        Self { transport, chat_id }
    }

    pub async fn send(&self, feedback_type: FeedbackType, message: &str) -> TransportResult {
        self.transport
            .send_text(self.chat_id, &format_feedback(feedback_type, message), None)
            .await
    }

    pub async fn success(&self, message: &str) -> TransportResult {
        self.send(FeedbackType::Success, message).await
    }

    pub async fn error(&self, message: &str) -> TransportResult {
        self.send(FeedbackType::Error, message).await
    }

    pub async fn warning(&self, message: &str) -> TransportResult {
        self.send(FeedbackType::Warning, message).await
    }

    pub async fn info(&self, message: &str) -> TransportResult {
        self.send(FeedbackType::Info, message).await
    }

    pub async fn processing(&self, message: &str) -> TransportResult {
        self.send(FeedbackType::Processing, message).await
    }

    /// Send validation error with the expected input format
    pub async fn validation_error(&self, error: &str, suggestion: &str) -> TransportResult {
        let message = format!("{error}\n\n💡 {suggestion}");
        self.send(FeedbackType::Error, &message).await
    }
}

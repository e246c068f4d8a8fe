//! Echo generator: answers with a fixed prefix followed by the caller's last
//! user message. Deterministic, so streamed and non-streamed replies match.

use async_trait::async_trait;

use crate::generation::{GenerationError, GenerationRequest, Generator};
use crate::protocol::Role;

#[derive(Debug, Clone)]
pub struct EchoGenerator {
    reply_prefix: String,
}

impl EchoGenerator {
    pub fn new(reply_prefix: impl Into<String>) -> Self {
        Self {
            reply_prefix: reply_prefix.into(),
        }
    }
}

#[async_trait]
impl Generator for EchoGenerator {
    async fn compose(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let last = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .or_else(|| request.messages.last())
            .ok_or_else(|| GenerationError::Failed("no messages to respond to".to_string()))?;

        Ok(format!("{}{}", self.reply_prefix, last.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Dialect, Message};

    fn request(messages: Vec<Message>) -> GenerationRequest {
        GenerationRequest {
            request_id: "echo-test".to_string(),
            dialect: Dialect::OpenAiChat,
            model: "gpt-4".to_string(),
            messages,
            max_tokens: 16,
        }
    }

    #[tokio::test]
    async fn test_echoes_last_user_message() {
        let generator = EchoGenerator::new("Echo: ");
        let req = request(vec![
            Message {
                role: Role::System,
                content: "Translate to French".to_string(),
            },
            Message {
                role: Role::User,
                content: "I love programming.".to_string(),
            },
            Message {
                role: Role::Assistant,
                content: "J'adore programmer.".to_string(),
            },
        ]);
        assert_eq!(
            generator.compose(&req).await.unwrap(),
            "Echo: I love programming."
        );
    }

    #[tokio::test]
    async fn test_falls_back_to_last_message() {
        let generator = EchoGenerator::new("");
        let req = request(vec![Message {
            role: Role::System,
            content: "only a system prompt".to_string(),
        }]);
        assert_eq!(generator.compose(&req).await.unwrap(), "only a system prompt");
    }

    #[tokio::test]
    async fn test_empty_conversation_fails() {
        let generator = EchoGenerator::new("Echo: ");
        assert!(matches!(
            generator.compose(&request(vec![])).await,
            Err(GenerationError::Failed(_))
        ));
    }
}

//! Reply generation.
//!
//! - [`engine`]: per-request generation task streaming tokens over a channel
//! - [`echo`]: built-in generator used when no upstream is configured

pub mod echo;
pub mod engine;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::{Dialect, FinishReason, Message};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generation failed: {0}")]
    Failed(String),

    #[error("generation exceeded the {0:?} time limit")]
    TimedOut(Duration),
}

/// A generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Unique request ID.
    pub request_id: String,

    /// Wire flavor of the originating request.
    pub dialect: Dialect,

    /// Model id named by the caller.
    pub model: String,

    /// Conversation so far, system prompt first when present.
    pub messages: Vec<Message>,

    /// Maximum tokens to generate.
    pub max_tokens: usize,
}

/// Produces the full reply text for a request. The engine takes care of
/// splitting it into tokens, pacing and cancellation.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn compose(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

/// A finished, non-streamed generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub finish_reason: FinishReason,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    /// Served from the response cache.
    pub cached: bool,
}

/// Rough prompt size: ~1 token per 4 chars of the rendered transcript.
pub fn estimate_prompt_tokens(messages: &[Message]) -> usize {
    let chars: usize = messages
        .iter()
        .map(|m| m.role.to_string().len() + 2 + m.content.chars().count())
        .sum();
    (chars / 4).max(1)
}

/// Split text into whitespace-terminated pieces. Concatenating the pieces
/// yields the input exactly.
pub fn split_pieces(text: &str) -> Vec<&str> {
    text.split_inclusive(char::is_whitespace).collect()
}

//! SSE (Server-Sent Events) streaming for token-by-token responses.
//!
//! Converts a channel of [`GenerationEvent`]s into an SSE stream in one of
//! the supported wire formats:
//! - OpenAI chat: `chat.completion.chunk` objects, then `data: [DONE]`
//! - OpenAI legacy: `text_completion` objects, then `data: [DONE]`
//! - Anthropic: named events from `message_start` to `message_stop`
//!
//! Dropping the returned stream (client disconnect) drops the receiver,
//! which stops the generation task.

use std::convert::Infallible;

use axum::response::sse::Event;
use futures::stream::{self, Stream, StreamExt};
use prometheus::IntCounter;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::EndpointError;
use crate::generation::engine::GenerationEvent;
use crate::protocol::anthropic::{
    BlockDelta, DeltaUsage, MessageDeltaBody, MessagesResponse, MessagesUsage, StreamEvent,
};
use crate::protocol::openai::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, TextChoice, TextCompletion, Usage,
};
use crate::protocol::ContentPart;
use crate::server::RequestSlot;

/// Terminal sentinel of OpenAI streams.
pub const DONE: &str = "[DONE]";

/// Maps generation events to the SSE events of one wire format.
pub trait EventRenderer: Send + 'static {
    /// Events sent before the first token.
    fn prelude(&mut self) -> Vec<Event> {
        Vec::new()
    }

    fn render(&mut self, event: GenerationEvent) -> Vec<Event>;
}

/// Convert a generation event receiver into an SSE stream.
///
/// The request slot is released when the stream is dropped.
pub fn generation_to_sse_stream<R: EventRenderer>(
    rx: mpsc::Receiver<GenerationEvent>,
    mut renderer: R,
    slot: RequestSlot,
    chunks: IntCounter,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let prelude = renderer.prelude();

    let body = ReceiverStream::new(rx).flat_map(move |event| {
        let _slot = &slot;
        if matches!(event, GenerationEvent::Token { .. }) {
            chunks.inc();
        }
        stream::iter(renderer.render(event))
    });

    stream::iter(prelude).chain(body).map(Ok)
}

fn data_event<T: Serialize>(value: &T) -> Event {
    Event::default().data(serde_json::to_string(value).unwrap_or_default())
}

/// Identity shared by every chunk of one response.
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub id: String,
    pub model: String,
    pub created: u64,
}

// ─── OpenAI chat ───────────────────────────────────────────────────────────

pub struct ChatChunkRenderer {
    ctx: StreamContext,
    include_usage: bool,
}

impl ChatChunkRenderer {
    pub fn new(ctx: StreamContext, include_usage: bool) -> Self {
        Self { ctx, include_usage }
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<String>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.ctx.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.ctx.created,
            model: self.ctx.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: None,
        }
    }
}

impl EventRenderer for ChatChunkRenderer {
    fn prelude(&mut self) -> Vec<Event> {
        // First chunk announces the role.
        let chunk = self.chunk(
            ChunkDelta {
                role: Some("assistant".to_string()),
                content: Some(String::new()),
            },
            None,
        );
        vec![data_event(&chunk)]
    }

    fn render(&mut self, event: GenerationEvent) -> Vec<Event> {
        match event {
            GenerationEvent::Token { text } => {
                let chunk = self.chunk(
                    ChunkDelta {
                        role: None,
                        content: Some(text),
                    },
                    None,
                );
                vec![data_event(&chunk)]
            }
            GenerationEvent::Done {
                prompt_tokens,
                completion_tokens,
                finish_reason,
            } => {
                let mut events = vec![data_event(&self.chunk(
                    ChunkDelta::default(),
                    Some(finish_reason.as_openai().to_string()),
                ))];
                if self.include_usage {
                    let mut usage_chunk = self.chunk(ChunkDelta::default(), None);
                    usage_chunk.choices.clear();
                    usage_chunk.usage = Some(Usage::new(prompt_tokens, completion_tokens));
                    events.push(data_event(&usage_chunk));
                }
                events.push(Event::default().data(DONE));
                events
            }
            GenerationEvent::Error(e) => {
                vec![data_event(&EndpointError::from(e).openai_body())]
            }
        }
    }
}

// ─── OpenAI legacy completions ─────────────────────────────────────────────

pub struct TextChunkRenderer {
    ctx: StreamContext,
}

impl TextChunkRenderer {
    pub fn new(ctx: StreamContext) -> Self {
        Self { ctx }
    }

    fn chunk(&self, text: String, finish_reason: Option<String>) -> TextCompletion {
        TextCompletion {
            id: self.ctx.id.clone(),
            object: "text_completion".to_string(),
            created: self.ctx.created,
            model: self.ctx.model.clone(),
            choices: vec![TextChoice {
                index: 0,
                text,
                finish_reason,
            }],
            usage: None,
        }
    }
}

impl EventRenderer for TextChunkRenderer {
    fn render(&mut self, event: GenerationEvent) -> Vec<Event> {
        match event {
            GenerationEvent::Token { text } => vec![data_event(&self.chunk(text, None))],
            GenerationEvent::Done { finish_reason, .. } => vec![
                data_event(&self.chunk(
                    String::new(),
                    Some(finish_reason.as_openai().to_string()),
                )),
                Event::default().data(DONE),
            ],
            GenerationEvent::Error(e) => {
                vec![data_event(&EndpointError::from(e).openai_body())]
            }
        }
    }
}

// ─── Anthropic ─────────────────────────────────────────────────────────────

pub struct AnthropicRenderer {
    ctx: StreamContext,
    input_tokens: usize,
}

impl AnthropicRenderer {
    pub fn new(ctx: StreamContext, input_tokens: usize) -> Self {
        Self { ctx, input_tokens }
    }
}

fn named(event: &StreamEvent) -> Event {
    data_event(event).event(event.name())
}

impl EventRenderer for AnthropicRenderer {
    fn prelude(&mut self) -> Vec<Event> {
        let start = StreamEvent::MessageStart {
            message: MessagesResponse {
                id: self.ctx.id.clone(),
                kind: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.ctx.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: MessagesUsage {
                    input_tokens: self.input_tokens,
                    output_tokens: 0,
                },
            },
        };
        let block_start = StreamEvent::ContentBlockStart {
            index: 0,
            content_block: ContentPart::text(""),
        };
        vec![named(&start), named(&block_start), named(&StreamEvent::Ping)]
    }

    fn render(&mut self, event: GenerationEvent) -> Vec<Event> {
        match event {
            GenerationEvent::Token { text } => vec![named(&StreamEvent::ContentBlockDelta {
                index: 0,
                delta: BlockDelta::TextDelta { text },
            })],
            GenerationEvent::Done {
                completion_tokens,
                finish_reason,
                ..
            } => vec![
                named(&StreamEvent::ContentBlockStop { index: 0 }),
                named(&StreamEvent::MessageDelta {
                    delta: MessageDeltaBody {
                        stop_reason: Some(finish_reason.as_anthropic().to_string()),
                        stop_sequence: None,
                    },
                    usage: DeltaUsage {
                        output_tokens: completion_tokens,
                    },
                }),
                named(&StreamEvent::MessageStop),
            ],
            GenerationEvent::Error(e) => vec![named(&StreamEvent::Error {
                error: EndpointError::from(e).anthropic_detail(),
            })],
        }
    }
}

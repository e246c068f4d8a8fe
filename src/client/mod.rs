//! Client for OpenAI- and Anthropic-compatible endpoints.
//!
//! Speaks the same wire types the server uses, against bifrost or against
//! the real providers. Streaming calls yield text deltas as they arrive and
//! fail if the stream ends without its terminal marker.

use std::pin::Pin;
use std::time::Duration;

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::protocol::anthropic::{self, BlockDelta, MessagesRequest, MessagesResponse, StreamEvent};
use crate::protocol::openai::{
    self, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, Prompt,
    TextCompletion, TextCompletionRequest,
};
use crate::protocol::{ChatMessage, Dialect, MessageContent, Role};

/// Version header the Messages API requires.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}, {kind}): {message}")]
    Api {
        status: StatusCode,
        kind: String,
        message: String,
    },

    #[error("error event in stream ({kind}): {message}")]
    Stream { kind: String, message: String },

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<EventStreamError<reqwest::Error>> for ClientError {
    fn from(err: EventStreamError<reqwest::Error>) -> Self {
        match err {
            EventStreamError::Transport(e) => ClientError::Http(e),
            other => ClientError::Protocol(other.to_string()),
        }
    }
}

/// Text deltas of a streaming response.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, ClientError>> + Send>>;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Endpoint root, e.g. `http://localhost:3000`; `/v1/...` is appended.
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: usize,
    /// Delivery mode used by [`CompletionClient::run`].
    pub stream: bool,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            api_key: None,
            model: "gpt-4".to_string(),
            max_tokens: 256,
            stream: false,
            timeout: Duration::from_secs(120),
        }
    }
}

pub struct CompletionClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl CompletionClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn openai_post<B: Serialize>(&self, path: &str, body: &B) -> reqwest::RequestBuilder {
        let mut req = self.http.post(self.url(path)).json(body);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    fn anthropic_post(&self, body: &MessagesRequest) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .post(self.url("/v1/messages"))
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body);
        if let Some(key) = &self.config.api_key {
            req = req.header("x-api-key", key);
        }
        req
    }

    fn chat_request(&self, messages: &[ChatMessage], stream: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: messages.to_vec(),
            max_tokens: Some(self.config.max_tokens),
            max_completion_tokens: None,
            stream,
            temperature: None,
            stream_options: None,
        }
    }

    fn messages_request(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
        stream: bool,
    ) -> MessagesRequest {
        MessagesRequest {
            model: self.config.model.clone(),
            messages: messages.to_vec(),
            max_tokens: self.config.max_tokens,
            system: system.map(|s| MessageContent::Text(s.to_string())),
            stream,
            temperature: None,
        }
    }

    fn text_request(&self, prompt: &str, stream: bool) -> TextCompletionRequest {
        TextCompletionRequest {
            model: self.config.model.clone(),
            prompt: Prompt::Text(prompt.to_string()),
            max_tokens: Some(self.config.max_tokens),
            stream,
            temperature: None,
        }
    }

    /// OpenAI chat completion.
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatCompletionResponse, ClientError> {
        let req = self.chat_request(messages, false);
        let response = self.openai_post("/v1/chat/completions", &req).send().await?;
        decode_json(response).await
    }

    /// OpenAI chat completion, streamed.
    pub async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<DeltaStream, ClientError> {
        let req = self.chat_request(messages, true);
        let response = check_status(self.openai_post("/v1/chat/completions", &req).send().await?).await?;
        Ok(delta_stream(response, |event| {
            if event.data == "[DONE]" {
                return Ok(FrameOutcome::End);
            }
            match serde_json::from_str::<ChatCompletionChunk>(&event.data) {
                Ok(chunk) => Ok(FrameOutcome::delta(
                    chunk
                        .choices
                        .iter()
                        .filter_map(|c| c.delta.content.as_deref())
                        .collect(),
                )),
                Err(e) => Err(openai_stream_error(&event.data).unwrap_or(ClientError::Decode(e))),
            }
        }))
    }

    /// Anthropic Messages call.
    pub async fn messages(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
    ) -> Result<MessagesResponse, ClientError> {
        let req = self.messages_request(system, messages, false);
        let response = self.anthropic_post(&req).send().await?;
        decode_json(response).await
    }

    /// Anthropic Messages call, streamed.
    pub async fn messages_stream(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
    ) -> Result<DeltaStream, ClientError> {
        let req = self.messages_request(system, messages, true);
        let response = check_status(self.anthropic_post(&req).send().await?).await?;
        Ok(delta_stream(response, |event| {
            match serde_json::from_str::<StreamEvent>(&event.data)? {
                StreamEvent::ContentBlockDelta {
                    delta: BlockDelta::TextDelta { text },
                    ..
                } => Ok(FrameOutcome::delta(text)),
                StreamEvent::MessageStop => Ok(FrameOutcome::End),
                StreamEvent::Error { error } => Err(ClientError::Stream {
                    kind: error.kind,
                    message: error.message,
                }),
                _ => Ok(FrameOutcome::Skip),
            }
        }))
    }

    /// OpenAI legacy text completion.
    pub async fn complete(&self, prompt: &str) -> Result<TextCompletion, ClientError> {
        let req = self.text_request(prompt, false);
        let response = self.openai_post("/v1/completions", &req).send().await?;
        decode_json(response).await
    }

    /// OpenAI legacy text completion, streamed.
    pub async fn complete_stream(&self, prompt: &str) -> Result<DeltaStream, ClientError> {
        let req = self.text_request(prompt, true);
        let response = check_status(self.openai_post("/v1/completions", &req).send().await?).await?;
        Ok(delta_stream(response, |event| {
            if event.data == "[DONE]" {
                return Ok(FrameOutcome::End);
            }
            match serde_json::from_str::<TextCompletion>(&event.data) {
                Ok(chunk) => Ok(FrameOutcome::delta(
                    chunk.choices.iter().map(|c| c.text.as_str()).collect(),
                )),
                Err(e) => Err(openai_stream_error(&event.data).unwrap_or(ClientError::Decode(e))),
            }
        }))
    }
}

/// Assembled reply of one call, whichever way it was delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub streamed: bool,
}

impl CompletionClient {
    /// Send `messages` in `dialect`, streaming or not per `config.stream`,
    /// and return the full reply text.
    ///
    /// For the Messages API, system messages move to the top-level `system`
    /// field. For legacy completions the message contents become the prompt.
    pub async fn run(&self, dialect: Dialect, messages: &[ChatMessage]) -> Result<Reply, ClientError> {
        let streamed = self.config.stream;
        let text = match (dialect, streamed) {
            (Dialect::OpenAiChat, false) => {
                let response = self.chat(messages).await?;
                let choice = response
                    .choices
                    .into_iter()
                    .next()
                    .ok_or_else(|| ClientError::Protocol("response has no choices".to_string()))?;
                choice.message.content.to_text()
            }
            (Dialect::OpenAiChat, true) => collect_text(self.chat_stream(messages).await?).await?,
            (Dialect::Anthropic, stream) => {
                let (system, rest) = split_system(messages);
                if stream {
                    collect_text(self.messages_stream(system.as_deref(), &rest).await?).await?
                } else {
                    self.messages(system.as_deref(), &rest).await?.text()
                }
            }
            (Dialect::OpenAiText, stream) => {
                let prompt = messages
                    .iter()
                    .map(|m| m.content.to_text())
                    .collect::<Vec<_>>()
                    .join("\n");
                if stream {
                    collect_text(self.complete_stream(&prompt).await?).await?
                } else {
                    let response = self.complete(&prompt).await?;
                    response
                        .choices
                        .into_iter()
                        .next()
                        .map(|c| c.text)
                        .ok_or_else(|| ClientError::Protocol("response has no choices".to_string()))?
                }
            }
        };
        Ok(Reply { text, streamed })
    }
}

fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<ChatMessage>) {
    let system: Vec<String> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.to_text())
        .collect();
    let rest = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .cloned()
        .collect();
    let system = (!system.is_empty()).then(|| system.join("\n"));
    (system, rest)
}

/// Collect a delta stream into the full reply text.
pub async fn collect_text(mut stream: DeltaStream) -> Result<String, ClientError> {
    let mut text = String::new();
    while let Some(delta) = stream.next().await {
        text.push_str(&delta?);
    }
    Ok(text)
}

/// Turn a non-2xx response into [`ClientError::Api`], reading either
/// dialect's error body.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await?;
    debug!(%status, body, "Endpoint returned an error");

    if let Ok(err) = serde_json::from_str::<openai::ErrorBody>(&body) {
        return Err(ClientError::Api {
            status,
            kind: err.error.kind,
            message: err.error.message,
        });
    }
    if let Ok(err) = serde_json::from_str::<anthropic::ErrorBody>(&body) {
        return Err(ClientError::Api {
            status,
            kind: err.error.kind,
            message: err.error.message,
        });
    }
    Err(ClientError::Api {
        status,
        kind: "unknown".to_string(),
        message: body,
    })
}

async fn decode_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let response = check_status(response).await?;
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn openai_stream_error(data: &str) -> Option<ClientError> {
    serde_json::from_str::<openai::ErrorBody>(data)
        .ok()
        .map(|err| ClientError::Stream {
            kind: err.error.kind,
            message: err.error.message,
        })
}

enum FrameOutcome {
    Delta(String),
    Skip,
    End,
}

impl FrameOutcome {
    fn delta(text: String) -> Self {
        if text.is_empty() {
            FrameOutcome::Skip
        } else {
            FrameOutcome::Delta(text)
        }
    }
}

struct DeltaState<F> {
    events: BoxStream<'static, Result<Event, EventStreamError<reqwest::Error>>>,
    on_frame: F,
    done: bool,
}

fn delta_stream<F>(response: reqwest::Response, on_frame: F) -> DeltaStream
where
    F: FnMut(Event) -> Result<FrameOutcome, ClientError> + Send + 'static,
{
    let state = DeltaState {
        events: response.bytes_stream().eventsource().boxed(),
        on_frame,
        done: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        loop {
            let outcome = match state.events.next().await {
                Some(Ok(event)) => (state.on_frame)(event),
                Some(Err(e)) => Err(e.into()),
                None => Err(ClientError::Protocol(
                    "stream ended before its terminal event".to_string(),
                )),
            };
            match outcome {
                Ok(FrameOutcome::Delta(text)) => return Some((Ok(text), state)),
                Ok(FrameOutcome::Skip) => continue,
                Ok(FrameOutcome::End) => return None,
                Err(e) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_system() {
        let messages = vec![
            ChatMessage::system("Translate to French"),
            ChatMessage::user("I love programming."),
        ];
        let (system, rest) = split_system(&messages);
        assert_eq!(system.as_deref(), Some("Translate to French"));
        assert_eq!(rest, vec![ChatMessage::user("I love programming.")]);

        let (none, all) = split_system(&rest);
        assert!(none.is_none());
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_openai_stream_error_decoding() {
        let err = openai_stream_error(
            r#"{"error":{"message":"too slow","type":"server_error","param":null,"code":"timeout"}}"#,
        )
        .unwrap();
        assert!(matches!(err, ClientError::Stream { ref kind, .. } if kind == "server_error"));
        assert!(openai_stream_error(r#"{"id":"x"}"#).is_none());
    }

    #[test]
    fn test_undecodable_event_stream_is_protocol_error() {
        let utf8 = String::from_utf8(vec![0xff, 0xfe]).unwrap_err();
        let err = ClientError::from(EventStreamError::<reqwest::Error>::Utf8(utf8));
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[test]
    fn test_empty_deltas_are_skipped() {
        assert!(matches!(FrameOutcome::delta(String::new()), FrameOutcome::Skip));
        assert!(matches!(FrameOutcome::delta("a".into()), FrameOutcome::Delta(_)));
    }
}

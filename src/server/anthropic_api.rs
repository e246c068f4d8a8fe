//! Anthropic Messages API (POST /v1/messages).
//!
//! Shares validation, generation and limits with the OpenAI handlers but
//! reports errors as `{"type":"error","error":{...}}` and streams the
//! named event sequence Anthropic SDKs expect.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use tracing::info;
use uuid::Uuid;

use crate::error::{parse_body, AnthropicError, EndpointError};
use crate::generation::{estimate_prompt_tokens, GenerationRequest};
use crate::protocol::anthropic::{MessagesRequest, MessagesResponse, MessagesUsage};
use crate::protocol::{unix_now, ChatMessage, ContentPart, Dialect, Message, Role};
use crate::server::auth::authorize;
use crate::server::streaming::{generation_to_sse_stream, AnthropicRenderer, StreamContext};
use crate::server::{require_messages, AppState};
use crate::upstream::Provider;

pub async fn messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AnthropicError> {
    handle_messages(&state, headers, body)
        .await
        .inspect_err(|e| state.metrics.record_error(e))
        .map_err(AnthropicError)
}

/// System prompt first, then the conversation. A `system` role inside
/// `messages` is rejected; it belongs in the top-level field.
fn conversation(req: &MessagesRequest) -> Result<Vec<Message>, EndpointError> {
    if let Some(position) = req.messages.iter().position(|m| m.role == Role::System) {
        return Err(EndpointError::InvalidRequest(format!(
            "messages.{position}.role: Unexpected role \"system\". Use the top-level `system` parameter for system prompts"
        )));
    }

    let mut messages = Vec::with_capacity(req.messages.len() + 1);
    if let Some(system) = &req.system {
        let text = system.to_text();
        if !text.is_empty() {
            messages.push(Message {
                role: Role::System,
                content: text,
            });
        }
    }
    messages.extend(req.messages.iter().map(ChatMessage::to_message));
    Ok(messages)
}

async fn handle_messages(
    state: &Arc<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, EndpointError> {
    authorize(&state.config.auth, &headers)?;
    let req: MessagesRequest = parse_body(&body)?;
    state.check_model(&req.model)?;
    require_messages(&req.messages)?;
    let max_tokens = state.token_budget(Some(req.max_tokens))?;
    let messages = conversation(&req)?;

    let slot = state.acquire_slot()?;
    let mode = if req.stream { "stream" } else { "blocking" };
    state
        .metrics
        .requests
        .with_label_values(&[Dialect::Anthropic.as_str(), mode])
        .inc();

    if let Some(upstream) = &state.upstream {
        return upstream
            .forward(
                Provider::Anthropic,
                "/v1/messages",
                &headers,
                body,
                slot,
                &state.metrics,
            )
            .await;
    }

    let request_id = format!("msg_{}", Uuid::new_v4().simple());
    info!(
        request_id,
        model = req.model,
        messages = messages.len(),
        stream = req.stream,
        "Messages request"
    );

    let input_tokens = estimate_prompt_tokens(&messages);
    let gen_request = GenerationRequest {
        request_id: request_id.clone(),
        dialect: Dialect::Anthropic,
        model: req.model.clone(),
        messages,
        max_tokens,
    };

    if req.stream {
        let generation = state.engine.generate(gen_request);
        let renderer = AnthropicRenderer::new(
            StreamContext {
                id: request_id,
                model: req.model.clone(),
                created: unix_now(),
            },
            input_tokens,
        );
        let chunks = state
            .metrics
            .chunks
            .with_label_values(&[Dialect::Anthropic.as_str()]);
        let stream = generation_to_sse_stream(generation.events, renderer, slot, chunks);
        return Ok(Sse::new(stream)
            .keep_alive(KeepAlive::default())
            .into_response());
    }

    let completion = state.engine.complete(gen_request).await?;
    drop(slot);
    if completion.cached {
        state.metrics.cache_hits.inc();
    }

    Ok(Json(MessagesResponse {
        id: request_id,
        kind: "message".to_string(),
        role: "assistant".to_string(),
        content: vec![ContentPart::text(completion.text)],
        model: req.model,
        stop_reason: Some(completion.finish_reason.as_anthropic().to_string()),
        stop_sequence: None,
        usage: MessagesUsage {
            input_tokens: completion.prompt_tokens,
            output_tokens: completion.completion_tokens,
        },
    })
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageContent;

    fn request(messages: Vec<ChatMessage>, system: Option<&str>) -> MessagesRequest {
        MessagesRequest {
            model: "claude-3-5-sonnet-20240620".to_string(),
            messages,
            max_tokens: 64,
            system: system.map(|s| MessageContent::Text(s.to_string())),
            stream: false,
            temperature: None,
        }
    }

    #[test]
    fn test_system_prompt_goes_first() {
        let req = request(vec![ChatMessage::user("hi")], Some("be brief"));
        let messages = conversation(&req).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "be brief");
        assert_eq!(messages[1].content, "hi");
    }

    #[test]
    fn test_system_role_in_messages_rejected() {
        let req = request(
            vec![ChatMessage::user("hi"), ChatMessage::system("nope")],
            None,
        );
        let err = conversation(&req).unwrap_err();
        assert!(matches!(err, EndpointError::InvalidRequest(ref m) if m.starts_with("messages.1.role")));
    }
}

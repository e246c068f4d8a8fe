//! OpenAI-compatible HTTP API.
//!
//! - POST /v1/chat/completions
//! - POST /v1/completions (legacy text completions)
//!
//! Bodies are taken as raw bytes so malformed JSON gets an OpenAI-shaped
//! error instead of axum's plain-text rejection, and so proxy mode can
//! forward the caller's exact payload.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use tracing::info;
use uuid::Uuid;

use crate::error::{parse_body, EndpointError};
use crate::generation::GenerationRequest;
use crate::protocol::openai::{
    ChatChoice, ChatCompletionRequest, ChatCompletionResponse, TextChoice, TextCompletion,
    TextCompletionRequest, Usage,
};
use crate::protocol::{unix_now, ChatMessage, Dialect, Message, Role};
use crate::server::auth::authorize;
use crate::server::streaming::{
    generation_to_sse_stream, ChatChunkRenderer, StreamContext, TextChunkRenderer,
};
use crate::server::{require_messages, AppState};
use crate::upstream::Provider;

fn mode(stream: bool) -> &'static str {
    if stream {
        "stream"
    } else {
        "blocking"
    }
}

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, EndpointError> {
    handle_chat(&state, headers, body)
        .await
        .inspect_err(|e| state.metrics.record_error(e))
}

async fn handle_chat(
    state: &Arc<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, EndpointError> {
    authorize(&state.config.auth, &headers)?;
    let req: ChatCompletionRequest = parse_body(&body)?;
    state.check_model(&req.model)?;
    require_messages(&req.messages)?;
    let max_tokens = state.token_budget(req.token_limit())?;

    let slot = state.acquire_slot()?;
    state
        .metrics
        .requests
        .with_label_values(&[Dialect::OpenAiChat.as_str(), mode(req.stream)])
        .inc();

    if let Some(upstream) = &state.upstream {
        return upstream
            .forward(
                Provider::OpenAi,
                "/v1/chat/completions",
                &headers,
                body,
                slot,
                &state.metrics,
            )
            .await;
    }

    let request_id = format!("chatcmpl-{}", Uuid::new_v4().simple());
    info!(
        request_id,
        model = req.model,
        messages = req.messages.len(),
        stream = req.stream,
        "Chat completion request"
    );

    let gen_request = GenerationRequest {
        request_id: request_id.clone(),
        dialect: Dialect::OpenAiChat,
        model: req.model.clone(),
        messages: req.messages.iter().map(ChatMessage::to_message).collect(),
        max_tokens,
    };

    if req.stream {
        let generation = state.engine.generate(gen_request);
        let renderer = ChatChunkRenderer::new(
            StreamContext {
                id: request_id,
                model: req.model.clone(),
                created: unix_now(),
            },
            req.include_usage(),
        );
        let chunks = state
            .metrics
            .chunks
            .with_label_values(&[Dialect::OpenAiChat.as_str()]);
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

    let response = ChatCompletionResponse {
        id: request_id,
        object: "chat.completion".to_string(),
        created: unix_now(),
        model: req.model,
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage::assistant(completion.text),
            finish_reason: Some(completion.finish_reason.as_openai().to_string()),
        }],
        usage: Some(Usage::new(
            completion.prompt_tokens,
            completion.completion_tokens,
        )),
    };

    Ok(Json(response).into_response())
}

pub async fn completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, EndpointError> {
    handle_completions(&state, headers, body)
        .await
        .inspect_err(|e| state.metrics.record_error(e))
}

async fn handle_completions(
    state: &Arc<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, EndpointError> {
    authorize(&state.config.auth, &headers)?;
    let req: TextCompletionRequest = parse_body(&body)?;
    state.check_model(&req.model)?;
    let prompt = req.prompt.to_text();
    if prompt.trim().is_empty() {
        return Err(EndpointError::InvalidRequest(
            "`prompt` must be a non-empty string".to_string(),
        ));
    }
    let max_tokens = state.token_budget(req.max_tokens)?;

    let slot = state.acquire_slot()?;
    state
        .metrics
        .requests
        .with_label_values(&[Dialect::OpenAiText.as_str(), mode(req.stream)])
        .inc();

    if let Some(upstream) = &state.upstream {
        return upstream
            .forward(
                Provider::OpenAi,
                "/v1/completions",
                &headers,
                body,
                slot,
                &state.metrics,
            )
            .await;
    }

    let request_id = format!("cmpl-{}", Uuid::new_v4().simple());
    info!(request_id, model = req.model, stream = req.stream, "Completion request");

    let gen_request = GenerationRequest {
        request_id: request_id.clone(),
        dialect: Dialect::OpenAiText,
        model: req.model.clone(),
        messages: vec![Message {
            role: Role::User,
            content: prompt,
        }],
        max_tokens,
    };

    if req.stream {
        let generation = state.engine.generate(gen_request);
        let renderer = TextChunkRenderer::new(StreamContext {
            id: request_id,
            model: req.model.clone(),
            created: unix_now(),
        });
        let chunks = state
            .metrics
            .chunks
            .with_label_values(&[Dialect::OpenAiText.as_str()]);
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

    Ok(Json(TextCompletion {
        id: request_id,
        object: "text_completion".to_string(),
        created: unix_now(),
        model: req.model,
        choices: vec![TextChoice {
            index: 0,
            text: completion.text,
            finish_reason: Some(completion.finish_reason.as_openai().to_string()),
        }],
        usage: Some(Usage::new(
            completion.prompt_tokens,
            completion.completion_tokens,
        )),
    })
    .into_response())
}

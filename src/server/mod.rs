//! HTTP server providing OpenAI- and Anthropic-compatible APIs.
//!
//! - [`openai_api`]: chat and legacy completion handlers
//! - [`anthropic_api`]: Messages API handler
//! - [`streaming`]: SSE rendering of generation events
//! - [`auth`]: API key extraction and checks

pub mod anthropic_api;
pub mod auth;
pub mod openai_api;
pub mod streaming;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::{Backend, Config};
use crate::error::EndpointError;
use crate::generation::engine::Engine;
use crate::generation::Generator;
use crate::metrics::Metrics;
use crate::protocol::openai::{ModelInfo, ModelList};
use crate::protocol::ChatMessage;
use crate::upstream::UpstreamProxy;

/// Application state shared across handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Engine,
    /// Present when the endpoint runs in proxy mode.
    pub upstream: Option<UpstreamProxy>,
    pub metrics: Arc<Metrics>,
    pub limiter: Arc<Semaphore>,
    pub start_time: Instant,
}

impl AppState {
    /// Build the state for `config`, generating locally with `generator`
    /// unless the config selects proxy mode.
    pub fn new(config: Arc<Config>, generator: Arc<dyn Generator>) -> anyhow::Result<Self> {
        let upstream = match config.generation.backend {
            Backend::Local => None,
            Backend::Proxy => Some(UpstreamProxy::new(&config.upstream)?),
        };
        Ok(Self {
            engine: Engine::new(generator, &config),
            upstream,
            metrics: Arc::new(Metrics::new()?),
            limiter: Arc::new(Semaphore::new(config.server.max_concurrent_requests)),
            start_time: Instant::now(),
            config,
        })
    }

    /// Claim one of the concurrent request slots, or fail with 503.
    pub fn acquire_slot(&self) -> Result<RequestSlot, EndpointError> {
        let permit = self
            .limiter
            .clone()
            .try_acquire_owned()
            .map_err(|_| EndpointError::Overloaded)?;
        self.metrics.in_flight.inc();
        Ok(RequestSlot {
            _permit: permit,
            metrics: self.metrics.clone(),
        })
    }

    pub fn check_model(&self, model: &str) -> Result<(), EndpointError> {
        if model.trim().is_empty() {
            return Err(EndpointError::InvalidRequest(
                "`model` must be a non-empty string".to_string(),
            ));
        }
        // Upstream providers decide which models exist.
        if self.upstream.is_some() || self.config.models.is_known(model) {
            Ok(())
        } else {
            Err(EndpointError::ModelNotFound(model.to_string()))
        }
    }

    /// Explicit budget if valid, otherwise the configured default.
    pub fn token_budget(&self, requested: Option<usize>) -> Result<usize, EndpointError> {
        match requested {
            Some(0) => Err(EndpointError::InvalidRequest(
                "`max_tokens` must be a positive integer".to_string(),
            )),
            Some(n) => Ok(n),
            None => Ok(self.config.generation.default_max_tokens),
        }
    }
}

/// A held concurrency slot. Dropping it frees the slot, so streaming
/// responses keep it until the stream ends or the client goes away.
pub struct RequestSlot {
    _permit: OwnedSemaphorePermit,
    metrics: Arc<Metrics>,
}

impl Drop for RequestSlot {
    fn drop(&mut self) {
        self.metrics.in_flight.dec();
    }
}

pub fn require_messages(messages: &[ChatMessage]) -> Result<(), EndpointError> {
    if messages.is_empty() {
        return Err(EndpointError::InvalidRequest(
            "`messages` must contain at least one message".to_string(),
        ));
    }
    Ok(())
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(openai_api::chat_completions))
        // Python clients given a bare base URL drop the /v1 prefix.
        .route("/chat/completions", post(openai_api::chat_completions))
        .route("/v1/completions", post(openai_api::completions))
        .route("/completions", post(openai_api::completions))
        .route("/v1/messages", post(anthropic_api::messages))
        .route("/v1/models", get(list_models))
        .route("/models", get(list_models))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub backend: String,
    pub in_flight: usize,
    pub max_concurrent_requests: usize,
}

async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelList> {
    Json(ModelList {
        object: "list".to_string(),
        data: state
            .config
            .models
            .served
            .iter()
            .map(|id| ModelInfo {
                id: id.clone(),
                object: "model".to_string(),
                created: 0,
                owned_by: "bifrost".to_string(),
            })
            .collect(),
    })
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let max = state.config.server.max_concurrent_requests;
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        backend: match state.config.generation.backend {
            Backend::Local => "local".to_string(),
            Backend::Proxy => "proxy".to_string(),
        },
        in_flight: max.saturating_sub(state.limiter.available_permits()),
        max_concurrent_requests: max,
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => EndpointError::Internal(format!("metrics unavailable: {e}")).into_response(),
    }
}

//! Shared helpers for the router-level tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;

use bifrost::config::Config;
use bifrost::generation::echo::EchoGenerator;
use bifrost::generation::{GenerationError, GenerationRequest, Generator};
use bifrost::server::{build_router, AppState};

pub const API_KEY: &str = "sk-local-test";

pub fn state_with(config: Config) -> Arc<AppState> {
    state_with_generator(config, Arc::new(EchoGenerator::new("Echo: ")))
}

pub fn state_with_generator(config: Config, generator: Arc<dyn Generator>) -> Arc<AppState> {
    Arc::new(AppState::new(Arc::new(config), generator).unwrap())
}

pub fn app() -> Router {
    build_router(state_with(Config::default()))
}

pub fn json_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {API_KEY}"))
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

pub fn anthropic_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header("content-type", "application/json")
        .header("x-api-key", API_KEY)
        .header("anthropic-version", "2023-06-01")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

pub async fn body_json(resp: Response<Body>) -> Value {
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body)
        .unwrap_or_else(|e| panic!("invalid JSON ({e}): {}", String::from_utf8_lossy(&body)))
}

pub async fn body_text(resp: Response<Body>) -> String {
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(body.to_vec()).unwrap()
}

/// One decoded SSE frame: optional event name plus data payload.
#[derive(Debug, Clone)]
pub struct Frame {
    pub event: Option<String>,
    pub data: String,
}

impl Frame {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.data).unwrap()
    }
}

pub fn parse_sse(text: &str) -> Vec<Frame> {
    text.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data = Vec::new();
            for line in block.lines() {
                if let Some(name) = line.strip_prefix("event: ") {
                    event = Some(name.to_string());
                } else if let Some(d) = line.strip_prefix("data: ") {
                    data.push(d);
                } else if let Some(d) = line.strip_prefix("data:") {
                    data.push(d);
                }
            }
            (!data.is_empty()).then(|| Frame {
                event,
                data: data.join("\n"),
            })
        })
        .collect()
}

pub fn translation_messages() -> Value {
    serde_json::json!([
        {"role": "system", "content": "Translate to French"},
        {"role": "user", "content": "I love programming."}
    ])
}

/// Generator that always fails.
pub struct FailingGenerator;

#[async_trait]
impl Generator for FailingGenerator {
    async fn compose(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
        Err(GenerationError::Failed("model crashed".to_string()))
    }
}

/// Generator that takes longer than any test deadline.
pub struct SlowGenerator(pub Duration);

#[async_trait]
impl Generator for SlowGenerator {
    async fn compose(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
        tokio::time::sleep(self.0).await;
        Ok("too late".to_string())
    }
}

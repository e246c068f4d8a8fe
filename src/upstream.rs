//! Upstream proxy backend.
//!
//! Forwards validated request bodies to the real OpenAI / Anthropic APIs.
//! Caller headers are passed through (minus hop-by-hop ones), compressed
//! upstream bodies are decoded by reqwest, and event streams are relayed
//! chunk by chunk as they arrive.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::config::UpstreamConfig;
use crate::error::EndpointError;
use crate::metrics::Metrics;
use crate::server::RequestSlot;

/// Upstream provider a request is forwarded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
        }
    }
}

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Request headers to send upstream.
fn outgoing_headers(incoming: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in incoming {
        if is_hop_by_hop(name)
            || name == header::HOST
            || name == header::CONTENT_LENGTH
            || name == header::ACCEPT_ENCODING
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Response headers to relay back to the caller. The body has already been
/// decompressed, so encoding and length no longer apply.
fn relayed_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in upstream {
        if is_hop_by_hop(name)
            || name == header::CONTENT_ENCODING
            || name == header::CONTENT_LENGTH
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

fn content_type(headers: &HeaderMap) -> &str {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

pub struct UpstreamProxy {
    client: reqwest::Client,
    config: UpstreamConfig,
    next_anthropic_key: AtomicUsize,
}

impl UpstreamProxy {
    pub fn new(config: &UpstreamConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config: config.clone(),
            next_anthropic_key: AtomicUsize::new(0),
        })
    }

    fn base_url(&self, provider: Provider) -> &str {
        match provider {
            Provider::OpenAi => &self.config.openai_base_url,
            Provider::Anthropic => &self.config.anthropic_base_url,
        }
    }

    /// Credential replacing the caller's, when one is configured.
    fn credential(&self, provider: Provider) -> Option<(HeaderName, String)> {
        match provider {
            Provider::OpenAi => self
                .config
                .openai_api_key
                .as_ref()
                .map(|key| (header::AUTHORIZATION, format!("Bearer {key}"))),
            Provider::Anthropic => {
                let keys = &self.config.anthropic_api_keys;
                if keys.is_empty() {
                    return None;
                }
                let index = self.next_anthropic_key.fetch_add(1, Ordering::Relaxed) % keys.len();
                Some((HeaderName::from_static("x-api-key"), keys[index].clone()))
            }
        }
    }

    /// Forward `body` to `provider` at `path` and relay the reply.
    ///
    /// The slot is held until the relayed body has been fully sent.
    pub async fn forward(
        &self,
        provider: Provider,
        path: &str,
        headers: &HeaderMap,
        body: Bytes,
        slot: RequestSlot,
        metrics: &Metrics,
    ) -> Result<Response, EndpointError> {
        let url = format!("{}{}", self.base_url(provider).trim_end_matches('/'), path);
        let mut out_headers = outgoing_headers(headers);
        if let Some((name, value)) = self.credential(provider) {
            let value = HeaderValue::from_str(&value).map_err(|e| {
                EndpointError::UpstreamUnavailable(format!("invalid upstream credential: {e}"))
            })?;
            out_headers.insert(name, value);
        }

        info!(provider = provider.as_str(), url, bytes = body.len(), "Forwarding request upstream");

        let resp = self
            .client
            .post(&url)
            .headers(out_headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                warn!(provider = provider.as_str(), error = %e, "Upstream request failed");
                EndpointError::UpstreamUnavailable(e.to_string())
            })?;

        let status = resp.status();
        metrics
            .upstream_requests
            .with_label_values(&[provider.as_str(), status.as_str()])
            .inc();

        let response_headers = relayed_headers(resp.headers());
        let is_event_stream = content_type(resp.headers()).contains("text/event-stream");
        let is_json = content_type(resp.headers()).contains("json");

        if !status.is_success() {
            // Provider errors are already structured; relay them untouched.
            if is_json {
                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|e| EndpointError::UpstreamUnavailable(e.to_string()))?;
                return Ok(build_response(status, response_headers, Body::from(bytes)));
            }
            debug!(provider = provider.as_str(), %status, "Upstream returned a non-JSON error");
            return Err(EndpointError::Upstream { status });
        }

        let body = if is_event_stream {
            let stream = resp.bytes_stream().map(move |chunk| {
                // Released when the stream is dropped.
                let _slot = &slot;
                chunk
            });
            Body::from_stream(stream)
        } else {
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| EndpointError::UpstreamUnavailable(e.to_string()))?;
            Body::from(bytes)
        };

        Ok(build_response(status, response_headers, body))
    }
}

fn build_response(status: axum::http::StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_headers_strip_connection_headers() {
        let mut incoming = HeaderMap::new();
        incoming.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer sk-test"));
        incoming.insert(header::HOST, HeaderValue::from_static("localhost:3000"));
        incoming.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        incoming.insert(header::CONTENT_LENGTH, HeaderValue::from_static("42"));
        incoming.insert("x-maxim-api-key", HeaderValue::from_static("mx"));

        let out = outgoing_headers(&incoming);
        assert_eq!(out.get(header::AUTHORIZATION).unwrap(), "Bearer sk-test");
        assert_eq!(out.get("x-maxim-api-key").unwrap(), "mx");
        assert!(out.get(header::HOST).is_none());
        assert!(out.get(header::CONNECTION).is_none());
        assert!(out.get(header::CONTENT_LENGTH).is_none());
    }

    #[test]
    fn test_relayed_headers_drop_encoding() {
        let mut upstream = HeaderMap::new();
        upstream.insert(header::CONTENT_ENCODING, HeaderValue::from_static("br"));
        upstream.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        upstream.insert("x-request-id", HeaderValue::from_static("req_1"));

        let out = relayed_headers(&upstream);
        assert!(out.get(header::CONTENT_ENCODING).is_none());
        assert_eq!(out.get("x-request-id").unwrap(), "req_1");
    }

    #[test]
    fn test_anthropic_keys_rotate() {
        let config = UpstreamConfig {
            anthropic_api_keys: vec!["k1".into(), "k2".into()],
            ..Default::default()
        };
        let proxy = UpstreamProxy::new(&config).unwrap();
        let picks: Vec<String> = (0..3)
            .map(|_| proxy.credential(Provider::Anthropic).unwrap().1)
            .collect();
        assert_eq!(picks, ["k1", "k2", "k1"]);
        assert!(proxy.credential(Provider::OpenAi).is_none());
    }
}

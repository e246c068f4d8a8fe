//! Prometheus metrics exposed on `GET /metrics`.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::EndpointError;

pub struct Metrics {
    registry: Registry,
    /// Accepted completion requests by dialect and delivery mode.
    pub requests: IntCounterVec,
    /// Failed requests by error kind.
    pub errors: IntCounterVec,
    /// Streamed content deltas by dialect.
    pub chunks: IntCounterVec,
    /// Completions answered from the response cache.
    pub cache_hits: IntCounter,
    /// Requests forwarded upstream by provider and status class.
    pub upstream_requests: IntCounterVec,
    /// Requests currently holding a concurrency slot.
    pub in_flight: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("bifrost".to_string()), None)?;

        let requests = IntCounterVec::new(
            Opts::new("requests_total", "Accepted completion requests"),
            &["dialect", "mode"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("errors_total", "Requests that ended in an error response"),
            &["kind"],
        )?;
        let chunks = IntCounterVec::new(
            Opts::new("stream_chunks_total", "Content deltas sent on streaming responses"),
            &["dialect"],
        )?;
        let cache_hits = IntCounter::new("cache_hits_total", "Completions served from the cache")?;
        let upstream_requests = IntCounterVec::new(
            Opts::new("upstream_requests_total", "Requests forwarded to upstream providers"),
            &["provider", "status"],
        )?;
        let in_flight = IntGauge::new("in_flight_requests", "Requests holding a concurrency slot")?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(chunks.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(upstream_requests.clone()))?;
        registry.register(Box::new(in_flight.clone()))?;

        Ok(Self {
            registry,
            requests,
            errors,
            chunks,
            cache_hits,
            upstream_requests,
            in_flight,
        })
    }

    pub fn record_error(&self, err: &EndpointError) {
        self.errors.with_label_values(&[err.label()]).inc();
    }

    /// Render all metrics in the text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

//! Generation orchestrator.
//!
//! Each request gets its own task which:
//! 1. Asks the [`Generator`] for the reply text
//! 2. Splits it into tokens and truncates to the request's budget
//! 3. Sends the tokens one at a time over a bounded channel
//! 4. Stops as soon as the receiver is dropped or the deadline passes

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{cache_key, new_response_cache, ResponseCache};
use crate::config::Config;
use crate::generation::{
    estimate_prompt_tokens, split_pieces, Completion, GenerationError, GenerationRequest,
    Generator,
};
use crate::protocol::FinishReason;

/// How long a terminal error event may wait for channel space once the
/// deadline has passed.
const TIMEOUT_REPORT_GRACE: Duration = Duration::from_millis(250);

/// A generated token event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    /// A new token was generated.
    Token { text: String },
    /// Generation is complete.
    Done {
        prompt_tokens: usize,
        completion_tokens: usize,
        finish_reason: FinishReason,
    },
    /// An error occurred during generation.
    Error(GenerationError),
}

/// Handle to a running generation.
pub struct Generation {
    /// Events in generation order; dropping it cancels the generation.
    pub events: mpsc::Receiver<GenerationEvent>,
    /// Resolves to the number of tokens actually delivered.
    pub task: JoinHandle<usize>,
}

/// The generation engine.
pub struct Engine {
    generator: Arc<dyn Generator>,
    token_delay: Duration,
    timeout: Duration,
    cache: Option<Mutex<Box<dyn ResponseCache<Completion>>>>,
}

impl Engine {
    /// Create an engine using the timing and cache settings from `config`.
    pub fn new(generator: Arc<dyn Generator>, config: &Config) -> Self {
        Self {
            generator,
            token_delay: config.generation.token_delay(),
            timeout: config.server.request_timeout(),
            cache: new_response_cache(&config.cache).map(Mutex::new),
        }
    }

    /// Start a generation, streaming tokens to the returned receiver.
    pub fn generate(&self, request: GenerationRequest) -> Generation {
        let (tx, rx) = mpsc::channel(32);

        let generator = self.generator.clone();
        let token_delay = self.token_delay;
        let timeout = self.timeout;

        let task = tokio::spawn(async move {
            info!(
                request_id = request.request_id,
                dialect = %request.dialect,
                model = request.model,
                max_tokens = request.max_tokens,
                "Starting generation"
            );
            let deadline = Instant::now() + timeout;
            let delivered = run_generation(generator, &request, &tx, token_delay, deadline, timeout).await;
            info!(
                request_id = request.request_id,
                delivered,
                "Generation finished"
            );
            delivered
        });

        Generation { events: rx, task }
    }

    /// Run a generation to completion and collect the full reply.
    ///
    /// Consults the response cache first when one is configured, and stores
    /// successful results in it.
    pub async fn complete(&self, request: GenerationRequest) -> Result<Completion, GenerationError> {
        let key = self.cache.as_ref().map(|_| {
            cache_key(
                request.dialect.as_str(),
                &request.model,
                &request.messages,
                request.max_tokens,
            )
        });

        if let (Some(cache), Some(key)) = (&self.cache, key) {
            if let Some(mut hit) = cache.lock().await.get_response(key) {
                debug!(request_id = request.request_id, key, "Response cache hit");
                hit.cached = true;
                return Ok(hit);
            }
        }

        let mut generation = self.generate(request);
        let mut text = String::new();

        while let Some(event) = generation.events.recv().await {
            match event {
                GenerationEvent::Token { text: t } => text.push_str(&t),
                GenerationEvent::Done {
                    prompt_tokens,
                    completion_tokens,
                    finish_reason,
                } => {
                    let completion = Completion {
                        text,
                        finish_reason,
                        prompt_tokens,
                        completion_tokens,
                        cached: false,
                    };
                    if let (Some(cache), Some(key)) = (&self.cache, key) {
                        cache.lock().await.set_response(key, completion.clone());
                    }
                    return Ok(completion);
                }
                GenerationEvent::Error(e) => return Err(e),
            }
        }

        Err(GenerationError::Failed(
            "generation ended without a result".to_string(),
        ))
    }
}

async fn run_generation(
    generator: Arc<dyn Generator>,
    request: &GenerationRequest,
    tx: &mpsc::Sender<GenerationEvent>,
    token_delay: Duration,
    deadline: Instant,
    timeout: Duration,
) -> usize {
    let prompt_tokens = estimate_prompt_tokens(&request.messages);

    let composed = tokio::select! {
        biased;
        _ = tx.closed() => {
            debug!(request_id = request.request_id, "Receiver dropped before reply was composed");
            return 0;
        }
        result = tokio::time::timeout_at(deadline, generator.compose(request)) => result,
    };

    let text = match composed {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!(request_id = request.request_id, error = %e, "Generator failed");
            let _ = tx.send(GenerationEvent::Error(e)).await;
            return 0;
        }
        Err(_) => {
            warn!(request_id = request.request_id, "Generator timed out");
            report_timeout(tx, timeout).await;
            return 0;
        }
    };

    let pieces = split_pieces(&text);
    let finish_reason = if pieces.len() > request.max_tokens {
        FinishReason::Length
    } else {
        FinishReason::Stop
    };

    let mut delivered = 0;
    for piece in pieces.into_iter().take(request.max_tokens) {
        if !token_delay.is_zero() {
            tokio::select! {
                _ = tx.closed() => {
                    debug!(request_id = request.request_id, delivered, "Receiver dropped, stopping");
                    return delivered;
                }
                _ = tokio::time::sleep(token_delay) => {}
            }
        }

        if Instant::now() >= deadline {
            warn!(request_id = request.request_id, delivered, "Generation deadline passed");
            report_timeout(tx, timeout).await;
            return delivered;
        }

        let token = GenerationEvent::Token {
            text: piece.to_string(),
        };
        match tokio::time::timeout_at(deadline, tx.send(token)).await {
            Ok(Ok(())) => delivered += 1,
            Ok(Err(_)) => {
                debug!(request_id = request.request_id, delivered, "Receiver dropped, stopping");
                return delivered;
            }
            Err(_) => {
                // The receiver is alive but not reading.
                warn!(
                    request_id = request.request_id,
                    delivered,
                    "Generation deadline passed while blocked on a slow reader"
                );
                report_timeout(tx, timeout).await;
                return delivered;
            }
        }
    }

    let done = GenerationEvent::Done {
        prompt_tokens,
        completion_tokens: delivered,
        finish_reason,
    };
    if tokio::time::timeout_at(deadline, tx.send(done)).await.is_err() {
        warn!(
            request_id = request.request_id,
            delivered,
            "Generation deadline passed before completion was delivered"
        );
        report_timeout(tx, timeout).await;
    }

    delivered
}

/// Best-effort delivery of a timeout error; gives up after a short grace so a
/// stalled reader cannot keep the task alive.
async fn report_timeout(tx: &mpsc::Sender<GenerationEvent>, timeout: Duration) {
    let event = GenerationEvent::Error(GenerationError::TimedOut(timeout));
    let _ = tokio::time::timeout(TIMEOUT_REPORT_GRACE, tx.send(event)).await;
}

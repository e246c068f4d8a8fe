//! bifrost: OpenAI/Anthropic-compatible chat completion endpoint.
//!
//! Serves the chat completion, legacy text completion and Messages APIs on
//! one port so third-party SDK clients can be pointed at it unchanged.
//! Replies come from a local [`generation::Generator`] or, in proxy mode,
//! from the real upstream providers.
//!
//! A small reqwest-based [`client`] speaks both dialects and backs the
//! `smoke` binary.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod generation;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod upstream;

pub use config::Config;
pub use error::EndpointError;
pub use server::{build_router, AppState};

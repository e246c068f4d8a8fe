//! Runtime configuration for bifrost.
//!
//! Configuration is loaded from a JSON file or constructed programmatically.
//! Every section falls back to its defaults, so a config file only needs the
//! keys it wants to change.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "bifrost", about = "OpenAI/Anthropic-compatible completion endpoint")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "bifrost.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides `server.listen`).
    #[arg(long)]
    pub listen: Option<String>,

    /// Serve from an upstream provider instead of the local generator.
    #[arg(long)]
    pub proxy: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Client credential checks.
    pub auth: AuthConfig,

    /// Which model identifiers the endpoint answers for.
    pub models: ModelsConfig,

    /// Local generation settings.
    pub generation: GenerationConfig,

    /// Upstream providers used in proxy mode.
    pub upstream: UpstreamConfig,

    /// Response cache settings.
    pub cache: CacheConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:3000").
    pub listen: String,

    /// Maximum concurrent in-flight requests; excess requests get 503.
    pub max_concurrent_requests: usize,

    /// Upper bound on generation time per request, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".to_string(),
            max_concurrent_requests: 64,
            request_timeout_secs: 120,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// API key policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Reject requests that carry no API key.
    pub required: bool,

    /// Accepted keys. Empty means any non-empty key is accepted.
    pub api_keys: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            required: true,
            api_keys: Vec::new(),
        }
    }
}

/// Served model identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Model ids reported by `/v1/models` and accepted by the completion routes.
    pub served: Vec<String>,

    /// Accept any model id, not only the served list.
    pub allow_any: bool,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            served: [
                "gpt-4",
                "gpt-4o",
                "gpt-4o-mini",
                "gpt-3.5-turbo",
                "gpt-3.5-turbo-instruct",
                "claude-3-5-sonnet-20240620",
                "claude-3-haiku-20240307",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            allow_any: false,
        }
    }
}

impl ModelsConfig {
    pub fn is_known(&self, model: &str) -> bool {
        self.allow_any || self.served.iter().any(|m| m == model)
    }
}

/// Where completions come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Built-in echo generator.
    #[default]
    Local,
    /// Forward to the configured upstream providers.
    Proxy,
}

/// Local generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub backend: Backend,

    /// Token budget used when a request carries no `max_tokens`.
    pub default_max_tokens: usize,

    /// Pause between streamed tokens, in milliseconds.
    pub token_delay_ms: u64,

    /// Text the echo generator puts in front of the last user message.
    pub reply_prefix: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Local,
            default_max_tokens: 256,
            token_delay_ms: 0,
            reply_prefix: "Echo: ".to_string(),
        }
    }
}

impl GenerationConfig {
    pub fn token_delay(&self) -> Duration {
        Duration::from_millis(self.token_delay_ms)
    }
}

/// Upstream provider settings for proxy mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub openai_base_url: String,

    pub anthropic_base_url: String,

    /// HTTP client timeout in seconds.
    pub timeout_secs: u64,

    /// Replaces the caller's bearer token on OpenAI requests when set.
    pub openai_api_key: Option<String>,

    /// Pool of Anthropic keys, used round-robin in place of the caller's key.
    pub anthropic_api_keys: Vec<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            openai_base_url: "https://api.openai.com".to_string(),
            anthropic_base_url: "https://api.anthropic.com".to_string(),
            timeout_secs: 120,
            openai_api_key: None,
            anthropic_api_keys: Vec::new(),
        }
    }
}

/// Eviction policy of the response cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    #[default]
    Lru,
    Lfu,
}

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub policy: CachePolicy,
    /// Maximum number of cached completions.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            policy: CachePolicy::Lru,
            capacity: 1024,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults when the
    /// file is absent or omits fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            let config: Config = serde_json::from_str(&data)
                .with_context(|| format!("parsing config file {}", path.display()))?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Apply command-line overrides on top of the file configuration.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(listen) = &cli.listen {
            self.server.listen = listen.clone();
        }
        if cli.proxy {
            self.generation.backend = Backend::Proxy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.server.listen, "0.0.0.0:3000");
        assert_eq!(cfg.generation.backend, Backend::Local);
        assert!(cfg.auth.required);
        assert!(!cfg.cache.enabled);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let cfg: Config = serde_json::from_str(
            r#"{"cache": {"enabled": true, "policy": "lfu"}, "generation": {"backend": "proxy"}}"#,
        )
        .unwrap();
        assert!(cfg.cache.enabled);
        assert_eq!(cfg.cache.policy, CachePolicy::Lfu);
        assert_eq!(cfg.cache.capacity, 1024);
        assert_eq!(cfg.generation.backend, Backend::Proxy);
        assert_eq!(cfg.generation.default_max_tokens, 256);
        assert_eq!(cfg.server.max_concurrent_requests, 64);
    }

    #[test]
    fn test_known_models() {
        let mut models = ModelsConfig::default();
        assert!(models.is_known("gpt-4"));
        assert!(models.is_known("claude-3-5-sonnet-20240620"));
        assert!(!models.is_known("llama-9000"));
        models.allow_any = true;
        assert!(models.is_known("llama-9000"));
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from(["bifrost", "--listen", "127.0.0.1:9999", "--proxy"]);
        let mut cfg = Config::default();
        cfg.apply_cli(&cli);
        assert_eq!(cfg.server.listen, "127.0.0.1:9999");
        assert_eq!(cfg.generation.backend, Backend::Proxy);
    }
}

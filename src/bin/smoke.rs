//! smoke: send the fixed translation prompt to a compatible endpoint and
//! print the reply.
//!
//! Mirrors the calls third-party SDK clients make against
//! `http://localhost:3000`: OpenAI chat, Anthropic Messages and OpenAI
//! legacy completions, each streaming or not. Any failure exits non-zero.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use bifrost::client::{ClientConfig, CompletionClient};
use bifrost::protocol::{ChatMessage, Dialect};

#[derive(Parser, Debug)]
#[command(name = "smoke", about = "Smoke-test an OpenAI/Anthropic-compatible endpoint")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    options: Options,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// OpenAI chat completion.
    Openai,
    /// Anthropic Messages.
    Anthropic,
    /// OpenAI legacy text completion.
    Completions,
    /// Every call above, streamed and not.
    All,
}

#[derive(Args, Debug, Clone)]
struct Options {
    /// Endpoint root.
    #[arg(long, global = true, env = "BIFROST_BASE_URL", default_value = "http://localhost:3000")]
    base_url: String,

    /// API key; falls back to OPENAI_API_KEY / ANTHROPIC_API_KEY.
    #[arg(long, global = true, env = "BIFROST_API_KEY")]
    api_key: Option<String>,

    /// Model identifier; defaults per dialect.
    #[arg(long, global = true)]
    model: Option<String>,

    #[arg(long, global = true, default_value_t = 256)]
    max_tokens: usize,

    /// Request a streamed reply.
    #[arg(long, global = true)]
    stream: bool,

    /// Request timeout in seconds.
    #[arg(long, global = true, default_value_t = 120)]
    timeout_secs: u64,
}

fn default_model(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::OpenAiChat => "gpt-4",
        Dialect::OpenAiText => "gpt-3.5-turbo-instruct",
        Dialect::Anthropic => "claude-3-5-sonnet-20240620",
    }
}

fn api_key(options: &Options, dialect: Dialect) -> String {
    let env_key = match dialect {
        Dialect::Anthropic => "ANTHROPIC_API_KEY",
        Dialect::OpenAiChat | Dialect::OpenAiText => "OPENAI_API_KEY",
    };
    options
        .api_key
        .clone()
        .or_else(|| std::env::var(env_key).ok())
        .unwrap_or_else(|| "sk-local".to_string())
}

fn prompt() -> Vec<ChatMessage> {
    vec![
        ChatMessage::system("Translate to French"),
        ChatMessage::user("I love programming."),
    ]
}

async fn run_one(options: &Options, dialect: Dialect, stream: bool) -> anyhow::Result<()> {
    let config = ClientConfig {
        base_url: options.base_url.clone(),
        api_key: Some(api_key(options, dialect)),
        model: options
            .model
            .clone()
            .unwrap_or_else(|| default_model(dialect).to_string()),
        max_tokens: options.max_tokens,
        stream,
        timeout: std::time::Duration::from_secs(options.timeout_secs),
    };
    info!(%dialect, model = config.model, stream, base_url = config.base_url, "Sending request");

    let client = CompletionClient::new(config)?;
    let reply = client
        .run(dialect, &prompt())
        .await
        .with_context(|| format!("{dialect} request failed (stream={stream})"))?;

    if reply.text.trim().is_empty() {
        anyhow::bail!("{dialect} returned an empty reply (stream={stream})");
    }
    println!("[{dialect}{}] {}", if stream { ", stream" } else { "" }, reply.text);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smoke=info,bifrost=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let runs: Vec<(Dialect, bool)> = match cli.command {
        Command::Openai => vec![(Dialect::OpenAiChat, cli.options.stream)],
        Command::Anthropic => vec![(Dialect::Anthropic, cli.options.stream)],
        Command::Completions => vec![(Dialect::OpenAiText, cli.options.stream)],
        Command::All => [Dialect::OpenAiChat, Dialect::Anthropic, Dialect::OpenAiText]
            .into_iter()
            .flat_map(|d| [(d, false), (d, true)])
            .collect(),
    };

    let mut failures = 0;
    for (dialect, stream) in runs {
        if let Err(e) = run_one(&cli.options, dialect, stream).await {
            error!("{e:#}");
            failures += 1;
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} smoke call(s) failed");
    }
    Ok(())
}

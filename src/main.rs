//! bifrost: OpenAI/Anthropic-compatible completion endpoint.
//!
//! Binds `server.listen` (default `0.0.0.0:3000`) and answers
//! `/v1/chat/completions`, `/v1/completions` and `/v1/messages`.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use bifrost::config::{Backend, Cli, Config};
use bifrost::generation::echo::EchoGenerator;
use bifrost::server::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "bifrost=debug,tower_http=debug"
    } else {
        "bifrost=info,tower_http=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());

    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    info!("bifrost v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    config.apply_cli(&cli);
    let config = Arc::new(config);

    info!(
        backend = ?config.generation.backend,
        served_models = config.models.served.len(),
        max_concurrent_requests = config.server.max_concurrent_requests,
        request_timeout_secs = config.server.request_timeout_secs,
        auth_required = config.auth.required,
        cache = config.cache.enabled,
        "Configuration loaded"
    );
    if config.generation.backend == Backend::Proxy {
        info!(
            openai = config.upstream.openai_base_url,
            anthropic = config.upstream.anthropic_base_url,
            "Proxying to upstream providers"
        );
    }

    // Build application state.
    let generator = Arc::new(EchoGenerator::new(config.generation.reply_prefix.clone()));
    let state = Arc::new(AppState::new(config.clone(), generator)?);

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = config.server.listen.clone();
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

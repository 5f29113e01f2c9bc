//! ClearCut web service
//!
//! Loads configuration, installs tracing, loads the segmentation model and
//! serves the HTTP API until SIGINT or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use clearcut::{
    router, AppConfig, AppState, BackgroundRemover, HttpImageFetcher, TempCleaner, TracingConfig,
    TracingFormat,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Privacy-first background removal service
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "clearcut")]
struct Cli {
    /// Interface to bind (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Increase logging verbosity (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log output format: console, compact or json
    #[arg(long, default_value = "console")]
    log_format: TracingFormat,

    /// Filter directive overriding verbosity, e.g. `clearcut=debug,tower_http=info`
    #[arg(long, env = "RUST_LOG")]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut tracing_config = TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(cli.log_format);
    if let Some(filter) = cli.log_filter {
        tracing_config = tracing_config.with_env_filter(filter);
    }
    tracing_config.init().context("Failed to initialize tracing")?;

    let mut config = AppConfig::from_env().context("Invalid configuration")?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    tokio::fs::create_dir_all(&config.temp_dir)
        .await
        .with_context(|| format!("Failed to create temp dir {}", config.temp_dir.display()))?;

    let engine = Arc::new(
        BackgroundRemover::initialize(config.engine.clone())
            .await
            .context("Failed to load segmentation model")?,
    );
    tracing::info!(model = %engine.config().model_spec.name, "Model loaded");

    let fetcher = Arc::new(
        HttpImageFetcher::new(config.max_file_size).context("Failed to build HTTP client")?,
    );
    let cancel_token = CancellationToken::new();
    let cleaner = TempCleaner::new(
        config.temp_dir.clone(),
        config.temp_max_age,
        config.cleanup_interval,
    )
    .spawn(cancel_token.clone());

    let addr = config.bind_address();
    let state = Arc::new(AppState::new(config, Arc::clone(&engine), fetcher));
    let max_file_mb = state.config.max_file_size / 1024 / 1024;
    let extensions = state.config.allowed_extensions.join(",");
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(
        addr = %addr,
        max_file_mb,
        extensions = %extensions,
        "Server ready and accepting connections"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    cancel_token.cancel();
    if let Err(e) = cleaner.await {
        tracing::warn!(error = %e, "Temp cleaner task ended abnormally");
    }
    engine.shutdown();
    tracing::info!("Shutdown complete");

    served.context("Server error")
}

/// Resolves on Ctrl+C (SIGINT) or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received terminate signal"),
    }

    tracing::info!("Shutting down gracefully...");
}

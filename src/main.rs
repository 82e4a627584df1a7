use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipeline_bridge::{AppState, Config, rate_limit, routes, runner::launcher};

#[derive(Parser, Debug)]
#[command(name = "pipeline-bridge")]
#[command(about = "Local filesystem and agent bridge for the prompt pipeline editor")]
#[command(version)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "PIPELINE_BRIDGE_PORT", default_value = "41822")]
    port: u16,

    /// Address to bind to
    #[arg(short, long, env = "PIPELINE_BRIDGE_BIND", default_value = "127.0.0.1")]
    bind: String,

    /// Project root; sandboxed paths must stay inside it
    #[arg(short, long, env = "PIPELINE_BRIDGE_ROOT", default_value = ".")]
    root: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, env = "PIPELINE_BRIDGE_VERBOSE")]
    verbose: bool,

    /// Config file path (optional)
    #[arg(short, long, env = "PIPELINE_BRIDGE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "pipeline_bridge=debug,tower_http=debug"
    } else {
        "pipeline_bridge=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let root_dir = cli
        .root
        .canonicalize()
        .with_context(|| format!("Root directory does not exist: {}", cli.root.display()))?;
    if !root_dir.is_dir() {
        bail!("Root path is not a directory: {}", root_dir.display());
    }

    info!("Project root: {}", root_dir.display());

    let launcher = launcher::detect(&config.agent).await;
    let cleanup_interval = config.rate_limit.cleanup_interval();
    let state = AppState::new(root_dir, config, launcher);

    let sweeper = rate_limit::spawn_cleanup(state.rate_limiter.clone(), cleanup_interval);
    let app = routes::app(state.clone());

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port)
        .parse()
        .context("parsing bind address")?;
    info!("Starting pipeline bridge on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("running server")?;

    sweeper.abort();
    state.shutdown().await;
    info!("Pipeline bridge stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to install SIGTERM handler: {}", err);
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

    info!("Shutdown signal received, closing watchers");
}

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use editor_companion::{AppState, Config, host, routes};

#[derive(Parser, Debug)]
#[command(name = "editor-companion")]
#[command(about = "Local companion server for the browser editor")]
#[command(version)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "COMPANION_PORT", default_value = "3000")]
    port: u16,

    /// Address to bind to
    #[arg(short, long, env = "COMPANION_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Root directory for static files, uploads and session file operations
    #[arg(short, long, env = "COMPANION_ROOT", default_value = ".")]
    root: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, env = "COMPANION_VERBOSE")]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "COMPANION_JSON_LOGS")]
    json_logs: bool,

    /// Config file path (optional)
    #[arg(short, long, env = "COMPANION_CONFIG")]
    config: Option<PathBuf>,
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("editor_companion={level},tower_http={level}")));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .ok();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    // Load config from file if provided, otherwise use defaults
    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    let local_ip = host::advertised_address().await;

    let state = AppState::new(&cli.root, config, local_ip.clone())
        .with_context(|| format!("opening root directory {}", cli.root.display()))?;
    state
        .ensure_directories()
        .await
        .context("creating temp and home directories")?;

    info!("Serving files from: {}", state.root_dir().display());
    info!(
        "Language model: {} at {}",
        state.config.ai.model, state.config.ai.base_url
    );

    let app = routes::app(state);

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port)
        .parse()
        .context("parsing bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!("Server running with Address : {}:{}", local_ip, cli.port);
    axum::serve(listener, app).await?;

    Ok(())
}

use clap::Parser;
use hobbits_relay_core::config::{AppConfig, RelayerConfig};
use hobbits_relay_core::{Error, Relayer, Result, TracingSink};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "hobbits-relayer",
    version,
    about = "Relays hobbits traffic between two endpoints"
)]
struct Cli {
    /// Optional toml file with a [relayer] section; flags take precedence.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Endpoint to bind to, e.g. tcp://0.0.0.0:10000
    #[arg(short, long)]
    bind: Option<String>,

    /// Endpoint to relay to, e.g. tcp://127.0.0.1:21000
    #[arg(short = 't', long = "to")]
    to: Option<String>,

    #[arg(long)]
    max_frame: Option<usize>,

    #[arg(long)]
    connect_timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = resolve_config(cli)?;
    let relayer = Relayer::new(cfg, Arc::new(TracingSink))?;
    relayer.start().await?;

    shutdown_signal().await;
    info!("shutdown signal received");
    relayer.stop().await;
    Ok(())
}

fn resolve_config(cli: Cli) -> Result<RelayerConfig> {
    let file = match &cli.config {
        Some(path) => AppConfig::from_file(path)?.relayer,
        None => None,
    };

    let bind = cli
        .bind
        .or_else(|| file.as_ref().map(|c| c.bind.clone()))
        .ok_or_else(|| Error::Config("missing --bind".into()))?;
    let to = cli
        .to
        .or_else(|| file.as_ref().map(|c| c.target.clone()))
        .ok_or_else(|| Error::Config("missing --to".into()))?;

    let mut cfg = match file {
        Some(mut file) => {
            file.bind = bind;
            file.target = to;
            file
        }
        None => RelayerConfig::new(bind, to),
    };
    if let Some(max_frame) = cli.max_frame {
        cfg.max_frame = max_frame;
    }
    if let Some(ms) = cli.connect_timeout_ms {
        cfg.connect_timeout_ms = ms;
    }
    cfg.validate()?;
    Ok(cfg)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
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
                warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

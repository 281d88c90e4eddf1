use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::{error, info};

use sweep::config::{self, Config, Settings};
use sweep::core::{ConcurrencyPolicy, Watcher};
use sweep::infrastructure::create_client;

#[derive(Debug, Parser)]
#[command(
    name = "sweep",
    version,
    about = "Sweep: forward confirmed deposits to a vault address"
)]
struct Args {
    /// WebSocket endpoint (e.g. ws://localhost:8546)
    #[arg(long)]
    ws: Option<String>,

    /// IPC path (e.g. ~/.ethereum/geth.ipc). Unix only.
    #[arg(long)]
    ipc: Option<PathBuf>,

    /// Confirmations to wait before withdrawing
    #[arg(long)]
    confirmations: Option<u64>,

    /// Whether withdrawals for separate deposits may overlap (concurrent, serialized)
    #[arg(long)]
    policy: Option<ConcurrencyPolicy>,

    /// Config file (default: $SWEEP_CONFIG, ./sweep.toml, then the user config dir)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();

    let args = Args::parse();
    let settings = settings_from_args(&args)?;

    let client = create_client(settings.endpoint.clone(), settings.signer.clone())
        .await
        .with_context(|| format!("Connection failed ({})", settings.endpoint.display()))?;
    info!(endpoint = %client.endpoint_name(), "connected");

    let ctx = Arc::new(settings.context(Arc::from(client)));
    info!("Watching for incoming tx to {}…", ctx.deposit_address);

    let watcher = Watcher::new(ctx);
    tokio::select! {
        res = watcher.run() => {
            if let Err(err) = &res {
                let err = format!("{:#}", err);
                error!(error = %err, "watcher stopped");
            }
            res
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            Ok(())
        }
    }
}

/// File, then environment, then CLI flags
fn settings_from_args(args: &Args) -> Result<Settings> {
    let mut config: Config = config::load(args.config.as_deref())?
        .merge_env(|key| std::env::var(key).ok())?;

    // CLI arguments take precedence
    if let Some(ipc) = &args.ipc {
        config.ipc_path = Some(ipc.to_string_lossy().to_string());
        config.ws_url = None;
    } else if let Some(ws) = &args.ws {
        config.ws_url = Some(ws.clone());
        config.ipc_path = None;
    }
    if let Some(confirmations) = args.confirmations {
        config.confirmations_before_withdrawal = Some(confirmations);
    }
    if let Some(policy) = args.policy {
        config.withdrawal_policy = Some(policy);
    }

    let settings = Settings::try_from(config)?;
    info!(?settings, "configuration loaded");
    Ok(settings)
}

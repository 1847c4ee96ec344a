//! Generic LSM Agent
//!
//! Main entry point for the agent that loads the generic LSM pipeline,
//! attaches it to the configured hook and collects the records it emits.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lsmgate_agent::Config;

#[derive(Parser, Debug)]
#[command(name = "lsmgate-agent")]
#[command(about = "Generic eBPF LSM pipeline agent", long_about = None)]
#[command(version)]
struct Args {
    /// Policy file (TOML)
    #[arg(short, long, env = "LSMGATE_CONFIG")]
    config: PathBuf,

    /// Override the hook named in the policy
    #[arg(long)]
    hook: Option<String>,

    /// Duration to stay attached (e.g., "30s", "5m", "1h")
    #[arg(short, long)]
    duration: Option<String>,

    /// Write collected events in JSON format
    #[arg(long)]
    json: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install().map_err(|e| anyhow::anyhow!("{}", e))?;

    let args = Args::parse();

    // Initialize tracing
    init_tracing(args.verbose);

    info!("Starting generic LSM agent");
    info!("Configuration: {:?}", args);

    let mut config = Config::load(&args.config).context("Failed to load policy")?;
    if let Some(hook) = args.hook {
        config.hook = hook;
    }
    if let Some(duration) = args.duration {
        config.duration = duration;
    }
    if args.json.is_some() {
        config.json_output = args.json;
    }

    // Check if running as root (required for eBPF)
    if !nix::unistd::Uid::effective().is_root() {
        warn!("Warning: Not running as root. eBPF programs require root privileges.");
        warn!("Try: sudo {}", std::env::current_exe()?.display());
    }

    let summary = lsmgate_agent::run_pipeline(config).await?;
    info!(
        "Done: {} events, {} overrides",
        summary.total_events, summary.overrides
    );

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

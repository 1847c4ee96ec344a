//! Run command implementation

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use crate::output;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Policy file (TOML)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override the hook named in the policy
    #[arg(long)]
    pub hook: Option<String>,

    /// Duration to stay attached (e.g., "30s", "5m")
    #[arg(short, long)]
    pub duration: Option<String>,

    /// Write collected events in JSON format
    #[arg(long)]
    pub json: Option<String>,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let mut config = lsmgate_agent::Config::load(&args.config).context("Failed to load policy")?;
    if let Some(hook) = args.hook {
        config.hook = hook;
    }
    if let Some(duration) = args.duration {
        config.duration = duration;
    }
    if args.json.is_some() {
        config.json_output = args.json;
    }

    output::info(&format!("Attaching to bpf_lsm_{} for {}", config.hook, config.duration));
    let json_output = config.json_output.clone();

    let summary = lsmgate_agent::run_pipeline(config).await?;
    output::print_summary(&summary);
    if let Some(path) = json_output {
        output::success(&format!("Events written to {}", path));
    }

    Ok(())
}

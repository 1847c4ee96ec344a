//! Replay command implementation

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use lsmgate_agent::output::json;
use lsmgate_agent::replay;
use lsmgate_shared::types::summary::LsmSummary;

use crate::output;

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Policy file (TOML)
    #[arg(short, long)]
    pub config: PathBuf,

    /// JSON list of recorded calls: [{"pid_tgid": .., "cpu": .., "args": [..]}]
    pub calls: PathBuf,

    /// Write emitted records in JSON format
    #[arg(long)]
    pub json: Option<String>,
}

pub fn run(args: ReplayArgs) -> Result<()> {
    let config = lsmgate_agent::Config::load(&args.config).context("Failed to load policy")?;
    let calls = replay::load_calls(&args.calls)?;
    if calls.is_empty() {
        output::warning("No calls to replay");
        return Ok(());
    }

    let report = replay::replay(&config, &calls)?;
    output::print_replay(&report);

    if let Some(path) = args.json {
        let now = lsmgate_shared::utils::time::system_time_nanos();
        let mut summary = LsmSummary::new(now);
        for event in &report.events {
            summary.add_event(event);
        }
        json::generate_json(&summary, &report.events, &path)?;
        output::success(&format!("Records written to {}", path));
    }

    Ok(())
}

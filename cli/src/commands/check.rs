//! Check command implementation
//!
//! Validates a policy without touching the kernel: schema, selectors and
//! the stage-table layout the loader will bind.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use lsmgate_shared::stage::{generic_lsm_bindings, layout_from_bindings, max_hops};
use lsmgate_shared::{ArgType, MAX_ARGS};

use crate::output;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Policy file (TOML)
    #[arg(short, long)]
    pub config: PathBuf,
}

pub fn run(args: CheckArgs) -> Result<()> {
    let config = lsmgate_agent::Config::load(&args.config).context("Failed to load policy")?;
    config.validate().context("Invalid policy")?;

    let event = config.event_config();
    let filter = config.filter()?;

    println!("{} bpf_lsm_{} (func {})", "hook".bold(), config.hook, event.func_id);
    for i in 0..MAX_ARGS {
        let ty = event.arg_type(i);
        if ty != ArgType::None {
            println!("  arg {}: {:?}", i, ty);
        }
    }
    println!(
        "{} {} matcher(s), post: {}, override: {}",
        "filter".bold(),
        filter.matcher_count().unwrap_or(0),
        event.posts(),
        if event.overrides() {
            event.override_error.to_string()
        } else {
            "none".to_string()
        }
    );
    println!(
        "{} {:?}, verdict {}",
        "fail policy".bold(),
        config.fail_policy,
        output::verdict(event.fail_verdict())
    );

    let layout = layout_from_bindings(&generic_lsm_bindings()).context("Invalid stage table")?;
    for (slot, stage) in layout.iter().enumerate() {
        if let Some(stage) = stage {
            println!("  slot {:>2}: {}", slot, stage.program_name());
        }
    }

    let declared = (0..MAX_ARGS)
        .filter(|&i| event.arg_type(i) != ArgType::None)
        .count();
    output::success(&format!(
        "Policy is valid ({} tail calls at most)",
        max_hops(declared as u32)
    ));

    Ok(())
}

//! JSON output
//!
//! Exports collected events and their summary in JSON format for further
//! analysis

use anyhow::{Context, Result};
use lsmgate_shared::types::events::LsmEvent;
use lsmgate_shared::types::summary::LsmSummary;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use tracing::info;

/// Layout of the JSON output file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LsmReport {
    pub summary: LsmSummary,
    pub events: Vec<LsmEvent>,
}

/// Generate JSON output from collected events
pub fn generate_json(summary: &LsmSummary, events: &[LsmEvent], output_path: &str) -> Result<()> {
    info!("Generating JSON output: {}", output_path);

    let file = File::create(output_path)
        .with_context(|| format!("Failed to create output file: {}", output_path))?;

    let writer = BufWriter::new(file);

    let report = LsmReport {
        summary: summary.clone(),
        events: events.to_vec(),
    };
    serde_json::to_writer_pretty(writer, &report).context("Failed to serialize events to JSON")?;

    info!("JSON output written to {}", output_path);

    Ok(())
}

/// Read a report written by `generate_json`
pub fn read_json(path: &str) -> Result<LsmReport> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("Failed to parse {}", path))
}

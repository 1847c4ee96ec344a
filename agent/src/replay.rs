//! Offline replay of recorded hook invocations
//!
//! Runs each recorded call through the same stage handlers the kernel
//! programs use, driven by the userspace dispatcher, with the maps filled
//! from the agent configuration.

use std::path::Path;

use anyhow::{Context, Result};
use lsmgate_shared::dispatch::{Termination, Withheld};
use lsmgate_shared::host::{args_fit, Pipeline, RecordedCall};
use lsmgate_shared::types::events::LsmEvent;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;

/// Outcome of one replayed call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayOutcome {
    pub pid_tgid: u64,
    pub cpu: u32,
    /// Value the hook would have returned
    pub verdict: i32,
    pub hops: u32,
    /// Records emitted by this call
    pub emitted: usize,
    /// Set when a control transfer was withheld, naming the missed stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withheld: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub outcomes: Vec<ReplayOutcome>,
    pub events: Vec<LsmEvent>,
}

impl ReplayReport {
    /// Calls the hook would have denied
    pub fn denied(&self) -> usize {
        self.outcomes.iter().filter(|o| o.verdict != 0).count()
    }
}

/// Read a JSON list of recorded calls.
pub fn load_calls(path: &Path) -> Result<Vec<RecordedCall>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Build a pipeline for `config` sized for the CPUs `calls` mention.
pub fn pipeline_for(config: &Config, calls: &[RecordedCall]) -> Result<Pipeline> {
    config.validate().context("Invalid configuration")?;
    let cpus = calls.iter().map(|c| c.cpu as usize + 1).max().unwrap_or(1);
    Ok(Pipeline::new(config.event_config(), config.filter()?, cpus))
}

/// Replay `calls` in order.
pub fn replay(config: &Config, calls: &[RecordedCall]) -> Result<ReplayReport> {
    let pipeline = pipeline_for(config, calls)?;
    let mut report = ReplayReport::default();

    for call in calls {
        if !args_fit(call) {
            warn!(
                "Call from {:#x} carries {} args, extra ones are ignored",
                call.pid_tgid,
                call.args.len()
            );
        }

        let invocation = pipeline.invoke(call);
        let emitted = pipeline.maps.take_emitted();
        debug!(
            "Replayed {:#x}: verdict {} after {} hops",
            call.pid_tgid, invocation.verdict, invocation.hops
        );

        report.outcomes.push(ReplayOutcome {
            pid_tgid: call.pid_tgid,
            cpu: call.cpu,
            verdict: invocation.verdict,
            hops: invocation.hops,
            emitted: emitted.len(),
            withheld: describe_withheld(invocation.termination),
        });
        report.events.extend(emitted.iter().map(LsmEvent::from));
    }

    Ok(report)
}

fn describe_withheld(termination: Termination) -> Option<String> {
    let (target, reason) = match termination {
        Termination::Returned => return None,
        Termination::Withheld { target, reason } => (target, reason),
    };

    let reason = match reason {
        Withheld::EmptySlot => "empty slot",
        Withheld::HopLimit => "hop limit",
        Withheld::ScratchBusy => "scratch busy",
        Withheld::NoScratch => "no scratch slot",
    };
    Some(match target {
        Some(stage) => format!("{} ({})", stage.program_name(), reason),
        None => reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsmgate_shared::stage::Stage;

    #[test]
    fn test_describe_withheld() {
        assert_eq!(describe_withheld(Termination::Returned), None);
        assert_eq!(
            describe_withheld(Termination::Withheld {
                target: Some(Stage::Output),
                reason: Withheld::EmptySlot,
            })
            .as_deref(),
            Some("generic_lsm_output (empty slot)")
        );
        assert_eq!(
            describe_withheld(Termination::Withheld {
                target: None,
                reason: Withheld::ScratchBusy,
            })
            .as_deref(),
            Some("scratch busy")
        );
        assert_eq!(
            describe_withheld(Termination::Withheld {
                target: None,
                reason: Withheld::NoScratch,
            })
            .as_deref(),
            Some("no scratch slot")
        );
    }

    #[test]
    fn test_replay_cpu_without_scratch() {
        let config = Config::from_toml(
            r#"
            hook = "file_open"

            [[args]]
            index = 0
            type = "int"
            "#,
        )
        .unwrap();
        let pipeline = pipeline_for(&config, &[RecordedCall::new(1, 0, &[1])]).unwrap();
        let inv = pipeline.invoke(&RecordedCall::new(1, 3, &[1]));
        assert_eq!(
            describe_withheld(inv.termination).as_deref(),
            Some("no scratch slot")
        );
    }

    #[test]
    fn test_load_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calls.json");
        std::fs::write(&path, r#"[{"pid_tgid": 7, "args": [1, 2]}, {"pid_tgid": 8, "cpu": 3}]"#)
            .unwrap();

        let calls = load_calls(&path).unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].args, vec![1, 2]);
        assert_eq!(calls[1].cpu, 3);
        assert!(calls[1].args.is_empty());
    }

    #[test]
    fn test_denied_count() {
        let outcome = |verdict| ReplayOutcome {
            pid_tgid: 1,
            cpu: 0,
            verdict,
            hops: 0,
            emitted: 0,
            withheld: None,
        };
        let report = ReplayReport {
            outcomes: vec![outcome(0), outcome(-13), outcome(-1)],
            events: Vec::new(),
        };
        assert_eq!(report.denied(), 2);
    }
}

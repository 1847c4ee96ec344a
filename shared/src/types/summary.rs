//! Aggregated view over collected records

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::events::LsmEvent;

/// Totals for one collection run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LsmSummary {
    /// Wall clock start, nanoseconds since UNIX epoch
    pub start_time: u64,

    /// Wall clock end, nanoseconds since UNIX epoch
    pub end_time: u64,

    pub total_events: u64,

    /// Records per configured hook id
    pub by_func: BTreeMap<u32, u64>,

    /// Records per process
    pub by_pid: BTreeMap<u32, u64>,

    /// Records that carried a forced verdict
    pub overrides: u64,
}

impl LsmSummary {
    pub fn new(start_time: u64) -> Self {
        Self {
            start_time,
            end_time: start_time,
            ..Default::default()
        }
    }

    pub fn add_event(&mut self, event: &LsmEvent) {
        self.total_events += 1;
        *self.by_func.entry(event.func_id).or_insert(0) += 1;
        *self.by_pid.entry(event.pid).or_insert(0) += 1;
        if event.override_error.is_some() {
            self.overrides += 1;
        }
    }

    /// Processes with the most records, busiest first.
    pub fn top_pids(&self, n: usize) -> Vec<(u32, u64)> {
        let mut pids: Vec<_> = self.by_pid.iter().map(|(&p, &c)| (p, c)).collect();
        pids.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        pids.truncate(n);
        pids
    }

    pub fn duration_ns(&self) -> u64 {
        self.end_time.saturating_sub(self.start_time)
    }
}

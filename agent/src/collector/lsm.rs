//! Generic LSM event collector
//!
//! Collects records from the `LSM_EVENTS` perf array and builds a summary

use anyhow::{bail, Result};
use lsmgate_shared::record::{MsgGenericLsm, MSG_OP_GENERIC_LSM};
use lsmgate_shared::types::events::LsmEvent;
use lsmgate_shared::types::summary::LsmSummary;
use lsmgate_shared::utils::time::{boot_time_to_system_time, parse_uptime, system_time_nanos};
use std::time::Duration;
use tracing::info;

/// Generic LSM event collector
#[derive(Debug)]
pub struct LsmCollector {
    /// Collected events
    events: Vec<LsmEvent>,

    /// Start time
    start_time: u64,

    /// Time since boot when collection started, for timestamp conversion
    uptime: Option<Duration>,
}

impl Default for LsmCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl LsmCollector {
    /// Create a new collector. Kernel timestamps are converted to wall
    /// clock time when `/proc/uptime` is readable.
    pub fn new() -> Self {
        let uptime = std::fs::read_to_string("/proc/uptime")
            .ok()
            .and_then(|s| parse_uptime(&s));
        Self::with_uptime(uptime)
    }

    /// Create a collector with a known uptime (`None` keeps boot-relative
    /// timestamps).
    pub fn with_uptime(uptime: Option<Duration>) -> Self {
        Self {
            events: Vec::new(),
            start_time: system_time_nanos(),
            uptime,
        }
    }

    /// Add an event to the collector
    pub fn add_event(&mut self, event: LsmEvent) {
        self.events.push(event);
    }

    /// Decode a raw record and keep it
    pub fn process_event(&mut self, msg: &MsgGenericLsm) -> Result<()> {
        if msg.common.op != MSG_OP_GENERIC_LSM {
            bail!("Unexpected record op {}", msg.common.op);
        }

        let mut event = LsmEvent::from(msg);
        if let Some(uptime) = self.uptime {
            event.timestamp = boot_time_to_system_time(event.timestamp, uptime);
        }

        self.add_event(event);
        Ok(())
    }

    pub fn events(&self) -> &[LsmEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Build the summary over everything collected so far
    pub fn build_summary(&self) -> LsmSummary {
        let mut summary = LsmSummary::new(self.start_time);
        summary.end_time = system_time_nanos();

        for event in &self.events {
            summary.add_event(event);
        }

        info!(
            "LSM summary built: {} events, {} hooks, {} overrides",
            summary.total_events,
            summary.by_func.len(),
            summary.overrides
        );

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pid: u32, override_error: i32) -> MsgGenericLsm {
        let mut msg = MsgGenericLsm::default();
        msg.common.op = MSG_OP_GENERIC_LSM;
        msg.common.ktime = 5_000;
        msg.pid_tgid = (u64::from(pid) << 32) | u64::from(pid + 1);
        msg.func_id = 4;
        msg.override_error = override_error;
        msg.store_arg(0, 42);
        msg
    }

    #[test]
    fn test_process_event() {
        let mut collector = LsmCollector::with_uptime(None);
        collector.process_event(&record(10, 0)).unwrap();

        let event = &collector.events()[0];
        assert_eq!(event.pid, 10);
        assert_eq!(event.tid, 11);
        assert_eq!(event.timestamp, 5_000);
        assert_eq!(event.args[0].value, 42);
    }

    #[test]
    fn test_rejects_foreign_op() {
        let mut collector = LsmCollector::with_uptime(None);
        let mut msg = record(1, 0);
        msg.common.op = 0;
        assert!(collector.process_event(&msg).is_err());
        assert!(collector.is_empty());
    }

    #[test]
    fn test_timestamp_conversion() {
        let mut collector = LsmCollector::with_uptime(Some(Duration::from_secs(10)));
        collector.process_event(&record(1, 0)).unwrap();
        assert!(collector.events()[0].timestamp > 1_600_000_000_000_000_000);
    }

    #[test]
    fn test_summary() {
        let mut collector = LsmCollector::with_uptime(None);
        collector.process_event(&record(1, 0)).unwrap();
        collector.process_event(&record(1, -13)).unwrap();
        collector.process_event(&record(2, 0)).unwrap();

        let summary = collector.build_summary();
        assert_eq!(summary.total_events, 3);
        assert_eq!(summary.by_func[&4], 3);
        assert_eq!(summary.by_pid[&1], 2);
        assert_eq!(summary.overrides, 1);
        assert!(summary.end_time >= summary.start_time);
    }

    #[test]
    fn test_events_kept_in_arrival_order() {
        let mut collector = LsmCollector::with_uptime(None);
        collector.process_event(&record(1, 0)).unwrap();
        collector.process_event(&record(2, 0)).unwrap();
        collector.process_event(&record(3, 0)).unwrap();

        let pids: Vec<_> = collector.events().iter().map(|e| e.pid).collect();
        assert_eq!(pids, vec![1, 2, 3]);
        assert_eq!(collector.len(), 3);
        assert_eq!(collector.build_summary().total_events, 3);
    }
}

//! Output formatting utilities for CLI commands

use colored::{ColoredString, Colorize};
use lsmgate_agent::replay::ReplayReport;
use lsmgate_shared::types::summary::LsmSummary;

/// Print success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print warning message
pub fn warning(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Verdict as the hook would return it: green when allowed.
pub fn verdict(v: i32) -> ColoredString {
    if v == 0 {
        "allow".green()
    } else {
        format!("deny ({})", v).red()
    }
}

pub fn print_summary(summary: &LsmSummary) {
    success(&format!(
        "{} records in {:.1}s, {} with overrides",
        summary.total_events,
        summary.duration_ns() as f64 / 1e9,
        summary.overrides
    ));

    for (func_id, count) in &summary.by_func {
        println!("  func {:>4}  {:>8}", func_id, count);
    }
    for (pid, count) in summary.top_pids(5) {
        println!("  pid  {:>8}  {:>8}", pid, count);
    }
}

pub fn print_replay(report: &ReplayReport) {
    println!(
        "{:>4}  {:>18}  {:>4}  {:>5}  {:>7}  {}",
        "#".bold(),
        "pid_tgid".bold(),
        "cpu".bold(),
        "hops".bold(),
        "emitted".bold(),
        "verdict".bold()
    );

    for (i, outcome) in report.outcomes.iter().enumerate() {
        println!(
            "{:>4}  {:>#18x}  {:>4}  {:>5}  {:>7}  {}",
            i,
            outcome.pid_tgid,
            outcome.cpu,
            outcome.hops,
            outcome.emitted,
            verdict(outcome.verdict)
        );
        if let Some(withheld) = &outcome.withheld {
            warning(&format!("call {}: withheld at {}", i, withheld));
        }
    }

    info(&format!(
        "{} calls, {} denied, {} records emitted",
        report.outcomes.len(),
        report.denied(),
        report.events.len()
    ));
}

//! Time-related utilities

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get the current system time in nanoseconds since UNIX epoch
pub fn system_time_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64
}

/// Convert a boot-relative kernel timestamp to nanoseconds since UNIX epoch,
/// given the time since boot as measured now.
///
/// `uptime` is read by the caller (e.g. from `/proc/uptime`) so the
/// conversion stays testable.
pub fn boot_time_to_system_time(boot_time_ns: u64, uptime: Duration) -> u64 {
    let now = system_time_nanos();
    let boot_epoch = now.saturating_sub(uptime.as_nanos() as u64);
    boot_epoch.saturating_add(boot_time_ns)
}

/// Parse the first field of `/proc/uptime` ("12345.67 8910.11").
pub fn parse_uptime(contents: &str) -> Option<Duration> {
    let secs: f64 = contents.split_whitespace().next()?.parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

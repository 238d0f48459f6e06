//! Host reference clock
//!
//! All scheduling math is done in nanoseconds since the Unix epoch, which is
//! the timescale PTP-locked cameras report (TAI/UTC offset aside).

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of reference time in nanoseconds
pub trait ReferenceClock: Send + Sync {
    fn now_ns(&self) -> i64;
}

/// Wall clock of the host, disciplined by the host PTP daemon
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl ReferenceClock for SystemClock {
    fn now_ns(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
            // Host clock before 1970: report as negative offset
            Err(e) => -i64::try_from(e.duration().as_nanos()).unwrap_or(i64::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now_ns();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = clock.now_ns();
        assert!(b > a, "clock should advance ({a} -> {b})");
        assert!(a > 1_600_000_000_000_000_000, "expected epoch-based nanoseconds");
    }
}

//! Waiting for PTP convergence
//!
//! A session may only be scheduled once every camera reports itself as a PTP
//! `Slave`, i.e. locked onto the grandmaster. Status is polled at a fixed
//! interval until all agree or the timeout expires.

use crate::device::{ptp_status, Device};
use std::time::{Duration, Instant};

/// Polling parameters for the convergence wait
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergencePolicy {
    /// Give up after this long
    pub timeout: Duration,
    /// Sleep between status polls
    pub poll_interval: Duration,
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Status counts from one poll over all cameras
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvergenceTally {
    pub slaves: usize,
    pub masters: usize,
    pub other: usize,
}

impl ConvergenceTally {
    pub fn total(&self) -> usize {
        self.slaves + self.masters + self.other
    }

    pub fn converged(&self) -> bool {
        self.total() > 0 && self.slaves == self.total()
    }
}

/// Count the PTP states reported by `devices`
pub fn poll_status<'a, I>(devices: I) -> ConvergenceTally
where
    I: IntoIterator<Item = &'a dyn Device>,
{
    let mut tally = ConvergenceTally::default();
    for device in devices {
        match ptp_status(device).as_deref() {
            Some("Slave") => tally.slaves += 1,
            Some("Master") => tally.masters += 1,
            _ => tally.other += 1,
        }
    }
    tally
}

/// Poll until every device is a PTP slave
///
/// `on_poll` is called after every unsuccessful poll (progress reporting).
/// Returns the final tally as the error when the timeout expires.
pub fn wait_for_convergence<'a, F>(
    devices: &[&'a dyn Device],
    policy: ConvergencePolicy,
    mut on_poll: F,
) -> Result<ConvergenceTally, ConvergenceTally>
where
    F: FnMut(&ConvergenceTally),
{
    let deadline = Instant::now() + policy.timeout;

    let tally = loop {
        let tally = poll_status(devices.iter().copied());
        if tally.converged() {
            tracing::info!(devices = tally.total(), "PTP converged: all cameras are Slave");
            return Ok(tally);
        }
        on_poll(&tally);

        let now = Instant::now();
        if now >= deadline {
            break tally;
        }
        std::thread::sleep(policy.poll_interval.min(deadline - now));
    };

    tracing::warn!(
        slaves = tally.slaves,
        masters = tally.masters,
        other = tally.other,
        "PTP convergence timed out"
    );
    Err(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sim::{SimConfig, SimDevice};
    use crate::sync::{ReferenceClock, SystemClock};
    use std::sync::Arc;

    fn devices(configs: Vec<SimConfig>) -> Vec<SimDevice> {
        let clock: Arc<dyn ReferenceClock> = Arc::new(SystemClock);
        configs
            .into_iter()
            .map(|c| SimDevice::new(c, clock.clone()).0)
            .collect()
    }

    fn fast_policy(timeout_ms: u64) -> ConvergencePolicy {
        ConvergencePolicy {
            timeout: Duration::from_millis(timeout_ms),
            poll_interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_converged_immediately() {
        let devs = devices(vec![SimConfig::new("A"), SimConfig::new("B")]);
        let refs: Vec<&dyn Device> = devs.iter().map(|d| d as &dyn Device).collect();
        let tally = wait_for_convergence(&refs, fast_policy(100), |_| {}).unwrap();
        assert_eq!(tally.slaves, 2);
    }

    #[test]
    fn test_converges_after_polls() {
        let devs = devices(vec![
            SimConfig::new("A"),
            SimConfig::new("B").converge_after_polls(Some(3)),
        ]);
        let refs: Vec<&dyn Device> = devs.iter().map(|d| d as &dyn Device).collect();
        let mut polls = 0;
        let tally = wait_for_convergence(&refs, fast_policy(1_000), |_| polls += 1).unwrap();
        assert!(tally.converged());
        assert_eq!(polls, 3);
    }

    #[test]
    fn test_timeout_reports_tally() {
        let devs = devices(vec![
            SimConfig::new("A"),
            SimConfig::new("B").converge_after_polls(None),
        ]);
        let refs: Vec<&dyn Device> = devs.iter().map(|d| d as &dyn Device).collect();
        let started = Instant::now();
        let tally = wait_for_convergence(&refs, fast_policy(50), |_| {}).unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(tally.slaves, 1);
        assert_eq!(tally.other, 1);
    }

    #[test]
    fn test_empty_never_converges() {
        assert!(!ConvergenceTally::default().converged());
    }
}

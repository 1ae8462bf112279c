//! Payload recency and liveness
//!
//! Global invariants enforced:
//! - `last_update` only moves forward: a payload is applied only when its
//!   timestamp is strictly newer, or when it carries none and nothing has
//!   been applied yet
//! - Liveness is derived from `now - last_update`, never stored as truth
//! - A failed poll reports Offline until a later poll succeeds

use serde::Serialize;
use std::fmt;

/// Cadence of data-source polling
pub const POLL_INTERVAL_MS: u64 = 2000;

/// Cadence of the liveness recomputation tick
pub const STATUS_TICK_MS: u64 = 1000;

/// Lower bound of the staleness timeout
pub const MIN_OFFLINE_TIMEOUT_MS: u64 = 6000;

/// Staleness timeout for the default poll interval
pub const OFFLINE_TIMEOUT_MS: u64 = offline_timeout(POLL_INTERVAL_MS);

/// Staleness timeout for a given poll interval: at least three missed polls
pub const fn offline_timeout(poll_interval_ms: u64) -> u64 {
    let three_polls = poll_interval_ms.saturating_mul(3);
    if three_polls > MIN_OFFLINE_TIMEOUT_MS {
        three_polls
    } else {
        MIN_OFFLINE_TIMEOUT_MS
    }
}

/// Whether the report believes it is receiving fresh data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Live,
    Stale,
    Offline,
}

impl Liveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Liveness::Live => "Live",
            Liveness::Stale => "Stale",
            Liveness::Offline => "Offline",
        }
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Tracks `last_update` and derives `Liveness` from it
#[derive(Debug, Clone)]
pub struct FreshnessMonitor {
    last_update: u64,
    offline_timeout_ms: u64,
    poll_failed: bool,
    last_state: Option<Liveness>,
}

impl Default for FreshnessMonitor {
    fn default() -> Self {
        Self::new(OFFLINE_TIMEOUT_MS)
    }
}

impl FreshnessMonitor {
    /// A monitor that has not seen any payload yet
    pub fn new(offline_timeout_ms: u64) -> Self {
        FreshnessMonitor {
            last_update: 0,
            offline_timeout_ms,
            poll_failed: false,
            last_state: None,
        }
    }

    /// A monitor seeded at page load
    ///
    /// `last_update` starts at the newest of the embedded payload timestamp,
    /// an embedded generated-at hint and the load wall clock.
    pub fn at_load(
        offline_timeout_ms: u64,
        initial_generated_at: u64,
        generated_at_hint: u64,
        loaded_at: u64,
    ) -> Self {
        let mut monitor = Self::new(offline_timeout_ms);
        monitor.last_update = initial_generated_at.max(generated_at_hint).max(loaded_at);
        monitor
    }

    pub fn last_update(&self) -> u64 {
        self.last_update
    }

    /// Would a payload with this timestamp be applied?
    pub fn is_newer(&self, generated_at: u64) -> bool {
        if generated_at > 0 {
            generated_at > self.last_update
        } else {
            self.last_update == 0
        }
    }

    /// Record a payload arrival; returns false when it must be discarded
    pub fn accept(&mut self, generated_at: u64, now: u64) -> bool {
        if !self.is_newer(generated_at) {
            return false;
        }
        self.last_update = if generated_at > 0 { generated_at } else { now };
        self.poll_failed = false;
        true
    }

    /// A poll cycle where every transport failed
    pub fn record_poll_failure(&mut self) {
        self.poll_failed = true;
    }

    /// A poll cycle that reached a data source, new data or not
    pub fn record_poll_success(&mut self) {
        self.poll_failed = false;
    }

    /// Liveness at `now`
    pub fn state(&self, now: u64) -> Liveness {
        if self.last_update == 0 || self.poll_failed {
            return Liveness::Offline;
        }
        let age = now.saturating_sub(self.last_update);
        if age > self.offline_timeout_ms {
            Liveness::Stale
        } else {
            Liveness::Live
        }
    }

    /// Recompute liveness, returning the previous state when it changed
    pub fn tick(&mut self, now: u64) -> (Liveness, Option<Liveness>) {
        let state = self.state(now);
        let previous = self.last_state.replace(state);
        match previous {
            Some(prev) if prev != state => {
                tracing::info!(from = %prev, to = %state, "liveness changed");
                (state, Some(prev))
            }
            _ => (state, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_timeout_floor() {
        assert_eq!(OFFLINE_TIMEOUT_MS, 6000);
        assert_eq!(offline_timeout(1000), 6000);
        assert_eq!(offline_timeout(5000), 15000);
    }

    #[test]
    fn test_unset_is_offline() {
        let monitor = FreshnessMonitor::default();
        assert_eq!(monitor.state(10_000), Liveness::Offline);
    }

    #[test]
    fn test_staleness_scenario() {
        let mut monitor = FreshnessMonitor::new(offline_timeout(2000));
        assert!(monitor.accept(1_000_000, 1_000_000));
        assert_eq!(monitor.state(1_000_000 + 3000), Liveness::Live);
        assert_eq!(monitor.state(1_000_000 + 6000), Liveness::Live);
        assert_eq!(monitor.state(1_000_000 + 7000), Liveness::Stale);
    }

    #[test]
    fn test_monotonic_acceptance() {
        let mut monitor = FreshnessMonitor::new(OFFLINE_TIMEOUT_MS);
        assert!(monitor.accept(100, 5));
        assert!(!monitor.accept(50, 6));
        assert!(!monitor.accept(100, 7));
        assert_eq!(monitor.last_update(), 100);
        assert!(monitor.accept(101, 8));
        assert_eq!(monitor.last_update(), 101);
    }

    #[test]
    fn test_untimestamped_payload_bootstrap_only() {
        let mut monitor = FreshnessMonitor::new(OFFLINE_TIMEOUT_MS);
        assert!(monitor.accept(0, 4242));
        assert_eq!(monitor.last_update(), 4242);
        assert!(!monitor.accept(0, 5000));
        assert_eq!(monitor.last_update(), 4242);
    }

    #[test]
    fn test_at_load_takes_newest() {
        let monitor = FreshnessMonitor::at_load(OFFLINE_TIMEOUT_MS, 10, 30, 20);
        assert_eq!(monitor.last_update(), 30);
        let monitor = FreshnessMonitor::at_load(OFFLINE_TIMEOUT_MS, 0, 0, 20);
        assert_eq!(monitor.last_update(), 20);
    }

    #[test]
    fn test_poll_failure_is_offline_until_success() {
        let mut monitor = FreshnessMonitor::new(OFFLINE_TIMEOUT_MS);
        monitor.accept(1000, 1000);
        monitor.record_poll_failure();
        assert_eq!(monitor.state(1500), Liveness::Offline);
        monitor.record_poll_success();
        assert_eq!(monitor.state(1500), Liveness::Live);

        monitor.record_poll_failure();
        assert!(monitor.accept(2000, 2000));
        assert_eq!(monitor.state(2000), Liveness::Live);
    }

    #[test]
    fn test_tick_reports_transitions() {
        let mut monitor = FreshnessMonitor::new(OFFLINE_TIMEOUT_MS);
        assert_eq!(monitor.tick(0), (Liveness::Offline, None));
        monitor.accept(1000, 1000);
        assert_eq!(monitor.tick(1000), (Liveness::Live, Some(Liveness::Offline)));
        assert_eq!(monitor.tick(2000), (Liveness::Live, None));
        assert_eq!(monitor.tick(8000), (Liveness::Stale, Some(Liveness::Live)));
    }
}

//! Global atomic counters for harness observability.
//!
//! Counters are bumped silently where the work happens. Call
//! [`Metrics::flush`] once per command to emit them as a single
//! `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations and no locking.
pub struct Metrics {
    builds: AtomicU64,
    reuses: AtomicU64,
    build_failures: AtomicU64,
    trials_recorded: AtomicU64,
    run_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            builds: AtomicU64::new(0),
            reuses: AtomicU64::new(0),
            build_failures: AtomicU64::new(0),
            trials_recorded: AtomicU64::new(0),
            run_failures: AtomicU64::new(0),
        }
    }

    /// A revision was configured, compiled and installed.
    pub fn inc_builds(&self) {
        self.builds.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "builds", "counter incremented");
    }

    /// An existing install was reused.
    pub fn inc_reuses(&self) {
        self.reuses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "reuses", "counter incremented");
    }

    pub fn inc_build_failures(&self) {
        self.build_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "build_failures", "counter incremented");
    }

    pub fn inc_trials_recorded(&self) {
        self.trials_recorded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "trials_recorded", "counter incremented");
    }

    pub fn inc_run_failures(&self) {
        self.run_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "run_failures", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            builds = self.builds(),
            reuses = self.reuses(),
            build_failures = self.build_failures(),
            trials_recorded = self.trials_recorded(),
            run_failures = self.run_failures(),
        );
    }

    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn reuses(&self) -> u64 {
        self.reuses.load(Ordering::Relaxed)
    }

    pub fn build_failures(&self) -> u64 {
        self.build_failures.load(Ordering::Relaxed)
    }

    pub fn trials_recorded(&self) -> u64 {
        self.trials_recorded.load(Ordering::Relaxed)
    }

    pub fn run_failures(&self) -> u64 {
        self.run_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.builds.store(0, Ordering::Relaxed);
        self.reuses.store(0, Ordering::Relaxed);
        self.build_failures.store(0, Ordering::Relaxed);
        self.trials_recorded.store(0, Ordering::Relaxed);
        self.run_failures.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_builds();
        m.inc_reuses();
        m.inc_reuses();
        m.inc_trials_recorded();
        m.inc_trials_recorded();
        m.inc_trials_recorded();
        assert_eq!(m.builds(), 1);
        assert_eq!(m.reuses(), 2);
        assert_eq!(m.trials_recorded(), 3);
        assert_eq!(m.build_failures(), 0);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_builds();
        m.inc_build_failures();
        m.inc_run_failures();
        m.reset();
        assert_eq!(m.builds(), 0);
        assert_eq!(m.build_failures(), 0);
        assert_eq!(m.run_failures(), 0);
    }
}

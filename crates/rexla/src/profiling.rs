//! Per-executable timing counters.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Accumulates timings across every run it is attached to.
///
/// Durations are recorded in nanoseconds and never as zero, so a populated
/// profile always reads positive even when a launch is faster than the clock.
#[derive(Debug, Default)]
pub struct ExecutionProfile {
    compute_time_ns: AtomicU64,
    compute_and_transfer_time_ns: AtomicU64,
    execution_count: AtomicU64,
}

impl ExecutionProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute_time_ns(&self) -> u64 {
        self.compute_time_ns.load(Ordering::Relaxed)
    }

    pub fn compute_and_transfer_time_ns(&self) -> u64 {
        self.compute_and_transfer_time_ns.load(Ordering::Relaxed)
    }

    pub fn execution_count(&self) -> u64 {
        self.execution_count.load(Ordering::Relaxed)
    }

    pub fn record(&self, compute: Duration, compute_and_transfer: Duration) {
        self.compute_time_ns
            .fetch_add(nanos(compute), Ordering::Relaxed);
        self.compute_and_transfer_time_ns
            .fetch_add(nanos(compute_and_transfer.max(compute)), Ordering::Relaxed);
        self.execution_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.compute_time_ns.store(0, Ordering::Relaxed);
        self.compute_and_transfer_time_ns.store(0, Ordering::Relaxed);
        self.execution_count.store(0, Ordering::Relaxed);
    }
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX).max(1)
}

impl fmt::Display for ExecutionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "runs={} compute={:.3}ms compute+transfer={:.3}ms",
            self.execution_count(),
            self.compute_time_ns() as f64 / 1e6,
            self.compute_and_transfer_time_ns() as f64 / 1e6
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_durations_still_count() {
        let profile = ExecutionProfile::new();
        profile.record(Duration::ZERO, Duration::ZERO);
        assert_eq!(profile.compute_time_ns(), 1);
        assert_eq!(profile.compute_and_transfer_time_ns(), 1);
        profile.record(Duration::from_micros(2), Duration::from_micros(1));
        assert_eq!(profile.execution_count(), 2);
        assert!(profile.compute_and_transfer_time_ns() >= profile.compute_time_ns());
        profile.reset();
        assert_eq!(profile.execution_count(), 0);
    }
}

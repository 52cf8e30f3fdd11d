//! Build counters
//!
//! The manager reports to a [`MetricsSink`] handed to it at construction.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Receives build outcome events
pub trait MetricsSink: Send + Sync {
    /// A build pass was attempted
    fn index_creation(&self);
    /// A build pass failed
    fn index_creation_failure(&self);
}

/// Counter snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    pub attempts: u64,
    pub failures: u64,
}

impl fmt::Display for BuildStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "builds: {} attempted, {} failed", self.attempts, self.failures)
    }
}

/// Atomic in-process counters
#[derive(Debug, Default)]
pub struct BuildCounters {
    attempts: AtomicU64,
    failures: AtomicU64,
}

impl BuildCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BuildStats {
        BuildStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSink for BuildCounters {
    fn index_creation(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    fn index_creation_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let counters = BuildCounters::new();
        counters.index_creation();
        counters.index_creation();
        counters.index_creation_failure();

        let stats = counters.snapshot();
        assert_eq!(stats, BuildStats { attempts: 2, failures: 1 });
        assert_eq!(stats.to_string(), "builds: 2 attempted, 1 failed");
    }
}

//! Wall-clock abstraction
//!
//! All time reads in the coordination logic go through [`Clock`] so tests can
//! drive a virtual clock. Lease timestamps are absolute Unix-epoch seconds;
//! the two sites are assumed loosely synchronized (skew within a quarter of
//! the lease TTL).

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of "now" in Unix-epoch seconds.
pub trait Clock: Send + Sync {
    /// Current wall-clock time as seconds since the Unix epoch.
    fn now_unix(&self) -> u64;
}

/// The process's real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

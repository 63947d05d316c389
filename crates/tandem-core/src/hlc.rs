//! Hybrid Logical Clock (HLC) for operation timestamps.
//!
//! Every operation carries a timestamp combining:
//! - Physical wall-clock time (milliseconds)
//! - Logical counter for events at the same physical time
//!
//! The physical part drives the conflict window; the logical part keeps
//! timestamps issued by one engine strictly increasing even when the wall
//! clock stalls or steps backwards.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

/// An operation timestamp combining physical time and a logical counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Physical wall-clock time in milliseconds since UNIX epoch
    pub physical_ms: u64,
    /// Logical counter for events at the same physical time
    pub logical: u32,
}

impl Timestamp {
    /// Create a timestamp at the given wall-clock millisecond.
    #[must_use]
    pub fn from_millis(physical_ms: u64) -> Self {
        Self {
            physical_ms,
            logical: 0,
        }
    }

    /// Create a timestamp with the current wall clock time.
    #[must_use]
    pub fn now() -> Self {
        Self::from_millis(current_time_ms())
    }

    /// Absolute wall-clock distance to another timestamp, in milliseconds.
    #[must_use]
    pub fn distance_ms(&self, other: &Self) -> u64 {
        self.physical_ms.abs_diff(other.physical_ms)
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.physical_ms.cmp(&other.physical_ms) {
            Ordering::Equal => {}
            ord => return ord,
        }
        self.logical.cmp(&other.logical)
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.physical_ms, self.logical)
    }
}

/// Hybrid Logical Clock state machine.
#[derive(Debug, Clone)]
pub struct Hlc {
    last: Timestamp,
}

impl Default for Hlc {
    fn default() -> Self {
        Self::new()
    }
}

impl Hlc {
    /// Create a new clock starting at the current wall time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: Timestamp::now(),
        }
    }

    /// Generate a new timestamp for a local event.
    ///
    /// Guarantees the returned timestamp is greater than any previously
    /// generated or observed timestamp.
    pub fn tick(&mut self) -> Timestamp {
        let now_ms = current_time_ms();

        if now_ms > self.last.physical_ms {
            self.last.physical_ms = now_ms;
            self.last.logical = 0;
        } else {
            self.last.logical = self.last.logical.saturating_add(1);
        }

        self.last
    }

    /// Advance the clock past a timestamp observed on an incoming operation.
    pub fn observe(&mut self, received: Timestamp) {
        let now_ms = current_time_ms();

        if now_ms > self.last.physical_ms && now_ms > received.physical_ms {
            self.last.physical_ms = now_ms;
            self.last.logical = 0;
        } else if self.last.physical_ms == received.physical_ms {
            self.last.logical = self.last.logical.max(received.logical).saturating_add(1);
        } else if received.physical_ms > self.last.physical_ms {
            self.last.physical_ms = received.physical_ms;
            self.last.logical = received.logical.saturating_add(1);
        } else {
            self.last.logical = self.last.logical.saturating_add(1);
        }
    }

    /// Get the current timestamp without advancing the clock.
    #[must_use]
    pub fn current(&self) -> Timestamp {
        self.last
    }
}

/// Get current wall clock time in milliseconds since UNIX epoch.
fn current_time_ms() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    u64::try_from(millis).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hlc_monotonic() {
        let mut hlc = Hlc::new();

        let t1 = hlc.tick();
        let t2 = hlc.tick();
        let t3 = hlc.tick();

        assert!(t1 < t2);
        assert!(t2 < t3);
    }

    #[test]
    fn observe_future_timestamp_advances() {
        let mut hlc = Hlc::new();
        let future = Timestamp {
            physical_ms: hlc.current().physical_ms + 60_000,
            logical: 7,
        };

        hlc.observe(future);
        let next = hlc.tick();

        assert!(next > future);
    }

    #[test]
    fn logical_counter_orders_same_millisecond() {
        let a = Timestamp {
            physical_ms: 1000,
            logical: 0,
        };
        let b = Timestamp {
            physical_ms: 1000,
            logical: 1,
        };

        assert!(a < b);
        assert_eq!(a.distance_ms(&b), 0);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = Timestamp::from_millis(1_000);
        let b = Timestamp::from_millis(1_750);

        assert_eq!(a.distance_ms(&b), 750);
        assert_eq!(b.distance_ms(&a), 750);
    }
}

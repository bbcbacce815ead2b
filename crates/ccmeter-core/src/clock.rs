//! Injectable time source
//!
//! All timestamp arithmetic in the detection engine goes through [`Clock`]
//! so tests can pin `now` to a fixed instant.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Time provider used by every component that reasons about "now".
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current time as Unix seconds.
    fn now_unix(&self) -> i64 {
        self.now().timestamp()
    }
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed time for tests; mutable so a test can advance it.
#[derive(Debug)]
pub struct FixedClock {
    unix: AtomicI64,
}

impl FixedClock {
    pub fn at(unix: i64) -> Arc<Self> {
        Arc::new(Self {
            unix: AtomicI64::new(unix),
        })
    }

    pub fn set(&self, unix: i64) {
        self.unix.store(unix, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.unix.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.unix.load(Ordering::SeqCst), 0)
            .single()
            .expect("fixed clock timestamp in range")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_advance() {
        let clock = FixedClock::at(1_700_000_000);
        assert_eq!(clock.now_unix(), 1_700_000_000);
        clock.advance(3600);
        assert_eq!(clock.now_unix(), 1_700_003_600);
        clock.set(42);
        assert_eq!(clock.now_unix(), 42);
    }
}

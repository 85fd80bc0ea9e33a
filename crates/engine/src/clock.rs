//! Time source for matching and run bookkeeping.

use chrono::{DateTime, Local, NaiveDateTime, Utc};

/// Supplies "now" so matching stays deterministic under test.
pub trait Clock: Send + Sync {
    /// Current wall-clock time in the stores' local timezone.
    fn now(&self) -> NaiveDateTime;

    /// Current instant, used for run record timestamps.
    fn utc_now(&self) -> DateTime<Utc>;
}

/// The process clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    local: NaiveDateTime,
}

impl FixedClock {
    pub fn new(local: NaiveDateTime) -> Self {
        Self { local }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.local
    }

    fn utc_now(&self) -> DateTime<Utc> {
        self.local.and_utc()
    }
}

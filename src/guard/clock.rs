//! Time source for cooldown decisions
//!
//! # Trust assumption
//!
//! The guard decides "has the cooldown elapsed" purely from the clock it is
//! given. It shares that clock with the guarded principal and cannot detect a
//! clock that jumps forward, so whoever controls the clock controls the
//! cooldown. Deployments must run the guard against a clock the principal
//! cannot move. A clock that moves backwards only lengthens the wait.

use std::sync::atomic::{AtomicU64, Ordering};

/// Seconds since the Unix epoch
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
    }
}

/// Manually driven clock for tests and replays
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

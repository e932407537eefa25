//! Time source for the engine.
//!
//! Delay steps and lease expiry are computed from a `Clock` rather than
//! `Utc::now()` directly, so tests can move time forward without sleeping.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A frozen clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct MockClock {
    inner: Arc<RwLock<DateTime<Utc>>>,
}

impl MockClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(start)),
        }
    }

    /// Set the clock to a specific instant
    pub fn set(&self, time: DateTime<Utc>) {
        let mut current = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *current = time;
    }

    /// Advance the clock by a duration
    pub fn advance(&self, by: Duration) {
        let mut current = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *current += by;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}

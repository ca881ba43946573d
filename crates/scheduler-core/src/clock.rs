//! Injectable time sources so schedule arithmetic and timeout classification
//! can be tested without real sleeps.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub trait Clock: Send + Sync {
    fn wall_now(&self) -> DateTime<Utc>;
    fn monotonic_now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn wall_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only advances when told to. `monotonic_now` is approximated
/// from the wall-clock offset since tests never need sub-millisecond
/// monotonic precision, only "has more than X elapsed".
#[derive(Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<DateTime<Utc>>>,
    start_wall: DateTime<Utc>,
    start_mono: Instant,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(start)),
            start_wall: start,
            start_mono: Instant::now(),
        }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut guard = self.inner.lock().expect("clock lock poisoned");
        *guard += duration;
    }

    pub fn set(&self, when: DateTime<Utc>) {
        *self.inner.lock().expect("clock lock poisoned") = when;
    }
}

impl Clock for ManualClock {
    fn wall_now(&self) -> DateTime<Utc> {
        *self.inner.lock().expect("clock lock poisoned")
    }

    fn monotonic_now(&self) -> Instant {
        let elapsed_wall = self.wall_now() - self.start_wall;
        self.start_mono + elapsed_wall.to_std().unwrap_or_default()
    }
}

//! Time source and TTL caching
//!
//! Anything time-sensitive takes a `Clock` instead of sampling wall time,
//! so tests advance a `ManualClock` deterministically instead of sleeping.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

/// Millisecond time source.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall-clock time source for production use.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Manually advanced time source for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set(&self, ts_ms: i64) {
        self.now.store(ts_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Single-slot cache that serves a value only within its TTL window.
///
/// Used for the availability mask and on-demand ticker previews. The
/// clock is passed per call rather than captured, so one cache works
/// under both system and manual time.
pub struct TtlCache<T> {
    ttl_ms: i64,
    slot: Mutex<Option<(i64, T)>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl_ms: i64) -> Self {
        Self {
            ttl_ms,
            slot: Mutex::new(None),
        }
    }

    /// The cached value, if it is still fresh.
    pub fn get(&self, clock: &dyn Clock) -> Option<T> {
        let slot = self.slot.lock();
        match slot.as_ref() {
            Some((inserted_at, value)) if clock.now_ms() - inserted_at < self.ttl_ms => {
                Some(value.clone())
            }
            _ => None,
        }
    }

    /// Store a value, stamping it with the current time.
    pub fn put(&self, clock: &dyn Clock, value: T) {
        *self.slot.lock() = Some((clock.now_ms(), value));
    }

    /// Drop any cached value.
    pub fn invalidate(&self) {
        *self.slot.lock() = None;
    }
}

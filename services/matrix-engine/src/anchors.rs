//! UTC-day opening anchor resolution
//!
//! The opening anchor for a pair is the earliest finite benchmark value
//! stored within the current UTC day. On first use each day the cache is
//! seeded from the store in one pass (which rescans the journal when
//! retention has evicted the front of the day), and seeded anchors never
//! change for the rest of that day; date rollover reseeds for the new
//! window, so no reset logic exists.
//!
//! A missing anchor is a normal answer (the builder bootstraps to 0.0),
//! never an error.

use crate::store::SnapshotStore;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use types::matrix::MatrixType;
use types::symbol::{PairKey, Symbol};
use types::time::day_window;

struct DayCache {
    day_start_ms: i64,
    anchors: BTreeMap<PairKey, f64>,
}

/// Lazily filled per-day cache of opening benchmark values.
pub struct AnchorTracker {
    store: Arc<SnapshotStore>,
    cache: Mutex<DayCache>,
}

impl AnchorTracker {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(DayCache {
                day_start_ms: i64::MIN,
                anchors: BTreeMap::new(),
            }),
        }
    }

    /// The opening benchmark for `pair` within the UTC day of `now_ms`,
    /// or None if no benchmark for the pair exists yet today.
    pub fn opening_for(&self, pair: &PairKey, now_ms: i64) -> Option<f64> {
        let (start, end) = day_window(now_ms);
        let mut cache = self.cache.lock();
        if cache.day_start_ms != start {
            cache.day_start_ms = start;
            cache.anchors = self
                .store
                .opening_values(MatrixType::Benchmark, start, end);
        }
        if let Some(value) = cache.anchors.get(pair) {
            return Some(*value);
        }

        // Pairs that start trading mid-day miss the seed; resolve them
        // from the index and pin the result for the rest of the day.
        let value = self
            .store
            .first_value_in_window(MatrixType::Benchmark, pair, start, end)?;
        cache.anchors.insert(pair.clone(), value);
        Some(value)
    }

    /// Opening anchors for every ordered pair over `coins`; pairs with
    /// no anchor today are simply absent.
    pub fn anchors_for(&self, coins: &[Symbol], now_ms: i64) -> BTreeMap<PairKey, f64> {
        let mut out = BTreeMap::new();
        for base in coins {
            for quote in coins {
                if base == quote {
                    continue;
                }
                let pair = PairKey {
                    base: base.clone(),
                    quote: quote.clone(),
                };
                if let Some(value) = self.opening_for(&pair, now_ms) {
                    out.insert(pair, value);
                }
            }
        }
        out
    }
}

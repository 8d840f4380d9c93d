//! Engine observability counters
//!
//! Lock-free counters covering the tick loop, upstream fetches, and the
//! persistence path. Exported as a flat map for the health endpoint.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Core metrics for the matrix engine.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    // Tick loop
    pub ticks_completed: AtomicU64,
    pub ticks_skipped: AtomicU64,
    pub ticks_abandoned: AtomicU64,
    pub ticks_empty: AtomicU64,

    // Upstream fetches
    pub fetch_attempts: AtomicU64,
    pub fetch_failures: AtomicU64,
    pub resolved_assets_last_tick: AtomicU64,

    // Persistence
    pub frames_committed: AtomicU64,
    pub commits_deduped: AtomicU64,
    pub commit_failures: AtomicU64,
    pub journal_recovered_entries: AtomicU64,
    pub journal_corrupt_skipped: AtomicU64,

    // Read side
    pub mask_fallbacks: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed tick and how many assets it resolved.
    pub fn record_tick_completed(&self, resolved_assets: u64) {
        self.ticks_completed.fetch_add(1, Ordering::Relaxed);
        self.resolved_assets_last_tick
            .store(resolved_assets, Ordering::Relaxed);
    }

    /// Record a tick skipped because its predecessor was still running.
    pub fn record_tick_skipped(&self) {
        self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tick abandoned at its deadline.
    pub fn record_tick_abandoned(&self) {
        self.ticks_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tick that resolved zero assets and wrote nothing.
    pub fn record_tick_empty(&self) {
        self.ticks_empty.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_attempt(&self) {
        self.fetch_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_committed(&self) {
        self.frames_committed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an identical re-commit that was dropped as a duplicate.
    pub fn record_commit_deduped(&self) {
        self.commits_deduped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit_failure(&self) {
        self.commit_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record journal recovery results after open.
    pub fn record_recovery(&self, replayed: u64, corrupt_skipped: u64) {
        self.journal_recovered_entries
            .store(replayed, Ordering::Relaxed);
        self.journal_corrupt_skipped
            .store(corrupt_skipped, Ordering::Relaxed);
    }

    /// Record a read served without an availability mask.
    pub fn record_mask_fallback(&self) {
        self.mask_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Export all counters as a flat map for the health endpoint.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("ticks_completed".to_string(), self.ticks_completed.load(Ordering::Relaxed));
        m.insert("ticks_skipped".to_string(), self.ticks_skipped.load(Ordering::Relaxed));
        m.insert("ticks_abandoned".to_string(), self.ticks_abandoned.load(Ordering::Relaxed));
        m.insert("ticks_empty".to_string(), self.ticks_empty.load(Ordering::Relaxed));
        m.insert("fetch_attempts".to_string(), self.fetch_attempts.load(Ordering::Relaxed));
        m.insert("fetch_failures".to_string(), self.fetch_failures.load(Ordering::Relaxed));
        m.insert(
            "resolved_assets_last_tick".to_string(),
            self.resolved_assets_last_tick.load(Ordering::Relaxed),
        );
        m.insert("frames_committed".to_string(), self.frames_committed.load(Ordering::Relaxed));
        m.insert("commits_deduped".to_string(), self.commits_deduped.load(Ordering::Relaxed));
        m.insert("commit_failures".to_string(), self.commit_failures.load(Ordering::Relaxed));
        m.insert(
            "journal_recovered_entries".to_string(),
            self.journal_recovered_entries.load(Ordering::Relaxed),
        );
        m.insert(
            "journal_corrupt_skipped".to_string(),
            self.journal_corrupt_skipped.load(Ordering::Relaxed),
        );
        m.insert("mask_fallbacks".to_string(), self.mask_fallbacks.load(Ordering::Relaxed));
        m
    }
}

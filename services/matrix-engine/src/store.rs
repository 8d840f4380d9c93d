//! Journal-backed snapshot store
//!
//! Owns the append-only journal plus an in-memory time index per matrix
//! type. A commit appends one entry (the atomicity unit) and only then
//! publishes the frame to the index, so readers observe a tick fully
//! committed or not at all. Re-committing an identical frame for an
//! existing `(matrix_type, ts_ms)` key is a no-op; a different frame
//! for the same key supersedes it, both live and on recovery replay
//! (later journal entries win).
//!
//! Retention bounds only the in-memory index; the journal on disk stays
//! append-only.

use crate::journal::{self, JournalConfig, JournalError, JournalWriter};
use crate::metrics::EngineMetrics;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use types::matrix::{Grid, MatrixFrame, MatrixType};
use types::symbol::{PairKey, Symbol};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
}

/// Outcome of a commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The frame was appended and published.
    Committed,
    /// An identical frame already exists under this key; nothing written.
    Deduplicated,
}

type TimeIndex = BTreeMap<MatrixType, BTreeMap<i64, Arc<MatrixFrame>>>;

/// Append-only, idempotently-upserted frame storage.
pub struct SnapshotStore {
    writer: Mutex<JournalWriter>,
    index: RwLock<TimeIndex>,
    journal_dir: PathBuf,
    retention_frames: usize,
    metrics: Arc<EngineMetrics>,
}

impl SnapshotStore {
    /// Open the store, replaying the journal into the in-memory index.
    ///
    /// Corrupt or truncated journal regions are discarded by checksum;
    /// surviving entries apply in write order, so a later entry for the
    /// same `(matrix_type, ts_ms)` supersedes an earlier one.
    pub fn open(
        config: JournalConfig,
        retention_frames: usize,
        metrics: Arc<EngineMetrics>,
    ) -> Result<Self, StoreError> {
        let journal_dir = config.dir.clone();
        let replayed = journal::replay(&config.dir)?;
        let mut writer = JournalWriter::open(config)?;
        writer.set_next_sequence(replayed.next_sequence);

        let mut index = TimeIndex::new();
        let recovered = replayed.records.len() as u64;
        for record in replayed.records {
            index
                .entry(record.matrix_type)
                .or_default()
                .insert(record.ts_ms, Arc::new(record.frame));
        }
        for frames in index.values_mut() {
            while frames.len() > retention_frames {
                frames.pop_first();
            }
        }

        metrics.record_recovery(recovered, replayed.corrupt_skipped);
        info!(
            recovered,
            corrupt_skipped = replayed.corrupt_skipped,
            "snapshot store recovered"
        );

        Ok(Self {
            writer: Mutex::new(writer),
            index: RwLock::new(index),
            journal_dir,
            retention_frames,
            metrics,
        })
    }

    /// Commit one frame under `(matrix_type, ts_ms)`.
    ///
    /// The append happens under the writer lock; the index write lock is
    /// taken only for the final publish, so readers of other timestamps
    /// are never blocked by the I/O.
    pub fn commit(
        &self,
        matrix_type: MatrixType,
        ts_ms: i64,
        frame: MatrixFrame,
    ) -> Result<CommitOutcome, StoreError> {
        {
            let index = self.index.read();
            if let Some(existing) = index.get(&matrix_type).and_then(|m| m.get(&ts_ms)) {
                if frames_identical(existing, &frame) {
                    self.metrics.record_commit_deduped();
                    debug!(matrix_type = %matrix_type, ts_ms, "identical re-commit deduplicated");
                    return Ok(CommitOutcome::Deduplicated);
                }
            }
        }

        {
            let mut writer = self.writer.lock();
            if let Err(e) = writer.append_frame(matrix_type, ts_ms, &frame) {
                self.metrics.record_commit_failure();
                return Err(e.into());
            }
        }

        let mut index = self.index.write();
        let frames = index.entry(matrix_type).or_default();
        frames.insert(ts_ms, Arc::new(frame));
        while frames.len() > self.retention_frames {
            frames.pop_first();
        }
        drop(index);

        self.metrics.record_frame_committed();
        Ok(CommitOutcome::Committed)
    }

    /// Timestamp of the most recent frame for `matrix_type`.
    pub fn latest(&self, matrix_type: MatrixType) -> Option<i64> {
        self.index
            .read()
            .get(&matrix_type)
            .and_then(|m| m.last_key_value())
            .map(|(ts, _)| *ts)
    }

    /// Greatest frame timestamp strictly before `ts_ms`.
    pub fn before(&self, matrix_type: MatrixType, ts_ms: i64) -> Option<i64> {
        self.index
            .read()
            .get(&matrix_type)
            .and_then(|m| m.range(..ts_ms).next_back())
            .map(|(ts, _)| *ts)
    }

    /// The committed frame at exactly `ts_ms`, if present.
    pub fn frame(&self, matrix_type: MatrixType, ts_ms: i64) -> Option<Arc<MatrixFrame>> {
        self.index
            .read()
            .get(&matrix_type)
            .and_then(|m| m.get(&ts_ms))
            .cloned()
    }

    /// Project the frame at `ts_ms` over `coins`, filling absent cells
    /// (including coins never stored) with the type's sentinel. An
    /// unknown timestamp yields an all-sentinel grid.
    pub fn grid_at(&self, matrix_type: MatrixType, ts_ms: i64, coins: &[Symbol]) -> Grid {
        match self.frame(matrix_type, ts_ms) {
            Some(frame) => Grid::from_frame(coins.to_vec(), &frame, matrix_type.sentinel()),
            None => Grid::filled(coins.to_vec(), matrix_type.sentinel()),
        }
    }

    /// The earliest finite value for `pair` among frames with
    /// `start_ms <= ts < end_ms`, in timestamp order.
    pub fn first_value_in_window(
        &self,
        matrix_type: MatrixType,
        pair: &PairKey,
        start_ms: i64,
        end_ms: i64,
    ) -> Option<f64> {
        let index = self.index.read();
        let frames = index.get(&matrix_type)?;
        frames
            .range(start_ms..end_ms)
            .find_map(|(_, frame)| frame.get(pair).copied().filter(|v| v.is_finite()))
    }

    /// Earliest finite value per pair among frames with
    /// `start_ms <= ts < end_ms`, across every pair in the window.
    ///
    /// When retention has already evicted the front of the window from
    /// the in-memory index, the on-disk journal (which stays append-only)
    /// is rescanned so evicted openings are still recovered. A journal
    /// read failure degrades to the index-only view.
    pub fn opening_values(
        &self,
        matrix_type: MatrixType,
        start_ms: i64,
        end_ms: i64,
    ) -> BTreeMap<PairKey, f64> {
        let window_covered = {
            let index = self.index.read();
            match index.get(&matrix_type).and_then(|m| m.first_key_value()) {
                Some((first_ts, _)) => *first_ts <= start_ms,
                None => true,
            }
        };

        if !window_covered {
            match journal::replay(&self.journal_dir) {
                Ok(replayed) => {
                    let mut by_ts: BTreeMap<i64, MatrixFrame> = BTreeMap::new();
                    for record in replayed.records {
                        if record.matrix_type == matrix_type
                            && record.ts_ms >= start_ms
                            && record.ts_ms < end_ms
                        {
                            // Later journal entries for a timestamp win.
                            by_ts.insert(record.ts_ms, record.frame);
                        }
                    }
                    let mut out = BTreeMap::new();
                    for frame in by_ts.values() {
                        collect_openings(&mut out, frame);
                    }
                    return out;
                }
                Err(e) => {
                    warn!(error = %e, "journal rescan for opening values failed");
                }
            }
        }

        let index = self.index.read();
        let mut out = BTreeMap::new();
        if let Some(frames) = index.get(&matrix_type) {
            for (_, frame) in frames.range(start_ms..end_ms) {
                collect_openings(&mut out, frame);
            }
        }
        out
    }

    /// The most recent `limit` frame timestamps, oldest first.
    pub fn recent_timestamps(&self, matrix_type: MatrixType, limit: usize) -> Vec<i64> {
        let index = self.index.read();
        let Some(frames) = index.get(&matrix_type) else {
            return Vec::new();
        };
        let mut out: Vec<i64> = frames.keys().rev().take(limit).copied().collect();
        out.reverse();
        out
    }

    /// Flush and fsync the journal (shutdown path).
    pub fn sync(&self) -> Result<(), StoreError> {
        self.writer.lock().sync()?;
        Ok(())
    }
}

fn collect_openings(out: &mut BTreeMap<PairKey, f64>, frame: &MatrixFrame) {
    for (pair, value) in frame {
        if value.is_finite() {
            out.entry(pair.clone()).or_insert(*value);
        }
    }
}

/// Bit-level frame equality, so NaN cells compare equal to themselves.
fn frames_identical(a: &MatrixFrame, b: &MatrixFrame) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|((ka, va), (kb, vb))| ka == kb && va.to_bits() == vb.to_bits())
}

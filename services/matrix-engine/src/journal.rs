//! Append-only frame journal with checksums
//!
//! Every commit appends one entry holding a complete matrix frame, so a
//! frame is durable entirely or not at all. Files rotate by size and are
//! never rewritten; recovery scans them in order, drops any corrupt or
//! truncated tail by checksum, and replays the survivors.
//!
//! # Binary Format (per entry)
//! ```text
//! [total_len: u32]
//! [sequence:  u64]
//! [ts_ms:     i64]
//! [label_len: u16][label: bytes]      // matrix type label
//! [payload_len: u32][payload: bytes]  // bincode frame
//! [checksum: u32]  // CRC32C over sequence+ts_ms+label+payload
//! ```

use crc32c::crc32c;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use types::matrix::{MatrixFrame, MatrixType};

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

// ── Journal Entry ───────────────────────────────────────────────────

/// A single journal entry holding one committed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    /// Monotonic write sequence, journal-internal.
    pub sequence: u64,
    /// Frame timestamp in epoch milliseconds.
    pub ts_ms: i64,
    /// Matrix type label ("benchmark", "pct_ref", ...).
    pub label: String,
    /// Bincode-serialized frame.
    pub payload: Vec<u8>,
    /// CRC32C over (sequence ++ ts_ms ++ label ++ payload).
    pub checksum: u32,
}

/// A decoded frame commit as replayed from the journal.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub sequence: u64,
    pub matrix_type: MatrixType,
    pub ts_ms: i64,
    pub frame: MatrixFrame,
}

impl JournalEntry {
    /// Create a new entry, computing the CRC32C checksum automatically.
    pub fn new(sequence: u64, ts_ms: i64, label: String, payload: Vec<u8>) -> Self {
        let checksum = Self::compute_checksum(sequence, ts_ms, &label, &payload);
        Self {
            sequence,
            ts_ms,
            label,
            payload,
            checksum,
        }
    }

    /// Build an entry for a frame commit.
    pub fn for_frame(
        sequence: u64,
        matrix_type: MatrixType,
        ts_ms: i64,
        frame: &MatrixFrame,
    ) -> Result<Self, JournalError> {
        let payload =
            bincode::serialize(frame).map_err(|e| JournalError::Serialization(e.to_string()))?;
        Ok(Self::new(
            sequence,
            ts_ms,
            matrix_type.label().to_string(),
            payload,
        ))
    }

    pub fn compute_checksum(sequence: u64, ts_ms: i64, label: &str, payload: &[u8]) -> u32 {
        let mut buf = Vec::with_capacity(8 + 8 + label.len() + payload.len());
        buf.extend_from_slice(&sequence.to_le_bytes());
        buf.extend_from_slice(&ts_ms.to_le_bytes());
        buf.extend_from_slice(label.as_bytes());
        buf.extend_from_slice(payload);
        crc32c(&buf)
    }

    /// Validate the stored checksum against a recomputed value.
    pub fn verify_checksum(&self) -> bool {
        let expected =
            Self::compute_checksum(self.sequence, self.ts_ms, &self.label, &self.payload);
        self.checksum == expected
    }

    /// Decode the payload back into a frame record.
    pub fn decode_frame(&self) -> Result<FrameRecord, JournalError> {
        let matrix_type = MatrixType::from_label(&self.label).ok_or_else(|| {
            JournalError::Serialization(format!("unknown matrix label {:?}", self.label))
        })?;
        let frame: MatrixFrame = bincode::deserialize(&self.payload)
            .map_err(|e| JournalError::Serialization(e.to_string()))?;
        Ok(FrameRecord {
            sequence: self.sequence,
            matrix_type,
            ts_ms: self.ts_ms,
            frame,
        })
    }

    /// Serialize the entry to the binary wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let label_bytes = self.label.as_bytes();
        let label_len = label_bytes.len() as u16;
        let payload_len = self.payload.len() as u32;

        // body = 8 (seq) + 8 (ts) + 2 (label_len) + label + 4 (pl_len) + payload + 4 (crc)
        let body_len: u32 = 8 + 8 + 2 + (label_len as u32) + 4 + payload_len + 4;

        let mut buf = Vec::with_capacity(4 + body_len as usize);
        buf.extend_from_slice(&body_len.to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.ts_ms.to_le_bytes());
        buf.extend_from_slice(&label_len.to_le_bytes());
        buf.extend_from_slice(label_bytes);
        buf.extend_from_slice(&payload_len.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Deserialize an entry from the binary wire format.
    ///
    /// Returns `(entry, bytes_consumed)`. Corruption surfaces as an
    /// error, never a panic.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), JournalError> {
        if data.len() < 4 {
            return Err(JournalError::Serialization(
                "not enough data for length prefix".into(),
            ));
        }

        let body_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;

        // Reject absurd lengths before trusting them (likely corruption).
        if body_len > 100_000_000 {
            return Err(JournalError::Serialization(format!(
                "implausible body length {} (likely corruption)",
                body_len
            )));
        }

        let total = 4 + body_len;
        if data.len() < total {
            return Err(JournalError::Serialization(format!(
                "incomplete entry: need {} bytes, have {}",
                total,
                data.len()
            )));
        }

        // Minimum body: 8 + 8 + 2 + 0 + 4 + 0 + 4 = 26
        if body_len < 26 {
            return Err(JournalError::Serialization(format!(
                "body too small: {} bytes, minimum is 26",
                body_len
            )));
        }

        let body = &data[4..total];
        let mut pos: usize = 0;

        let sequence = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
        pos += 8;

        let ts_ms = i64::from_le_bytes(body[pos..pos + 8].try_into().unwrap());
        pos += 8;

        let label_len = u16::from_le_bytes(body[pos..pos + 2].try_into().unwrap()) as usize;
        pos += 2;

        if pos + label_len > body.len() {
            return Err(JournalError::Serialization(format!(
                "label_len {} exceeds remaining body ({} bytes)",
                label_len,
                body.len() - pos
            )));
        }
        let label = String::from_utf8(body[pos..pos + label_len].to_vec())
            .map_err(|e| JournalError::Serialization(e.to_string()))?;
        pos += label_len;

        if pos + 4 > body.len() {
            return Err(JournalError::Serialization(
                "not enough data for payload length".into(),
            ));
        }
        let payload_len = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;

        if pos + payload_len > body.len() {
            return Err(JournalError::Serialization(format!(
                "payload_len {} exceeds remaining body ({} bytes)",
                payload_len,
                body.len() - pos
            )));
        }
        let payload = body[pos..pos + payload_len].to_vec();
        pos += payload_len;

        if pos + 4 > body.len() {
            return Err(JournalError::Serialization(
                "not enough data for checksum".into(),
            ));
        }
        let checksum = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap());

        let entry = Self {
            sequence,
            ts_ms,
            label,
            payload,
            checksum,
        };
        Ok((entry, total))
    }
}

// ── Journal Writer ──────────────────────────────────────────────────

/// Configuration for the journal writer.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Directory for journal files.
    pub dir: PathBuf,
    /// Maximum file size in bytes before rotation.
    pub max_file_size: u64,
}

impl JournalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_file_size: 64 * 1024 * 1024, // 64 MiB
        }
    }
}

/// Append-only journal writer with checksums and size rotation.
///
/// Every append flushes to the OS so the in-memory index never gets
/// ahead of the file; `sync` additionally fsyncs (rotation and
/// shutdown paths).
pub struct JournalWriter {
    config: JournalConfig,
    writer: BufWriter<File>,
    current_file: PathBuf,
    current_file_size: u64,
    next_sequence: u64,
    file_index: u64,
}

impl JournalWriter {
    /// Open a writer positioned at the newest journal file, creating the
    /// directory if needed.
    pub fn open(config: JournalConfig) -> Result<Self, JournalError> {
        fs::create_dir_all(&config.dir)?;

        let file_index = Self::find_latest_index(&config.dir);
        let current_file = Self::journal_path(&config.dir, file_index);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&current_file)?;
        let current_file_size = file.metadata()?.len();

        Ok(Self {
            config,
            writer: BufWriter::new(file),
            current_file,
            current_file_size,
            next_sequence: 0, // set after recovery replay
            file_index,
        })
    }

    /// Set the next sequence number (after recovery).
    pub fn set_next_sequence(&mut self, seq: u64) {
        self.next_sequence = seq;
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn current_file_path(&self) -> &Path {
        &self.current_file
    }

    /// Append one frame commit and flush it.
    pub fn append_frame(
        &mut self,
        matrix_type: MatrixType,
        ts_ms: i64,
        frame: &MatrixFrame,
    ) -> Result<JournalEntry, JournalError> {
        if self.current_file_size >= self.config.max_file_size {
            self.rotate()?;
        }

        let entry = JournalEntry::for_frame(self.next_sequence, matrix_type, ts_ms, frame)?;
        let bytes = entry.to_bytes();
        self.writer.write_all(&bytes)?;
        self.writer.flush()?;

        self.current_file_size += bytes.len() as u64;
        self.next_sequence += 1;
        Ok(entry)
    }

    /// Flush and fsync the current file (shutdown / rotation path).
    pub fn sync(&mut self) -> Result<(), JournalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), JournalError> {
        self.sync()?;

        self.file_index += 1;
        self.current_file = Self::journal_path(&self.config.dir, self.file_index);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.current_file)?;
        self.writer = BufWriter::new(file);
        self.current_file_size = 0;
        debug!(file = %self.current_file.display(), "journal rotated");
        Ok(())
    }

    fn journal_path(dir: &Path, index: u64) -> PathBuf {
        dir.join(format!("matrix-{:06}.bin", index))
    }

    fn find_latest_index(dir: &Path) -> u64 {
        Self::discover_indices(dir).last().copied().unwrap_or(0)
    }

    fn discover_indices(dir: &Path) -> Vec<u64> {
        let mut indices: Vec<u64> = fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| {
                        let name = e.file_name().to_string_lossy().to_string();
                        if name.starts_with("matrix-") && name.ends_with(".bin") {
                            name.trim_start_matches("matrix-")
                                .trim_end_matches(".bin")
                                .parse::<u64>()
                                .ok()
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        indices.sort_unstable();
        indices
    }
}

// ── Replay ──────────────────────────────────────────────────────────

/// Result of scanning every journal file in order.
#[derive(Debug, Default)]
pub struct Replay {
    /// Surviving records in write order.
    pub records: Vec<FrameRecord>,
    /// Corrupt or truncated regions discarded.
    pub corrupt_skipped: u64,
    /// One past the highest sequence seen (next sequence to write).
    pub next_sequence: u64,
}

/// Scan all journal files under `dir` and replay intact entries.
///
/// A framing error (bad length prefix, short read, checksum mismatch)
/// makes the rest of that file untrustworthy, so scanning resumes at
/// the next file. An entry whose payload will not decode is skipped on
/// its own since the framing still delimits it.
pub fn replay(dir: &Path) -> Result<Replay, JournalError> {
    let mut out = Replay::default();
    if !dir.exists() {
        return Ok(out);
    }

    for index in JournalWriter::discover_indices(dir) {
        let path = JournalWriter::journal_path(dir, index);
        let data = fs::read(&path)?;
        let mut offset = 0usize;

        while offset < data.len() {
            let (entry, consumed) = match JournalEntry::from_bytes(&data[offset..]) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(
                        file = %path.display(),
                        offset,
                        error = %e,
                        "journal tail discarded"
                    );
                    out.corrupt_skipped += 1;
                    break;
                }
            };

            if !entry.verify_checksum() {
                warn!(
                    file = %path.display(),
                    offset,
                    sequence = entry.sequence,
                    "journal checksum mismatch, tail discarded"
                );
                out.corrupt_skipped += 1;
                break;
            }

            offset += consumed;

            match entry.decode_frame() {
                Ok(record) => {
                    out.next_sequence = out.next_sequence.max(record.sequence + 1);
                    out.records.push(record);
                }
                Err(e) => {
                    warn!(
                        file = %path.display(),
                        sequence = entry.sequence,
                        error = %e,
                        "undecodable journal entry skipped"
                    );
                    out.corrupt_skipped += 1;
                }
            }
        }
    }

    Ok(out)
}

// ── Tests ───────────────────────────────────────────────────────────

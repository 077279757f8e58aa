//! Journal Writer: Append-only record journal with checksums
//!
//! Every record gets a writer-assigned, gapless sequence number starting at
//! 1. Records are framed and checksummed so a reader can tell a torn tail
//! (crash mid-append) from real corruption.
//!
//! # Binary Format (per record)
//! ```text
//! [body_len:    u32]
//! [sequence:    u64]
//! [timestamp:   i64]
//! [payload_len: u32][payload: bytes]
//! [checksum:    u32]  // CRC32C over sequence+timestamp+payload
//! ```
//! All integers are little-endian.

use crate::segment::{list_segments, segment_path};
use crc32c::crc32c_append;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Largest payload a single record may carry.
pub const MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;
// sequence + timestamp + payload_len + checksum
const FIXED_BODY: usize = 8 + 8 + 4 + 4;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Corrupt journal segment {segment}: {detail} at byte offset {offset}")]
    Corrupt {
        segment: PathBuf,
        offset: u64,
        detail: String,
    },

    #[error("Payload of {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Journal writer is poisoned by an earlier failed write")]
    Poisoned,
}

/// Why a frame could not be decoded from a byte slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The slice ends before the frame does.
    Incomplete { needed: usize, available: usize },
    /// The frame header is structurally impossible.
    Malformed(String),
    /// The frame is complete but its checksum does not match.
    ChecksumMismatch { sequence: u64 },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Incomplete { needed, available } => {
                write!(f, "incomplete frame: need {} bytes, have {}", needed, available)
            }
            FrameError::Malformed(detail) => write!(f, "malformed frame: {}", detail),
            FrameError::ChecksumMismatch { sequence } => {
                write!(f, "CRC32C mismatch for seq={}", sequence)
            }
        }
    }
}

// ── Journal Entry ───────────────────────────────────────────────────

/// One persisted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub sequence: u64,
    /// Caller-supplied time, Unix milliseconds
    pub timestamp: i64,
    pub payload: Vec<u8>,
}

impl JournalEntry {
    pub fn checksum(&self) -> u32 {
        frame_checksum(self.sequence, self.timestamp, &self.payload)
    }

    /// Size of this record on disk.
    pub fn encoded_len(&self) -> usize {
        LEN_PREFIX + FIXED_BODY + self.payload.len()
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let body_len = (FIXED_BODY + self.payload.len()) as u32;
        buf.reserve(self.encoded_len());
        buf.extend_from_slice(&body_len.to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.checksum().to_le_bytes());
    }

    /// Decode the frame at the start of `data`.
    ///
    /// Returns `(entry, bytes_consumed)`.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), FrameError> {
        let body_len = match read_u32(data, 0) {
            Some(len) => len as usize,
            None => {
                return Err(FrameError::Incomplete {
                    needed: LEN_PREFIX,
                    available: data.len(),
                })
            }
        };
        if body_len < FIXED_BODY || body_len > FIXED_BODY + MAX_PAYLOAD_BYTES {
            return Err(FrameError::Malformed(format!("implausible body length {}", body_len)));
        }

        let total = LEN_PREFIX + body_len;
        if data.len() < total {
            return Err(FrameError::Incomplete {
                needed: total,
                available: data.len(),
            });
        }

        let body = &data[LEN_PREFIX..total];
        let sequence = read_u64(body, 0).unwrap_or_default();
        let timestamp = read_u64(body, 8).unwrap_or_default() as i64;
        let payload_len = read_u32(body, 16).unwrap_or_default() as usize;
        if payload_len != body_len - FIXED_BODY {
            return Err(FrameError::Malformed(format!(
                "payload length {} disagrees with body length {}",
                payload_len, body_len
            )));
        }
        let payload = body[20..20 + payload_len].to_vec();
        let stored = read_u32(body, 20 + payload_len).unwrap_or_default();

        let entry = Self {
            sequence,
            timestamp,
            payload,
        };
        if entry.checksum() != stored {
            return Err(FrameError::ChecksumMismatch { sequence });
        }
        Ok((entry, total))
    }
}

fn frame_checksum(sequence: u64, timestamp: i64, payload: &[u8]) -> u32 {
    let crc = crc32c_append(0, &sequence.to_le_bytes());
    let crc = crc32c_append(crc, &timestamp.to_le_bytes());
    crc32c_append(crc, payload)
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at + 4)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

fn read_u64(data: &[u8], at: usize) -> Option<u64> {
    let bytes = data.get(at..at + 8)?;
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}

/// Result of walking the valid frames at the start of a segment.
#[derive(Debug)]
pub struct SegmentScan {
    /// Bytes covered by complete, checksum-valid frames.
    pub valid_len: usize,
    pub entries: usize,
    pub last_sequence: Option<u64>,
    /// Why scanning stopped before the end of the data, if it did.
    pub stopped_by: Option<FrameError>,
}

impl SegmentScan {
    pub fn is_torn_tail(&self) -> bool {
        matches!(self.stopped_by, Some(FrameError::Incomplete { .. }))
    }
}

/// Walk frames from the start of `data` until the end or the first bad frame.
pub fn scan_segment(data: &[u8]) -> SegmentScan {
    let mut scan = SegmentScan {
        valid_len: 0,
        entries: 0,
        last_sequence: None,
        stopped_by: None,
    };
    while scan.valid_len < data.len() {
        match JournalEntry::decode(&data[scan.valid_len..]) {
            Ok((entry, consumed)) => {
                scan.valid_len += consumed;
                scan.entries += 1;
                scan.last_sequence = Some(entry.sequence);
            }
            Err(err) => {
                scan.stopped_by = Some(err);
                break;
            }
        }
    }
    scan
}

// ── Sync Policy ─────────────────────────────────────────────────────

/// Controls when `fsync` is called. Buffered data is handed to the OS after
/// every append regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    EveryWrite,
    EveryN(usize),
    /// Only on rotation and explicit `sync()`.
    Manual,
}

// ── Journal Writer Configuration ────────────────────────────────────

#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub dir: PathBuf,
    /// Segment size that triggers rotation (default 64 MiB).
    pub segment_bytes: u64,
    pub sync_policy: SyncPolicy,
}

impl JournalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            segment_bytes: 64 * 1024 * 1024,
            sync_policy: SyncPolicy::EveryN(64),
        }
    }
}

// ── Journal Writer ──────────────────────────────────────────────────

/// Append-only journal writer.
///
/// Opening an existing directory resumes after the last valid record,
/// cutting off a torn tail left by a crash mid-append.
pub struct JournalWriter {
    config: JournalConfig,
    writer: BufWriter<File>,
    segment_index: u64,
    segment_size: u64,
    next_sequence: u64,
    writes_since_sync: usize,
    truncated_bytes: u64,
    poisoned: bool,
}

impl JournalWriter {
    pub fn open(config: JournalConfig) -> Result<Self, JournalError> {
        Self::open_after(config, 0)
    }

    /// Open so that the next record is numbered after both the last record
    /// on disk and `floor`. Used when the records up to `floor` have been
    /// pruned and are only held by a snapshot.
    pub fn open_after(config: JournalConfig, floor: u64) -> Result<Self, JournalError> {
        fs::create_dir_all(&config.dir)?;
        let segments = list_segments(&config.dir)?;

        let mut segment_index = 0;
        let mut segment_size = 0;
        let mut truncated_bytes = 0;
        let mut last_sequence = None;

        if let Some((index, path)) = segments.last() {
            let data = fs::read(path)?;
            let scan = scan_segment(&data);
            match &scan.stopped_by {
                None => {}
                Some(FrameError::Incomplete { .. }) => {
                    let file = OpenOptions::new().write(true).open(path)?;
                    file.set_len(scan.valid_len as u64)?;
                    file.sync_all()?;
                    truncated_bytes = (data.len() - scan.valid_len) as u64;
                }
                Some(err) => {
                    return Err(JournalError::Corrupt {
                        segment: path.clone(),
                        offset: scan.valid_len as u64,
                        detail: err.to_string(),
                    })
                }
            }
            segment_index = *index;
            segment_size = scan.valid_len as u64;
            last_sequence = scan.last_sequence;

            // An empty newest segment (fresh rotation) inherits the sequence
            // from the segments before it.
            for (_, earlier) in segments.iter().rev().skip(1) {
                if last_sequence.is_some() {
                    break;
                }
                last_sequence = scan_segment(&fs::read(earlier)?).last_sequence;
            }
        }

        let file = Self::open_segment(&config.dir, segment_index)?;
        Ok(Self {
            config,
            writer: BufWriter::new(file),
            segment_index,
            segment_size,
            next_sequence: last_sequence.map_or(1, |seq| seq + 1).max(floor + 1),
            writes_since_sync: 0,
            truncated_bytes,
            poisoned: false,
        })
    }

    /// Append one record, returning its sequence number.
    pub fn append(&mut self, timestamp: i64, payload: &[u8]) -> Result<u64, JournalError> {
        if self.poisoned {
            return Err(JournalError::Poisoned);
        }
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(JournalError::PayloadTooLarge {
                size: payload.len(),
                limit: MAX_PAYLOAD_BYTES,
            });
        }
        if self.segment_size >= self.config.segment_bytes {
            self.rotate()?;
        }

        let entry = JournalEntry {
            sequence: self.next_sequence,
            timestamp,
            payload: payload.to_vec(),
        };
        let mut frame = Vec::new();
        entry.encode_into(&mut frame);

        // A partially written frame would corrupt everything appended after
        // it, so any failure here stops the writer.
        if let Err(err) = self.write_frame(&frame) {
            self.poisoned = true;
            return Err(err);
        }

        self.segment_size += frame.len() as u64;
        self.next_sequence += 1;
        Ok(entry.sequence)
    }

    /// Flush and fsync the current segment.
    pub fn sync(&mut self) -> Result<(), JournalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.writes_since_sync = 0;
        Ok(())
    }

    /// Start a fresh segment and delete every earlier one.
    ///
    /// Only call once the state those records produced is durable
    /// elsewhere. Returns the number of segments removed.
    pub fn prune_sealed(&mut self) -> Result<usize, JournalError> {
        if self.segment_size > 0 {
            self.rotate()?;
        } else {
            self.sync()?;
        }
        let mut removed = 0;
        for (index, path) in list_segments(&self.config.dir)? {
            if index >= self.segment_index {
                break;
            }
            fs::remove_file(path)?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Sequence number the next append will receive.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Bytes of torn tail discarded when the writer was opened.
    pub fn truncated_bytes(&self) -> u64 {
        self.truncated_bytes
    }

    pub fn current_segment_path(&self) -> PathBuf {
        segment_path(&self.config.dir, self.segment_index)
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    // ── Internal Helpers ────────────────────────────────────────────

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), JournalError> {
        self.writer.write_all(frame)?;
        self.writer.flush()?;
        self.writes_since_sync += 1;

        let due = match self.config.sync_policy {
            SyncPolicy::EveryWrite => true,
            SyncPolicy::EveryN(n) => self.writes_since_sync >= n.max(1),
            SyncPolicy::Manual => false,
        };
        if due {
            self.writer.get_ref().sync_all()?;
            self.writes_since_sync = 0;
        }
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), JournalError> {
        self.sync()?;
        self.segment_index += 1;
        let file = Self::open_segment(&self.config.dir, self.segment_index)?;
        self.writer = BufWriter::new(file);
        self.segment_size = 0;
        Ok(())
    }

    fn open_segment(dir: &Path, index: u64) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(segment_path(dir, index))
    }
}

// ── Tests ───────────────────────────────────────────────────────────

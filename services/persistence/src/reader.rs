//! Journal Reader: Sequential replay with corruption detection
//!
//! Reads every segment in index order and validates:
//! - CRC32C of every frame
//! - gapless, monotonic sequence numbers across segments
//!
//! An incomplete frame at the very end of the newest segment is a torn tail
//! from a crash mid-append: it is reported and reading stops cleanly. The
//! same thing anywhere else is corruption.

use crate::journal::{FrameError, JournalEntry};
use crate::segment::list_segments;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Checksum mismatch in {segment:?} at byte offset {offset}: entry seq={sequence}")]
    ChecksumMismatch {
        segment: PathBuf,
        offset: u64,
        sequence: u64,
    },

    #[error("Corruption in {segment:?} at byte offset {offset}: {detail}")]
    Corruption {
        segment: PathBuf,
        offset: u64,
        detail: String,
    },

    #[error("Sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },
}

/// A torn final frame that the reader skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TornTail {
    pub segment: PathBuf,
    pub offset: u64,
    pub bytes: u64,
}

// ── Journal Reader ──────────────────────────────────────────────────

pub struct JournalReader {
    segments: Vec<PathBuf>,
    segment_idx: usize,
    data: Vec<u8>,
    pos: usize,
    expected_sequence: Option<u64>,
    torn_tail: Option<TornTail>,
}

impl JournalReader {
    /// Open a reader over every segment in `dir`. A missing directory reads
    /// as an empty journal.
    pub fn open(dir: &Path) -> Result<Self, ReaderError> {
        let segments = list_segments(dir)?.into_iter().map(|(_, path)| path).collect();
        let mut reader = Self {
            segments,
            segment_idx: 0,
            data: Vec::new(),
            pos: 0,
            expected_sequence: None,
            torn_tail: None,
        };
        reader.load_segment()?;
        Ok(reader)
    }

    /// Next valid entry, or `None` once the journal is exhausted.
    pub fn next_entry(&mut self) -> Result<Option<JournalEntry>, ReaderError> {
        loop {
            if self.pos >= self.data.len() {
                if !self.advance_segment()? {
                    return Ok(None);
                }
                continue;
            }

            let offset = self.pos as u64;
            match JournalEntry::decode(&self.data[self.pos..]) {
                Ok((entry, consumed)) => {
                    if let Some(expected) = self.expected_sequence {
                        if entry.sequence != expected {
                            return Err(ReaderError::SequenceGap {
                                expected,
                                got: entry.sequence,
                            });
                        }
                    }
                    self.pos += consumed;
                    self.expected_sequence = Some(entry.sequence + 1);
                    return Ok(Some(entry));
                }
                Err(FrameError::Incomplete { .. }) if self.is_last_segment() => {
                    self.torn_tail = Some(TornTail {
                        segment: self.current_segment(),
                        offset,
                        bytes: (self.data.len() - self.pos) as u64,
                    });
                    self.pos = self.data.len();
                }
                Err(FrameError::ChecksumMismatch { sequence }) => {
                    return Err(ReaderError::ChecksumMismatch {
                        segment: self.current_segment(),
                        offset,
                        sequence,
                    });
                }
                Err(err) => {
                    return Err(ReaderError::Corruption {
                        segment: self.current_segment(),
                        offset,
                        detail: err.to_string(),
                    });
                }
            }
        }
    }

    pub fn read_all(&mut self) -> Result<Vec<JournalEntry>, ReaderError> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// The torn tail skipped so far, if any.
    pub fn torn_tail(&self) -> Option<&TornTail> {
        self.torn_tail.as_ref()
    }

    /// Sequence of the last entry returned.
    pub fn last_sequence(&self) -> Option<u64> {
        self.expected_sequence.map(|next| next - 1)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    // ── Internal Helpers ────────────────────────────────────────────

    fn is_last_segment(&self) -> bool {
        self.segment_idx + 1 >= self.segments.len()
    }

    fn current_segment(&self) -> PathBuf {
        self.segments.get(self.segment_idx).cloned().unwrap_or_default()
    }

    fn load_segment(&mut self) -> Result<(), ReaderError> {
        self.data = match self.segments.get(self.segment_idx) {
            Some(path) => fs::read(path)?,
            None => Vec::new(),
        };
        self.pos = 0;
        Ok(())
    }

    fn advance_segment(&mut self) -> Result<bool, ReaderError> {
        if self.segment_idx + 1 >= self.segments.len() {
            return Ok(false);
        }
        self.segment_idx += 1;
        self.load_segment()?;
        Ok(true)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

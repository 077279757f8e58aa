//! Snapshots: checksummed state images that let the journal be pruned
//!
//! A snapshot captures the caller's state as it stood after journal record
//! `sequence`. Recovery loads the newest snapshot and replays only the
//! records after it, so every segment the snapshot covers can be deleted.
//!
//! Files are named `snapshot-NNNNNNNNNNNN.snap` and live next to the
//! journal segments. Writes go through a temp file, fsync and rename, so a
//! crash never leaves a half-written snapshot under the final name.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Integrity check failed for {path:?}: expected {expected}, got {actual}")]
    IntegrityFailure {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),
}

// ── Snapshot ────────────────────────────────────────────────────────

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

const PREFIX: &str = "snapshot-";
const SUFFIX: &str = ".snap";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    /// Last journal sequence folded into `state`.
    pub sequence: u64,
    /// Wall-clock epoch millis when the snapshot was taken.
    pub taken_at: i64,
    /// bincode-encoded state.
    pub state: Vec<u8>,
    /// SHA-256 of `state`, lowercase hex.
    pub checksum: String,
}

impl Snapshot {
    pub fn new<T: Serialize>(sequence: u64, taken_at: i64, state: &T) -> Result<Self, SnapshotError> {
        let state =
            bincode::serialize(state).map_err(|e| SnapshotError::Serialization(e.to_string()))?;
        let checksum = state_hash(&state);
        Ok(Self {
            version: SNAPSHOT_VERSION,
            sequence,
            taken_at,
            state,
            checksum,
        })
    }

    pub fn verify_integrity(&self) -> bool {
        state_hash(&self.state) == self.checksum
    }

    /// Decode the captured state.
    pub fn decode_state<T: DeserializeOwned>(&self) -> Result<T, SnapshotError> {
        bincode::deserialize(&self.state).map_err(|e| SnapshotError::Serialization(e.to_string()))
    }
}

fn state_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Path of the snapshot taken at `sequence`.
pub fn snapshot_path(dir: &Path, sequence: u64) -> PathBuf {
    dir.join(format!("{}{:012}{}", PREFIX, sequence, SUFFIX))
}

fn parse_snapshot_name(name: &str) -> Option<u64> {
    name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?.parse().ok()
}

// ── Snapshot Store ──────────────────────────────────────────────────

/// Reads and writes the snapshots of one journal directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Atomically write `snapshot`: temp file, fsync, rename.
    pub fn write(&self, snapshot: &Snapshot) -> Result<PathBuf, SnapshotError> {
        fs::create_dir_all(&self.dir)?;
        let data =
            bincode::serialize(snapshot).map_err(|e| SnapshotError::Serialization(e.to_string()))?;

        let path = snapshot_path(&self.dir, snapshot.sequence);
        let tmp_path = path.with_extension("snap.tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;
        Ok(path)
    }

    /// Load and verify one snapshot file.
    pub fn load(&self, path: &Path) -> Result<Snapshot, SnapshotError> {
        let data = fs::read(path)?;
        let snapshot: Snapshot =
            bincode::deserialize(&data).map_err(|e| SnapshotError::Serialization(e.to_string()))?;

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(snapshot.version));
        }
        if !snapshot.verify_integrity() {
            return Err(SnapshotError::IntegrityFailure {
                path: path.to_path_buf(),
                expected: snapshot.checksum.clone(),
                actual: state_hash(&snapshot.state),
            });
        }
        Ok(snapshot)
    }

    /// The snapshot with the highest sequence, if any exist.
    pub fn load_latest(&self) -> Result<Option<Snapshot>, SnapshotError> {
        match self.list()?.pop() {
            Some((_, path)) => self.load(&path).map(Some),
            None => Ok(None),
        }
    }

    /// All snapshots as (sequence, path), ascending. A missing directory
    /// has none.
    pub fn list(&self) -> Result<Vec<(u64, PathBuf)>, SnapshotError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(sequence) = parse_snapshot_name(&name.to_string_lossy()) {
                snapshots.push((sequence, entry.path()));
            }
        }
        snapshots.sort_by_key(|(sequence, _)| *sequence);
        Ok(snapshots)
    }

    /// Delete all but the newest `keep` snapshots. Returns how many went.
    pub fn retain_latest(&self, keep: usize) -> Result<usize, SnapshotError> {
        let snapshots = self.list()?;
        let excess = snapshots.len().saturating_sub(keep);
        for (_, path) in snapshots.iter().take(excess) {
            fs::remove_file(path)?;
        }
        Ok(excess)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

// ── Snapshot Interval ───────────────────────────────────────────────

/// Snapshot every `every` journal records. Zero disables snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotInterval {
    pub every: u64,
    pub last_sequence: u64,
}

impl SnapshotInterval {
    pub fn new(every: u64, last_sequence: u64) -> Self {
        Self {
            every,
            last_sequence,
        }
    }

    pub fn is_due(&self, sequence: u64) -> bool {
        self.every > 0 && sequence >= self.last_sequence.saturating_add(self.every)
    }

    pub fn record(&mut self, sequence: u64) {
        self.last_sequence = sequence;
    }
}

// ── Tests ───────────────────────────────────────────────────────────

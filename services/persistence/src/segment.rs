//! Segment file naming and discovery
//!
//! A journal directory holds numbered segment files `journal-NNNNNN.bin`.
//! Segments are written in index order; only the highest-numbered segment is
//! ever appended to.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const PREFIX: &str = "journal-";
const SUFFIX: &str = ".bin";

/// Path of the segment with the given index.
pub fn segment_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{}{:06}{}", PREFIX, index, SUFFIX))
}

/// Parse a segment index out of a file name, if it is one.
pub fn parse_segment_name(name: &str) -> Option<u64> {
    name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?.parse().ok()
}

/// All segments in `dir`, sorted by index. A missing directory has none.
pub fn list_segments(dir: &Path) -> io::Result<Vec<(u64, PathBuf)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if let Some(index) = parse_segment_name(&name.to_string_lossy()) {
            segments.push((index, entry.path()));
        }
    }
    segments.sort_by_key(|(index, _)| *index);
    Ok(segments)
}

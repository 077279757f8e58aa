//! Changelog manifest
//!
//! Lane journals are only meaningful under the partitioning and window size
//! that wrote them. The manifest pins both at the changelog root; opening the
//! root with different settings is refused instead of silently mixing state.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{ConfigError, ProcessorConfig};
use crate::partition::SymbolPartitioning;

pub const MANIFEST_FILE: &str = "MANIFEST.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangelogManifest {
    pub partitioning: SymbolPartitioning,
    pub window_size_ms: i64,
}

impl ChangelogManifest {
    pub fn for_config(config: &ProcessorConfig) -> Self {
        Self {
            partitioning: config.symbol_partitioning,
            window_size_ms: config.window_size.as_millis(),
        }
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }

    /// Read the manifest in `dir`, if one was written.
    pub fn load(dir: &Path) -> Result<Option<Self>, ConfigError> {
        let path = Self::path(dir);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| ConfigError::Manifest(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::Manifest(format!("{}: {}", path.display(), e))),
        }
    }

    /// Verify `dir` was written with these settings, or claim it if new.
    pub fn check_or_write(&self, dir: &Path) -> Result<(), ConfigError> {
        match Self::load(dir)? {
            Some(found) if found == *self => Ok(()),
            Some(found) => Err(ConfigError::IncompatibleChangelog {
                dir: dir.to_path_buf(),
                found: found.to_string(),
                configured: self.to_string(),
            }),
            None => {
                fs::create_dir_all(dir)
                    .map_err(|e| ConfigError::Manifest(format!("{}: {}", dir.display(), e)))?;
                let json = serde_json::to_vec_pretty(self)
                    .map_err(|e| ConfigError::Manifest(e.to_string()))?;
                let path = Self::path(dir);
                fs::write(&path, json)
                    .map_err(|e| ConfigError::Manifest(format!("{}: {}", path.display(), e)))?;
                info!(path = %path.display(), manifest = %self, "Changelog manifest written");
                Ok(())
            }
        }
    }
}

impl fmt::Display for ChangelogManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "partitioning={} window={}ms",
            self.partitioning, self.window_size_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manifest(lanes: usize) -> ChangelogManifest {
        ChangelogManifest {
            partitioning: SymbolPartitioning::Hashed { lanes },
            window_size_ms: 300_000,
        }
    }

    #[test]
    fn test_first_open_writes_manifest() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("changelog");
        manifest(4).check_or_write(&dir).unwrap();
        assert_eq!(ChangelogManifest::load(&dir).unwrap(), Some(manifest(4)));
        // same settings reopen fine
        manifest(4).check_or_write(&dir).unwrap();
    }

    #[test]
    fn test_changed_partitioning_is_refused() {
        let tmp = TempDir::new().unwrap();
        manifest(4).check_or_write(tmp.path()).unwrap();
        let err = manifest(8).check_or_write(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::IncompatibleChangelog { .. }));
    }

    #[test]
    fn test_garbage_manifest_is_an_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(ChangelogManifest::path(tmp.path()), b"not json").unwrap();
        assert!(matches!(
            ChangelogManifest::load(tmp.path()),
            Err(ConfigError::Manifest(_))
        ));
    }
}

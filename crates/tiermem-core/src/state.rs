//! Crash-safe state files.
//!
//! Every state file (warm set, tree index, hot state, import checkpoint) is
//! written to a sibling temp file, synced, then renamed over the target. A
//! state file that no longer parses is quarantined next to the original and
//! replaced by a default value so the invocation can continue.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{MemError, Result};

/// A value loaded from disk, plus where the previous copy was moved if it was corrupt.
#[derive(Debug)]
pub struct Loaded<T> {
    pub value: T,
    pub quarantined: Option<PathBuf>,
}

/// Serialize `value` as 2-space indented JSON with a trailing newline and
/// atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write_bytes_atomic(path, &bytes)
}

/// Atomically replace `path` with `bytes` (temp file in the same directory, fsync, rename).
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|e| MemError::io_at(parent, e))?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|e| MemError::io_at(parent, e))?;
    temp.write_all(bytes)
        .map_err(|e| MemError::io_at(temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| MemError::io_at(temp.path(), e))?;
    temp.persist(path)
        .map_err(|e| MemError::io_at(path, e.error))?;

    debug!(path = %path.display(), bytes = bytes.len(), "state file written");
    Ok(())
}

/// Load a JSON state file, falling back to `T::default()` when it is missing.
///
/// A file that exists but does not parse is renamed to
/// `<name>.corrupt-<YYYYMMDDTHHMMSS>` and the default is returned.
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<Loaded<T>> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Loaded {
                value: T::default(),
                quarantined: None,
            });
        }
        Err(e) => return Err(MemError::io_at(path, e)),
    };

    match serde_json::from_slice::<T>(&raw) {
        Ok(value) => Ok(Loaded {
            value,
            quarantined: None,
        }),
        Err(parse_err) => {
            let target = quarantine_path(path);
            std::fs::rename(path, &target).map_err(|e| MemError::io_at(path, e))?;
            let err = MemError::Corruption {
                path: path.to_path_buf(),
                reason: parse_err.to_string(),
            };
            warn!(
                error = %err,
                quarantined = %target.display(),
                "state file quarantined, continuing with defaults"
            );
            Ok(Loaded {
                value: T::default(),
                quarantined: Some(target),
            })
        }
    }
}

fn quarantine_path(path: &Path) -> PathBuf {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "state".to_string());
    let mut candidate = path.with_file_name(format!("{name}.corrupt-{stamp}"));
    let mut n = 1;
    while candidate.exists() {
        candidate = path.with_file_name(format!("{name}.corrupt-{stamp}-{n}"));
        n += 1;
    }
    candidate
}

//! Per-file import checkpoints.
//!
//! Each source file is remembered as `{size, mtime, byte_offset, fingerprint}`.
//! Classification checks the fingerprint and size before trusting mtime or the
//! saved offset, so a compacted or rewritten file is always re-read in full.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tiermem_core::hash::fingerprint;
use tiermem_core::{MemError, Result, load_json_or_default, write_json_atomic};
use tracing::{debug, info};

/// Bytes of file header covered by the fingerprint.
pub const FINGERPRINT_BYTES: usize = 1024;
pub const CHECKPOINT_VERSION: u32 = 1;

/// What a file looks like on disk right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileProbe {
    pub size: u64,
    pub mtime_ns: u64,
    header: Vec<u8>,
}

impl FileProbe {
    /// Stat `path` and read up to [`FINGERPRINT_BYTES`] of its header.
    pub fn read(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path).map_err(|e| MemError::io_at(path, e))?;
        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        let mut header = Vec::with_capacity(FINGERPRINT_BYTES);
        File::open(path)
            .map_err(|e| MemError::io_at(path, e))?
            .take(FINGERPRINT_BYTES as u64)
            .read_to_end(&mut header)
            .map_err(|e| MemError::io_at(path, e))?;

        Ok(Self {
            size: meta.len(),
            mtime_ns,
            header,
        })
    }

    /// Fingerprint of the first `len` bytes, or `None` if the file is now shorter.
    pub fn fingerprint(&self, len: usize) -> Option<String> {
        self.header.get(..len).map(fingerprint)
    }

    /// Bytes covered when this probe is committed.
    pub fn fingerprint_len(&self) -> usize {
        self.header.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub size: u64,
    pub mtime_ns: u64,
    pub byte_offset: u64,
    pub fingerprint: String,
    #[serde(default = "default_fingerprint_len")]
    pub fingerprint_len: usize,
    pub last_imported_at: DateTime<Utc>,
}

fn default_fingerprint_len() -> usize {
    FINGERPRINT_BYTES
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Skip,
    Incremental,
    Full,
}

/// Decide how to read a file given its saved entry.
///
/// Returns the action and the byte offset to start from.
pub fn classify(entry: Option<&CheckpointEntry>, probe: &FileProbe) -> (Action, u64) {
    let Some(entry) = entry else {
        return (Action::Full, 0);
    };
    if probe.fingerprint(entry.fingerprint_len).as_deref() != Some(entry.fingerprint.as_str()) {
        debug!("header fingerprint changed");
        return (Action::Full, 0);
    }
    if probe.size < entry.size {
        debug!(old = entry.size, new = probe.size, "file shrank");
        return (Action::Full, 0);
    }
    if probe.mtime_ns == entry.mtime_ns && probe.size == entry.size {
        return (Action::Skip, entry.byte_offset);
    }
    (Action::Incremental, entry.byte_offset.min(probe.size))
}

/// On-disk shape of `import-state.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub version: u32,
    #[serde(default)]
    pub files: BTreeMap<String, CheckpointEntry>,
}

impl Default for CheckpointState {
    fn default() -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            files: BTreeMap::new(),
        }
    }
}

/// Checkpoint state shared by every directory scanned in one invocation.
pub struct CheckpointStore {
    state: CheckpointState,
    path: Option<PathBuf>,
    quarantined: Option<PathBuf>,
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl CheckpointStore {
    pub fn in_memory() -> Self {
        Self {
            state: CheckpointState::default(),
            path: None,
            quarantined: None,
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let loaded = load_json_or_default::<CheckpointState>(path)?;
        debug!(path = %path.display(), files = loaded.value.files.len(), "checkpoint loaded");
        Ok(Self {
            state: loaded.value,
            path: Some(path.to_path_buf()),
            quarantined: loaded.quarantined,
        })
    }

    pub fn quarantined(&self) -> Option<&Path> {
        self.quarantined.as_deref()
    }

    pub fn state(&self) -> &CheckpointState {
        &self.state
    }

    pub fn len(&self) -> usize {
        self.state.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.files.is_empty()
    }

    pub fn entry(&self, file: &Path) -> Option<&CheckpointEntry> {
        self.state.files.get(&key(file))
    }

    pub fn classify(&self, file: &Path, probe: &FileProbe) -> (Action, u64) {
        let (action, offset) = classify(self.entry(file), probe);
        debug!(file = %file.display(), ?action, offset, "classified");
        (action, offset)
    }

    fn persist(&self) -> Result<()> {
        if let Some(ref path) = self.path {
            write_json_atomic(path, &self.state)?;
        }
        Ok(())
    }

    /// Record that `file` was read up to `new_offset`, as observed by `probe`.
    ///
    /// The saved size is capped at the consumed offset so bytes written after
    /// the read never classify as already imported.
    pub fn commit(&mut self, file: &Path, probe: &FileProbe, new_offset: u64, now: DateTime<Utc>) -> Result<()> {
        let fingerprint_len = probe.fingerprint_len();
        let consumed = new_offset.min(probe.size);
        let entry = CheckpointEntry {
            size: consumed,
            mtime_ns: probe.mtime_ns,
            byte_offset: consumed,
            fingerprint: probe.fingerprint(fingerprint_len).unwrap_or_default(),
            fingerprint_len,
            last_imported_at: now,
        };
        let mut next = self.state.clone();
        next.files.insert(key(file), entry);
        if let Some(ref path) = self.path {
            write_json_atomic(path, &next)?;
        }
        self.state = next;
        Ok(())
    }

    /// Drop entries for files directly inside `scan_root` that are not in
    /// `existing`. Entries under other roots are left alone.
    pub fn prune(&mut self, scan_root: &Path, existing: &HashSet<String>) -> Result<usize> {
        let stale: Vec<String> = self
            .state
            .files
            .keys()
            .filter(|k| Path::new(k.as_str()).parent() == Some(scan_root))
            .filter(|k| !existing.contains(*k))
            .cloned()
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }
        for k in &stale {
            self.state.files.remove(k);
        }
        self.persist()?;
        info!(root = %scan_root.display(), pruned = stale.len(), "pruned checkpoint entries");
        Ok(stale.len())
    }
}

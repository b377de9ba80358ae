use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for every tiermem crate.
#[derive(Error, Debug)]
pub enum MemError {
    // ── Caller errors ──────────────────────────────────────────
    #[error("usage error: {0}")]
    Usage(String),

    #[error("not found: {0}")]
    NotFound(String),

    // ── Capacity errors ────────────────────────────────────────
    #[error("limit exceeded: {what} (limit {limit})")]
    LimitExceeded {
        what: String,
        limit: usize,
        hint: String,
    },

    #[error("tree node not empty: {path} (warm {warm}, cold {cold})")]
    NotEmpty { path: String, warm: u64, cold: u64 },

    // ── State errors ───────────────────────────────────────────
    #[error("stale state: {0}")]
    StateStale(String),

    #[error("corrupt state file {path}: {reason}")]
    Corruption { path: PathBuf, reason: String },

    // ── Source errors ──────────────────────────────────────────
    #[error("source parse error at {file}:{line}: {reason}")]
    SourceParse {
        file: String,
        line: usize,
        reason: String,
    },

    // ── I/O errors ─────────────────────────────────────────────
    #[error("io error at {}: {source}", path.display())]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("remote store error: {0}")]
    Remote(String),

    #[error("database error: {0}")]
    Database(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, MemError>;

/// Coarse error categories shown to users as `error[<kind>]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Usage,
    NotFound,
    LimitExceeded,
    StateStale,
    Io,
    Corruption,
    SourceParse,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Usage => "usage",
            ErrorKind::NotFound => "not-found",
            ErrorKind::LimitExceeded => "limit-exceeded",
            ErrorKind::StateStale => "state-stale",
            ErrorKind::Io => "io",
            ErrorKind::Corruption => "corruption",
            ErrorKind::SourceParse => "source-parse",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process exit codes for the `mem` and `imp` binaries.
pub mod exit {
    pub const SUCCESS: i32 = 0;
    pub const USAGE: i32 = 1;
    pub const IO: i32 = 2;
    pub const PARTIAL: i32 = 3;
}

impl MemError {
    pub fn usage(msg: impl Into<String>) -> Self {
        MemError::Usage(msg.into())
    }

    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MemError::IoAt {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MemError::Usage(_) | MemError::Config(_) => ErrorKind::Usage,
            MemError::NotFound(_) => ErrorKind::NotFound,
            MemError::LimitExceeded { .. } | MemError::NotEmpty { .. } => {
                ErrorKind::LimitExceeded
            }
            MemError::StateStale(_) => ErrorKind::StateStale,
            MemError::Corruption { .. } | MemError::Serialization(_) => ErrorKind::Corruption,
            MemError::SourceParse { .. } => ErrorKind::SourceParse,
            MemError::IoAt { .. }
            | MemError::Io(_)
            | MemError::Remote(_)
            | MemError::Database(_)
            | MemError::Other(_) => ErrorKind::Io,
        }
    }

    /// Exit code for an error that aborts the invocation.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Usage | ErrorKind::LimitExceeded => exit::USAGE,
            ErrorKind::NotFound | ErrorKind::StateStale | ErrorKind::SourceParse => {
                exit::PARTIAL
            }
            ErrorKind::Io | ErrorKind::Corruption => exit::IO,
        }
    }

    /// Single-line remediation shown under the error message.
    pub fn hint(&self) -> String {
        match self {
            MemError::Usage(_) => "run with --help to see the accepted arguments".into(),
            MemError::Config(_) => "fix the reported field in tiermem.toml or unset the override".into(),
            MemError::NotFound(_) => "check the id or query; absent entries are not an error".into(),
            MemError::LimitExceeded { hint, .. } => hint.clone(),
            MemError::NotEmpty { .. } => {
                "run `mem consolidate` after evicting the facts under this path".into()
            }
            MemError::StateStale(_) => "rerun the command; the state changed while it was running".into(),
            MemError::Corruption { .. } | MemError::Serialization(_) => {
                "the damaged file was quarantined with a .corrupt-* suffix; inspect it manually".into()
            }
            MemError::SourceParse { .. } => "malformed source lines are skipped and counted".into(),
            MemError::IoAt { .. } | MemError::Io(_) => {
                "check that the workspace exists and is writable".into()
            }
            MemError::Remote(_) => "check --db-url, --auth-token and network access".into(),
            MemError::Database(_) => "check that the ledger database is not locked or damaged".into(),
            MemError::Other(_) => "rerun with --verbose for details".into(),
        }
    }
}


//! # tiermem-import
//!
//! Resumable, idempotent import of JSONL usage logs into a SQLite ledger.
//! A per-file checkpoint decides whether each file is skipped, read from its
//! saved offset, or re-read in full after compaction; a dedup log keyed by a
//! content hash keeps re-reads from double-counting.

pub mod checkpoint;
pub mod discovery;
pub mod event;
pub mod ingest;
pub mod ledger;
pub mod pricing;

pub use checkpoint::{Action, CheckpointEntry, CheckpointState, CheckpointStore, FileProbe, classify};
pub use discovery::{SessionDir, discover_session_dirs};
pub use event::{SourceEvent, UsageEvent, parse_line};
pub use ingest::{
    DirectoryImport, FileError, FileIngest, FileReport, ImportMode, ImportOptions, ModelTotals,
    RecordCounts, canonicalize, import_directory, ingest_file, list_sources,
};
pub use ledger::{LedgerTotals, RecordSink, UsageLedger, UsageRecord};

//! Checkpointed JSONL ingest.
//!
//! `ingest_file` reads one file from a byte offset and commits every new
//! usage record to a [`RecordSink`]. `import_directory` drives it across a
//! directory, consulting and updating a shared [`CheckpointStore`].

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tiermem_core::hash::short_hash;
use tiermem_core::{MemError, Result};
use tracing::{debug, info, warn};

use crate::checkpoint::{Action, CheckpointStore, FileProbe};
use crate::event::{SourceEvent, UsageEvent, parse_line};
use crate::ledger::{RecordSink, UsageRecord};
use crate::pricing::{api_cost, infer_provider, normalize_model};

pub const SOURCE_EXTENSION: &str = "jsonl";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Trust the checkpoint.
    #[default]
    Incremental,
    /// Re-read every file from offset 0; the dedup log still applies.
    Full,
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub app: String,
    pub dry_run: bool,
    pub mode: ImportMode,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            app: "openclaw".into(),
            dry_run: false,
            mode: ImportMode::Incremental,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecordCounts {
    pub lines: u64,
    pub records_found: u64,
    pub imported: u64,
    pub duplicates: u64,
    pub parse_errors: u64,
    /// JSON lines without usage, sentinels and comments.
    pub ignored: u64,
}

impl RecordCounts {
    pub fn absorb(&mut self, other: &RecordCounts) {
        self.lines += other.lines;
        self.records_found += other.records_found;
        self.imported += other.imported;
        self.duplicates += other.duplicates;
        self.parse_errors += other.parse_errors;
        self.ignored += other.ignored;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelTotals {
    pub records: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

impl ModelTotals {
    fn add_record(&mut self, record: &UsageRecord) {
        self.records += 1;
        self.input_tokens += record.input_tokens;
        self.output_tokens += record.output_tokens;
        self.cost += record.cost;
    }

    fn absorb(&mut self, other: &ModelTotals) {
        self.records += other.records;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cost += other.cost;
    }
}

/// Result of reading one file from a starting offset.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileIngest {
    /// Offset just past the last consumed line.
    pub final_offset: u64,
    pub counts: RecordCounts,
    pub by_model: BTreeMap<String, ModelTotals>,
}

/// Turn a raw usage event into the record that gets hashed and stored.
pub fn canonicalize(
    event: &UsageEvent,
    app: &str,
    source_file: &str,
    now: DateTime<Utc>,
) -> UsageRecord {
    let provider = infer_provider(event.provider.as_deref(), &event.model);
    let model = normalize_model(&event.model);
    let timestamp = event.timestamp.unwrap_or(now);
    let ts_iso = timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
    let input = event.input_tokens.to_string();
    let output = event.output_tokens.to_string();
    let id = short_hash(
        &[
            provider.as_bytes(),
            model.as_bytes(),
            ts_iso.as_bytes(),
            input.as_bytes(),
            output.as_bytes(),
        ],
        16,
    );
    let list_cost = api_cost(
        &provider,
        &model,
        event.input_tokens,
        event.output_tokens,
        event.cache_read_tokens,
    );

    UsageRecord {
        id,
        timestamp,
        provider,
        model,
        input_tokens: event.input_tokens,
        output_tokens: event.output_tokens,
        cache_read_tokens: event.cache_read_tokens,
        cache_write_tokens: event.cache_write_tokens,
        cost: event.embedded_cost.unwrap_or(list_cost),
        api_equivalent_cost: list_cost,
        app: app.to_string(),
        source_file: source_file.to_string(),
    }
}

/// Read `path` from `offset` and commit new usage records to `sink`.
///
/// Only newline-terminated lines are consumed. A final line without a
/// newline is consumed only when it already parses as JSON, so a line that a
/// writer is still appending to is picked up by the next run. A sink failure
/// aborts the file.
pub fn ingest_file(
    path: &Path,
    offset: u64,
    sink: &dyn RecordSink,
    opts: &ImportOptions,
    now: DateTime<Utc>,
) -> Result<FileIngest> {
    let file = File::open(path).map_err(|e| MemError::io_at(path, e))?;
    let mut reader = BufReader::new(file);
    reader
        .seek(SeekFrom::Start(offset))
        .map_err(|e| MemError::io_at(path, e))?;

    let source_file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut out = FileIngest {
        final_offset: offset,
        ..Default::default()
    };
    let mut seen_this_run: HashSet<String> = HashSet::new();
    let mut buf = Vec::new();
    let mut line_no = 0usize;

    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| MemError::io_at(path, e))?;
        if n == 0 {
            break;
        }
        let complete = buf.last() == Some(&b'\n');
        if !complete && serde_json::from_slice::<serde_json::Value>(&buf).is_err() {
            debug!(file = %path.display(), bytes = n, "trailing partial line left for the next run");
            break;
        }
        out.final_offset += n as u64;
        line_no += 1;

        let Ok(text) = std::str::from_utf8(&buf) else {
            out.counts.lines += 1;
            out.counts.parse_errors += 1;
            continue;
        };
        if text.trim().is_empty() {
            continue;
        }
        out.counts.lines += 1;

        let event = match parse_line(text) {
            Ok(SourceEvent::Usage(event)) => event,
            Ok(_) => {
                out.counts.ignored += 1;
                continue;
            }
            Err(e) => {
                out.counts.parse_errors += 1;
                let err = MemError::SourceParse {
                    file: source_file.clone(),
                    line: line_no,
                    reason: e.to_string(),
                };
                debug!("{err}");
                continue;
            }
        };
        out.counts.records_found += 1;

        let record = canonicalize(&event, &opts.app, &source_file, now);
        if seen_this_run.contains(&record.id) || sink.contains(&record.id)? {
            out.counts.duplicates += 1;
            continue;
        }
        if !opts.dry_run {
            sink.commit(&record, now)?;
        }
        seen_this_run.insert(record.id.clone());
        out.counts.imported += 1;
        out.by_model
            .entry(record.model.clone())
            .or_default()
            .add_record(&record);
    }

    if out.counts.parse_errors > 0 {
        warn!(
            file = %path.display(),
            parse_errors = out.counts.parse_errors,
            "skipped malformed lines"
        );
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub file: PathBuf,
    pub action: Action,
    pub start_offset: u64,
    pub final_offset: u64,
    pub counts: RecordCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileError {
    pub file: PathBuf,
    pub kind: String,
    pub message: String,
}

/// Summary of one directory scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DirectoryImport {
    pub dir: PathBuf,
    pub files_seen: usize,
    pub files_skipped: usize,
    pub pruned: usize,
    pub totals: RecordCounts,
    pub by_model: BTreeMap<String, ModelTotals>,
    pub files: Vec<FileReport>,
    pub errors: Vec<FileError>,
}

impl DirectoryImport {
    pub fn absorb(&mut self, other: &DirectoryImport) {
        self.files_seen += other.files_seen;
        self.files_skipped += other.files_skipped;
        self.pruned += other.pruned;
        self.totals.absorb(&other.totals);
        for (model, totals) in &other.by_model {
            self.by_model.entry(model.clone()).or_default().absorb(totals);
        }
        self.files.extend(other.files.iter().cloned());
        self.errors.extend(other.errors.iter().cloned());
    }
}

/// `*.jsonl` files directly inside `dir`, sorted by path.
pub fn list_sources(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| MemError::io_at(dir, e))? {
        let entry = entry.map_err(|e| MemError::io_at(dir, e))?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == SOURCE_EXTENSION) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Import every source file in `dir` against the shared checkpoint.
///
/// Per-file failures are recorded in `errors` and leave that file's
/// checkpoint entry untouched; the remaining files are still processed.
pub fn import_directory(
    dir: &Path,
    checkpoint: &mut CheckpointStore,
    sink: &dyn RecordSink,
    opts: &ImportOptions,
    now: DateTime<Utc>,
) -> Result<DirectoryImport> {
    let root = dir.canonicalize().map_err(|e| MemError::io_at(dir, e))?;
    let files = list_sources(&root)?;
    info!(dir = %root.display(), files = files.len(), dry_run = opts.dry_run, "importing directory");

    let mut report = DirectoryImport {
        dir: root.clone(),
        files_seen: files.len(),
        ..Default::default()
    };

    if !opts.dry_run {
        let existing: HashSet<String> = files
            .iter()
            .map(|f| f.to_string_lossy().into_owned())
            .collect();
        report.pruned = checkpoint.prune(&root, &existing)?;
    }

    for file in &files {
        match import_file(file, checkpoint, sink, opts, now) {
            Ok((file_report, by_model)) => {
                if file_report.action == Action::Skip {
                    report.files_skipped += 1;
                }
                report.totals.absorb(&file_report.counts);
                for (model, totals) in &by_model {
                    report.by_model.entry(model.clone()).or_default().absorb(totals);
                }
                report.files.push(file_report);
            }
            Err(e) => {
                warn!(file = %file.display(), error = %e, "file import failed; checkpoint left unchanged");
                report.errors.push(FileError {
                    file: file.clone(),
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    info!(
        dir = %root.display(),
        imported = report.totals.imported,
        duplicates = report.totals.duplicates,
        skipped_files = report.files_skipped,
        errors = report.errors.len(),
        "directory import finished"
    );
    Ok(report)
}

fn import_file(
    file: &Path,
    checkpoint: &mut CheckpointStore,
    sink: &dyn RecordSink,
    opts: &ImportOptions,
    now: DateTime<Utc>,
) -> Result<(FileReport, BTreeMap<String, ModelTotals>)> {
    let probe = FileProbe::read(file)?;
    let (action, offset) = match opts.mode {
        ImportMode::Full => (Action::Full, 0),
        ImportMode::Incremental => checkpoint.classify(file, &probe),
    };

    if action == Action::Skip {
        return Ok((
            FileReport {
                file: file.to_path_buf(),
                action,
                start_offset: offset,
                final_offset: offset,
                counts: RecordCounts::default(),
            },
            BTreeMap::new(),
        ));
    }

    let ingest = ingest_file(file, offset, sink, opts, now)?;
    if !opts.dry_run {
        let observed = FileProbe::read(file)?;
        checkpoint.commit(file, &observed, ingest.final_offset, now)?;
    }

    Ok((
        FileReport {
            file: file.to_path_buf(),
            action,
            start_offset: offset,
            final_offset: ingest.final_offset,
            counts: ingest.counts,
        },
        ingest.by_model,
    ))
}

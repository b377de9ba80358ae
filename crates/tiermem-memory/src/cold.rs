//! Cold tier: an append-keyed remote log of archived facts.
//!
//! The store speaks a small statement-batch contract through a
//! [`ColdTransport`]. [`HttpPipelineTransport`] sends batches to a libSQL
//! `/v2/pipeline` endpoint; [`SqliteTransport`] runs the same statements
//! against a local SQLite file.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use reqwest::Client;
use rusqlite::Connection;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde::{Deserialize, Serialize};
use tiermem_core::hash::short_hash;
use tiermem_core::{MemError, Result};
use tracing::{debug, info, warn};

use crate::warm::Fact;

/// Keyword queries use at most this many tokens.
pub const MAX_QUERY_TOKENS: usize = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

// ── Wire types ─────────────────────────────────────────────────

/// A typed positional argument or result cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireValue {
    Null,
    /// Integers travel as decimal strings.
    Integer { value: String },
    Float { value: f64 },
    Text { value: String },
    #[serde(other)]
    Unknown,
}

impl WireValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text { value: value.into() }
    }

    pub fn integer(value: i64) -> Self {
        Self::Integer {
            value: value.to_string(),
        }
    }

    pub fn float(value: f64) -> Self {
        Self::Float { value }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { value } => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer { value } | Self::Text { value } => value.parse().ok(),
            Self::Float { value } => Some(*value as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float { value } => Some(*value),
            Self::Integer { value } | Self::Text { value } => value.parse().ok(),
            _ => None,
        }
    }
}

pub type Row = Vec<WireValue>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub sql: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<WireValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: WireValue) -> Self {
        self.args.push(value);
        self
    }
}

/// Outcome of one statement in a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementResult {
    pub rows: Vec<Row>,
    pub affected_rows: u64,
}

/// Executes statement batches against a cold store.
#[async_trait]
pub trait ColdTransport: Send + Sync {
    /// Run `batch` in order. Returns one result per statement; any failed
    /// statement fails the whole call.
    async fn execute(&self, batch: &[Statement]) -> Result<Vec<StatementResult>>;

    fn name(&self) -> &str;
}

// ── HTTP pipeline transport ────────────────────────────────────

#[derive(Serialize)]
struct PipelineRequest<'a> {
    requests: Vec<PipelineStep<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum PipelineStep<'a> {
    Execute { stmt: &'a Statement },
    Close,
}

#[derive(Deserialize)]
struct PipelineResponse {
    #[serde(default)]
    results: Vec<PipelineResult>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum PipelineResult {
    Ok { response: StepResponse },
    Error { error: StepError },
}

#[derive(Deserialize)]
struct StepResponse {
    #[serde(default)]
    result: Option<ExecuteResult>,
}

#[derive(Deserialize)]
struct ExecuteResult {
    #[serde(default)]
    rows: Vec<Row>,
    #[serde(default)]
    affected_row_count: u64,
}

#[derive(Deserialize)]
struct StepError {
    message: String,
}

enum Failure {
    Transient(String),
    Fatal(String),
}

/// Sends batches to `{url}/v2/pipeline` with a static bearer token.
pub struct HttpPipelineTransport {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    retry_backoff: Duration,
}

impl HttpPipelineTransport {
    pub fn new(url: &str, auth_token: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = match url.strip_prefix("libsql://") {
            Some(rest) => format!("https://{rest}"),
            None => url.to_string(),
        };
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MemError::Remote(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
            retry_backoff: RETRY_BACKOFF,
        })
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    async fn post_once(&self, body: &PipelineRequest<'_>) -> std::result::Result<PipelineResponse, Failure> {
        let mut req = self
            .client
            .post(format!("{}/v2/pipeline", self.base_url))
            .json(body);
        if let Some(ref token) = self.auth_token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Failure::Transient(format!("cold request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let msg = format!("cold store HTTP {status}: {text}");
            return Err(if status.is_server_error() {
                Failure::Transient(msg)
            } else {
                Failure::Fatal(msg)
            });
        }

        resp.json::<PipelineResponse>()
            .await
            .map_err(|e| Failure::Fatal(format!("malformed cold response: {e}")))
    }
}

#[async_trait]
impl ColdTransport for HttpPipelineTransport {
    async fn execute(&self, batch: &[Statement]) -> Result<Vec<StatementResult>> {
        let body = PipelineRequest {
            requests: batch
                .iter()
                .map(|stmt| PipelineStep::Execute { stmt })
                .chain(std::iter::once(PipelineStep::Close))
                .collect(),
        };

        debug!(statements = batch.len(), "sending cold pipeline");
        let response = match self.post_once(&body).await {
            Ok(r) => r,
            Err(Failure::Transient(msg)) => {
                warn!(error = %msg, backoff_ms = self.retry_backoff.as_millis() as u64, "retrying cold request");
                tokio::time::sleep(self.retry_backoff).await;
                match self.post_once(&body).await {
                    Ok(r) => r,
                    Err(Failure::Transient(msg)) | Err(Failure::Fatal(msg)) => {
                        return Err(MemError::Remote(msg));
                    }
                }
            }
            Err(Failure::Fatal(msg)) => return Err(MemError::Remote(msg)),
        };

        if response.results.len() < batch.len() {
            return Err(MemError::Remote(format!(
                "malformed cold response: {} results for {} statements",
                response.results.len(),
                batch.len()
            )));
        }

        response
            .results
            .into_iter()
            .take(batch.len())
            .enumerate()
            .map(|(i, result)| match result {
                PipelineResult::Ok { response } => Ok(response
                    .result
                    .map(|r| StatementResult {
                        rows: r.rows,
                        affected_rows: r.affected_row_count,
                    })
                    .unwrap_or_default()),
                PipelineResult::Error { error } => Err(MemError::Remote(format!(
                    "cold statement {i} failed: {}",
                    error.message
                ))),
            })
            .collect()
    }

    fn name(&self) -> &str {
        "http-pipeline"
    }
}

// ── Local SQLite transport ─────────────────────────────────────

/// Runs batches against a local SQLite database.
pub struct SqliteTransport {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTransport {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| MemError::io_at(parent, e))?;
        }
        let conn = Connection::open(path).map_err(|e| MemError::Database(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| MemError::Database(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn to_sql(value: &WireValue) -> SqlValue {
    match value {
        WireValue::Integer { value } => value
            .parse::<i64>()
            .map(SqlValue::Integer)
            .unwrap_or_else(|_| SqlValue::Text(value.clone())),
        WireValue::Float { value } => SqlValue::Real(*value),
        WireValue::Text { value } => SqlValue::Text(value.clone()),
        WireValue::Null | WireValue::Unknown => SqlValue::Null,
    }
}

fn from_sql(value: ValueRef<'_>) -> WireValue {
    match value {
        ValueRef::Null => WireValue::Null,
        ValueRef::Integer(i) => WireValue::integer(i),
        ValueRef::Real(f) => WireValue::float(f),
        ValueRef::Text(bytes) => WireValue::text(String::from_utf8_lossy(bytes)),
        ValueRef::Blob(_) => WireValue::Unknown,
    }
}

#[async_trait]
impl ColdTransport for SqliteTransport {
    async fn execute(&self, batch: &[Statement]) -> Result<Vec<StatementResult>> {
        let db = |e: rusqlite::Error| MemError::Database(e.to_string());
        let conn = self.conn.lock();
        let mut results = Vec::with_capacity(batch.len());
        for statement in batch {
            let mut stmt = conn.prepare(&statement.sql).map_err(db)?;
            let params: Vec<SqlValue> = statement.args.iter().map(to_sql).collect();
            let columns = stmt.column_count();
            if columns == 0 {
                let affected = stmt
                    .execute(rusqlite::params_from_iter(params.iter()))
                    .map_err(db)?;
                results.push(StatementResult {
                    rows: Vec::new(),
                    affected_rows: affected as u64,
                });
                continue;
            }
            let mut rows = stmt
                .query(rusqlite::params_from_iter(params.iter()))
                .map_err(db)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(db)? {
                let mut cells = Vec::with_capacity(columns);
                for i in 0..columns {
                    cells.push(from_sql(row.get_ref(i).map_err(db)?));
                }
                out.push(cells);
            }
            results.push(StatementResult {
                rows: out,
                affected_rows: 0,
            });
        }
        Ok(results)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

// ── Store ──────────────────────────────────────────────────────

/// A fact as stored in `cold_memories`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColdRecord {
    pub id: String,
    pub text: String,
    pub category: String,
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    pub access_count: u32,
}

impl ColdRecord {
    /// A record written directly to cold, bypassing warm.
    pub fn new(text: impl Into<String>, category: impl Into<String>, importance: f64, now: DateTime<Utc>) -> Self {
        let text = text.into();
        let nanos = now.timestamp_micros().to_string();
        Self {
            id: short_hash(&[text.as_bytes(), nanos.as_bytes()], 12),
            text,
            category: category.into(),
            importance,
            created_at: now,
            access_count: 0,
        }
    }

    fn from_row(row: &Row) -> Option<Self> {
        let created = row.get(4)?.as_i64()?;
        Some(Self {
            id: row.first()?.as_text()?.to_string(),
            text: row.get(1)?.as_text()?.to_string(),
            category: row.get(2)?.as_text()?.to_string(),
            importance: row.get(3)?.as_f64().unwrap_or(0.5),
            created_at: Utc.timestamp_opt(created, 0).single()?,
            access_count: row
                .get(5)
                .and_then(WireValue::as_i64)
                .map(|n| n.max(0) as u32)
                .unwrap_or(0),
        })
    }
}

impl From<&Fact> for ColdRecord {
    fn from(fact: &Fact) -> Self {
        Self {
            id: fact.id.clone(),
            text: fact.text.clone(),
            category: fact.category.clone(),
            importance: fact.importance,
            created_at: fact.created_at,
            access_count: fact.access_count,
        }
    }
}

fn like_pattern(token: &str) -> String {
    let escaped = token
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

pub struct ColdStore {
    transport: Arc<dyn ColdTransport>,
}

impl ColdStore {
    pub fn new(transport: Arc<dyn ColdTransport>) -> Self {
        Self { transport }
    }

    /// Pick a transport from the URL: `https://`, `http://` and `libsql://`
    /// go over HTTP, `file:` URLs and plain paths open a local database.
    pub fn from_url(url: &str, auth_token: Option<String>, timeout: Duration) -> Result<Self> {
        let transport: Arc<dyn ColdTransport> =
            if url.starts_with("https://") || url.starts_with("http://") || url.starts_with("libsql://") {
                let parsed = url::Url::parse(url)
                    .map_err(|e| MemError::usage(format!("invalid cold store URL '{url}': {e}")))?;
                if parsed.host_str().is_none() {
                    return Err(MemError::usage(format!("cold store URL '{url}' has no host")));
                }
                Arc::new(HttpPipelineTransport::new(url, auth_token, timeout)?)
            } else {
                let path = url.strip_prefix("file:").unwrap_or(url);
                if path.is_empty() {
                    return Err(MemError::usage("cold store URL has an empty path"));
                }
                Arc::new(SqliteTransport::open(Path::new(path))?)
            };
        debug!(transport = transport.name(), "cold store configured");
        Ok(Self { transport })
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Create `cold_memories` and its indices if missing.
    pub async fn init_schema(&self) -> Result<()> {
        let batch = [
            Statement::new(
                "CREATE TABLE IF NOT EXISTS cold_memories (
                    id TEXT PRIMARY KEY,
                    text TEXT NOT NULL,
                    category TEXT NOT NULL,
                    importance REAL DEFAULT 0.5,
                    created_at INTEGER NOT NULL,
                    access_count INTEGER DEFAULT 0
                )",
            ),
            Statement::new("CREATE INDEX IF NOT EXISTS idx_cold_category ON cold_memories(category)"),
            Statement::new("CREATE INDEX IF NOT EXISTS idx_cold_created ON cold_memories(created_at)"),
        ];
        self.transport.execute(&batch).await?;
        info!(transport = self.transport.name(), "cold schema ready");
        Ok(())
    }

    /// Insert a record; `false` when the id already exists.
    pub async fn append(&self, record: &ColdRecord) -> Result<bool> {
        let stmt = Statement::new(
            "INSERT OR IGNORE INTO cold_memories (id, text, category, importance, created_at, access_count)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .arg(WireValue::text(&record.id))
        .arg(WireValue::text(&record.text))
        .arg(WireValue::text(&record.category))
        .arg(WireValue::float(record.importance))
        .arg(WireValue::integer(record.created_at.timestamp()))
        .arg(WireValue::integer(record.access_count as i64));
        let results = self.transport.execute(std::slice::from_ref(&stmt)).await?;
        let inserted = results.first().map(|r| r.affected_rows > 0).unwrap_or(false);
        debug!(id = %record.id, inserted, "cold append");
        Ok(inserted)
    }

    /// Records whose text contains any of the first three tokens, by
    /// importance then recency.
    pub async fn try_query_keyword(&self, tokens: &[String], limit: usize) -> Result<Vec<ColdRecord>> {
        let tokens: Vec<&String> = tokens
            .iter()
            .filter(|t| !t.is_empty())
            .take(MAX_QUERY_TOKENS)
            .collect();
        if tokens.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let clause = vec!["text LIKE ? ESCAPE '\\'"; tokens.len()].join(" OR ");
        let mut stmt = Statement::new(format!(
            "SELECT id, text, category, importance, created_at, access_count FROM cold_memories \
             WHERE {clause} ORDER BY importance DESC, created_at DESC LIMIT ?"
        ));
        for token in &tokens {
            stmt = stmt.arg(WireValue::text(like_pattern(token)));
        }
        stmt = stmt.arg(WireValue::integer(limit as i64));

        let results = self.transport.execute(std::slice::from_ref(&stmt)).await?;
        let rows = results.into_iter().next().map(|r| r.rows).unwrap_or_default();
        let records: Vec<ColdRecord> = rows
            .iter()
            .filter_map(|row| {
                let record = ColdRecord::from_row(row);
                if record.is_none() {
                    debug!(?row, "skipping malformed cold row");
                }
                record
            })
            .collect();
        Ok(records)
    }

    /// Like [`Self::try_query_keyword`], but failures are logged and yield no results.
    pub async fn query_keyword(&self, tokens: &[String], limit: usize) -> Vec<ColdRecord> {
        match self.try_query_keyword(tokens, limit).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "cold query failed; continuing without cold results");
                Vec::new()
            }
        }
    }
}

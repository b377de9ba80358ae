use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tiermem_core::{MemError, Result};
use tracing::{debug, info};

/// One canonical usage record, ready to commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRecord {
    /// 16-char content hash; the dedup key.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub cost: f64,
    pub api_equivalent_cost: f64,
    pub app: String,
    pub source_file: String,
}

/// Destination of imported records plus the dedup log consulted before each write.
pub trait RecordSink {
    /// Whether a record with this id was already committed.
    fn contains(&self, id: &str) -> Result<bool>;

    /// Write the record and its dedup-log entry as one unit.
    fn commit(&self, record: &UsageRecord, imported_at: DateTime<Utc>) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerTotals {
    pub records: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub cost: f64,
}

/// SQLite usage ledger: a `usage` table and the `import_log` dedup log.
pub struct UsageLedger {
    db: Arc<Mutex<Connection>>,
}

impl UsageLedger {
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening usage ledger");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| MemError::io_at(parent, e))?;
        }
        let conn = Connection::open(path).map_err(|e| MemError::Database(e.to_string()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| MemError::Database(e.to_string()))?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| MemError::Database(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS usage (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                record_hash TEXT NOT NULL UNIQUE,
                timestamp TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                cache_read_tokens INTEGER DEFAULT 0,
                cache_write_tokens INTEGER DEFAULT 0,
                cost REAL NOT NULL,
                api_equivalent_cost REAL NOT NULL DEFAULT 0,
                source TEXT NOT NULL DEFAULT 'import',
                app TEXT,
                source_file TEXT
            );

            CREATE TABLE IF NOT EXISTS import_log (
                hash TEXT PRIMARY KEY,
                imported_at TEXT NOT NULL,
                source_file TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_usage_timestamp ON usage(timestamp);
            CREATE INDEX IF NOT EXISTS idx_usage_model ON usage(provider, model);
            ",
        )
        .map_err(|e| MemError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn totals(&self) -> Result<LedgerTotals> {
        let conn = self.db.lock();
        conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(input_tokens), 0), COALESCE(SUM(output_tokens), 0),
                    COALESCE(SUM(cache_read_tokens), 0), COALESCE(SUM(cache_write_tokens), 0),
                    COALESCE(SUM(cost), 0.0)
             FROM usage",
            [],
            |row| {
                Ok(LedgerTotals {
                    records: row.get::<_, i64>(0)? as u64,
                    input_tokens: row.get::<_, i64>(1)? as u64,
                    output_tokens: row.get::<_, i64>(2)? as u64,
                    cache_read_tokens: row.get::<_, i64>(3)? as u64,
                    cache_write_tokens: row.get::<_, i64>(4)? as u64,
                    cost: row.get(5)?,
                })
            },
        )
        .map_err(|e| MemError::Database(e.to_string()))
    }

    /// Number of entries in the dedup log.
    pub fn logged(&self) -> Result<u64> {
        let conn = self.db.lock();
        conn.query_row("SELECT COUNT(*) FROM import_log", [], |row| row.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(|e| MemError::Database(e.to_string()))
    }
}

impl RecordSink for UsageLedger {
    fn contains(&self, id: &str) -> Result<bool> {
        let conn = self.db.lock();
        conn.query_row("SELECT 1 FROM import_log WHERE hash = ?1", params![id], |_| Ok(()))
            .optional()
            .map(|found| found.is_some())
            .map_err(|e| MemError::Database(e.to_string()))
    }

    fn commit(&self, record: &UsageRecord, imported_at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.db.lock();
        let tx = conn
            .transaction()
            .map_err(|e| MemError::Database(e.to_string()))?;
        tx.execute(
            "INSERT INTO usage (record_hash, timestamp, provider, model, input_tokens, output_tokens,
                                cache_read_tokens, cache_write_tokens, cost, api_equivalent_cost, app, source_file)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.id,
                record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                record.provider,
                record.model,
                record.input_tokens as i64,
                record.output_tokens as i64,
                record.cache_read_tokens as i64,
                record.cache_write_tokens as i64,
                record.cost,
                record.api_equivalent_cost,
                record.app,
                record.source_file,
            ],
        )
        .map_err(|e| MemError::Database(e.to_string()))?;
        tx.execute(
            "INSERT INTO import_log (hash, imported_at, source_file) VALUES (?1, ?2, ?3)",
            params![
                record.id,
                imported_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                record.source_file,
            ],
        )
        .map_err(|e| MemError::Database(e.to_string()))?;
        tx.commit().map_err(|e| MemError::Database(e.to_string()))?;
        debug!(id = %record.id, "usage record committed");
        Ok(())
    }
}

//! The per-invocation context every `mem` and `imp` verb runs against.
//!
//! `Context` is built once from the loaded config plus CLI overrides. It is
//! the only place that resolves workspace paths, the cold endpoint and the
//! home directory; the memory and import crates receive plain values.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tiermem_config::TiermemConfig;
use tiermem_core::text::{title_case, tokenize};
use tiermem_core::{MemError, Result};
use tiermem_import::{
    CheckpointStore, DirectoryImport, FileError, ImportMode, ImportOptions, LedgerTotals,
    SessionDir, UsageLedger, discover_session_dirs, import_directory,
};
use tiermem_memory::hot::HOT_MAX_BYTES;
use tiermem_memory::tree::TREE_MAX_NODES;
use tiermem_memory::{
    ColdRecord, ColdStore, Fact, HotBuilder, HotDigest, HotKey, HotState, NewFact, RetrievedItem,
    Retriever, ScoredFact, TagMode, TreeHit, TreeIndex, WarmStats, WarmStore,
};
use tracing::{debug, info, warn};

/// Resolved locations of every state file in a workspace.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub warm: PathBuf,
    pub tree: PathBuf,
    pub hot_state: PathBuf,
    pub hot_output: PathBuf,
    pub checkpoint: PathBuf,
    pub ledger: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: &Path, hot_output: Option<&Path>, ledger: &Path) -> Self {
        let memory = root.join("memory");
        let under_root = |p: &Path| if p.is_absolute() { p.to_path_buf() } else { root.join(p) };
        Self {
            root: root.to_path_buf(),
            warm: memory.join("warm-memory.json"),
            tree: memory.join("memory-tree.json"),
            hot_state: memory.join("hot-memory-state.json"),
            hot_output: hot_output.map(under_root).unwrap_or_else(|| root.join("MEMORY.md")),
            checkpoint: root.join(".checkpoint").join("import-state.json"),
            ledger: under_root(ledger),
        }
    }
}

/// Values taken from command-line flags that override the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub workspace: Option<PathBuf>,
    pub db_url: Option<String>,
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone)]
struct ColdSettings {
    url: String,
    auth_token: Option<String>,
    timeout: Duration,
}

// ── Reports ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct StoreRequest {
    pub text: String,
    pub category: String,
    pub importance: f64,
    pub tags: Vec<String>,
    pub auto_tag: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreReport {
    pub id: String,
    pub category: String,
    pub status: &'static str,
    pub evicted: usize,
    pub archived: usize,
    pub tree_indexed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsolidateReport {
    pub evicted: usize,
    pub archived: usize,
    /// Expired facts kept in warm because cold did not accept them.
    pub archive_failed: usize,
    pub tree_recounted: bool,
    pub warm_facts: usize,
    pub tree_nodes: usize,
    pub hot: HotDigest,
}

#[derive(Debug, Clone, Serialize)]
pub struct HotStats {
    pub file: PathBuf,
    pub size_bytes: u64,
    pub max_bytes: usize,
    pub pct_used: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeStats {
    pub nodes: usize,
    pub max_nodes: usize,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub hot: HotStats,
    pub warm: WarmStats,
    pub tree: TreeStats,
    pub cold: Option<String>,
    pub checkpoint_files: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeRemoval {
    pub path: String,
    pub removed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvictReport {
    pub evicted: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColdStoreReport {
    pub id: String,
    pub stored: bool,
}

/// Where `imp` reads from.
#[derive(Debug, Clone)]
pub enum ImportSource {
    Auto,
    Path(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub source: ImportSource,
    pub mode: ImportMode,
    pub dry_run: bool,
    /// Explicit `--app`; otherwise discovery or config decides.
    pub app: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportedDirectory {
    pub label: String,
    pub app: String,
    #[serde(flatten)]
    pub report: DirectoryImport,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub mode: ImportMode,
    pub dry_run: bool,
    pub directories: Vec<ImportedDirectory>,
    pub summary: DirectoryImport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger: Option<LedgerTotals>,
}

impl ImportReport {
    pub fn has_errors(&self) -> bool {
        !self.summary.errors.is_empty()
    }
}

// ── Context ────────────────────────────────────────────────────

pub struct Context {
    pub paths: WorkspacePaths,
    config: TiermemConfig,
    cold: Option<ColdSettings>,
    home: Option<PathBuf>,
    quarantined: Vec<PathBuf>,
}

impl Context {
    pub fn new(config: TiermemConfig, overrides: Overrides) -> Result<Self> {
        let root = match overrides.workspace.or_else(|| config.workspace.root.clone()) {
            Some(root) => root,
            None => std::env::current_dir()?,
        };
        let paths = WorkspacePaths::new(
            &root,
            config.workspace.hot_output.as_deref(),
            &config.import.ledger_path,
        );
        let cold = overrides
            .db_url
            .or_else(|| config.cold.db_url.clone())
            .filter(|url| !url.trim().is_empty())
            .map(|url| ColdSettings {
                url,
                auth_token: overrides.auth_token.or_else(|| config.cold.auth_token.clone()),
                timeout: Duration::from_secs(config.cold.timeout_secs),
            });
        debug!(root = %paths.root.display(), cold = cold.is_some(), "context ready");
        Ok(Self {
            paths,
            config,
            cold,
            home: dirs::home_dir(),
            quarantined: Vec::new(),
        })
    }

    /// Replace the home directory used by import discovery.
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    pub fn config(&self) -> &TiermemConfig {
        &self.config
    }

    /// State files that were found corrupt and moved aside during this invocation.
    pub fn quarantined(&self) -> &[PathBuf] {
        &self.quarantined
    }

    fn note(&mut self, quarantined: Option<&Path>) {
        if let Some(path) = quarantined {
            self.quarantined.push(path.to_path_buf());
        }
    }

    fn open_warm(&mut self) -> Result<WarmStore> {
        let warm = WarmStore::open(&self.paths.warm)?;
        self.note(warm.quarantined());
        Ok(warm)
    }

    fn open_tree(&mut self) -> Result<TreeIndex> {
        let tree = TreeIndex::open(&self.paths.tree)?;
        self.note(tree.quarantined());
        Ok(tree)
    }

    fn open_hot_state(&mut self) -> Result<HotState> {
        let loaded = HotState::load(&self.paths.hot_state)?;
        self.note(loaded.quarantined.as_deref());
        Ok(loaded.value)
    }

    fn open_cold(&self) -> Result<Option<ColdStore>> {
        self.cold
            .as_ref()
            .map(|c| ColdStore::from_url(&c.url, c.auth_token.clone(), c.timeout))
            .transpose()
    }

    /// The configured cold store, or `None` when unset or unreachable.
    /// Open failures are logged; callers carry on without the cold tier.
    fn try_open_cold(&self) -> Option<ColdStore> {
        match self.open_cold() {
            Ok(cold) => cold,
            Err(e) => {
                warn!(error = %e, "cold store unavailable");
                None
            }
        }
    }

    fn require_cold(&self) -> Result<ColdStore> {
        self.open_cold()?
            .ok_or_else(|| MemError::usage("this command needs --db-url (or cold.db_url in tiermem.toml)"))
    }

    /// Archive `facts` to cold, bumping `cold_count` in the tree for each one
    /// written. Returns the ids that made it.
    async fn archive(&self, cold: &ColdStore, tree: &mut TreeIndex, facts: &[Fact], now: DateTime<Utc>) -> HashSet<String> {
        let mut archived = HashSet::new();
        if facts.is_empty() {
            return archived;
        }
        if let Err(e) = cold.init_schema().await {
            warn!(error = %e, count = facts.len(), "cold store unavailable; facts not archived");
            return archived;
        }
        for fact in facts {
            match cold.append(&ColdRecord::from(fact)).await {
                Ok(_) => {
                    archived.insert(fact.id.clone());
                    if let Err(e) = tree.update_counts(&fact.category, 0, 1, now) {
                        warn!(error = %e, category = %fact.category, "tree cold count not updated");
                    }
                }
                Err(e) => warn!(error = %e, id = %fact.id, "failed to archive fact"),
            }
        }
        archived
    }

    fn archive_enabled(&self) -> bool {
        self.config.cold.archive_on_evict
    }

    // ── mem verbs ──────────────────────────────────────────────

    /// Insert into warm, then index the category in the tree.
    ///
    /// Facts pushed out by the size cap are archived before the insert is
    /// written; the cap still wins if archiving fails. Tree failures are
    /// logged and do not undo the warm write.
    pub async fn store(&mut self, req: StoreRequest, now: DateTime<Utc>) -> Result<StoreReport> {
        let mut warm = self.open_warm()?;
        let mut tree = self.open_tree()?;

        let fact = NewFact::new(req.text, req.category.clone(), req.importance)
            .with_tags(req.tags)
            .with_auto_tag(req.auto_tag);
        let staged = warm.stage_insert(fact, now)?;

        let mut archived = 0;
        if !staged.evicted().is_empty() && self.archive_enabled() && self.cold.is_some() {
            if let Some(cold) = self.try_open_cold() {
                archived = self.archive(&cold, &mut tree, staged.evicted(), now).await.len();
            }
            if archived < staged.evicted().len() {
                warn!(
                    lost = staged.evicted().len() - archived,
                    "size cap dropped warm facts that could not be archived"
                );
            }
        }
        let inserted = warm.apply_insert(staged)?;

        let leaf = req.category.rsplit('/').next().unwrap_or(&req.category);
        let tree_indexed = match tree
            .add(&req.category, &title_case(leaf))
            .and_then(|_| tree.update_counts(&req.category, 1, 0, now))
        {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, category = %req.category, "fact stored but not indexed in the tree");
                false
            }
        };
        for evicted in &inserted.evicted {
            if let Err(e) = tree.update_counts(&evicted.category, -1, 0, now) {
                warn!(error = %e, category = %evicted.category, "tree warm count not updated");
            }
        }

        Ok(StoreReport {
            id: inserted.id,
            category: req.category,
            status: "stored",
            evicted: inserted.evicted.len(),
            archived,
            tree_indexed,
        })
    }

    pub async fn retrieve(&mut self, query: &str, limit: usize, now: DateTime<Utc>) -> Result<Vec<RetrievedItem>> {
        let tree = self.open_tree()?;
        let mut warm = self.open_warm()?;
        let cold = self.try_open_cold();
        Retriever::new(&tree, &mut warm, cold.as_ref())
            .retrieve(query, limit, now)
            .await
    }

    /// Archive expired facts, then evict, recount and rebuild.
    ///
    /// With a cold store configured for archiving, an expired fact leaves
    /// warm only once cold has accepted it; the rest stay for the next run.
    /// Cold failures never fail the consolidation. A second run with nothing
    /// expired leaves warm and tree untouched.
    pub async fn consolidate(&mut self, now: DateTime<Utc>) -> Result<ConsolidateReport> {
        let mut warm = self.open_warm()?;
        let mut tree = self.open_tree()?;
        let state = self.open_hot_state()?;

        let expired = warm.expired(now);
        let archiving = !expired.is_empty() && self.archive_enabled() && self.cold.is_some();
        let mut archived = HashSet::new();
        if archiving {
            if let Some(cold) = self.try_open_cold() {
                archived = self.archive(&cold, &mut tree, &expired, now).await;
            }
        }
        let purge: HashSet<&str> = expired
            .iter()
            .map(|f| f.id.as_str())
            .filter(|id| !archiving || archived.contains(*id))
            .collect();
        let archive_failed = expired.len() - purge.len();
        if archive_failed > 0 {
            warn!(kept = archive_failed, "expired facts kept in warm until the cold store accepts them");
        }
        let evicted = warm.remove(&purge)?;

        let tree_recounted = tree.recount(warm.facts())?;
        let hot = HotBuilder::rebuild(&state, &warm, tree.len(), &self.paths.hot_output, now)?;

        info!(
            evicted,
            archived = archived.len(),
            warm = warm.len(),
            tree = tree.len(),
            "consolidation finished"
        );
        Ok(ConsolidateReport {
            evicted,
            archived: archived.len(),
            archive_failed,
            tree_recounted,
            warm_facts: warm.len(),
            tree_nodes: tree.len(),
            hot,
        })
    }

    pub fn stats(&mut self) -> Result<StatsReport> {
        let warm = self.open_warm()?;
        let tree = self.open_tree()?;
        let checkpoint = CheckpointStore::open(&self.paths.checkpoint)?;
        self.note(checkpoint.quarantined());

        let size_bytes = std::fs::metadata(&self.paths.hot_output)
            .map(|m| m.len())
            .unwrap_or(0);
        Ok(StatsReport {
            hot: HotStats {
                file: self.paths.hot_output.clone(),
                size_bytes,
                max_bytes: HOT_MAX_BYTES,
                pct_used: (size_bytes as f64 / HOT_MAX_BYTES as f64 * 1000.0).round() / 10.0,
            },
            warm: warm.stats()?,
            tree: TreeStats {
                nodes: tree.len(),
                max_nodes: TREE_MAX_NODES,
                size_bytes: tree.size_bytes(),
            },
            cold: self.try_open_cold().map(|c| c.transport_name().to_string()),
            checkpoint_files: checkpoint.len(),
        })
    }

    // ── tree ───

    pub fn tree_show(&mut self) -> Result<String> {
        Ok(self.open_tree()?.show())
    }

    pub fn tree_add(&mut self, path: &str, desc: &str) -> Result<bool> {
        self.open_tree()?.add(path, desc)
    }

    /// A non-empty node is reported as not removed rather than as an error.
    pub fn tree_remove(&mut self, path: &str) -> Result<TreeRemoval> {
        let mut tree = self.open_tree()?;
        match tree.remove(path) {
            Ok(removed) => Ok(TreeRemoval {
                path: path.to_string(),
                removed,
                reason: None,
            }),
            Err(e @ MemError::NotEmpty { .. }) => Ok(TreeRemoval {
                path: path.to_string(),
                removed: false,
                reason: Some(e.to_string()),
            }),
            Err(e) => Err(e),
        }
    }

    pub fn tree_search(&mut self, query: &str, top_k: usize, now: DateTime<Utc>) -> Result<Vec<TreeHit>> {
        Ok(self.open_tree()?.search(query, top_k, now))
    }

    // ── warm ───

    pub fn warm_list(&mut self, now: DateTime<Utc>) -> Result<Vec<ScoredFact>> {
        Ok(self.open_warm()?.list(now))
    }

    pub fn warm_stats(&mut self) -> Result<WarmStats> {
        self.open_warm()?.stats()
    }

    /// Evict expired facts and refresh tree counts. Nothing is archived.
    pub fn warm_evict(&mut self, now: DateTime<Utc>) -> Result<EvictReport> {
        let mut warm = self.open_warm()?;
        let evicted = warm.evict_expired(now)?;
        if !evicted.is_empty() {
            let mut tree = self.open_tree()?;
            if let Err(e) = tree.recount(warm.facts()) {
                warn!(error = %e, "tree counts not refreshed after eviction");
            }
        }
        Ok(EvictReport {
            evicted: evicted.len(),
            remaining: warm.len(),
        })
    }

    /// Keyword search. `touch` reinforces the returned facts.
    pub fn warm_search(&mut self, query: &str, limit: usize, touch: bool, now: DateTime<Utc>) -> Result<Vec<ScoredFact>> {
        let mut warm = self.open_warm()?;
        if touch {
            warm.recall(query, limit, now)
        } else {
            Ok(warm.search_keyword(query, limit, now))
        }
    }

    pub fn warm_recent(&mut self, n: usize, now: DateTime<Utc>) -> Result<Vec<ScoredFact>> {
        Ok(self.open_warm()?.recent(n, now))
    }

    pub fn warm_tags(&mut self, tags: &[String], mode: TagMode, limit: usize, now: DateTime<Utc>) -> Result<Vec<ScoredFact>> {
        Ok(self.open_warm()?.search_by_tags(tags, mode, limit, now))
    }

    // ── cold ───

    pub async fn cold_init(&self) -> Result<()> {
        self.require_cold()?.init_schema().await
    }

    pub async fn cold_store(&self, text: &str, category: &str, importance: f64, now: DateTime<Utc>) -> Result<ColdStoreReport> {
        if !(0.0..=1.0).contains(&importance) {
            return Err(MemError::usage(format!("importance {importance} is outside 0..1")));
        }
        tiermem_core::text::validate_category(category)?;
        let cold = self.require_cold()?;
        let record = ColdRecord::new(text, category, importance, now);
        let stored = cold.append(&record).await?;
        Ok(ColdStoreReport {
            id: record.id,
            stored,
        })
    }

    pub async fn cold_query(&self, query: &str, limit: usize) -> Result<Vec<ColdRecord>> {
        self.require_cold()?
            .try_query_keyword(&tokenize(query), limit)
            .await
    }

    // ── hot ───

    pub fn rebuild_hot(&mut self, output: Option<&Path>, now: DateTime<Utc>) -> Result<HotDigest> {
        let warm = self.open_warm()?;
        let tree = self.open_tree()?;
        let state = self.open_hot_state()?;
        let output = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.paths.hot_output.clone());
        HotBuilder::rebuild(&state, &warm, tree.len(), &output, now)
    }

    pub fn hot_state(&mut self, key: HotKey, data: Value) -> Result<HotState> {
        let mut state = self.open_hot_state()?;
        state.apply(key, data)?;
        state.save(&self.paths.hot_state)?;
        Ok(state)
    }

    // ── imp verbs ──────────────────────────────────────────────

    fn home(&self) -> Result<&Path> {
        self.home
            .as_deref()
            .ok_or_else(|| MemError::usage("cannot determine the home directory; use --path"))
    }

    pub fn scan(&self) -> Result<Vec<SessionDir>> {
        let home = self.home()?;
        Ok(discover_session_dirs(
            home,
            &self.config.import.extra_roots,
            &self.config.import.app,
        ))
    }

    /// Import one directory or every discovered one against a single checkpoint.
    ///
    /// A dry run uses a throwaway ledger when none exists yet so nothing is
    /// created on disk.
    pub fn import(&mut self, req: ImportRequest, now: DateTime<Utc>) -> Result<ImportReport> {
        let targets: Vec<(PathBuf, String, String)> = match &req.source {
            ImportSource::Path(dir) => {
                let app = req.app.clone().unwrap_or_else(|| self.config.import.app.clone());
                vec![(dir.clone(), dir.display().to_string(), app)]
            }
            ImportSource::Auto => self
                .scan()?
                .into_iter()
                .map(|d| {
                    let app = req.app.clone().unwrap_or(d.app);
                    (d.path, d.label, app)
                })
                .collect(),
        };
        if targets.is_empty() {
            info!("no session directories found");
        }

        let ledger = if req.dry_run && !self.paths.ledger.exists() {
            UsageLedger::in_memory()?
        } else {
            UsageLedger::open(&self.paths.ledger)?
        };
        let mut checkpoint = CheckpointStore::open(&self.paths.checkpoint)?;
        self.note(checkpoint.quarantined());

        let mut summary = DirectoryImport::default();
        let mut directories = Vec::new();
        for (dir, label, app) in targets {
            let opts = ImportOptions {
                app: app.clone(),
                dry_run: req.dry_run,
                mode: req.mode,
            };
            match import_directory(&dir, &mut checkpoint, &ledger, &opts, now) {
                Ok(report) => {
                    summary.absorb(&report);
                    directories.push(ImportedDirectory { label, app, report });
                }
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "directory import failed");
                    summary.errors.push(FileError {
                        file: dir,
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        summary.files.clear();

        let ledger_totals = if req.dry_run { None } else { Some(ledger.totals()?) };
        Ok(ImportReport {
            mode: req.mode,
            dry_run: req.dry_run,
            directories,
            summary,
            ledger: ledger_totals,
        })
    }
}

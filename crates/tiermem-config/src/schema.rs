use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration, read from `tiermem.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TiermemConfig {
    pub workspace: WorkspaceConfig,
    pub cold: ColdConfig,
    pub import: ImportConfig,
    pub logging: LoggingConfig,
}

// ── Workspace ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Workspace root holding `MEMORY.md`, `memory/` and `.checkpoint/`.
    /// `None` means the current directory.
    pub root: Option<PathBuf>,
    /// Hot digest output path, relative to the workspace root unless absolute.
    pub hot_output: Option<PathBuf>,
}

// ── Cold tier ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColdConfig {
    /// `https://…` for a remote pipeline endpoint, `file:…` or a path for a local SQLite file.
    pub db_url: Option<String>,
    /// Static bearer token for remote endpoints.
    pub auth_token: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Archive facts evicted during `consolidate` into the cold tier.
    pub archive_on_evict: bool,
}

impl Default for ColdConfig {
    fn default() -> Self {
        Self {
            db_url: None,
            auth_token: None,
            timeout_secs: 10,
            archive_on_evict: true,
        }
    }
}

// ── Import ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// App label stored with each imported usage record.
    pub app: String,
    /// Extra directories searched by `imp --auto` in addition to the conventional roots.
    pub extra_roots: Vec<PathBuf>,
    /// Usage ledger database, relative to the workspace root unless absolute.
    pub ledger_path: PathBuf,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            app: "openclaw".into(),
            extra_roots: vec![],
            ledger_path: PathBuf::from("memory/usage.db"),
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

/// Diagnostics go to stderr; stdout carries command output only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when neither `RUST_LOG` nor a CLI flag is set.
    pub level: String,
    /// One of [`LOG_FORMATS`].
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            format: "pretty".into(),
        }
    }
}

pub const LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

// ── Checks ─────────────────────────────────────────────────────

/// How much a [`ConfigIssue`] matters. `Fatal` stops the load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueLevel {
    Fatal,
    Warn,
    Note,
}

/// Something in `tiermem.toml` that parsed but looks wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub field: &'static str,
    pub message: String,
    pub level: IssueLevel,
    pub hint: Option<String>,
}

impl ConfigIssue {
    fn new(level: IssueLevel, field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
            level,
            hint: None,
        }
    }

    fn fatal(field: &'static str, message: impl Into<String>) -> Self {
        Self::new(IssueLevel::Fatal, field, message)
    }

    fn warn(field: &'static str, message: impl Into<String>) -> Self {
        Self::new(IssueLevel::Warn, field, message)
    }

    fn note(field: &'static str, message: impl Into<String>) -> Self {
        Self::new(IssueLevel::Note, field, message)
    }

    fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.level {
            IssueLevel::Fatal => "fatal",
            IssueLevel::Warn => "warn",
            IssueLevel::Note => "note",
        };
        write!(f, "[{tag}] {} {}", self.field, self.message)?;
        match &self.hint {
            Some(hint) => write!(f, "; try: {hint}"),
            None => Ok(()),
        }
    }
}

impl TiermemConfig {
    /// Cross-field checks serde cannot express.
    ///
    /// Non-fatal issues are returned for the loader to log; any fatal one
    /// turns the whole result into `Err` listing every fatal issue.
    pub fn validate(&self) -> Result<Vec<ConfigIssue>, String> {
        let mut issues = Vec::new();
        self.cold.check(&mut issues);
        self.import.check(&mut issues);
        self.logging.check(&mut issues);

        let fatal: Vec<String> = issues
            .iter()
            .filter(|i| i.level == IssueLevel::Fatal)
            .map(ToString::to_string)
            .collect();
        if fatal.is_empty() {
            Ok(issues)
        } else {
            Err(format!("tiermem.toml rejected: {}", fatal.join(", ")))
        }
    }
}

impl ColdConfig {
    fn check(&self, issues: &mut Vec<ConfigIssue>) {
        if self.timeout_secs == 0 {
            issues.push(
                ConfigIssue::fatal("cold.timeout_secs", "must be at least 1 second").hint("timeout_secs = 10"),
            );
        }
        let Some(url) = self.db_url.as_deref() else {
            return;
        };
        let plain = url.starts_with("http://");
        if (plain || url.starts_with("https://") || url.starts_with("libsql://")) && self.auth_token.is_none() {
            issues.push(
                ConfigIssue::warn("cold.auth_token", "missing for a remote cold store; requests go out unauthenticated")
                    .hint("export TIERMEM_COLD_TOKEN"),
            );
        }
        if plain {
            issues.push(
                ConfigIssue::warn("cold.db_url", format!("'{url}' is not TLS; the token travels in the clear"))
                    .hint("switch the scheme to https://"),
            );
        }
    }
}

impl ImportConfig {
    fn check(&self, issues: &mut Vec<ConfigIssue>) {
        if self.app.trim().is_empty() {
            issues.push(ConfigIssue::warn("import.app", "blank; usage records will carry no app label"));
        }
        for root in self.extra_roots.iter().filter(|r| r.is_relative()) {
            issues.push(ConfigIssue::note(
                "import.extra_roots",
                format!("{} resolves against the current directory", root.display()),
            ));
        }
    }
}

impl LoggingConfig {
    fn check(&self, issues: &mut Vec<ConfigIssue>) {
        if !LOG_FORMATS.contains(&self.format.as_str()) {
            issues.push(
                ConfigIssue::warn("logging.format", format!("'{}' is not a known format, pretty is used", self.format))
                    .hint(LOG_FORMATS.join(" | ")),
            );
        }
        if self.level.parse::<tracing::Level>().is_err() {
            issues.push(
                ConfigIssue::warn("logging.level", format!("'{}' is not a tracing level", self.level))
                    .hint("trace | debug | info | warn | error"),
            );
        }
    }
}

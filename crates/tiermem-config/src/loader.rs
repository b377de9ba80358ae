use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::schema::TiermemConfig;

/// Loads the tiermem configuration once per invocation.
///
/// The CLI builds its `Context` from the value returned here; nothing else
/// in the workspace reads the environment.
pub struct ConfigLoader {
    config: TiermemConfig,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > TIERMEM_CONFIG env > ~/.tiermem/tiermem.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("TIERMEM_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tiermem")
            .join("tiermem.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> tiermem_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = Self::read(&config_path, path.is_some())?;
        let config = Self::apply_env_overrides(config);
        Self::finish(config, config_path)
    }

    /// Parse a config from a TOML string without touching the environment.
    pub fn from_toml(raw: &str) -> tiermem_core::Result<Self> {
        let config = toml::from_str::<TiermemConfig>(raw)
            .map_err(|e| tiermem_core::MemError::Config(format!("failed to parse config: {e}")))?;
        Self::finish(config, PathBuf::from("<inline>"))
    }

    fn read(config_path: &Path, explicit: bool) -> tiermem_core::Result<TiermemConfig> {
        if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(config_path)
                .map_err(|e| tiermem_core::MemError::io_at(config_path, e))?;
            toml::from_str::<TiermemConfig>(&raw).map_err(|e| {
                tiermem_core::MemError::Config(format!(
                    "failed to parse {}: {}",
                    config_path.display(),
                    e
                ))
            })
        } else if explicit {
            Err(tiermem_core::MemError::Config(format!(
                "config file not found: {}",
                config_path.display()
            )))
        } else {
            debug!(?config_path, "config file not found, using defaults");
            Ok(TiermemConfig::default())
        }
    }

    fn finish(config: TiermemConfig, config_path: PathBuf) -> tiermem_core::Result<Self> {
        let issues = config.validate().map_err(tiermem_core::MemError::Config)?;
        for issue in &issues {
            warn!(path = %config_path.display(), "{issue}");
        }

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Get a snapshot of the loaded config.
    pub fn get(&self) -> TiermemConfig {
        self.config.clone()
    }

    /// Path the config was (or would have been) read from.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply env var overrides (WORKSPACE, TIERMEM_COLD_URL, TIERMEM_COLD_TOKEN, TIERMEM_LOG_LEVEL).
    fn apply_env_overrides(mut config: TiermemConfig) -> TiermemConfig {
        if let Ok(v) = std::env::var("WORKSPACE") {
            if !v.is_empty() {
                config.workspace.root = Some(PathBuf::from(v));
            }
        }
        if let Ok(v) = std::env::var("TIERMEM_COLD_URL") {
            config.cold.db_url = Some(v);
        }
        // Token: config file takes priority, env is the fallback.
        if config.cold.auth_token.is_none() {
            if let Ok(v) = std::env::var("TIERMEM_COLD_TOKEN") {
                config.cold.auth_token = Some(v);
            }
        }
        if let Ok(v) = std::env::var("TIERMEM_LOG_LEVEL") {
            config.logging.level = v;
        }
        config
    }
}

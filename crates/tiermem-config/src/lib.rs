//! # tiermem-config
//!
//! Configuration for the tiermem tools. Reads from `tiermem.toml`, then
//! environment variables, then CLI overrides applied by the caller.

pub mod schema;
pub mod loader;

pub use schema::TiermemConfig;
pub use schema::{ColdConfig, ConfigIssue, ImportConfig, IssueLevel, LoggingConfig, WorkspaceConfig};
pub use loader::ConfigLoader;

//! # tiermem-cli
//!
//! Command-line front ends for the tiermem workspace.
//!
//! ## `mem`
//!
//! - `mem store` / `mem retrieve`: write and query facts across tiers
//! - `mem consolidate`: evict, archive, recount and rebuild MEMORY.md
//! - `mem tree`, `mem warm`, `mem cold`: per-tier maintenance
//! - `mem rebuild-hot`, `mem hot-state`: the hot digest and its identity state
//!
//! ## `imp`
//!
//! - `imp --auto | --path DIR`: checkpointed JSONL usage import
//! - `imp scan`: list discovered session directories

pub mod commands;
pub mod context;

pub use commands::{ImpCli, MemCli, Outcome};
pub use context::{Context, ImportRequest, ImportSource, Overrides, StoreRequest, WorkspacePaths};

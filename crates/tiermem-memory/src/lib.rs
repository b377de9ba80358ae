//! # tiermem-memory
//!
//! The tiered memory store:
//!
//! - **Hot**: identity state rendered with the best warm facts into a `MEMORY.md` digest capped at 5 KiB.
//! - **Warm**: scored, size-capped facts in `warm-memory.json`, decaying with age and evicted after 30 days.
//! - **Cold**: an append-only remote log reached through a statement pipeline.
//!
//! A bounded [`TreeIndex`] of categories routes retrieval, and [`Retriever`]
//! merges results across tiers.

pub mod cold;
pub mod hot;
pub mod retriever;
pub mod scorer;
pub mod tree;
pub mod warm;

pub use cold::{ColdRecord, ColdStore, ColdTransport, HttpPipelineTransport, SqliteTransport, Statement, WireValue};
pub use hot::{HotBuilder, HotDigest, HotKey, HotState, Project};
pub use retriever::{RetrievedItem, Retriever, Tier};
pub use tree::{TreeHit, TreeIndex, TreeNode};
pub use warm::{Fact, Inserted, NewFact, ScoredFact, TagMode, WarmStats, WarmStore};

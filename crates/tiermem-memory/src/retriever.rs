use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tiermem_core::Result;
use tiermem_core::text::tokenize;
use tracing::debug;

use crate::cold::{ColdRecord, ColdStore, MAX_QUERY_TOKENS};
use crate::tree::TreeIndex;
use crate::warm::{ScoredFact, WarmStore};

/// Tree hits used to route category lookups.
pub const TREE_ROUTES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Warm,
    Cold,
}

/// One merged retrieval result.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedItem {
    pub id: String,
    pub text: String,
    pub category: String,
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    pub tier: Tier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree_relevance: Option<f64>,
}

impl RetrievedItem {
    fn from_warm(scored: ScoredFact, tree_relevance: Option<f64>) -> Self {
        Self {
            id: scored.fact.id,
            text: scored.fact.text,
            category: scored.fact.category,
            importance: scored.fact.importance,
            created_at: scored.fact.created_at,
            tier: Tier::Warm,
            score: Some(scored.score),
            relevance: scored.relevance,
            tree_relevance,
        }
    }

    fn from_cold(record: ColdRecord) -> Self {
        Self {
            id: record.id,
            text: record.text,
            category: record.category,
            importance: record.importance,
            created_at: record.created_at,
            tier: Tier::Cold,
            score: None,
            relevance: None,
            tree_relevance: None,
        }
    }

    /// Relevance if known, else score, else importance.
    pub fn rank_key(&self) -> f64 {
        self.relevance.or(self.score).unwrap_or(self.importance)
    }
}

/// Multi-tier lookup: tree-routed warm categories, warm keyword recall,
/// then cold for whatever is still missing.
pub struct Retriever<'a> {
    tree: &'a TreeIndex,
    warm: &'a mut WarmStore,
    cold: Option<&'a ColdStore>,
}

impl<'a> Retriever<'a> {
    pub fn new(tree: &'a TreeIndex, warm: &'a mut WarmStore, cold: Option<&'a ColdStore>) -> Self {
        Self { tree, warm, cold }
    }

    /// Only the warm keyword step reinforces access counts; cold reads never do.
    pub async fn retrieve(&mut self, query: &str, limit: usize, now: DateTime<Utc>) -> Result<Vec<RetrievedItem>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut results: Vec<RetrievedItem> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        let hits = self.tree.search(query, TREE_ROUTES, now);
        debug!(hits = hits.len(), "tree routes");
        for hit in &hits {
            for scored in self.warm.by_category(&hit.path, limit, now) {
                if seen.insert(scored.fact.id.clone()) {
                    results.push(RetrievedItem::from_warm(scored, Some(hit.score)));
                }
            }
        }

        for scored in self.warm.recall(query, limit, now)? {
            if seen.insert(scored.fact.id.clone()) {
                results.push(RetrievedItem::from_warm(scored, None));
            }
        }

        if results.len() < limit {
            if let Some(cold) = self.cold {
                let tokens: Vec<String> = tokenize(query).into_iter().take(MAX_QUERY_TOKENS).collect();
                let records = cold.query_keyword(&tokens, limit - results.len()).await;
                debug!(cold = records.len(), "cold fill");
                for record in records {
                    if seen.insert(record.id.clone()) {
                        results.push(RetrievedItem::from_cold(record));
                    }
                }
            }
        }

        results.sort_by(|a, b| b.rank_key().total_cmp(&a.rank_key()).then_with(|| a.id.cmp(&b.id)));
        results.truncate(limit);
        Ok(results)
    }
}

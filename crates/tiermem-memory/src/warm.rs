//! Warm tier: a scored, size-capped set of recent facts in `warm-memory.json`.
//!
//! Every mutation is applied to a staged copy, checked against the size cap,
//! written atomically, and only then becomes the in-memory state.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tiermem_core::hash::short_hash;
use tiermem_core::text::{category_contains, token_set, tokenize, validate_category};
use tiermem_core::{MemError, Result, load_json_or_default, write_json_atomic};
use tracing::{debug, info};

use crate::scorer::{age_days, score};

/// Serialized (compact JSON) size cap of the whole warm set.
pub const WARM_MAX_BYTES: usize = 50 * 1024;
/// Facts older than this are eviction candidates.
pub const WARM_TTL_DAYS: f64 = 30.0;
/// Eviction candidates scoring below this are removed.
pub const EVICT_SCORE_THRESHOLD: f64 = 0.3;
pub const AUTO_TAG_LIMIT: usize = 8;

const ID_LEN: usize = 12;

const STOP_WORDS: &[&str] = &[
    "about", "after", "all", "also", "and", "are", "been", "but", "can", "did", "does", "for",
    "from", "had", "has", "have", "her", "his", "into", "its", "not", "now", "our", "out", "she",
    "that", "the", "their", "them", "then", "there", "these", "they", "this", "was", "were",
    "what", "when", "which", "who", "will", "with", "would", "you", "your",
];

/// One remembered fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: String,
    pub text: String,
    pub category: String,
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u32,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Fact {
    pub fn score(&self, now: DateTime<Utc>) -> f64 {
        score(self.importance, self.created_at, self.access_count, now)
    }

    /// Text, category and tag tokens used for keyword matching.
    pub fn tokens(&self) -> BTreeSet<String> {
        let mut tokens = token_set(&self.text);
        tokens.extend(token_set(&self.category));
        for tag in &self.tags {
            tokens.extend(token_set(tag));
        }
        tokens
    }
}

/// Input to [`WarmStore::insert`].
#[derive(Debug, Clone)]
pub struct NewFact {
    pub text: String,
    pub category: String,
    pub importance: f64,
    pub tags: Vec<String>,
    pub auto_tag: bool,
}

impl NewFact {
    pub fn new(text: impl Into<String>, category: impl Into<String>, importance: f64) -> Self {
        Self {
            text: text.into(),
            category: category.into(),
            importance,
            tags: Vec::new(),
            auto_tag: false,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_auto_tag(mut self, auto_tag: bool) -> Self {
        self.auto_tag = auto_tag;
        self
    }
}

/// A fact with its score at read time.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredFact {
    #[serde(flatten)]
    pub fact: Fact,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f64>,
}

/// Result of a successful insert.
#[derive(Debug, Clone)]
pub struct Inserted {
    pub id: String,
    /// Facts removed by size enforcement to make room.
    pub evicted: Vec<Fact>,
}

/// An insert computed against the current set but not yet persisted.
///
/// Built by [`WarmStore::stage_insert`] and applied with
/// [`WarmStore::apply_insert`]; nothing is written until then.
#[derive(Debug, Clone)]
pub struct StagedInsert {
    id: String,
    next: Vec<Fact>,
    evicted: Vec<Fact>,
}

impl StagedInsert {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Facts size enforcement will drop when this insert is applied.
    pub fn evicted(&self) -> &[Fact] {
        &self.evicted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagMode {
    Any,
    All,
}

#[derive(Debug, Clone, Serialize)]
pub struct WarmStats {
    pub count: usize,
    pub bytes: usize,
    pub size_kb: f64,
    pub max_kb: f64,
    pub categories: BTreeMap<String, usize>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Keywords for `--auto-tag`: content tokens longer than two characters,
/// stop words removed, first [`AUTO_TAG_LIMIT`] kept.
pub fn auto_tags(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| t.chars().count() > 2)
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .take(AUTO_TAG_LIMIT)
        .collect()
}

/// Compact JSON size of a fact list.
pub fn serialized_size(facts: &[Fact]) -> Result<usize> {
    Ok(serde_json::to_vec(facts)?.len())
}

/// Read order: score desc, newer first, smaller id first.
fn rank_order(a: (&Fact, f64), b: (&Fact, f64)) -> Ordering {
    b.1.total_cmp(&a.1)
        .then_with(|| b.0.created_at.cmp(&a.0.created_at))
        .then_with(|| a.0.id.cmp(&b.0.id))
}

/// Eviction order: the exact reverse of [`rank_order`].
fn victim_order(a: (&Fact, f64), b: (&Fact, f64)) -> Ordering {
    rank_order(b, a)
}

/// Drop lowest-ranked facts until the set fits the cap or one fact remains.
fn enforce_size(facts: &mut Vec<Fact>, now: DateTime<Utc>) -> Result<Vec<Fact>> {
    let mut evicted = Vec::new();
    while facts.len() > 1 && serialized_size(facts)? > WARM_MAX_BYTES {
        let victim = facts
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| victim_order((a, a.score(now)), (b, b.score(now))))
            .map(|(i, _)| i);
        match victim {
            Some(i) => evicted.push(facts.remove(i)),
            None => break,
        }
    }
    Ok(evicted)
}

fn dedup_tags(tags: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

pub struct WarmStore {
    facts: Vec<Fact>,
    path: Option<PathBuf>,
    quarantined: Option<PathBuf>,
}

impl WarmStore {
    pub fn in_memory() -> Self {
        Self {
            facts: Vec::new(),
            path: None,
            quarantined: None,
        }
    }

    /// Load `warm-memory.json`; a missing file is an empty store.
    pub fn open(path: &Path) -> Result<Self> {
        let loaded = load_json_or_default::<Vec<Fact>>(path)?;
        debug!(path = %path.display(), facts = loaded.value.len(), "warm store loaded");
        Ok(Self {
            facts: loaded.value,
            path: Some(path.to_path_buf()),
            quarantined: loaded.quarantined,
        })
    }

    pub fn quarantined(&self) -> Option<&Path> {
        self.quarantined.as_deref()
    }

    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Fact> {
        self.facts.iter().find(|f| f.id == id)
    }

    pub fn size_bytes(&self) -> Result<usize> {
        serialized_size(&self.facts)
    }

    fn commit(&mut self, next: Vec<Fact>) -> Result<()> {
        debug_assert!(serialized_size(&next).map(|n| n <= WARM_MAX_BYTES || next.len() <= 1).unwrap_or(true));
        debug_assert_eq!(
            next.iter().map(|f| f.id.as_str()).collect::<HashSet<_>>().len(),
            next.len()
        );
        if let Some(ref path) = self.path {
            write_json_atomic(path, &next)?;
        }
        self.facts = next;
        Ok(())
    }

    fn unique_id(&self, text: &str, now: DateTime<Utc>) -> String {
        let nanos = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1000))
            .to_string();
        let mut id = short_hash(&[text.as_bytes(), nanos.as_bytes()], ID_LEN);
        let mut salt = 0u32;
        while self.get(&id).is_some() {
            salt += 1;
            id = short_hash(
                &[text.as_bytes(), nanos.as_bytes(), salt.to_string().as_bytes()],
                ID_LEN,
            );
        }
        id
    }

    /// Insert a fact, then evict the lowest-ranked facts until the set fits.
    ///
    /// Rejected with `LimitExceeded` (store unchanged) when the new fact
    /// itself would be the one evicted.
    pub fn insert(&mut self, new: NewFact, now: DateTime<Utc>) -> Result<Inserted> {
        let staged = self.stage_insert(new, now)?;
        self.apply_insert(staged)
    }

    /// Persist a staged insert.
    ///
    /// Fails with `StateStale` if the set changed since staging.
    pub fn apply_insert(&mut self, staged: StagedInsert) -> Result<Inserted> {
        let unchanged = staged.next.len() + staged.evicted.len() == self.facts.len() + 1
            && self.facts.iter().all(|f| {
                staged.next.iter().chain(&staged.evicted).any(|s| s.id == f.id)
            });
        if !unchanged {
            return Err(MemError::StateStale("warm store changed since the insert was staged".into()));
        }
        let StagedInsert { id, next, evicted } = staged;
        self.commit(next)?;
        info!(%id, evicted = evicted.len(), "warm fact stored");
        Ok(Inserted { id, evicted })
    }

    /// Validate `new` and compute the resulting set without writing it.
    pub fn stage_insert(&self, new: NewFact, now: DateTime<Utc>) -> Result<StagedInsert> {
        let text = new.text.trim().to_string();
        if text.is_empty() {
            return Err(MemError::usage("fact text must not be empty"));
        }
        validate_category(&new.category)?;
        if !new.importance.is_finite() || !(0.0..=1.0).contains(&new.importance) {
            return Err(MemError::usage(format!(
                "importance must be within 0..1, got {}",
                new.importance
            )));
        }

        let mut tags = new.tags;
        if new.auto_tag {
            tags.extend(auto_tags(&text));
        }
        let fact = Fact {
            id: self.unique_id(&text, now),
            text,
            category: new.category,
            importance: new.importance,
            created_at: now,
            access_count: 0,
            tags: dedup_tags(tags),
        };

        if serialized_size(std::slice::from_ref(&fact))? > WARM_MAX_BYTES {
            return Err(MemError::LimitExceeded {
                what: "warm fact size".into(),
                limit: WARM_MAX_BYTES,
                hint: "shorten the text or store it in the cold tier".into(),
            });
        }

        let id = fact.id.clone();
        let mut stage = self.facts.clone();
        stage.push(fact);
        let evicted = enforce_size(&mut stage, now)?;
        if evicted.iter().any(|f| f.id == id) {
            return Err(MemError::LimitExceeded {
                what: "warm tier size".into(),
                limit: WARM_MAX_BYTES,
                hint: "the new fact ranks lowest; raise its importance or run `mem consolidate`"
                    .into(),
            });
        }

        Ok(StagedInsert {
            id,
            next: stage,
            evicted,
        })
    }

    fn rank_keyword(&self, query: &str, limit: usize, now: DateTime<Utc>) -> Vec<ScoredFact> {
        let query_tokens = token_set(query);
        if query_tokens.is_empty() || limit == 0 {
            return Vec::new();
        }
        let mut hits: Vec<(ScoredFact, f64)> = self
            .facts
            .iter()
            .filter_map(|f| {
                let overlap = query_tokens.intersection(&f.tokens()).count();
                if overlap == 0 {
                    return None;
                }
                let score = f.score(now);
                let relevance = overlap as f64 / query_tokens.len() as f64 * score;
                Some((
                    ScoredFact {
                        fact: f.clone(),
                        score,
                        relevance: Some(relevance),
                    },
                    relevance,
                ))
            })
            .collect();
        hits.sort_by(|a, b| rank_order((&a.0.fact, a.1), (&b.0.fact, b.1)));
        hits.truncate(limit);
        hits.into_iter().map(|(s, _)| s).collect()
    }

    /// Keyword search without side effects.
    pub fn search_keyword(&self, query: &str, limit: usize, now: DateTime<Utc>) -> Vec<ScoredFact> {
        self.rank_keyword(query, limit, now)
    }

    /// Keyword search that reinforces: every returned fact has its
    /// `access_count` incremented and the store is persisted.
    pub fn recall(&mut self, query: &str, limit: usize, now: DateTime<Utc>) -> Result<Vec<ScoredFact>> {
        let hits = self.rank_keyword(query, limit, now);
        if hits.is_empty() {
            return Ok(hits);
        }
        let touched: HashSet<&str> = hits.iter().map(|h| h.fact.id.as_str()).collect();
        let mut stage = self.facts.clone();
        for fact in stage.iter_mut().filter(|f| touched.contains(f.id.as_str())) {
            fact.access_count = fact.access_count.saturating_add(1);
        }
        self.commit(stage)?;
        debug!(touched = hits.len(), "warm recall reinforced facts");
        Ok(hits)
    }

    fn ranked<'a>(&self, facts: impl Iterator<Item = &'a Fact>, limit: usize, now: DateTime<Utc>) -> Vec<ScoredFact> {
        let mut scored: Vec<ScoredFact> = facts
            .map(|f| ScoredFact {
                fact: f.clone(),
                score: f.score(now),
                relevance: None,
            })
            .collect();
        scored.sort_by(|a, b| rank_order((&a.fact, a.score), (&b.fact, b.score)));
        scored.truncate(limit);
        scored
    }

    /// Facts under a category prefix (component-wise), best first.
    pub fn by_category(&self, prefix: &str, limit: usize, now: DateTime<Utc>) -> Vec<ScoredFact> {
        self.ranked(
            self.facts.iter().filter(|f| category_contains(prefix, &f.category)),
            limit,
            now,
        )
    }

    pub fn search_by_tags(&self, tags: &[String], mode: TagMode, limit: usize, now: DateTime<Utc>) -> Vec<ScoredFact> {
        let wanted = dedup_tags(tags.iter().cloned());
        if wanted.is_empty() {
            return Vec::new();
        }
        let matches = |f: &&Fact| match mode {
            TagMode::Any => wanted.iter().any(|t| f.tags.contains(t)),
            TagMode::All => wanted.iter().all(|t| f.tags.contains(t)),
        };
        self.ranked(self.facts.iter().filter(matches), limit, now)
    }

    /// All facts, best first.
    pub fn list(&self, now: DateTime<Utc>) -> Vec<ScoredFact> {
        self.ranked(self.facts.iter(), usize::MAX, now)
    }

    /// The `n` most recently created facts.
    pub fn recent(&self, n: usize, now: DateTime<Utc>) -> Vec<ScoredFact> {
        let mut facts: Vec<&Fact> = self.facts.iter().collect();
        facts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        facts
            .into_iter()
            .take(n)
            .map(|f| ScoredFact {
                fact: f.clone(),
                score: f.score(now),
                relevance: None,
            })
            .collect()
    }

    /// [`expired`](Self::expired) followed by [`remove`](Self::remove).
    /// Returns the removed facts.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> Result<Vec<Fact>> {
        let expired = self.expired(now);
        let ids: HashSet<&str> = expired.iter().map(|f| f.id.as_str()).collect();
        self.remove(&ids)?;
        Ok(expired)
    }

    /// Facts older than the TTL that score below the threshold. Read-only.
    pub fn expired(&self, now: DateTime<Utc>) -> Vec<Fact> {
        self.facts
            .iter()
            .filter(|f| age_days(f.created_at, now) > WARM_TTL_DAYS && f.score(now) < EVICT_SCORE_THRESHOLD)
            .cloned()
            .collect()
    }

    /// Drop the facts whose ids are in `ids` and persist. Returns how many went.
    pub fn remove(&mut self, ids: &HashSet<&str>) -> Result<usize> {
        let kept: Vec<Fact> = self
            .facts
            .iter()
            .filter(|f| !ids.contains(f.id.as_str()))
            .cloned()
            .collect();
        let removed = self.facts.len() - kept.len();
        if removed == 0 {
            return Ok(0);
        }
        self.commit(kept)?;
        info!(removed, "warm facts removed");
        Ok(removed)
    }

    pub fn stats(&self) -> Result<WarmStats> {
        let bytes = self.size_bytes()?;
        let mut categories = BTreeMap::new();
        for f in &self.facts {
            *categories.entry(f.category.clone()).or_insert(0) += 1;
        }
        Ok(WarmStats {
            count: self.facts.len(),
            bytes,
            size_kb: (bytes as f64 / 1024.0 * 10.0).round() / 10.0,
            max_kb: WARM_MAX_BYTES as f64 / 1024.0,
            categories,
            oldest: self.facts.iter().map(|f| f.created_at).min(),
            newest: self.facts.iter().map(|f| f.created_at).max(),
        })
    }
}

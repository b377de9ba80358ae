use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tiermem_core::text::{category_contains, parent_path, title_case, token_set, validate_category};
use tiermem_core::{MemError, Result, load_json_or_default, write_json_atomic};
use tracing::{debug, info};

use crate::scorer::{TREE_HALF_LIFE_DAYS, age_days, half_life_decay};
use crate::warm::Fact;

pub const TREE_MAX_NODES: usize = 50;
/// Maximum depth counting the root as depth 1.
pub const TREE_MAX_DEPTH: usize = 4;
pub const TREE_MAX_CHILDREN: usize = 10;
pub const ROOT: &str = "root";

/// One category in the index. The path is the map key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub desc: String,
    #[serde(default)]
    pub warm_count: u64,
    #[serde(default)]
    pub cold_count: u64,
    #[serde(default)]
    pub last_access: Option<DateTime<Utc>>,
    #[serde(default)]
    pub children: BTreeSet<String>,
}

impl TreeNode {
    fn new(desc: impl Into<String>) -> Self {
        Self {
            desc: desc.into(),
            warm_count: 0,
            cold_count: 0,
            last_access: None,
            children: BTreeSet::new(),
        }
    }
}

/// A scored match from [`TreeIndex::search`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeHit {
    pub path: String,
    pub score: f64,
    pub desc: String,
}

/// Bounded hierarchical catalog of memory categories, used to route retrieval.
///
/// Mutations are staged on a copy, persisted, and only then swapped in, so a
/// failed write or a cap violation leaves the index untouched.
#[derive(Debug, Clone)]
pub struct TreeIndex {
    nodes: BTreeMap<String, TreeNode>,
    path: Option<PathBuf>,
    quarantined: Option<PathBuf>,
}

impl Default for TreeIndex {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn root_only() -> BTreeMap<String, TreeNode> {
    let mut nodes = BTreeMap::new();
    nodes.insert(ROOT.to_string(), TreeNode::new("Memory root"));
    nodes
}

/// Depth of a category path with the root counted as 1.
pub fn depth(path: &str) -> usize {
    if path == ROOT {
        1
    } else {
        path.split('/').count() + 1
    }
}

impl TreeIndex {
    /// An index that is never written to disk (tests, dry runs).
    pub fn in_memory() -> Self {
        Self {
            nodes: root_only(),
            path: None,
            quarantined: None,
        }
    }

    /// Load `memory-tree.json`, creating a root-only index when absent.
    pub fn open(path: &Path) -> Result<Self> {
        let loaded = load_json_or_default::<BTreeMap<String, TreeNode>>(path)?;
        let mut nodes = loaded.value;
        nodes
            .entry(ROOT.to_string())
            .or_insert_with(|| TreeNode::new("Memory root"));
        debug!(path = %path.display(), nodes = nodes.len(), "tree index loaded");
        Ok(Self {
            nodes,
            path: Some(path.to_path_buf()),
            quarantined: loaded.quarantined,
        })
    }

    /// Where a corrupt index file was moved during `open`, if anywhere.
    pub fn quarantined(&self) -> Option<&Path> {
        self.quarantined.as_deref()
    }

    pub fn node(&self, path: &str) -> Option<&TreeNode> {
        self.nodes.get(path)
    }

    pub fn nodes(&self) -> &BTreeMap<String, TreeNode> {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Compact serialized size, as reported by `stats`.
    pub fn size_bytes(&self) -> usize {
        serde_json::to_vec(&self.nodes).map(|v| v.len()).unwrap_or(0)
    }

    fn commit(&mut self, next: BTreeMap<String, TreeNode>) -> Result<()> {
        if let Some(ref path) = self.path {
            write_json_atomic(path, &next)?;
        }
        self.nodes = next;
        Ok(())
    }

    /// Add a category node, creating missing ancestors.
    ///
    /// Returns `false` when the node already exists. Fails with
    /// `LimitExceeded` if the result would break the node, depth or fanout caps.
    pub fn add(&mut self, path: &str, desc: &str) -> Result<bool> {
        if path == ROOT {
            return Err(MemError::usage("'root' is reserved"));
        }
        validate_category(path)?;
        if self.nodes.contains_key(path) {
            return Ok(false);
        }
        if depth(path) > TREE_MAX_DEPTH {
            return Err(MemError::LimitExceeded {
                what: format!("tree depth of '{path}'"),
                limit: TREE_MAX_DEPTH,
                hint: format!(
                    "use at most {} path components",
                    TREE_MAX_DEPTH - 1
                ),
            });
        }

        let mut stage = self.nodes.clone();
        let components: Vec<&str> = path.split('/').collect();
        for i in 1..=components.len() {
            let prefix = components[..i].join("/");
            if stage.contains_key(&prefix) {
                continue;
            }
            let node_desc = if i == components.len() {
                desc.to_string()
            } else {
                title_case(components[i - 1])
            };
            let parent = parent_path(&prefix).to_string();
            stage.insert(prefix.clone(), TreeNode::new(node_desc));
            if let Some(parent_node) = stage.get_mut(&parent) {
                parent_node.children.insert(prefix.clone());
                if parent_node.children.len() > TREE_MAX_CHILDREN {
                    return Err(MemError::LimitExceeded {
                        what: format!("children of '{parent}'"),
                        limit: TREE_MAX_CHILDREN,
                        hint: "group related categories under a shared parent".into(),
                    });
                }
            }
        }

        if stage.len() > TREE_MAX_NODES {
            return Err(MemError::LimitExceeded {
                what: "tree nodes".into(),
                limit: TREE_MAX_NODES,
                hint: "remove empty categories with `mem tree --remove PATH`".into(),
            });
        }

        self.commit(stage)?;
        info!(path, "tree node added");
        Ok(true)
    }

    /// Remove a node and its descendants.
    ///
    /// Fails with `NotEmpty` (tree unchanged) if the node or any descendant
    /// still counts warm or cold facts. Root and unknown paths return `false`.
    pub fn remove(&mut self, path: &str) -> Result<bool> {
        if path == ROOT || !self.nodes.contains_key(path) {
            return Ok(false);
        }
        let subtree: Vec<String> = self
            .nodes
            .keys()
            .filter(|k| category_contains(path, k))
            .cloned()
            .collect();
        for key in &subtree {
            let node = &self.nodes[key];
            if node.warm_count > 0 || node.cold_count > 0 {
                return Err(MemError::NotEmpty {
                    path: key.clone(),
                    warm: node.warm_count,
                    cold: node.cold_count,
                });
            }
        }

        let mut stage = self.nodes.clone();
        let mut ordered = subtree;
        // children before parents
        ordered.sort_by_key(|k| std::cmp::Reverse(depth(k)));
        for key in &ordered {
            stage.remove(key);
        }
        if let Some(parent) = stage.get_mut(parent_path(path)) {
            parent.children.remove(path);
        }

        self.commit(stage)?;
        info!(path, "tree node removed");
        Ok(true)
    }

    /// Adjust counts on `path` and all of its ancestors, clamping at zero.
    ///
    /// Unknown paths are ignored.
    pub fn update_counts(
        &mut self,
        path: &str,
        warm_delta: i64,
        cold_delta: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !self.nodes.contains_key(path) {
            return Ok(());
        }
        let mut stage = self.nodes.clone();
        let mut current = path.to_string();
        loop {
            if let Some(node) = stage.get_mut(&current) {
                node.warm_count = (node.warm_count as i64 + warm_delta).max(0) as u64;
                node.cold_count = (node.cold_count as i64 + cold_delta).max(0) as u64;
                node.last_access = Some(now);
            }
            if current == ROOT {
                break;
            }
            current = parent_path(&current).to_string();
        }
        self.commit(stage)
    }

    /// Recompute every `warm_count` from the warm set. Returns whether anything changed.
    pub fn recount(&mut self, facts: &[Fact]) -> Result<bool> {
        let mut stage = self.nodes.clone();
        for (path, node) in stage.iter_mut() {
            node.warm_count = facts
                .iter()
                .filter(|f| category_contains(path, &f.category))
                .count() as u64;
        }
        if stage == self.nodes {
            return Ok(false);
        }
        self.commit(stage)?;
        Ok(true)
    }

    /// Keyword search over node paths and descriptions.
    ///
    /// Score is the fraction of query tokens found, boosted by up to 2× for
    /// recently accessed nodes (7-day half-life). Ties break by path.
    pub fn search(&self, query: &str, top_k: usize, now: DateTime<Utc>) -> Vec<TreeHit> {
        let query_tokens = token_set(query);
        if query_tokens.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let mut hits: Vec<TreeHit> = self
            .nodes
            .iter()
            .filter(|(path, _)| path.as_str() != ROOT)
            .filter_map(|(path, node)| {
                let mut words = token_set(path);
                words.extend(token_set(&node.desc));
                let overlap = query_tokens.intersection(&words).count();
                if overlap == 0 {
                    return None;
                }
                let mut score = overlap as f64 / query_tokens.len() as f64;
                if let Some(last) = node.last_access {
                    score *= 1.0 + half_life_decay(age_days(last, now), TREE_HALF_LIFE_DAYS);
                }
                Some(TreeHit {
                    path: path.clone(),
                    score,
                    desc: node.desc.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.path.cmp(&b.path)));
        hits.truncate(top_k);
        hits
    }

    /// Depth-first rendering for diagnostics.
    pub fn show(&self) -> String {
        let mut lines = vec!["Memory Tree Index".to_string(), "=".repeat(40)];
        self.show_node(ROOT, 0, &mut lines);
        lines.push(String::new());
        lines.push(format!("Total nodes: {}/{}", self.nodes.len(), TREE_MAX_NODES));
        lines.push(format!("Size: {} bytes", self.size_bytes()));
        lines.join("\n")
    }

    fn show_node(&self, path: &str, indent: usize, lines: &mut Vec<String>) {
        let Some(node) = self.nodes.get(path) else {
            return;
        };
        lines.push(format!(
            "{}{} - {} (warm:{}, cold:{})",
            "  ".repeat(indent),
            path,
            node.desc,
            node.warm_count,
            node.cold_count
        ));
        for child in &node.children {
            self.show_node(child, indent + 1, lines);
        }
    }
}

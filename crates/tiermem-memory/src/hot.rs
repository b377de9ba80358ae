//! Hot tier: identity state plus the byte-bounded `MEMORY.md` digest built
//! from it and the best warm facts.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tiermem_core::text::{clip, title_case};
use tiermem_core::{Loaded, MemError, Result, load_json_or_default, write_bytes_atomic, write_json_atomic};
use tracing::{info, warn};

use crate::warm::WarmStore;

pub const HOT_MAX_BYTES: usize = 5120;
pub const MAX_LESSONS: usize = 20;
pub const MAX_PROJECTS: usize = 5;
/// Identity values longer than this are clipped when rendered.
pub const VALUE_MAX_CHARS: usize = 200;
const RECENT_TOP: usize = 20;
const RECENT_PER_CATEGORY: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Persistent identity sections, stored in `hot-memory-state.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotState {
    pub owner: BTreeMap<String, Value>,
    pub agent: BTreeMap<String, Value>,
    pub lessons: Vec<String>,
    pub projects: Vec<Project>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotKey {
    Owner,
    Agent,
    Lesson,
    Project,
}

impl FromStr for HotKey {
    type Err = MemError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "owner" => Ok(Self::Owner),
            "agent" => Ok(Self::Agent),
            "lesson" => Ok(Self::Lesson),
            "project" => Ok(Self::Project),
            other => Err(MemError::usage(format!(
                "unknown hot-state key '{other}' (expected owner, agent, lesson or project)"
            ))),
        }
    }
}

fn object(key: &str, data: Value) -> Result<serde_json::Map<String, Value>> {
    match data {
        Value::Object(map) => Ok(map),
        _ => Err(MemError::usage(format!("--data for '{key}' must be a JSON object"))),
    }
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

impl HotState {
    pub fn load(path: &Path) -> Result<Loaded<Self>> {
        load_json_or_default(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    /// Merge `data` into the section named by `key`.
    ///
    /// Owner and agent maps are merged key by key. Lessons append and keep the
    /// last 20. Projects upsert by `name` and keep the last 5.
    pub fn apply(&mut self, key: HotKey, data: Value) -> Result<()> {
        match key {
            HotKey::Owner => self.owner.extend(object("owner", data)?),
            HotKey::Agent => self.agent.extend(object("agent", data)?),
            HotKey::Lesson => {
                let text = match data {
                    Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
                    Value::Object(map) => non_empty(map.get("text")),
                    _ => None,
                }
                .ok_or_else(|| MemError::usage("lesson needs a non-empty \"text\""))?;
                self.lessons.push(text);
                let excess = self.lessons.len().saturating_sub(MAX_LESSONS);
                self.lessons.drain(..excess);
            }
            HotKey::Project => {
                let map = object("project", data)?;
                let name = non_empty(map.get("name"))
                    .ok_or_else(|| MemError::usage("project needs a non-empty \"name\""))?;
                let status = non_empty(map.get("status"));
                let description = non_empty(map.get("description"));
                if let Some(existing) = self.projects.iter_mut().find(|p| p.name == name) {
                    if status.is_some() {
                        existing.status = status;
                    }
                    if description.is_some() {
                        existing.description = description;
                    }
                } else {
                    self.projects.push(Project {
                        name,
                        status,
                        description,
                    });
                    let excess = self.projects.len().saturating_sub(MAX_PROJECTS);
                    self.projects.drain(..excess);
                }
            }
        }
        Ok(())
    }
}

/// A rendered digest.
#[derive(Debug, Clone, Serialize)]
pub struct HotDigest {
    #[serde(skip)]
    pub content: String,
    pub bytes: usize,
    pub max_bytes: usize,
    /// Recent-context lines dropped to fit the cap.
    pub pruned_lines: usize,
    /// Whether the identity sections had to be cut as well.
    pub truncated: bool,
}

struct RecentGroup {
    category: String,
    items: Vec<String>,
}

fn render_value(value: &Value) -> String {
    let raw = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    clip(&raw, VALUE_MAX_CHARS)
}

fn identity_lines(state: &HotState) -> Vec<String> {
    let mut lines = vec![
        "# MEMORY.md - Long-Term Context".to_string(),
        String::new(),
        "*Curated memory, generated from the tiered memory store*".to_string(),
        String::new(),
        "---".to_string(),
        String::new(),
    ];

    if !state.owner.is_empty() {
        let name = state.owner.get("name").map(render_value).unwrap_or_else(|| "Owner".into());
        lines.push(format!("## About {name}"));
        lines.push(String::new());
        for (k, v) in state.owner.iter().filter(|(k, _)| k.as_str() != "name") {
            lines.push(format!("- **{}:** {}", title_case(k), render_value(v)));
        }
        lines.push(String::new());
    }

    if !state.agent.is_empty() {
        lines.push("## Agent Identity".to_string());
        lines.push(String::new());
        for (k, v) in &state.agent {
            lines.push(format!("- **{}:** {}", title_case(k), render_value(v)));
        }
        lines.push(String::new());
    }

    if !state.projects.is_empty() {
        lines.push("## Active Projects".to_string());
        lines.push(String::new());
        for p in state.projects.iter().take(MAX_PROJECTS) {
            lines.push(format!("### {}", clip(&p.name, VALUE_MAX_CHARS)));
            if let Some(ref status) = p.status {
                lines.push(format!("**Status:** {}", clip(status, VALUE_MAX_CHARS)));
            }
            if let Some(ref description) = p.description {
                lines.push(clip(description, VALUE_MAX_CHARS));
            }
            lines.push(String::new());
        }
    }

    if !state.lessons.is_empty() {
        lines.push("## Key Learnings".to_string());
        lines.push(String::new());
        let skip = state.lessons.len().saturating_sub(MAX_LESSONS);
        for lesson in state.lessons.iter().skip(skip) {
            lines.push(format!("- {}", clip(lesson, VALUE_MAX_CHARS)));
        }
        lines.push(String::new());
    }

    lines
}

fn recent_groups(warm: &WarmStore, now: DateTime<Utc>) -> Vec<RecentGroup> {
    let mut groups: Vec<RecentGroup> = Vec::new();
    for scored in warm.list(now).into_iter().take(RECENT_TOP) {
        let fact = scored.fact;
        let line = format!(
            "- [{}] {}",
            fact.created_at.format("%b %d"),
            clip(&fact.text, VALUE_MAX_CHARS)
        );
        match groups.iter_mut().find(|g| g.category == fact.category) {
            Some(group) => {
                if group.items.len() < RECENT_PER_CATEGORY {
                    group.items.push(line);
                }
            }
            None => groups.push(RecentGroup {
                category: fact.category,
                items: vec![line],
            }),
        }
    }
    groups
}

fn assemble(identity: &[String], groups: &[RecentGroup], footer: &[String]) -> String {
    let mut lines: Vec<String> = identity.to_vec();
    if !groups.is_empty() {
        lines.push("## Recent Context".to_string());
        lines.push(String::new());
        for g in groups {
            lines.push(format!("### {}", g.category));
            lines.extend(g.items.iter().cloned());
            lines.push(String::new());
        }
    }
    lines.extend(footer.iter().cloned());
    lines.join("\n") + "\n"
}

pub struct HotBuilder;

impl HotBuilder {
    /// Render the digest, pruning it to at most [`HOT_MAX_BYTES`].
    ///
    /// Recent-context lines go first (last line first), then the footer.
    /// Identity sections are only cut, at a line boundary, if they alone
    /// exceed the cap.
    pub fn render(state: &HotState, warm: &WarmStore, tree_nodes: usize, now: DateTime<Utc>) -> HotDigest {
        let identity = identity_lines(state);
        let mut groups = recent_groups(warm, now);
        let mut footer = vec![
            "---".to_string(),
            format!(
                "*Auto-generated: {} | Warm: {} facts | Tree: {} nodes*",
                now.format("%Y-%m-%d %H:%M"),
                warm.len(),
                tree_nodes
            ),
        ];

        let mut pruned_lines = 0;
        let mut content = assemble(&identity, &groups, &footer);
        while content.len() > HOT_MAX_BYTES && !groups.is_empty() {
            if let Some(last) = groups.last_mut() {
                last.items.pop();
                pruned_lines += 1;
                if last.items.is_empty() {
                    groups.pop();
                }
            }
            content = assemble(&identity, &groups, &footer);
        }
        if content.len() > HOT_MAX_BYTES {
            footer.clear();
            content = assemble(&identity, &groups, &footer);
        }

        let mut truncated = false;
        if content.len() > HOT_MAX_BYTES {
            let mut end = HOT_MAX_BYTES;
            while !content.is_char_boundary(end) {
                end -= 1;
            }
            let cut = content[..end].rfind('\n').map(|i| i + 1).unwrap_or(0);
            content.truncate(cut);
            truncated = true;
            warn!(
                max_bytes = HOT_MAX_BYTES,
                "identity sections exceed the hot cap; digest cut at a line boundary"
            );
        }

        HotDigest {
            bytes: content.len(),
            content,
            max_bytes: HOT_MAX_BYTES,
            pruned_lines,
            truncated,
        }
    }

    /// Render and atomically write the digest to `output`.
    pub fn rebuild(
        state: &HotState,
        warm: &WarmStore,
        tree_nodes: usize,
        output: &Path,
        now: DateTime<Utc>,
    ) -> Result<HotDigest> {
        let digest = Self::render(state, warm, tree_nodes, now);
        write_bytes_atomic(output, digest.content.as_bytes())?;
        info!(
            output = %output.display(),
            bytes = digest.bytes,
            pruned = digest.pruned_lines,
            "hot digest rebuilt"
        );
        Ok(digest)
    }
}

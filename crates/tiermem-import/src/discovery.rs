//! Session directory discovery for `imp --auto` and `imp scan`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::ingest::SOURCE_EXTENSION;

/// Agent homes whose `agents/*/sessions` folders hold session logs.
const AGENT_HOMES: &[&str] = &[".clawdbot", ".openclaw"];
const CLAUDE_PROJECTS: &str = ".claude/projects";
const CLAUDE_APP: &str = "claude-code";

/// A directory of JSONL session files, identified by its canonical path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionDir {
    pub path: PathBuf,
    pub label: String,
    pub app: String,
    pub files: usize,
}

fn count_sources(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == SOURCE_EXTENSION))
                .count()
        })
        .unwrap_or(0)
}

fn sorted_subdirs(dir: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect()
        })
        .unwrap_or_default();
    dirs.sort();
    dirs
}

struct Collector {
    seen_canonical: HashSet<PathBuf>,
    found: Vec<SessionDir>,
}

impl Collector {
    fn offer(&mut self, dir: &Path, label: String, app: &str) {
        let Ok(canonical) = dir.canonicalize() else {
            return;
        };
        if !self.seen_canonical.insert(canonical.clone()) {
            debug!(dir = %dir.display(), canonical = %canonical.display(), "already discovered");
            return;
        }
        self.found.push(SessionDir {
            files: count_sources(&canonical),
            path: canonical,
            label,
            app: app.to_string(),
        });
    }
}

/// Every directory under `root` (inclusive) that directly holds a source file.
/// Symlinked subtrees are walked once.
fn walk_for_sources(root: &Path) -> Vec<PathBuf> {
    let mut visited = HashSet::new();
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(canonical) = dir.canonicalize() else {
            continue;
        };
        if !visited.insert(canonical) {
            continue;
        }
        if count_sources(&dir) > 0 {
            out.push(dir.clone());
        }
        let mut children = sorted_subdirs(&dir);
        children.reverse();
        stack.extend(children);
    }
    out
}

/// Find session directories under `home` plus `extra_roots`.
///
/// Candidates are resolved to canonical paths and deduplicated, so a
/// directory reachable through a symlink is listed once.
pub fn discover_session_dirs(home: &Path, extra_roots: &[PathBuf], default_app: &str) -> Vec<SessionDir> {
    let mut collector = Collector {
        seen_canonical: HashSet::new(),
        found: Vec::new(),
    };

    for base in AGENT_HOMES {
        let agents = home.join(base).join("agents");
        for agent in sorted_subdirs(&agents) {
            let sessions = agent.join("sessions");
            if sessions.is_dir() {
                let name = agent
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                collector.offer(&sessions, format!("{base}/{name}"), default_app);
            }
        }
    }

    let projects = home.join(CLAUDE_PROJECTS);
    if projects.is_dir() {
        for dir in walk_for_sources(&projects) {
            let label = dir
                .strip_prefix(&projects)
                .map(|rel| format!("claude/{}", rel.display()))
                .unwrap_or_else(|_| dir.display().to_string());
            collector.offer(&dir, label, CLAUDE_APP);
        }
    }

    for root in extra_roots {
        if root.is_dir() {
            collector.offer(root, root.display().to_string(), default_app);
        } else {
            debug!(root = %root.display(), "extra root is not a directory");
        }
    }

    collector.found
}

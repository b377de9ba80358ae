use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{MemError, Result};

static CATEGORY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+(/[A-Za-z0-9_-]+)*$").expect("static regex"));

/// Lower-cased word tokens in order of first appearance, duplicates removed.
///
/// Anything that is not alphanumeric separates tokens, which covers the
/// `/`, `_`, `-` and whitespace separators used in category paths.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Token set for overlap scoring.
pub fn token_set(text: &str) -> BTreeSet<String> {
    tokenize(text).into_iter().collect()
}

/// Validate a category path such as `work/projectA`.
pub fn validate_category(category: &str) -> Result<()> {
    if CATEGORY_RE.is_match(category) {
        Ok(())
    } else {
        Err(MemError::usage(format!(
            "invalid category '{category}': expected components of [A-Za-z0-9_-] separated by '/'"
        )))
    }
}

/// Whether `category` lies under `prefix`, matching whole path components.
///
/// `work` contains `work` and `work/projectA`, but `work/proj` does not contain
/// `work/projectA`. The reserved `root` prefix contains everything.
pub fn category_contains(prefix: &str, category: &str) -> bool {
    if prefix == "root" || prefix.is_empty() {
        return true;
    }
    match category.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

/// Parent of a category path; top-level paths hang off `root`.
pub fn parent_path(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("root")
}

/// `projectA` -> `ProjectA`, `cron_jobs` -> `Cron Jobs`.
pub fn title_case(component: &str) -> String {
    component
        .split(['_', '-'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate to at most `max_chars` characters, appending `…` when cut.
pub fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

//! Model aliases, provider inference and the per-million-token price table.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Cache-read tokens are billed at this fraction of the input price.
pub const CACHE_READ_DISCOUNT: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub input_per_1m: f64,
    pub output_per_1m: f64,
}

impl ModelPrice {
    pub const fn new(input_per_1m: f64, output_per_1m: f64) -> Self {
        Self {
            input_per_1m,
            output_per_1m,
        }
    }
}

static MODEL_ALIASES: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("claude-opus-4-5", "claude-opus-4"),
        ("claude-opus-4-6", "claude-opus-4"),
        ("claude-opus-4-5-20250414", "claude-opus-4"),
        ("claude-opus-4-5-20251101", "claude-opus-4"),
        ("claude-opus-4-6-20250618", "claude-opus-4"),
        ("claude-sonnet-4-20250514", "claude-sonnet-4"),
        ("claude-sonnet-4-5-20250514", "claude-sonnet-4"),
        ("claude-sonnet-4-5", "claude-sonnet-4"),
        ("claude-3-5-sonnet-latest", "claude-3.5-sonnet"),
        ("claude-3-5-sonnet-20241022", "claude-3.5-sonnet"),
        ("claude-3-5-haiku-latest", "claude-3.5-haiku"),
        ("claude-3-5-haiku-20241022", "claude-3.5-haiku"),
        ("claude-haiku-3-5-latest", "claude-3.5-haiku"),
        ("claude-haiku-4-5-20251015", "claude-3.5-haiku"),
        ("claude-3-opus-20240229", "claude-3-opus"),
        ("gpt-4o-2024-08-06", "gpt-4o"),
        ("gpt-4o-2024-11-20", "gpt-4o"),
        ("gpt-4o-mini-2024-07-18", "gpt-4o-mini"),
    ])
});

/// Checked in order after the exact alias map misses.
const PREFIX_ALIASES: &[(&str, &str)] = &[
    ("claude-opus-4", "claude-opus-4"),
    ("claude-sonnet-4", "claude-sonnet-4"),
    ("claude-3.5-sonnet", "claude-3.5-sonnet"),
    ("claude-3-5-sonnet", "claude-3.5-sonnet"),
    ("claude-3.5-haiku", "claude-3.5-haiku"),
    ("claude-3-5-haiku", "claude-3.5-haiku"),
    ("claude-haiku", "claude-3.5-haiku"),
];

const PRICES: &[(&str, &str, ModelPrice)] = &[
    ("anthropic", "claude-opus-4", ModelPrice::new(15.0, 75.0)),
    ("anthropic", "claude-sonnet-4", ModelPrice::new(3.0, 15.0)),
    ("anthropic", "claude-3.5-sonnet", ModelPrice::new(3.0, 15.0)),
    ("anthropic", "claude-3.5-haiku", ModelPrice::new(0.8, 4.0)),
    ("anthropic", "claude-3-opus", ModelPrice::new(15.0, 75.0)),
    ("openai", "gpt-4o", ModelPrice::new(2.5, 10.0)),
    ("openai", "gpt-4o-mini", ModelPrice::new(0.15, 0.6)),
    ("openai", "gpt-4.1", ModelPrice::new(2.0, 8.0)),
    ("openai", "o1", ModelPrice::new(15.0, 60.0)),
    ("openai", "o3-mini", ModelPrice::new(1.1, 4.4)),
    ("google", "gemini-2.5-pro", ModelPrice::new(1.25, 10.0)),
    ("google", "gemini-2.0-flash", ModelPrice::new(0.1, 0.4)),
    ("google", "gemini-1.5-pro", ModelPrice::new(1.25, 5.0)),
];

/// Map a vendor model id to the canonical name used for pricing.
pub fn normalize_model(raw: &str) -> String {
    let model = raw.trim().to_lowercase();
    if let Some(canonical) = MODEL_ALIASES.get(model.as_str()) {
        return (*canonical).to_string();
    }
    PREFIX_ALIASES
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, canonical)| (*canonical).to_string())
        .unwrap_or(model)
}

/// Explicit provider if given, else inferred from the model name.
pub fn infer_provider(explicit: Option<&str>, raw_model: &str) -> String {
    if let Some(p) = explicit.map(str::trim).filter(|p| !p.is_empty()) {
        return p.to_lowercase();
    }
    let model = raw_model.to_lowercase();
    if model.contains("claude") {
        "anthropic".into()
    } else if model.contains("gpt") || model.starts_with("o1") || model.starts_with("o3") {
        "openai".into()
    } else if model.contains("gemini") {
        "google".into()
    } else {
        "unknown".into()
    }
}

pub fn price(provider: &str, model: &str) -> Option<ModelPrice> {
    PRICES
        .iter()
        .find(|(p, m, _)| *p == provider && *m == model)
        .map(|(_, _, price)| *price)
}

/// List-price cost in USD; zero for models missing from the table.
pub fn api_cost(provider: &str, model: &str, input: u64, output: u64, cache_read: u64) -> f64 {
    let Some(p) = price(provider, model) else {
        return 0.0;
    };
    let per_token = |tokens: u64, per_1m: f64| tokens as f64 / 1_000_000.0 * per_1m;
    per_token(input, p.input_per_1m)
        + per_token(output, p.output_per_1m)
        + per_token(cache_read, p.input_per_1m) * CACHE_READ_DISCOUNT
}

//! Closed-form fact scoring.
//!
//! `score = importance × recency_decay(age) × reinforcement(access_count)`.
//! Used on every read and during eviction, so it stays pure and cheap.

use chrono::{DateTime, Utc};

/// Warm-tier recency half-life in days.
pub const HALF_LIFE_DAYS: f64 = 30.0;
/// Tree-node recency half-life in days.
pub const TREE_HALF_LIFE_DAYS: f64 = 7.0;
/// Weight of the logarithmic access bonus.
pub const REINFORCEMENT_BOOST: f64 = 0.1;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Exponential decay with the given half-life: 1 at age 0, 0.5 at `half_life`.
pub fn half_life_decay(age_days: f64, half_life: f64) -> f64 {
    let age = age_days.max(0.0);
    (-std::f64::consts::LN_2 * age / half_life).exp()
}

/// Recency factor of a warm fact.
pub fn recency_decay(age_days: f64) -> f64 {
    half_life_decay(age_days, HALF_LIFE_DAYS)
}

/// Diminishing-returns bonus for facts that keep getting recalled; 1 when unused.
pub fn reinforcement(access_count: u32) -> f64 {
    1.0 + REINFORCEMENT_BOOST * (1.0 + access_count as f64).ln()
}

/// Fractional days between `then` and `now`; negative spans clamp to zero.
pub fn age_days(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let secs = (now - then).num_milliseconds() as f64 / 1000.0;
    (secs / SECONDS_PER_DAY).max(0.0)
}

/// Full score of a fact at `now`.
pub fn score(importance: f64, created_at: DateTime<Utc>, access_count: u32, now: DateTime<Utc>) -> f64 {
    importance * recency_decay(age_days(created_at, now)) * reinforcement(access_count)
}

//! Configuration domain model.
//!
//! Every empirically chosen threshold in the consolidation and dispatch
//! rules is exposed here rather than hardcoded at its use site. Values are
//! merged hierarchically by the config loader (defaults, project files,
//! environment).

use serde::{Deserialize, Serialize};

use super::trace::ConfidenceParams;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database settings.
    pub database: DatabaseConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Dispatch decision thresholds.
    pub dispatch: DispatchConfig,
    /// Consolidation rules and confidence tunables.
    pub consolidation: ConsolidationConfig,
    /// Replay executor settings.
    pub executor: ReplayConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            dispatch: DispatchConfig::default(),
            consolidation: ConsolidationConfig::default(),
            executor: ReplayConfig::default(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path.
    pub path: String,
    /// Maximum pool connections.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ".engram/engram.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    pub level: String,
    /// Log format: json or pretty.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Thresholds for the replay-vs-delegate decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Minimum confidence for follower-mode replay.
    pub follower_threshold: f64,
    /// Minimum lifetime success rate for follower-mode replay.
    pub min_success_rate: f64,
    /// Minimum textual similarity before a candidate is considered a
    /// match at all.
    pub min_match_score: f64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            follower_threshold: 0.9,
            min_success_rate: 0.85,
            min_match_score: 0.1,
        }
    }
}

/// Tier-transition gates and lifecycle aging periods.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Upper bound on the synthesizer's seed confidence.
    pub seed_confidence_cap: f64,
    /// Confidence-on-outcome tunables (gain k, decay factor).
    pub confidence: ConfidenceParams,

    /// high → mid: minimum confidence.
    pub mid_confidence: f64,

    /// mid → low: minimum usage count.
    pub low_usage: u64,
    /// mid → low: minimum lifetime success rate.
    pub low_success_rate: f64,
    /// mid → low: minimum confidence.
    pub low_confidence: f64,
    /// mid → low: minimum distinct validation contexts.
    pub low_contexts: usize,

    /// low → ultra-low: minimum usage count.
    pub ultra_usage: u64,
    /// low → ultra-low: minimum lifetime success rate.
    pub ultra_success_rate: f64,
    /// low → ultra-low: minimum confidence.
    pub ultra_confidence: f64,

    /// mid → archived-candidate: success-rate floor over the recent window.
    pub demote_success_rate: f64,
    /// Window length (replays) for the recent success-rate rule.
    pub recent_window: usize,
    /// mid → archived-candidate: usage below this and age above
    /// `stale_age_days` marks the trace stale.
    pub stale_usage: u64,
    /// mid → archived-candidate: staleness age, days.
    pub stale_age_days: i64,

    /// high → archived: age after which a never-consolidated trace is
    /// archived, days.
    pub high_archive_days: i64,

    /// low → flagged-for-review: success-rate floor after a new batch.
    pub review_success_rate: f64,

    /// archived-candidate → archived aging period, days.
    pub archive_after_days: i64,
    /// archived → deleted aging period, days. Never applied to ultra-low.
    pub delete_after_days: i64,

    /// Interval between daemon consolidation passes, seconds.
    pub interval_secs: u64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            seed_confidence_cap: 0.75,
            confidence: ConfidenceParams::default(),
            mid_confidence: 0.75,
            low_usage: 20,
            low_success_rate: 0.95,
            low_confidence: 0.95,
            low_contexts: 3,
            ultra_usage: 100,
            ultra_success_rate: 0.99,
            ultra_confidence: 0.99,
            demote_success_rate: 0.70,
            recent_window: 5,
            stale_usage: 5,
            stale_age_days: 60,
            high_archive_days: 30,
            review_success_rate: 0.85,
            archive_after_days: 14,
            delete_after_days: 30,
            interval_secs: 300,
        }
    }
}

/// Replay executor limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Maximum concurrently running steps.
    pub max_concurrency: usize,
    /// Per-step tool invocation timeout, seconds.
    pub step_timeout_secs: u64,
    /// Trace-level timeout = `estimated_secs * trace_timeout_multiplier`,
    /// floored at `min_trace_timeout_secs`.
    pub trace_timeout_multiplier: f64,
    /// Floor for the trace-level timeout, seconds.
    pub min_trace_timeout_secs: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            step_timeout_secs: 600,
            trace_timeout_multiplier: 3.0,
            min_trace_timeout_secs: 30,
        }
    }
}

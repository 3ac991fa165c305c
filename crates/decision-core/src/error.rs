//! Error types for the scoring pipeline.

use crate::peers::ComparableMetric;
use chrono::NaiveDate;
use std::time::Duration;
use thiserror::Error;

/// Result type for scoring operations.
pub type Result<T> = std::result::Result<T, ScoreError>;

/// Errors that can occur while deriving, ranking, scoring, or refreshing.
#[derive(Debug, Error)]
pub enum ScoreError {
    /// Not enough fundamentals history to compute the current TTM window
    #[error("Missing data for {ticker}: need {required} periods, got {available}")]
    MissingData {
        /// Subject ticker
        ticker: String,
        /// Required number of periods
        required: usize,
        /// Available number of periods
        available: usize,
    },

    /// A ratio whose denominator is non-positive was required
    #[error("Metric {metric} is not applicable for {ticker} at {period}")]
    UndefinedMetric {
        /// Ticker the metric belongs to
        ticker: String,
        /// Period end of the affected row
        period: NaiveDate,
        /// Metric name
        metric: &'static str,
    },

    /// Percentile requested against an empty comparable set
    #[error("Empty peer set for metric {metric}")]
    EmptyPeerSet {
        /// Metric being ranked
        metric: ComparableMetric,
    },

    /// Refresh attempts capped out without fresh data
    #[error("Refresh exhausted for {ticker} after {attempts} attempts: {reason}")]
    RefreshExhausted {
        /// Subject ticker
        ticker: String,
        /// Number of attempts made
        attempts: u32,
        /// Failure reason of the last attempt
        reason: String,
    },

    /// Refresh loop stopped before the next retry
    #[error("Refresh cancelled for {ticker} after {attempts} attempts")]
    Cancelled {
        /// Subject ticker
        ticker: String,
        /// Number of attempts made
        attempts: u32,
    },

    /// Inputs failed the freshness policy
    #[error("Stale inputs for {ticker}: {}", .reasons.join("; "))]
    StaleInputs {
        /// Subject ticker
        ticker: String,
        /// Every failed freshness check
        reasons: Vec<String>,
    },

    /// Fundamentals sequence is not unique per period
    #[error("Duplicate fundamentals period {period} for {ticker}")]
    DuplicatePeriod {
        /// Ticker with the duplicate row
        ticker: String,
        /// Period end that appears more than once
        period: NaiveDate,
    },

    /// Upstream fetch or refresh step failed
    #[error("Fetch failed for {ticker}: {reason}")]
    FetchFailed {
        /// Ticker being fetched
        ticker: String,
        /// Failure description
        reason: String,
    },

    /// Upstream fetch exceeded its timeout
    #[error("Fetch for {ticker} timed out after {timeout:?}")]
    FetchTimeout {
        /// Ticker being fetched
        ticker: String,
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// Rule tables are malformed
    #[error("Invalid scoring rules: {0}")]
    InvalidRules(String),

    /// Recomputing a stored breakdown did not reproduce it
    #[error("Audit mismatch in {item} for {ticker}: stored {stored}, recomputed {recomputed}")]
    AuditMismatch {
        /// Ticker of the breakdown
        ticker: String,
        /// Bucket, total, or snapshot section that diverged
        item: String,
        /// Stored value
        stored: String,
        /// Recomputed value
        recomputed: String,
    },

    /// Polars DataFrame error
    #[error("DataFrame error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScoreError {
    /// Whether the orchestrator may recover from this error by refreshing.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::MissingData { .. }
                | Self::StaleInputs { .. }
                | Self::FetchFailed { .. }
                | Self::FetchTimeout { .. }
                | Self::Io(_)
                | Self::Json(_)
        )
    }
}

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/decision-core/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod breakdown;
pub mod buckets;
pub mod config;
pub mod engine;
pub mod error;
pub mod flags;
pub mod metrics;
pub mod peers;
pub mod rating;
pub mod refresh;
pub mod rules;
pub mod types;

// Re-export core types
pub use breakdown::{InputSnapshot, ScoreBreakdown};
pub use buckets::{Bucket, BucketScore, BucketScorer, LegScore};
pub use config::{
    BalanceRules, GrowthRules, QualityRules, RedFlagRules, ScoringRules, SentimentRules,
    ValuationRules,
};
pub use engine::ScoringEngine;
pub use error::{Result, ScoreError};
pub use flags::{RedFlag, red_flags};
pub use metrics::{DerivedMetrics, MetricDeriver, MetricDeriverConfig};
pub use peers::{
    ComparableMetric, ComparableSet, PeerFetcher, PeerPercentiles, PeerSnapshot, fetch_comparables,
    percentile_rank,
};
pub use rating::{Classification, Rating, classify};
pub use refresh::{
    DataSource, FreshnessPolicy, RefreshConfig, RefreshOrchestrator, RefreshOutcome, RefreshState,
};
pub use types::{FundamentalsRecord, NewsRiskSignal, ScoringInputs};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

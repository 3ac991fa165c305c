//! Input records consumed by the scoring pipeline.
//!
//! These are produced by an external refresh step and are immutable for the
//! duration of one scoring run.

use crate::peers::ComparableSet;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One fiscal period of fundamentals for one ticker.
///
/// All monetary values are in USD. Capital expenditure may be reported with
/// either sign; the deriver uses its magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FundamentalsRecord {
    /// Fiscal period end date
    pub period_end: NaiveDate,
    /// Revenue for the period
    pub revenue: f64,
    /// Operating cash flow for the period
    pub operating_cash_flow: f64,
    /// Capital expenditure for the period
    pub capital_expenditure: f64,
    /// Total debt at period end
    pub total_debt: f64,
    /// Cash and equivalents at period end
    pub cash_and_equivalents: f64,
    /// Market capitalization at period end
    pub market_cap: f64,
}

/// Rolling news-derived risk counters for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsRiskSignal {
    /// Ticker the signal describes
    pub ticker: String,
    /// Negative headlines over the last 7 days
    pub negative_news_7d: u32,
    /// Signed headline shock delta over the last 7 days
    pub shock_delta_7d: f64,
    /// Core-risk category hits (labor, insurance, regulatory, ...) over 30 days
    pub core_risk_hits_30d: u32,
    /// Proxy sentiment score over 7 days, 0-100 with 50 neutral
    pub proxy_score_7d: f64,
    /// Timestamp of the newest headline the counters include
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_of: Option<DateTime<Utc>>,
}

/// Everything one scoring pass reads for a subject ticker.
#[derive(Debug, Clone)]
pub struct ScoringInputs {
    /// Subject ticker
    pub ticker: String,
    /// Chronological fundamentals for the subject
    pub fundamentals: Vec<FundamentalsRecord>,
    /// Peer snapshots, never containing the subject
    pub comparables: ComparableSet,
    /// News risk counters, if any were produced
    pub risk: Option<NewsRiskSignal>,
}

impl ScoringInputs {
    /// Create inputs for a subject ticker.
    pub fn new(
        ticker: impl Into<String>,
        fundamentals: Vec<FundamentalsRecord>,
        comparables: ComparableSet,
        risk: Option<NewsRiskSignal>,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            fundamentals,
            comparables,
            risk,
        }
    }
}

//! Auditable score breakdowns.
//!
//! A [`ScoreBreakdown`] carries every input the scoring pass read alongside
//! the result, so a stored breakdown can be recomputed and checked without
//! access to the data sources.

use crate::{
    Result, ScoreError,
    buckets::{Bucket, BucketScore, BucketScorer},
    config::ScoringRules,
    flags::{RedFlag, red_flags},
    metrics::{DerivedMetrics, MetricDeriver, MetricDeriverConfig},
    peers::{ComparableMetric, ComparableSet, PeerPercentiles},
    rating::{Rating, classify},
    types::{FundamentalsRecord, NewsRiskSignal},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::debug;

/// Relative tolerance for comparing stored and recomputed metrics.
///
/// JSON round-trips may move a float by one ULP.
const AUDIT_TOLERANCE: f64 = 1e-9;

/// Inputs the scoring pass read, stored with the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSnapshot {
    /// Subject fundamentals in chronological order
    pub fundamentals: Vec<FundamentalsRecord>,
    /// Deriver configuration used
    pub deriver: MetricDeriverConfig,
    /// Metrics for the scored period
    pub derived: DerivedMetrics,
    /// Peer set the subject was ranked against
    pub comparables: ComparableSet,
    /// Subject percentiles against `comparables`
    pub peer_percentiles: PeerPercentiles,
    /// News risk counters
    pub risk: NewsRiskSignal,
    /// Rules the buckets were scored with
    pub rules: ScoringRules,
}

/// Result of one scoring pass with everything needed to reproduce it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Subject ticker
    pub ticker: String,
    /// Period the score describes
    pub period_end: NaiveDate,
    /// Bucket scores in breakdown order
    pub buckets: Vec<BucketScore>,
    /// Sum of bucket scores clamped to `[0, 100]`
    pub total: f64,
    /// Rating band of `total`
    pub rating: Rating,
    /// Conditions raised by the scored legs
    pub red_flags: Vec<RedFlag>,
    /// Inputs the score was computed from
    pub inputs: InputSnapshot,
}

impl ScoreBreakdown {
    /// Score for one bucket.
    pub fn bucket(&self, bucket: Bucket) -> Option<&BucketScore> {
        self.buckets.iter().find(|b| b.bucket == bucket)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a stored breakdown.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Recompute the breakdown from its stored inputs.
    ///
    /// Checks, in order: the rules are well formed, each of the five buckets
    /// appears exactly once and follows from its legs, the derived metrics
    /// follow from the fundamentals, the percentiles follow from the
    /// comparables, the buckets and red flags follow from metrics and risk,
    /// and the total and rating follow from the buckets.
    /// The first discrepancy is returned as [`ScoreError::AuditMismatch`].
    pub fn verify(&self) -> Result<()> {
        let inputs = &self.inputs;
        inputs.rules.validate()?;

        let layout: Vec<Bucket> = self.buckets.iter().map(|b| b.bucket).collect();
        let complete = layout.len() == Bucket::ALL.len()
            && Bucket::ALL
                .iter()
                .all(|bucket| layout.iter().filter(|b| *b == bucket).count() == 1);
        self.check("buckets", &layout, &Bucket::ALL.to_vec(), complete)?;

        for bucket in &self.buckets {
            if !bucket.matches_legs() {
                let rebuilt = BucketScore::from_legs(bucket.bucket, bucket.legs.clone());
                return Err(self.mismatch(format!("{}.score", bucket.bucket), bucket.score, rebuilt.score));
            }
        }

        let deriver = MetricDeriver::with_config(inputs.deriver);
        let derived = deriver.latest(&self.ticker, &inputs.fundamentals)?;
        self.check("period_end", &self.period_end, &derived.period_end, self.period_end == derived.period_end)?;
        self.check_metrics(&inputs.derived, &derived)?;

        let percentiles = PeerPercentiles::rank(&inputs.derived, &inputs.comparables);
        for metric in ComparableMetric::ALL {
            let (stored, recomputed) = (inputs.peer_percentiles.get(metric), percentiles.get(metric));
            self.check(
                &format!("peer_percentile.{metric}"),
                &stored,
                &recomputed,
                option_close(stored, recomputed),
            )?;
        }

        let rescored = BucketScorer::new(&inputs.rules).score_all(
            &self.ticker,
            &inputs.derived,
            &inputs.peer_percentiles,
            &inputs.risk,
        )?;
        for bucket in Bucket::ALL {
            let stored = self.bucket(bucket).map(|b| b.score);
            let recomputed = rescored.iter().find(|b| b.bucket == bucket).map(|b| b.score);
            self.check(&format!("{bucket}.score"), &stored, &recomputed, stored == recomputed)?;
        }

        let flags = red_flags(&rescored, &inputs.risk, &inputs.rules);
        self.check("red_flags", &self.red_flags, &flags, self.red_flags == flags)?;

        let classification = classify(&self.buckets, &inputs.rules.rating);
        self.check("total", &self.total, &classification.total, self.total == classification.total)?;
        self.check(
            "rating",
            &self.rating,
            &classification.rating,
            self.rating == classification.rating,
        )?;

        debug!(ticker = %self.ticker, total = self.total, "Breakdown verified");
        Ok(())
    }

    fn check_metrics(&self, stored: &DerivedMetrics, recomputed: &DerivedMetrics) -> Result<()> {
        let pairs = [
            ("capex_spend", Some(stored.capex_spend), Some(recomputed.capex_spend)),
            ("free_cash_flow", Some(stored.free_cash_flow), Some(recomputed.free_cash_flow)),
            ("revenue_ttm", stored.revenue_ttm, recomputed.revenue_ttm),
            ("fcf_ttm", stored.fcf_ttm, recomputed.fcf_ttm),
            ("fcf_margin_ttm_pct", stored.fcf_margin_ttm_pct, recomputed.fcf_margin_ttm_pct),
            ("revenue_ttm_yoy_pct", stored.revenue_ttm_yoy_pct, recomputed.revenue_ttm_yoy_pct),
            ("fcf_ttm_yoy_pct", stored.fcf_ttm_yoy_pct, recomputed.fcf_ttm_yoy_pct),
            ("net_debt", Some(stored.net_debt), Some(recomputed.net_debt)),
            ("fcf_yield_pct", stored.fcf_yield_pct, recomputed.fcf_yield_pct),
            ("net_debt_to_fcf_ttm", stored.net_debt_to_fcf_ttm, recomputed.net_debt_to_fcf_ttm),
        ];
        for (name, a, b) in pairs {
            self.check(&format!("derived.{name}"), &a, &b, option_close(a, b))?;
        }
        Ok(())
    }

    fn check<T: Debug>(&self, item: &str, stored: &T, recomputed: &T, equal: bool) -> Result<()> {
        if equal {
            Ok(())
        } else {
            Err(self.mismatch(item.to_string(), stored, recomputed))
        }
    }

    fn mismatch(&self, item: String, stored: impl Debug, recomputed: impl Debug) -> ScoreError {
        ScoreError::AuditMismatch {
            ticker: self.ticker.clone(),
            item,
            stored: format!("{stored:?}"),
            recomputed: format!("{recomputed:?}"),
        }
    }
}

fn option_close(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => (a - b).abs() <= AUDIT_TOLERANCE * a.abs().max(b.abs()).max(1.0),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ScoringEngine, tests::sample_inputs};

    fn sample_breakdown() -> ScoreBreakdown {
        ScoringEngine::default().score(&sample_inputs()).unwrap()
    }

    #[test]
    fn test_verify_after_json_round_trip() {
        let breakdown = sample_breakdown();
        let restored = ScoreBreakdown::from_json(&breakdown.to_json().unwrap()).unwrap();
        assert_eq!(restored.total, 83.0);
        assert_eq!(restored.rating, Rating::Buy);
        restored.verify().unwrap();
    }

    #[test]
    fn test_json_names_buckets_and_rating() {
        let json = sample_breakdown().to_json().unwrap();
        assert!(json.contains("\"balance_risk\""));
        assert!(json.contains("\"rating\": \"BUY\""));
        assert!(json.contains("\"net_debt_to_fcf_ttm\""));
    }

    #[test]
    fn test_tampered_total_is_detected() {
        let mut breakdown = sample_breakdown();
        breakdown.total = 90.0;
        let err = breakdown.verify().unwrap_err();
        assert!(matches!(err, ScoreError::AuditMismatch { ref item, .. } if item == "total"));
    }

    #[test]
    fn test_tampered_rating_is_detected() {
        let mut breakdown = sample_breakdown();
        breakdown.rating = Rating::Hold;
        let err = breakdown.verify().unwrap_err();
        assert!(matches!(err, ScoreError::AuditMismatch { ref item, .. } if item == "rating"));
    }

    #[test]
    fn test_tampered_fundamentals_are_detected() {
        let mut breakdown = sample_breakdown();
        breakdown.inputs.fundamentals[7].revenue *= 2.0;
        let err = breakdown.verify().unwrap_err();
        assert!(matches!(
            err,
            ScoreError::AuditMismatch { ref item, .. } if item == "derived.revenue_ttm"
        ));
    }

    #[test]
    fn test_tampered_bucket_is_detected() {
        let mut breakdown = sample_breakdown();
        breakdown.buckets[0].score = 25.0;
        let err = breakdown.verify().unwrap_err();
        assert!(matches!(
            err,
            ScoreError::AuditMismatch { ref item, .. } if item == "cash_level.score"
        ));
    }

    #[test]
    fn test_bucket_layout_must_be_complete() {
        let mut padded = sample_breakdown();
        padded
            .buckets
            .push(BucketScore::from_legs(Bucket::Growth, Vec::new()));
        let err = padded.verify().unwrap_err();
        assert!(matches!(err, ScoreError::AuditMismatch { ref item, .. } if item == "buckets"));

        let mut swapped = sample_breakdown();
        swapped.buckets[4] = swapped.buckets[3].clone();
        swapped.total = 82.0;
        let err = swapped.verify().unwrap_err();
        assert!(matches!(err, ScoreError::AuditMismatch { ref item, .. } if item == "buckets"));
    }

    #[test]
    fn test_tampered_red_flags_are_detected() {
        let mut breakdown = sample_breakdown();
        breakdown.red_flags.push(RedFlag::NetDebtHigh);
        let err = breakdown.verify().unwrap_err();
        assert!(matches!(err, ScoreError::AuditMismatch { ref item, .. } if item == "red_flags"));

        let mut breakdown = sample_breakdown();
        breakdown.inputs.rules.red_flags.negative_news_7d = 1.0;
        let err = breakdown.verify().unwrap_err();
        assert!(matches!(err, ScoreError::AuditMismatch { ref item, .. } if item == "red_flags"));
    }

    #[test]
    fn test_tampered_percentile_is_detected() {
        let mut breakdown = sample_breakdown();
        breakdown.inputs.peer_percentiles.fcf_margin_ttm_pct = Some(10.0);
        let err = breakdown.verify().unwrap_err();
        assert!(matches!(
            err,
            ScoreError::AuditMismatch { ref item, .. } if item == "peer_percentile.fcf_margin_ttm_pct"
        ));
    }

    #[test]
    fn test_bucket_lookup() {
        let breakdown = sample_breakdown();
        assert_eq!(breakdown.bucket(Bucket::Quality).unwrap().score, 15.0);
        assert_eq!(breakdown.buckets.len(), Bucket::ALL.len());
    }
}

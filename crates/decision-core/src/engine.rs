//! One scoring pass: derive, rank, score, classify.

use crate::{
    Result, ScoreError,
    breakdown::{InputSnapshot, ScoreBreakdown},
    buckets::BucketScorer,
    config::ScoringRules,
    flags::red_flags,
    metrics::MetricDeriver,
    peers::PeerPercentiles,
    rating::classify,
    types::ScoringInputs,
};
use tracing::info;

/// Pure scoring pipeline over validated rules.
///
/// Holds no mutable state; one engine may score many tickers concurrently.
#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    deriver: MetricDeriver,
    rules: ScoringRules,
}

impl ScoringEngine {
    /// Create an engine, rejecting malformed rules.
    pub fn new(rules: ScoringRules) -> Result<Self> {
        rules.validate()?;
        Ok(Self {
            deriver: MetricDeriver::default(),
            rules,
        })
    }

    /// Replace the metric deriver.
    pub const fn with_deriver(mut self, deriver: MetricDeriver) -> Self {
        self.deriver = deriver;
        self
    }

    /// Rules in use.
    pub const fn rules(&self) -> &ScoringRules {
        &self.rules
    }

    /// Metric deriver in use.
    pub const fn deriver(&self) -> &MetricDeriver {
        &self.deriver
    }

    /// Score one subject.
    ///
    /// Fails on missing history, duplicate periods, or a missing risk signal.
    /// Optional legs (undefined ratios, empty peer sets) degrade only the
    /// affected bucket.
    pub fn score(&self, inputs: &ScoringInputs) -> Result<ScoreBreakdown> {
        let ticker = inputs.ticker.trim().to_ascii_uppercase();
        let risk = inputs
            .risk
            .clone()
            .ok_or_else(|| ScoreError::StaleInputs {
                ticker: ticker.clone(),
                reasons: vec!["no news risk signal".to_string()],
            })?;

        let fundamentals = self.deriver.chronological(&ticker, &inputs.fundamentals)?;
        let derived = self.deriver.latest(&ticker, &fundamentals)?;
        let comparables = inputs.comparables.rebased(&ticker);
        let peer_percentiles = PeerPercentiles::rank(&derived, &comparables);

        let buckets =
            BucketScorer::new(&self.rules).score_all(&ticker, &derived, &peer_percentiles, &risk)?;
        let classification = classify(&buckets, &self.rules.rating);
        let flags = red_flags(&buckets, &risk, &self.rules);

        info!(
            ticker = %ticker,
            period = %derived.period_end,
            total = classification.total,
            rating = %classification.rating,
            peers = comparables.len(),
            red_flags = flags.len(),
            "Scored"
        );

        Ok(ScoreBreakdown {
            ticker,
            period_end: derived.period_end,
            buckets,
            total: classification.total,
            rating: classification.rating,
            red_flags: flags,
            inputs: InputSnapshot {
                fundamentals,
                deriver: *self.deriver.config(),
                derived,
                comparables,
                peer_percentiles,
                risk,
                rules: self.rules.clone(),
            },
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        buckets::{Bucket, tests::worked_example_risk},
        flags::RedFlag,
        metrics::tests::sample_fundamentals,
        peers::{ComparableSet, tests::sample_comparables},
        rating::Rating,
    };

    pub(crate) fn sample_inputs() -> ScoringInputs {
        ScoringInputs::new(
            "acme",
            sample_fundamentals(),
            sample_comparables(),
            Some(worked_example_risk()),
        )
    }

    #[test]
    fn test_score_end_to_end() {
        let breakdown = ScoringEngine::default().score(&sample_inputs()).unwrap();

        assert_eq!(breakdown.ticker, "ACME");
        let scores: Vec<f64> = Bucket::ALL
            .iter()
            .map(|&b| breakdown.bucket(b).unwrap().score)
            .collect();
        assert_eq!(scores, vec![21.0, 15.0, 16.0, 15.0, 16.0]);
        assert_eq!(breakdown.total, 83.0);
        assert_eq!(breakdown.rating, Rating::Buy);
        assert!(breakdown.red_flags.is_empty());
        breakdown.verify().unwrap();
    }

    #[test]
    fn test_score_is_deterministic() {
        let engine = ScoringEngine::default();
        let first = engine.score(&sample_inputs()).unwrap();
        let second = engine.score(&sample_inputs()).unwrap();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_missing_risk_signal_is_reported() {
        let mut inputs = sample_inputs();
        inputs.risk = None;
        let err = ScoringEngine::default().score(&inputs).unwrap_err();
        assert!(matches!(err, ScoreError::StaleInputs { ref ticker, .. } if ticker == "ACME"));
    }

    #[test]
    fn test_short_history_is_missing_data() {
        let mut inputs = sample_inputs();
        inputs.fundamentals.truncate(2);
        let err = ScoringEngine::default().score(&inputs).unwrap_err();
        assert!(matches!(err, ScoreError::MissingData { available: 2, .. }));
    }

    #[test]
    fn test_empty_peer_set_degrades_relative_legs() {
        let mut inputs = sample_inputs();
        inputs.comparables = ComparableSet::new("ACME");
        let breakdown = ScoringEngine::default().score(&inputs).unwrap();

        let valuation = breakdown.bucket(Bucket::Valuation).unwrap();
        assert_eq!(valuation.effective_max, 10.0);
        assert_eq!(valuation.score, 8.0);
        let growth = breakdown.bucket(Bucket::Growth).unwrap();
        assert_eq!(growth.effective_max, 12.0);
        assert_eq!(breakdown.total, 21.0 + 8.0 + 10.0 + 9.0 + 16.0);
        assert_eq!(breakdown.rating, Rating::Avoid);
        breakdown.verify().unwrap();
    }

    #[test]
    fn test_noisy_news_is_flagged() {
        let mut inputs = sample_inputs();
        if let Some(risk) = inputs.risk.as_mut() {
            risk.negative_news_7d = 6;
            risk.shock_delta_7d = -11.0;
            risk.core_risk_hits_30d = 6;
        }
        let breakdown = ScoringEngine::default().score(&inputs).unwrap();

        let balance = breakdown.bucket(Bucket::BalanceRisk).unwrap();
        assert_eq!(balance.score, 4.0);
        assert_eq!(
            breakdown.red_flags,
            vec![
                RedFlag::FrequentCoreRisk,
                RedFlag::NegativeNews {
                    count: 6,
                    shock: -11.0
                },
            ]
        );
        breakdown.verify().unwrap();
    }

    #[test]
    fn test_rejects_invalid_rules() {
        let mut rules = ScoringRules::default();
        rules.balance.sentiment.max_bonus = -1.0;
        assert!(matches!(ScoringEngine::new(rules), Err(ScoreError::InvalidRules(_))));
    }
}

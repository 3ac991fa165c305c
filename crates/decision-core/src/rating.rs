//! Rating classification.
//!
//! The total is the bucket sum clamped to `[0, 100]`; the rating is the
//! first band in the rating table whose inclusive lower edge the total meets.

use crate::{buckets::BucketScore, rules::RuleTable};
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Upper bound of the composite score.
pub const MAX_TOTAL: f64 = 100.0;

/// Discrete recommendation derived from the total score.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Rating {
    /// Total at or above the BUY band
    #[display("BUY")]
    Buy,
    /// Total at or above the HOLD band
    #[display("HOLD")]
    Hold,
    /// Everything below HOLD
    #[display("AVOID")]
    Avoid,
}

/// Clamped total score and its rating.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Bucket sum clamped to `[0, 100]`
    pub total: f64,
    /// Rating band of `total`
    pub rating: Rating,
}

/// Sum bucket scores and clamp the result to `[0, 100]`.
pub fn total_score(buckets: &[BucketScore]) -> f64 {
    buckets
        .iter()
        .map(|bucket| bucket.score)
        .sum::<f64>()
        .clamp(0.0, MAX_TOTAL)
}

/// Classify bucket scores against the rating bands.
pub fn classify(buckets: &[BucketScore], bands: &RuleTable<Rating>) -> Classification {
    let total = total_score(buckets);
    Classification {
        total,
        rating: bands.evaluate(total),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{buckets::Bucket, config::ScoringRules};
    use rstest::rstest;

    fn single_bucket(score: f64) -> Vec<BucketScore> {
        vec![BucketScore::fixed(Bucket::CashLevel, score)]
    }

    #[rstest]
    #[case(100.0, Rating::Buy)]
    #[case(80.0, Rating::Buy)]
    #[case(79.0, Rating::Hold)]
    #[case(79.99, Rating::Hold)]
    #[case(65.0, Rating::Hold)]
    #[case(64.0, Rating::Avoid)]
    #[case(0.0, Rating::Avoid)]
    fn test_rating_bands(#[case] total: f64, #[case] expected: Rating) {
        let bands = ScoringRules::default().rating;
        assert_eq!(bands.evaluate(total), expected);
    }

    #[test]
    fn test_total_is_clamped() {
        let buckets: Vec<_> = Bucket::ALL
            .iter()
            .map(|&bucket| BucketScore::fixed(bucket, 40.0))
            .collect();
        assert_eq!(total_score(&buckets), 100.0);
        assert_eq!(total_score(&single_bucket(-5.0)), 0.0);
    }

    #[test]
    fn test_classify() {
        let rules = ScoringRules::default();
        let classification = classify(&single_bucket(83.0), &rules.rating);
        assert_eq!(classification.total, 83.0);
        assert_eq!(classification.rating, Rating::Buy);
        assert_eq!(classification.rating.to_string(), "BUY");
    }

    #[test]
    fn test_rating_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Rating::Avoid).unwrap(), "\"AVOID\"");
    }
}

//! Red flags.
//!
//! Flags are read off the scored legs: a leg that landed in the floor or the
//! top penalty band of its table marks the condition. The news flag has its
//! own cutoff in [`RedFlagRules`](crate::config::RedFlagRules).

use crate::{
    buckets::{Bucket, BucketScore, LegScore},
    config::ScoringRules,
    rules::RuleTable,
    types::NewsRiskSignal,
};
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// A condition worth surfacing next to the score.
#[derive(Debug, Display, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "flag", rename_all = "snake_case")]
pub enum RedFlag {
    /// FCF TTM in the lowest cash band
    #[display("Low TTM FCF")]
    LowTtmFcf,
    /// FCF yield could not be computed
    #[display("FCF yield missing")]
    FcfYieldMissing,
    /// Revenue TTM shrank year over year
    #[display("TTM revenue declining YoY")]
    RevenueDecliningYoy,
    /// FCF TTM shrank year over year
    #[display("TTM FCF declining YoY")]
    FcfDecliningYoy,
    /// Net debt / FCF TTM in the heaviest penalty band
    #[display("Net debt high vs TTM FCF")]
    NetDebtHigh,
    /// Core-risk hits in the heaviest penalty band
    #[display("Frequent LABOR/INSURANCE/REGULATORY negatives (30d)")]
    FrequentCoreRisk,
    /// Negative headline count at or above the news cutoff
    #[display("News: {count} negative headlines in last 7d (shock {shock})")]
    NegativeNews {
        /// Negative headlines over 7 days
        count: u32,
        /// Signed 7-day shock delta
        shock: f64,
    },
}

fn leg<'a>(buckets: &'a [BucketScore], bucket: Bucket, name: &str) -> Option<&'a LegScore> {
    buckets
        .iter()
        .find(|b| b.bucket == bucket)
        .and_then(|b| b.leg(name))
}

fn input_where(
    buckets: &[BucketScore],
    bucket: Bucket,
    name: &str,
    table: &RuleTable<f64>,
    hit: fn(&RuleTable<f64>, f64) -> bool,
) -> bool {
    leg(buckets, bucket, name)
        .and_then(|leg| leg.input)
        .is_some_and(|value| hit(table, value))
}

/// Flags raised by a set of scored buckets, in bucket order.
pub fn red_flags(buckets: &[BucketScore], risk: &NewsRiskSignal, rules: &ScoringRules) -> Vec<RedFlag> {
    let checks = [
        (
            RedFlag::LowTtmFcf,
            input_where(buckets, Bucket::CashLevel, "fcf_ttm", &rules.cash_level, RuleTable::in_floor),
        ),
        (
            RedFlag::FcfYieldMissing,
            leg(buckets, Bucket::Valuation, "fcf_yield_pct").is_some_and(LegScore::is_omitted),
        ),
        (
            RedFlag::RevenueDecliningYoy,
            input_where(
                buckets,
                Bucket::Growth,
                "revenue_ttm_yoy_pct",
                &rules.growth.revenue_yoy_pct,
                RuleTable::in_floor,
            ),
        ),
        (
            RedFlag::FcfDecliningYoy,
            input_where(
                buckets,
                Bucket::Growth,
                "fcf_ttm_yoy_pct",
                &rules.growth.fcf_yoy_pct,
                RuleTable::in_floor,
            ),
        ),
        (
            RedFlag::NetDebtHigh,
            input_where(
                buckets,
                Bucket::BalanceRisk,
                "net_debt_to_fcf_ttm",
                &rules.balance.net_debt_to_fcf_ttm,
                RuleTable::in_top_band,
            ),
        ),
        (
            RedFlag::FrequentCoreRisk,
            input_where(
                buckets,
                Bucket::BalanceRisk,
                "core_risk_hits_30d",
                &rules.balance.core_risk_hits_30d,
                RuleTable::in_top_band,
            ),
        ),
    ];

    let mut flags: Vec<RedFlag> = checks
        .into_iter()
        .filter_map(|(flag, raised)| raised.then_some(flag))
        .collect();
    if f64::from(risk.negative_news_7d) >= rules.red_flags.negative_news_7d {
        flags.push(RedFlag::NegativeNews {
            count: risk.negative_news_7d,
            shock: risk.shock_delta_7d,
        });
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buckets::{
            BucketScorer,
            tests::{worked_example_metrics, worked_example_percentiles, worked_example_risk},
        },
        metrics::DerivedMetrics,
    };

    fn flags_for(metrics: &DerivedMetrics, risk: &NewsRiskSignal) -> Vec<RedFlag> {
        let rules = ScoringRules::default();
        let buckets = BucketScorer::new(&rules)
            .score_all("ACME", metrics, &worked_example_percentiles(), risk)
            .unwrap();
        red_flags(&buckets, risk, &rules)
    }

    #[test]
    fn test_worked_example_raises_nothing() {
        assert!(flags_for(&worked_example_metrics(), &worked_example_risk()).is_empty());
    }

    #[test]
    fn test_weak_name_raises_every_flag() {
        let metrics = DerivedMetrics {
            fcf_ttm: Some(400_000_000.0),
            fcf_yield_pct: None,
            revenue_ttm_yoy_pct: Some(-4.0),
            fcf_ttm_yoy_pct: Some(-30.0),
            net_debt_to_fcf_ttm: Some(3.0),
            ..worked_example_metrics()
        };
        let risk = NewsRiskSignal {
            negative_news_7d: 4,
            shock_delta_7d: -7.0,
            core_risk_hits_30d: 6,
            ..worked_example_risk()
        };
        let flags = flags_for(&metrics, &risk);

        assert_eq!(
            flags,
            vec![
                RedFlag::LowTtmFcf,
                RedFlag::FcfYieldMissing,
                RedFlag::RevenueDecliningYoy,
                RedFlag::FcfDecliningYoy,
                RedFlag::NetDebtHigh,
                RedFlag::FrequentCoreRisk,
                RedFlag::NegativeNews {
                    count: 4,
                    shock: -7.0
                },
            ]
        );
        assert_eq!(
            flags[6].to_string(),
            "News: 4 negative headlines in last 7d (shock -7)"
        );
    }

    #[test]
    fn test_flag_edges() {
        let flat = DerivedMetrics {
            fcf_ttm: Some(1_000_000_000.0),
            revenue_ttm_yoy_pct: Some(0.0),
            net_debt_to_fcf_ttm: Some(2.99),
            ..worked_example_metrics()
        };
        let quiet = NewsRiskSignal {
            negative_news_7d: 2,
            core_risk_hits_30d: 5,
            ..worked_example_risk()
        };
        assert!(flags_for(&flat, &quiet).is_empty());

        let loud = NewsRiskSignal {
            negative_news_7d: 3,
            ..quiet
        };
        assert_eq!(flags_for(&flat, &loud).len(), 1);
    }

    #[test]
    fn test_flag_json_is_tagged() {
        let json = serde_json::to_string(&RedFlag::NegativeNews {
            count: 3,
            shock: -2.5,
        })
        .unwrap();
        assert_eq!(json, r#"{"flag":"negative_news","count":3,"shock":-2.5}"#);
        assert_eq!(
            serde_json::to_string(&RedFlag::LowTtmFcf).unwrap(),
            r#"{"flag":"low_ttm_fcf"}"#
        );
    }
}

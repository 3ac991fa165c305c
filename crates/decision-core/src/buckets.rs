//! Five-bucket scoring model.
//!
//! Each bucket is a pure function of the derived metrics, peer percentiles,
//! and news risk signal. Buckets are built from legs; a leg whose input is
//! not applicable is recorded as omitted and its points are taken off the
//! bucket's ceiling rather than scored as zero or full credit.
//!
//! | Bucket       | Max | Legs                                                   |
//! |--------------|-----|--------------------------------------------------------|
//! | Cash Level   | 25  | FCF TTM bands                                          |
//! | Valuation    | 20  | FCF yield, FCF yield percentile                        |
//! | Growth       | 20  | revenue YoY, FCF YoY, and both percentiles             |
//! | Quality      | 15  | FCF margin, FCF margin percentile                      |
//! | Balance/Risk | 20  | starts full; news, shock, core risk, leverage, proxy   |

use crate::{
    Result,
    config::ScoringRules,
    metrics::DerivedMetrics,
    peers::PeerPercentiles,
    rules::RuleTable,
    types::NewsRiskSignal,
};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One of the five independently bounded scoring components.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    /// Absolute FCF TTM magnitude
    #[display("cash_level")]
    CashLevel,
    /// FCF yield, absolute and relative to peers
    #[display("valuation")]
    Valuation,
    /// Revenue and FCF growth, absolute and relative to peers
    #[display("growth")]
    Growth,
    /// FCF margin, absolute and relative to peers
    #[display("quality")]
    Quality,
    /// News risk and leverage penalties with a sentiment adjustment
    #[display("balance_risk")]
    BalanceRisk,
}

impl Bucket {
    /// Buckets in breakdown order.
    pub const ALL: [Self; 5] = [
        Self::CashLevel,
        Self::Valuation,
        Self::Growth,
        Self::Quality,
        Self::BalanceRisk,
    ];

    /// Declared maximum for the bucket.
    pub const fn max(self) -> f64 {
        match self {
            Self::CashLevel => 25.0,
            Self::Valuation | Self::Growth | Self::BalanceRisk => 20.0,
            Self::Quality => 15.0,
        }
    }
}

/// One additive contribution to a bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegScore {
    /// Leg identifier, usually the metric it reads
    pub name: String,
    /// Input value the leg was evaluated on
    pub input: Option<f64>,
    /// Points contributed; `None` when the leg is omitted
    pub points: Option<f64>,
    /// Most points the leg can contribute
    pub max_points: f64,
}

impl LegScore {
    fn threshold(name: &str, input: Option<f64>, table: &RuleTable<f64>) -> Self {
        let input = input.filter(|v| v.is_finite());
        Self {
            name: name.to_string(),
            input,
            points: input.map(|v| table.evaluate(v)),
            max_points: table.max_points(),
        }
    }

    fn adjustment(name: &str, input: Option<f64>, points: Option<f64>, max_points: f64) -> Self {
        Self {
            name: name.to_string(),
            input,
            points,
            max_points,
        }
    }

    /// Whether the leg's input was not applicable.
    pub const fn is_omitted(&self) -> bool {
        self.points.is_none()
    }
}

/// A scored bucket with the legs that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketScore {
    /// Which bucket
    pub bucket: Bucket,
    /// Legs in evaluation order
    pub legs: Vec<LegScore>,
    /// Unclamped sum of leg points
    pub raw: f64,
    /// Declared maximum
    pub max: f64,
    /// Maximum after removing omitted legs
    pub effective_max: f64,
    /// Raw sum rounded to whole points and clamped to `[0, effective_max]`
    pub score: f64,
}

impl BucketScore {
    /// Combine legs into a bounded bucket score.
    pub fn from_legs(bucket: Bucket, legs: Vec<LegScore>) -> Self {
        let raw: f64 = legs.iter().filter_map(|leg| leg.points).sum();
        let omitted: f64 = legs
            .iter()
            .filter(|leg| leg.is_omitted())
            .map(|leg| leg.max_points)
            .sum();
        let max = bucket.max();
        let effective_max = (max - omitted).clamp(0.0, max);
        let score = raw.round().clamp(0.0, effective_max);

        debug!(%bucket, raw, effective_max, score, "Scored bucket");
        Self {
            bucket,
            legs,
            raw,
            max,
            effective_max,
            score,
        }
    }

    /// Leg by name.
    pub fn leg(&self, name: &str) -> Option<&LegScore> {
        self.legs.iter().find(|leg| leg.name == name)
    }

    /// Whether the stored score follows from the stored legs.
    pub fn matches_legs(&self) -> bool {
        let rebuilt = Self::from_legs(self.bucket, self.legs.clone());
        rebuilt.score == self.score && rebuilt.effective_max == self.effective_max
    }

    #[cfg(test)]
    pub(crate) fn fixed(bucket: Bucket, score: f64) -> Self {
        Self {
            bucket,
            legs: Vec::new(),
            raw: score,
            max: bucket.max(),
            effective_max: bucket.max(),
            score,
        }
    }
}

/// Scores buckets against a set of rules.
#[derive(Debug, Clone, Copy)]
pub struct BucketScorer<'a> {
    rules: &'a ScoringRules,
}

impl<'a> BucketScorer<'a> {
    /// Create a scorer over `rules`.
    pub const fn new(rules: &'a ScoringRules) -> Self {
        Self { rules }
    }

    /// Cash Level: FCF TTM bands. Fails when FCF TTM is missing.
    pub fn cash_level(&self, ticker: &str, metrics: &DerivedMetrics) -> Result<BucketScore> {
        let fcf_ttm = metrics.require_fcf_ttm(ticker)?;
        Ok(BucketScore::from_legs(
            Bucket::CashLevel,
            vec![LegScore::threshold("fcf_ttm", Some(fcf_ttm), &self.rules.cash_level)],
        ))
    }

    /// Valuation: absolute FCF yield plus its peer percentile.
    pub fn valuation(&self, metrics: &DerivedMetrics, percentiles: &PeerPercentiles) -> BucketScore {
        let rules = &self.rules.valuation;
        BucketScore::from_legs(
            Bucket::Valuation,
            vec![
                LegScore::threshold("fcf_yield_pct", metrics.fcf_yield_pct, &rules.fcf_yield_pct),
                LegScore::threshold(
                    "fcf_yield_peer_pct",
                    percentiles.fcf_yield_pct,
                    &rules.fcf_yield_peer,
                ),
            ],
        )
    }

    /// Growth: revenue and FCF YoY, each absolute and relative to peers.
    pub fn growth(&self, metrics: &DerivedMetrics, percentiles: &PeerPercentiles) -> BucketScore {
        let rules = &self.rules.growth;
        BucketScore::from_legs(
            Bucket::Growth,
            vec![
                LegScore::threshold(
                    "revenue_ttm_yoy_pct",
                    metrics.revenue_ttm_yoy_pct,
                    &rules.revenue_yoy_pct,
                ),
                LegScore::threshold("fcf_ttm_yoy_pct", metrics.fcf_ttm_yoy_pct, &rules.fcf_yoy_pct),
                LegScore::threshold(
                    "revenue_ttm_yoy_peer_pct",
                    percentiles.revenue_ttm_yoy_pct,
                    &rules.revenue_yoy_peer,
                ),
                LegScore::threshold(
                    "fcf_ttm_yoy_peer_pct",
                    percentiles.fcf_ttm_yoy_pct,
                    &rules.fcf_yoy_peer,
                ),
            ],
        )
    }

    /// Quality: FCF margin plus its peer percentile.
    pub fn quality(&self, metrics: &DerivedMetrics, percentiles: &PeerPercentiles) -> BucketScore {
        let rules = &self.rules.quality;
        BucketScore::from_legs(
            Bucket::Quality,
            vec![
                LegScore::threshold(
                    "fcf_margin_ttm_pct",
                    metrics.fcf_margin_ttm_pct,
                    &rules.fcf_margin_pct,
                ),
                LegScore::threshold(
                    "fcf_margin_ttm_peer_pct",
                    percentiles.fcf_margin_ttm_pct,
                    &rules.fcf_margin_peer,
                ),
            ],
        )
    }

    /// Balance/Risk: starts at the maximum, applies the highest tier of each
    /// penalty table, then the bounded sentiment adjustment.
    ///
    /// Leverage is skipped when net debt / FCF is undefined. A non-finite
    /// proxy score omits the sentiment leg and its bonus headroom.
    pub fn balance_risk(&self, metrics: &DerivedMetrics, risk: &NewsRiskSignal) -> BucketScore {
        let rules = &self.rules.balance;
        let max = Bucket::BalanceRisk.max();
        let negative_news = f64::from(risk.negative_news_7d);
        let core_risk = f64::from(risk.core_risk_hits_30d);
        let shock = Some(risk.shock_delta_7d).filter(|v| v.is_finite());
        let leverage = metrics.net_debt_to_fcf_ttm;
        let proxy = Some(risk.proxy_score_7d).filter(|v| v.is_finite());

        BucketScore::from_legs(
            Bucket::BalanceRisk,
            vec![
                LegScore::adjustment("start", None, Some(max), max),
                LegScore::threshold("negative_news_7d", Some(negative_news), &rules.negative_news_7d),
                LegScore::adjustment(
                    "shock_delta_7d",
                    shock,
                    shock.map(|delta| rules.shock_delta_7d.evaluate(-delta)),
                    0.0,
                ),
                LegScore::threshold("core_risk_hits_30d", Some(core_risk), &rules.core_risk_hits_30d),
                LegScore::threshold("net_debt_to_fcf_ttm", leverage, &rules.net_debt_to_fcf_ttm),
                LegScore::adjustment(
                    "proxy_score_7d",
                    proxy,
                    proxy.and_then(|score| rules.sentiment.adjustment(score)),
                    rules.sentiment.max_bonus,
                ),
            ],
        )
    }

    /// All five buckets in breakdown order.
    pub fn score_all(
        &self,
        ticker: &str,
        metrics: &DerivedMetrics,
        percentiles: &PeerPercentiles,
        risk: &NewsRiskSignal,
    ) -> Result<Vec<BucketScore>> {
        Ok(vec![
            self.cash_level(ticker, metrics)?,
            self.valuation(metrics, percentiles),
            self.growth(metrics, percentiles),
            self.quality(metrics, percentiles),
            self.balance_risk(metrics, risk),
        ])
    }
}

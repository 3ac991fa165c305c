//! Scoring rule configuration.
//!
//! [`ScoringRules::default`] carries the canonical tables. Overrides are
//! loaded from JSON and must pass [`ScoringRules::validate`] before use.

use crate::{Result, ScoreError, buckets::Bucket, rating::Rating, rules::RuleTable};
use serde::{Deserialize, Serialize};
use std::path::Path;

const BILLION: f64 = 1_000_000_000.0;

/// Peer-percentile leg used by the valuation, growth, and quality buckets.
fn peer_leg(top: f64, upper: f64, lower: f64, floor: f64) -> RuleTable<f64> {
    RuleTable::from_descending([(75.0, top), (50.0, upper), (25.0, lower)], floor)
}

/// Valuation bucket legs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationRules {
    /// Absolute FCF yield (percent)
    pub fcf_yield_pct: RuleTable<f64>,
    /// Peer percentile of FCF yield
    pub fcf_yield_peer: RuleTable<f64>,
}

impl Default for ValuationRules {
    fn default() -> Self {
        Self {
            fcf_yield_pct: RuleTable::from_descending(
                [(8.0, 10.0), (6.0, 8.0), (4.0, 5.0), (2.5, 3.0)],
                1.0,
            ),
            fcf_yield_peer: peer_leg(10.0, 7.0, 4.0, 2.0),
        }
    }
}

/// Growth bucket legs.
///
/// The absolute legs have negative floors: shrinking TTM revenue or FCF
/// costs points rather than scoring zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthRules {
    /// Revenue TTM YoY (percent)
    pub revenue_yoy_pct: RuleTable<f64>,
    /// FCF TTM YoY (percent)
    pub fcf_yoy_pct: RuleTable<f64>,
    /// Peer percentile of revenue TTM YoY
    pub revenue_yoy_peer: RuleTable<f64>,
    /// Peer percentile of FCF TTM YoY
    pub fcf_yoy_peer: RuleTable<f64>,
}

impl Default for GrowthRules {
    fn default() -> Self {
        Self {
            revenue_yoy_pct: RuleTable::from_descending(
                [(20.0, 6.0), (10.0, 4.0), (5.0, 2.0), (0.0, 0.0)],
                -3.0,
            ),
            fcf_yoy_pct: RuleTable::from_descending(
                [(40.0, 6.0), (15.0, 4.0), (5.0, 2.0), (0.0, 0.0)],
                -5.0,
            ),
            revenue_yoy_peer: peer_leg(4.0, 3.0, 2.0, 1.0),
            fcf_yoy_peer: peer_leg(4.0, 3.0, 2.0, 1.0),
        }
    }
}

/// Quality bucket legs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRules {
    /// FCF margin TTM (percent)
    pub fcf_margin_pct: RuleTable<f64>,
    /// Peer percentile of FCF margin TTM
    pub fcf_margin_peer: RuleTable<f64>,
}

impl Default for QualityRules {
    fn default() -> Self {
        Self {
            fcf_margin_pct: RuleTable::from_descending(
                [(18.0, 9.0), (12.0, 7.0), (8.0, 5.0), (4.0, 3.0)],
                1.0,
            ),
            fcf_margin_peer: peer_leg(6.0, 4.0, 3.0, 2.0),
        }
    }
}

/// Continuous proxy-sentiment adjustment.
///
/// Linear in the distance from `neutral`: reaches `-max_penalty` at
/// `full_penalty_at` and `+max_bonus` at `full_bonus_at`, flat beyond.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentRules {
    /// Proxy score with no adjustment
    pub neutral: f64,
    /// Proxy score at which the full penalty applies
    pub full_penalty_at: f64,
    /// Largest penalty (positive number of points)
    pub max_penalty: f64,
    /// Proxy score at which the full bonus applies
    pub full_bonus_at: f64,
    /// Largest bonus
    pub max_bonus: f64,
}

impl Default for SentimentRules {
    fn default() -> Self {
        Self {
            neutral: 50.0,
            full_penalty_at: 25.0,
            max_penalty: 4.0,
            full_bonus_at: 70.0,
            max_bonus: 1.0,
        }
    }
}

impl SentimentRules {
    /// Adjustment for a 0-100 proxy score; `None` when the score is not finite.
    pub fn adjustment(&self, proxy_score: f64) -> Option<f64> {
        if !proxy_score.is_finite() {
            return None;
        }
        let proxy = proxy_score.clamp(0.0, 100.0);
        let points = if proxy < self.neutral {
            let depth = (self.neutral - proxy) / (self.neutral - self.full_penalty_at);
            -self.max_penalty * depth.min(1.0)
        } else {
            let height = (proxy - self.neutral) / (self.full_bonus_at - self.neutral);
            self.max_bonus * height.min(1.0)
        };
        Some(points)
    }
}

/// Balance/Risk bucket penalties.
///
/// The bucket starts at its maximum. Each penalty table holds non-positive
/// values and applies only its highest tier reached. Sentiment may add back
/// up to `sentiment.max_bonus` points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceRules {
    /// Negative headlines over 7 days
    pub negative_news_7d: RuleTable<f64>,
    /// Size of a negative 7-day shock, keyed on `-shock_delta_7d`
    pub shock_delta_7d: RuleTable<f64>,
    /// Core-risk category hits over 30 days
    pub core_risk_hits_30d: RuleTable<f64>,
    /// Net debt / FCF TTM, skipped when the ratio is not applicable
    pub net_debt_to_fcf_ttm: RuleTable<f64>,
    /// Proxy sentiment adjustment
    pub sentiment: SentimentRules,
}

impl Default for BalanceRules {
    fn default() -> Self {
        Self {
            negative_news_7d: RuleTable::from_descending([(6.0, -8.0), (3.0, -5.0), (1.0, -2.0)], 0.0),
            shock_delta_7d: RuleTable::from_descending([(10.0, -4.0), (6.0, -2.0)], 0.0),
            core_risk_hits_30d: RuleTable::from_descending([(6.0, -4.0), (3.0, -2.0)], 0.0),
            net_debt_to_fcf_ttm: RuleTable::from_descending([(3.0, -8.0), (1.5, -4.0)], 0.0),
            sentiment: SentimentRules::default(),
        }
    }
}

impl BalanceRules {
    fn penalty_tables(&self) -> [(&'static str, &RuleTable<f64>); 4] {
        [
            ("negative_news_7d", &self.negative_news_7d),
            ("shock_delta_7d", &self.shock_delta_7d),
            ("core_risk_hits_30d", &self.core_risk_hits_30d),
            ("net_debt_to_fcf_ttm", &self.net_debt_to_fcf_ttm),
        ]
    }
}

/// Cutoffs for red flags that no scoring table already marks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RedFlagRules {
    /// Negative headlines over 7 days that raise a news flag
    pub negative_news_7d: f64,
}

impl Default for RedFlagRules {
    fn default() -> Self {
        Self {
            negative_news_7d: 3.0,
        }
    }
}

/// Every rule table the bucket scorer and rating classifier read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringRules {
    /// FCF TTM bands (USD)
    pub cash_level: RuleTable<f64>,
    /// Valuation legs
    pub valuation: ValuationRules,
    /// Growth legs
    pub growth: GrowthRules,
    /// Quality legs
    pub quality: QualityRules,
    /// Balance/Risk penalties
    pub balance: BalanceRules,
    /// Total-score rating bands
    pub rating: RuleTable<Rating>,
    /// Red-flag cutoffs
    #[serde(default)]
    pub red_flags: RedFlagRules,
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self {
            cash_level: RuleTable::from_descending(
                [
                    (12.0 * BILLION, 25.0),
                    (8.0 * BILLION, 21.0),
                    (4.0 * BILLION, 15.0),
                    (BILLION, 8.0),
                ],
                3.0,
            ),
            valuation: ValuationRules::default(),
            growth: GrowthRules::default(),
            quality: QualityRules::default(),
            balance: BalanceRules::default(),
            rating: RuleTable::from_descending([(80.0, Rating::Buy), (65.0, Rating::Hold)], Rating::Avoid),
            red_flags: RedFlagRules::default(),
        }
    }
}

impl ScoringRules {
    /// Load rules from a JSON file and validate them.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let rules: Self = serde_json::from_str(&text)?;
        rules.validate()?;
        Ok(rules)
    }

    /// Check ordering, leg ceilings, penalty signs, and the sentiment curve.
    pub fn validate(&self) -> Result<()> {
        let tables = [
            &self.cash_level,
            &self.valuation.fcf_yield_pct,
            &self.valuation.fcf_yield_peer,
            &self.growth.revenue_yoy_pct,
            &self.growth.fcf_yoy_pct,
            &self.growth.revenue_yoy_peer,
            &self.growth.fcf_yoy_peer,
            &self.quality.fcf_margin_pct,
            &self.quality.fcf_margin_peer,
        ];
        for table in tables {
            table.validate()?;
        }
        self.rating.validate()?;

        let ceilings = [
            (Bucket::CashLevel, self.cash_level.max_points()),
            (
                Bucket::Valuation,
                self.valuation.fcf_yield_pct.max_points() + self.valuation.fcf_yield_peer.max_points(),
            ),
            (
                Bucket::Growth,
                self.growth.revenue_yoy_pct.max_points()
                    + self.growth.fcf_yoy_pct.max_points()
                    + self.growth.revenue_yoy_peer.max_points()
                    + self.growth.fcf_yoy_peer.max_points(),
            ),
            (
                Bucket::Quality,
                self.quality.fcf_margin_pct.max_points() + self.quality.fcf_margin_peer.max_points(),
            ),
        ];
        for (bucket, ceiling) in ceilings {
            if ceiling != bucket.max() {
                return Err(ScoreError::InvalidRules(format!(
                    "{bucket} legs add up to {ceiling}, expected {}",
                    bucket.max()
                )));
            }
        }

        for (name, table) in self.balance.penalty_tables() {
            table.validate()?;
            if table.max_points() > 0.0 {
                return Err(ScoreError::InvalidRules(format!(
                    "{name} penalties must be zero or negative"
                )));
            }
        }

        let sentiment = &self.balance.sentiment;
        let ordered = sentiment.full_penalty_at < sentiment.neutral
            && sentiment.neutral < sentiment.full_bonus_at;
        let bounded = sentiment.max_penalty >= 0.0
            && sentiment.max_bonus >= 0.0
            && sentiment.max_penalty.is_finite()
            && sentiment.max_bonus.is_finite();
        if !ordered || !bounded {
            return Err(ScoreError::InvalidRules(
                "sentiment curve needs full_penalty_at < neutral < full_bonus_at and non-negative caps"
                    .to_string(),
            ));
        }
        if !self.red_flags.negative_news_7d.is_finite() {
            return Err(ScoreError::InvalidRules(
                "red-flag news cutoff is not finite".to_string(),
            ));
        }
        Ok(())
    }
}

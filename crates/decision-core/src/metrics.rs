//! Metric derivation from periodic fundamentals.
//!
//! Rolling windows run as a polars lazy query over the period-ordered
//! fundamentals. Ratios are then finished row by row so that every
//! non-positive denominator becomes an explicit "not applicable" (`None`)
//! instead of a NaN or infinity.
//!
//! ```text
//! capex_spend          = |capital_expenditure|
//! free_cash_flow       = operating_cash_flow - capex_spend
//! revenue_ttm, fcf_ttm = sum of the last 4 periods
//! *_ttm_yoy_pct        = (ttm / ttm[4 periods earlier] - 1) * 100
//! fcf_margin_ttm_pct   = fcf_ttm / revenue_ttm * 100
//! fcf_yield_pct        = fcf_ttm / market_cap * 100
//! net_debt             = total_debt - cash_and_equivalents
//! net_debt_to_fcf_ttm  = net_debt / fcf_ttm        (only when fcf_ttm > 0)
//! ```

use crate::{Result, ScoreError, types::FundamentalsRecord};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Derived metrics for one fiscal period, using only periods up to it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    /// Period end the metrics describe
    pub period_end: NaiveDate,
    /// Magnitude of capital expenditure
    pub capex_spend: f64,
    /// Operating cash flow minus capex spend
    pub free_cash_flow: f64,
    /// Trailing-twelve-month revenue
    pub revenue_ttm: Option<f64>,
    /// Trailing-twelve-month free cash flow
    pub fcf_ttm: Option<f64>,
    /// FCF TTM as a percentage of revenue TTM
    pub fcf_margin_ttm_pct: Option<f64>,
    /// Revenue TTM change versus four periods earlier (percent)
    pub revenue_ttm_yoy_pct: Option<f64>,
    /// FCF TTM change versus four periods earlier (percent)
    pub fcf_ttm_yoy_pct: Option<f64>,
    /// Total debt minus cash and equivalents
    pub net_debt: f64,
    /// FCF TTM over market capitalization (percent)
    pub fcf_yield_pct: Option<f64>,
    /// Net debt over FCF TTM, not applicable unless FCF TTM is positive
    pub net_debt_to_fcf_ttm: Option<f64>,
}

impl DerivedMetrics {
    /// FCF TTM, or [`ScoreError::MissingData`] when the window is incomplete.
    pub fn require_fcf_ttm(&self, ticker: &str) -> Result<f64> {
        self.fcf_ttm.ok_or_else(|| ScoreError::MissingData {
            ticker: ticker.to_string(),
            required: TTM_WINDOW,
            available: 0,
        })
    }

    /// Net debt / FCF TTM, or [`ScoreError::UndefinedMetric`] when FCF TTM is not positive.
    pub fn require_net_debt_to_fcf_ttm(&self, ticker: &str) -> Result<f64> {
        self.net_debt_to_fcf_ttm.ok_or_else(|| ScoreError::UndefinedMetric {
            ticker: ticker.to_string(),
            period: self.period_end,
            metric: "net_debt_to_fcf_ttm",
        })
    }
}

/// Periods in one trailing-twelve-month window.
pub const TTM_WINDOW: usize = 4;

/// Configuration for [`MetricDeriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDeriverConfig {
    /// Number of periods summed into a TTM value.
    pub ttm_window: usize,
    /// Number of periods between the TTM values compared for YoY.
    pub yoy_lag: usize,
}

impl Default for MetricDeriverConfig {
    fn default() -> Self {
        Self {
            ttm_window: TTM_WINDOW,
            yoy_lag: TTM_WINDOW,
        }
    }
}

impl MetricDeriverConfig {
    /// Periods needed before YoY on a TTM basis is defined.
    pub const fn yoy_history(&self) -> usize {
        self.ttm_window + self.yoy_lag
    }
}

/// Turns a fundamentals sequence into per-period [`DerivedMetrics`].
///
/// Derivation is a pure function of its input: the same records always
/// produce bit-identical output.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricDeriver {
    config: MetricDeriverConfig,
}

impl MetricDeriver {
    /// Create a deriver with the given configuration.
    pub const fn with_config(config: MetricDeriverConfig) -> Self {
        Self { config }
    }

    /// Returns the current configuration.
    pub const fn config(&self) -> &MetricDeriverConfig {
        &self.config
    }

    /// Sort records by period end, rejecting duplicate periods.
    pub fn chronological(
        &self,
        ticker: &str,
        records: &[FundamentalsRecord],
    ) -> Result<Vec<FundamentalsRecord>> {
        let mut sorted = records.to_vec();
        sorted.sort_by_key(|r| r.period_end);
        if let Some(pair) = sorted.windows(2).find(|pair| pair[0].period_end == pair[1].period_end) {
            return Err(ScoreError::DuplicatePeriod {
                ticker: ticker.to_string(),
                period: pair[0].period_end,
            });
        }
        Ok(sorted)
    }

    /// Derive metrics for every period, oldest first.
    ///
    /// Periods before the first complete TTM window carry `None` for every
    /// TTM-based metric.
    pub fn derive(&self, ticker: &str, records: &[FundamentalsRecord]) -> Result<Vec<DerivedMetrics>> {
        let sorted = self.chronological(ticker, records)?;
        if sorted.is_empty() {
            return Ok(Vec::new());
        }

        let window = RollingOptionsFixedWindow {
            window_size: self.config.ttm_window,
            min_periods: self.config.ttm_window,
            ..Default::default()
        };
        let lag = self.config.yoy_lag as i64;

        let frame = df![
            "period_end" => sorted.iter().map(|r| r.period_end.to_string()).collect::<Vec<_>>(),
            "revenue" => sorted.iter().map(|r| r.revenue).collect::<Vec<_>>(),
            "operating_cash_flow" => sorted.iter().map(|r| r.operating_cash_flow).collect::<Vec<_>>(),
            "capital_expenditure" => sorted.iter().map(|r| r.capital_expenditure).collect::<Vec<_>>(),
            "total_debt" => sorted.iter().map(|r| r.total_debt).collect::<Vec<_>>(),
            "cash_and_equivalents" => sorted.iter().map(|r| r.cash_and_equivalents).collect::<Vec<_>>(),
        ]?
        .lazy()
        .with_column(col("capital_expenditure").abs().alias("capex_spend"))
        .with_column((col("operating_cash_flow") - col("capex_spend")).alias("free_cash_flow"))
        .with_column((col("total_debt") - col("cash_and_equivalents")).alias("net_debt"))
        .with_column(col("revenue").rolling_sum(window.clone()).alias("revenue_ttm"))
        .with_column(col("free_cash_flow").rolling_sum(window).alias("fcf_ttm"))
        .with_column(col("revenue_ttm").shift(lit(lag)).alias("revenue_ttm_prior"))
        .with_column(col("fcf_ttm").shift(lit(lag)).alias("fcf_ttm_prior"))
        .collect()?;

        let capex_spend = column_values(&frame, "capex_spend")?;
        let free_cash_flow = column_values(&frame, "free_cash_flow")?;
        let net_debt = column_values(&frame, "net_debt")?;
        let revenue_ttm = column_values(&frame, "revenue_ttm")?;
        let fcf_ttm = column_values(&frame, "fcf_ttm")?;
        let revenue_ttm_prior = column_values(&frame, "revenue_ttm_prior")?;
        let fcf_ttm_prior = column_values(&frame, "fcf_ttm_prior")?;

        let derived = sorted
            .iter()
            .enumerate()
            .map(|(i, record)| {
                let net_debt = net_debt[i].unwrap_or(record.total_debt - record.cash_and_equivalents);
                let fcf_ttm = fcf_ttm[i];
                let revenue_ttm = revenue_ttm[i];
                DerivedMetrics {
                    period_end: record.period_end,
                    capex_spend: capex_spend[i].unwrap_or(record.capital_expenditure.abs()),
                    free_cash_flow: free_cash_flow[i].unwrap_or_default(),
                    revenue_ttm,
                    fcf_ttm,
                    fcf_margin_ttm_pct: ratio(fcf_ttm, revenue_ttm).map(|r| r * 100.0),
                    revenue_ttm_yoy_pct: pct_change(revenue_ttm, revenue_ttm_prior[i]),
                    fcf_ttm_yoy_pct: pct_change(fcf_ttm, fcf_ttm_prior[i]),
                    net_debt,
                    fcf_yield_pct: ratio(fcf_ttm, Some(record.market_cap)).map(|r| r * 100.0),
                    net_debt_to_fcf_ttm: ratio(Some(net_debt), fcf_ttm),
                }
            })
            .collect();

        Ok(derived)
    }

    /// Derive metrics for the most recent period.
    ///
    /// Fails with [`ScoreError::MissingData`] when the current TTM window is
    /// incomplete. With fewer periods than YoY needs, the result is degraded:
    /// YoY metrics are `None`.
    pub fn latest(&self, ticker: &str, records: &[FundamentalsRecord]) -> Result<DerivedMetrics> {
        if records.len() < self.config.ttm_window {
            return Err(ScoreError::MissingData {
                ticker: ticker.to_string(),
                required: self.config.ttm_window,
                available: records.len(),
            });
        }
        if records.len() < self.config.yoy_history() {
            warn!(
                ticker,
                available = records.len(),
                required = self.config.yoy_history(),
                "Not enough history for TTM year-over-year, growth legs will be omitted"
            );
        }

        let latest = self
            .derive(ticker, records)?
            .pop()
            .ok_or_else(|| ScoreError::MissingData {
                ticker: ticker.to_string(),
                required: self.config.ttm_window,
                available: 0,
            })?;
        debug!(ticker, period = %latest.period_end, ?latest, "Derived latest metrics");
        Ok(latest)
    }
}

fn column_values(frame: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    Ok(frame.column(name)?.f64()?.into_iter().collect())
}

/// `numerator / denominator`, defined only for a positive denominator.
fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if d > 0.0 => Some(n / d),
        _ => None,
    }
}

/// Percent change against a positive prior value.
fn pct_change(current: Option<f64>, prior: Option<f64>) -> Option<f64> {
    ratio(current, prior).map(|r| (r - 1.0) * 100.0)
}

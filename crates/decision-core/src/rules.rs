//! Ordered threshold tables.
//!
//! Every fixed cutoff in the scoring model is a [`RuleTable`]: a list of
//! `(threshold, value)` rules in strictly descending threshold order plus a
//! floor. Evaluation returns the value of the first rule whose threshold the
//! input meets, so exactly one band applies.
//!
//! Penalty tables use the same shape with non-positive values and a floor of
//! zero: the highest band reached is the only penalty applied.

use crate::{Result, ScoreError};
use serde::{Deserialize, Serialize};

/// One `value >= threshold` band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rule<P> {
    /// Inclusive lower edge of the band
    pub threshold: f64,
    /// Value assigned to inputs in this band
    pub value: P,
}

/// Ordered `threshold -> value` table with a floor for inputs below every band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTable<P> {
    rules: Vec<Rule<P>>,
    floor: P,
}

impl<P: Copy> RuleTable<P> {
    /// Build a table, rejecting thresholds that are not finite and strictly descending.
    pub fn new(rules: impl IntoIterator<Item = (f64, P)>, floor: P) -> Result<Self> {
        let table = Self::from_descending(rules, floor);
        table.validate()?;
        Ok(table)
    }

    /// Build a table without validation, for the built-in defaults.
    pub(crate) fn from_descending(rules: impl IntoIterator<Item = (f64, P)>, floor: P) -> Self {
        Self {
            rules: rules
                .into_iter()
                .map(|(threshold, value)| Rule { threshold, value })
                .collect(),
            floor,
        }
    }

    /// Check that thresholds are finite and strictly descending.
    pub fn validate(&self) -> Result<()> {
        if let Some(rule) = self.rules.iter().find(|r| !r.threshold.is_finite()) {
            return Err(ScoreError::InvalidRules(format!(
                "threshold {} is not finite",
                rule.threshold
            )));
        }
        if let Some(pair) = self
            .rules
            .windows(2)
            .find(|pair| pair[0].threshold <= pair[1].threshold)
        {
            return Err(ScoreError::InvalidRules(format!(
                "thresholds must be strictly descending, found {} before {}",
                pair[0].threshold, pair[1].threshold
            )));
        }
        Ok(())
    }

    /// Value of the highest band `value` reaches, or the floor.
    ///
    /// NaN never meets a threshold and falls through to the floor.
    pub fn evaluate(&self, value: f64) -> P {
        self.rules
            .iter()
            .find(|rule| value >= rule.threshold)
            .map_or(self.floor, |rule| rule.value)
    }

    /// Whether `value` reaches the first (highest) band.
    pub fn in_top_band(&self, value: f64) -> bool {
        self.rules.first().is_some_and(|rule| value >= rule.threshold)
    }

    /// Whether `value` falls below every band and takes the floor.
    pub fn in_floor(&self, value: f64) -> bool {
        !self.rules.iter().any(|rule| value >= rule.threshold)
    }

    /// The bands in evaluation order.
    pub fn rules(&self) -> &[Rule<P>] {
        &self.rules
    }

    /// Value for inputs below every threshold.
    pub const fn floor(&self) -> P {
        self.floor
    }
}

impl RuleTable<f64> {
    /// Most points any input can earn from this table.
    pub fn max_points(&self) -> f64 {
        self.rules
            .iter()
            .map(|rule| rule.value)
            .fold(self.floor, f64::max)
    }

    /// Fewest points any input can earn from this table.
    pub fn min_points(&self) -> f64 {
        self.rules
            .iter()
            .map(|rule| rule.value)
            .fold(self.floor, f64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn cash_table() -> RuleTable<f64> {
        RuleTable::new(
            [(12e9, 25.0), (8e9, 21.0), (4e9, 15.0), (1e9, 8.0)],
            3.0,
        )
        .unwrap()
    }

    #[rstest]
    #[case(15e9, 25.0)]
    #[case(12e9, 25.0)]
    #[case(9.76e9, 21.0)]
    #[case(8e9, 21.0)]
    #[case(7.99e9, 15.0)]
    #[case(1e9, 8.0)]
    #[case(0.99e9, 3.0)]
    #[case(-1.0, 3.0)]
    fn test_evaluate_picks_highest_band(#[case] value: f64, #[case] expected: f64) {
        assert_eq!(cash_table().evaluate(value), expected);
    }

    #[test]
    fn test_nan_falls_to_floor() {
        assert_eq!(cash_table().evaluate(f64::NAN), 3.0);
    }

    #[test]
    fn test_rejects_unordered_thresholds() {
        let result = RuleTable::new([(4.0, 6.0), (8.0, 12.0)], 0.0);
        assert!(matches!(result, Err(ScoreError::InvalidRules(_))));

        let result = RuleTable::new([(4.0, 6.0), (4.0, 3.0)], 0.0);
        assert!(matches!(result, Err(ScoreError::InvalidRules(_))));
    }

    #[test]
    fn test_rejects_non_finite_threshold() {
        let result = RuleTable::new([(f64::INFINITY, 1.0)], 0.0);
        assert!(matches!(result, Err(ScoreError::InvalidRules(_))));
    }

    #[test]
    fn test_max_and_min_points() {
        let table = cash_table();
        assert_eq!(table.max_points(), 25.0);
        assert_eq!(table.min_points(), 3.0);
    }

    #[test]
    fn test_penalty_table_applies_highest_tier_only() {
        let news = RuleTable::new([(6.0, -8.0), (3.0, -5.0), (1.0, -2.0)], 0.0).unwrap();
        assert_eq!(news.evaluate(0.0), 0.0);
        assert_eq!(news.evaluate(2.0), -2.0);
        assert_eq!(news.evaluate(3.0), -5.0);
        assert_eq!(news.evaluate(40.0), -8.0);
        assert_eq!(news.max_points(), 0.0);
        assert_eq!(news.min_points(), -8.0);
    }

    #[test]
    fn test_band_queries() {
        let table = cash_table();
        assert!(table.in_top_band(12e9));
        assert!(!table.in_top_band(11.9e9));
        assert!(table.in_floor(0.5e9));
        assert!(!table.in_floor(1e9));
        assert!(table.in_floor(f64::NAN));
    }

    #[test]
    fn test_table_serde() {
        let table = cash_table();
        let json = serde_json::to_string(&table).unwrap();
        let parsed: RuleTable<f64> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, table);
    }
}

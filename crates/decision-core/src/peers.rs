//! Peer comparables and percentile ranking.
//!
//! A [`ComparableSet`] maps peer tickers to their latest metric snapshot and
//! never contains the subject. [`percentile_rank`] places the subject's value
//! within the peer values:
//!
//! ```text
//! percentile = count(peer <= subject) / count(peers) * 100
//! ```
//!
//! Ties count toward the percentile.

use crate::{
    Result, ScoreError,
    metrics::{DerivedMetrics, MetricDeriver},
    types::FundamentalsRecord,
};
use chrono::NaiveDate;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, future::Future, time::Duration};
use tracing::{debug, warn};

/// Metrics that are ranked against peers.
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ComparableMetric {
    /// FCF yield (percent)
    #[display("fcf_yield_pct")]
    FcfYieldPct,
    /// Revenue TTM YoY (percent)
    #[display("revenue_ttm_yoy_pct")]
    RevenueTtmYoyPct,
    /// FCF TTM YoY (percent)
    #[display("fcf_ttm_yoy_pct")]
    FcfTtmYoyPct,
    /// FCF margin TTM (percent)
    #[display("fcf_margin_ttm_pct")]
    FcfMarginTtmPct,
}

impl ComparableMetric {
    /// Every ranked metric.
    pub const ALL: [Self; 4] = [
        Self::FcfYieldPct,
        Self::RevenueTtmYoyPct,
        Self::FcfTtmYoyPct,
        Self::FcfMarginTtmPct,
    ];

    /// The subject's value for this metric, if defined.
    pub const fn of(self, metrics: &DerivedMetrics) -> Option<f64> {
        match self {
            Self::FcfYieldPct => metrics.fcf_yield_pct,
            Self::RevenueTtmYoyPct => metrics.revenue_ttm_yoy_pct,
            Self::FcfTtmYoyPct => metrics.fcf_ttm_yoy_pct,
            Self::FcfMarginTtmPct => metrics.fcf_margin_ttm_pct,
        }
    }
}

/// One peer's values for the ranked metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerSnapshot {
    /// Period end the snapshot was derived for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_end: Option<NaiveDate>,
    /// FCF yield (percent)
    pub fcf_yield_pct: Option<f64>,
    /// Revenue TTM YoY (percent)
    pub revenue_ttm_yoy_pct: Option<f64>,
    /// FCF TTM YoY (percent)
    pub fcf_ttm_yoy_pct: Option<f64>,
    /// FCF margin TTM (percent)
    pub fcf_margin_ttm_pct: Option<f64>,
}

impl PeerSnapshot {
    /// The peer's value for `metric`, if defined.
    pub const fn get(&self, metric: ComparableMetric) -> Option<f64> {
        match metric {
            ComparableMetric::FcfYieldPct => self.fcf_yield_pct,
            ComparableMetric::RevenueTtmYoyPct => self.revenue_ttm_yoy_pct,
            ComparableMetric::FcfTtmYoyPct => self.fcf_ttm_yoy_pct,
            ComparableMetric::FcfMarginTtmPct => self.fcf_margin_ttm_pct,
        }
    }
}

impl From<&DerivedMetrics> for PeerSnapshot {
    fn from(metrics: &DerivedMetrics) -> Self {
        Self {
            period_end: Some(metrics.period_end),
            fcf_yield_pct: metrics.fcf_yield_pct,
            revenue_ttm_yoy_pct: metrics.revenue_ttm_yoy_pct,
            fcf_ttm_yoy_pct: metrics.fcf_ttm_yoy_pct,
            fcf_margin_ttm_pct: metrics.fcf_margin_ttm_pct,
        }
    }
}

#[derive(Deserialize)]
struct ComparableSetRepr {
    subject: String,
    #[serde(default)]
    peers: BTreeMap<String, PeerSnapshot>,
}

/// Peer snapshots keyed by upper-cased ticker, excluding the subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ComparableSetRepr")]
pub struct ComparableSet {
    subject: String,
    peers: BTreeMap<String, PeerSnapshot>,
}

impl From<ComparableSetRepr> for ComparableSet {
    fn from(repr: ComparableSetRepr) -> Self {
        let mut set = Self::new(repr.subject);
        for (ticker, snapshot) in repr.peers {
            set.insert(ticker, snapshot);
        }
        set
    }
}

impl ComparableSet {
    /// Create an empty set for `subject`.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into().trim().to_ascii_uppercase(),
            peers: BTreeMap::new(),
        }
    }

    /// Build a set from `(ticker, snapshot)` pairs, dropping the subject.
    pub fn from_snapshots(
        subject: impl Into<String>,
        snapshots: impl IntoIterator<Item = (String, PeerSnapshot)>,
    ) -> Self {
        let mut set = Self::new(subject);
        for (ticker, snapshot) in snapshots {
            set.insert(ticker, snapshot);
        }
        set
    }

    /// Derive each peer's latest snapshot from its fundamentals.
    ///
    /// A peer whose metrics cannot be derived is left out of the set.
    pub fn from_fundamentals<'a>(
        subject: impl Into<String>,
        deriver: &MetricDeriver,
        peers: impl IntoIterator<Item = (&'a str, &'a [FundamentalsRecord])>,
    ) -> Self {
        let mut set = Self::new(subject);
        for (ticker, records) in peers {
            match deriver.latest(ticker, records) {
                Ok(metrics) => {
                    set.insert(ticker, PeerSnapshot::from(&metrics));
                }
                Err(err) => warn!(peer = ticker, error = %err, "Dropping peer without derivable metrics"),
            }
        }
        set
    }

    /// Add a peer. Returns `false` (and stores nothing) for the subject itself.
    pub fn insert(&mut self, ticker: impl Into<String>, snapshot: PeerSnapshot) -> bool {
        let ticker = ticker.into().trim().to_ascii_uppercase();
        if ticker == self.subject {
            warn!(subject = %self.subject, "Subject excluded from its own comparable set");
            return false;
        }
        self.peers.insert(ticker, snapshot);
        true
    }

    /// Subject ticker this set is compared against.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Number of peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the set has no peers.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Peer tickers in sorted order.
    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.peers.keys().map(String::as_str)
    }

    /// Snapshot for one peer.
    pub fn get(&self, ticker: &str) -> Option<&PeerSnapshot> {
        self.peers.get(&ticker.to_ascii_uppercase())
    }

    /// Peers and their snapshots in ticker order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PeerSnapshot)> {
        self.peers.iter().map(|(ticker, snapshot)| (ticker.as_str(), snapshot))
    }

    /// The same peers compared against `subject`, which is dropped if present.
    pub fn rebased(&self, subject: &str) -> Self {
        Self::from_snapshots(
            subject,
            self.iter().map(|(ticker, snapshot)| (ticker.to_string(), *snapshot)),
        )
    }

    /// Defined, finite peer values for `metric`, in ticker order.
    pub fn values(&self, metric: ComparableMetric) -> Vec<f64> {
        self.peers
            .values()
            .filter_map(|snapshot| snapshot.get(metric))
            .filter(|v| v.is_finite())
            .collect()
    }
}

/// Percentile of `subject_value` within `peer_values`, in `[0, 100]`.
///
/// Fails with [`ScoreError::EmptyPeerSet`] when there are no peer values; the
/// caller omits the affected leg rather than substituting a default.
pub fn percentile_rank(metric: ComparableMetric, subject_value: f64, peer_values: &[f64]) -> Result<f64> {
    if peer_values.is_empty() {
        return Err(ScoreError::EmptyPeerSet { metric });
    }
    let at_or_below = peer_values.iter().filter(|&&v| v <= subject_value).count();
    Ok(at_or_below as f64 / peer_values.len() as f64 * 100.0)
}

/// Subject percentiles for every ranked metric; `None` marks an omitted leg.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerPercentiles {
    /// Percentile of FCF yield
    pub fcf_yield_pct: Option<f64>,
    /// Percentile of revenue TTM YoY
    pub revenue_ttm_yoy_pct: Option<f64>,
    /// Percentile of FCF TTM YoY
    pub fcf_ttm_yoy_pct: Option<f64>,
    /// Percentile of FCF margin TTM
    pub fcf_margin_ttm_pct: Option<f64>,
}

impl PeerPercentiles {
    /// Rank the subject's metrics against `comparables`.
    ///
    /// A percentile is `None` when the subject's own value is not defined or
    /// no peer has a value for that metric.
    pub fn rank(subject: &DerivedMetrics, comparables: &ComparableSet) -> Self {
        let mut percentiles = Self::default();
        for metric in ComparableMetric::ALL {
            let Some(value) = metric.of(subject).filter(|v| v.is_finite()) else {
                debug!(%metric, "Subject value not applicable, peer leg omitted");
                continue;
            };
            match percentile_rank(metric, value, &comparables.values(metric)) {
                Ok(rank) => percentiles.set(metric, rank),
                Err(err) => warn!(subject = comparables.subject(), error = %err, "Peer leg omitted"),
            }
        }
        percentiles
    }

    /// Percentile for `metric`, if ranked.
    pub const fn get(&self, metric: ComparableMetric) -> Option<f64> {
        match metric {
            ComparableMetric::FcfYieldPct => self.fcf_yield_pct,
            ComparableMetric::RevenueTtmYoyPct => self.revenue_ttm_yoy_pct,
            ComparableMetric::FcfTtmYoyPct => self.fcf_ttm_yoy_pct,
            ComparableMetric::FcfMarginTtmPct => self.fcf_margin_ttm_pct,
        }
    }

    fn set(&mut self, metric: ComparableMetric, rank: f64) {
        let slot = match metric {
            ComparableMetric::FcfYieldPct => &mut self.fcf_yield_pct,
            ComparableMetric::RevenueTtmYoyPct => &mut self.revenue_ttm_yoy_pct,
            ComparableMetric::FcfTtmYoyPct => &mut self.fcf_ttm_yoy_pct,
            ComparableMetric::FcfMarginTtmPct => &mut self.fcf_margin_ttm_pct,
        };
        *slot = Some(rank);
    }
}

/// Upstream source of one peer's snapshot.
pub trait PeerFetcher: Send + Sync {
    /// Fetch the latest snapshot for `ticker`.
    fn fetch_peer(&self, ticker: &str) -> impl Future<Output = Result<PeerSnapshot>> + Send;
}

/// Fetch every peer concurrently, each under its own `timeout`.
///
/// A failed or timed-out peer is dropped from the set with a warning; the
/// rest of the set is still returned. The subject is never fetched.
pub async fn fetch_comparables<F: PeerFetcher>(
    fetcher: &F,
    subject: &str,
    peers: &[String],
    timeout: Duration,
) -> ComparableSet {
    let mut set = ComparableSet::new(subject);
    let wanted: Vec<&String> = peers
        .iter()
        .filter(|peer| !peer.trim().eq_ignore_ascii_case(set.subject()))
        .collect();

    let fetches = wanted.iter().map(|&peer| async move {
        let outcome = match tokio::time::timeout(timeout, fetcher.fetch_peer(peer)).await {
            Ok(result) => result,
            Err(_) => Err(ScoreError::FetchTimeout {
                ticker: peer.clone(),
                timeout,
            }),
        };
        (peer, outcome)
    });

    for (peer, outcome) in futures::future::join_all(fetches).await {
        match outcome {
            Ok(snapshot) => {
                set.insert(peer.as_str(), snapshot);
            }
            Err(err) => warn!(peer = %peer, error = %err, "Peer fetch failed, excluded from ranking"),
        }
    }
    debug!(subject, fetched = set.len(), requested = wanted.len(), "Fetched comparables");
    set
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn snapshot(yield_pct: f64, rev_yoy: f64, fcf_yoy: f64, margin: f64) -> PeerSnapshot {
        PeerSnapshot {
            period_end: None,
            fcf_yield_pct: Some(yield_pct),
            revenue_ttm_yoy_pct: Some(rev_yoy),
            fcf_ttm_yoy_pct: Some(fcf_yoy),
            fcf_margin_ttm_pct: Some(margin),
        }
    }

    /// Three peers the sample subject beats on two of three for every metric
    /// except FCF margin, where it beats all three.
    pub(crate) fn sample_comparables() -> ComparableSet {
        ComparableSet::from_snapshots(
            "ACME",
            [
                ("BETA".to_string(), snapshot(4.0, 10.0, 20.0, 9.0)),
                ("GAMMA".to_string(), snapshot(5.5, 12.0, 30.0, 12.0)),
                ("DELTA".to_string(), snapshot(8.0, 25.0, 55.0, 15.0)),
            ],
        )
    }

    #[rstest]
    #[case(0.5, 0.0)]
    #[case(1.0, 25.0)]
    #[case(2.5, 50.0)]
    #[case(3.0, 100.0)]
    #[case(10.0, 100.0)]
    fn test_percentile_rank(#[case] subject: f64, #[case] expected: f64) {
        let peers = [1.0, 2.0, 3.0, 3.0];
        let rank = percentile_rank(ComparableMetric::FcfYieldPct, subject, &peers).unwrap();
        assert_relative_eq!(rank, expected);
    }

    #[test]
    fn test_percentile_empty_peer_set() {
        let err = percentile_rank(ComparableMetric::FcfMarginTtmPct, 5.0, &[]).unwrap_err();
        assert!(matches!(
            err,
            ScoreError::EmptyPeerSet {
                metric: ComparableMetric::FcfMarginTtmPct
            }
        ));
    }

    #[test]
    fn test_percentile_is_monotonic() {
        let peers = [-3.0, 0.0, 2.5, 2.5, 7.0, 11.0];
        let mut previous = 0.0;
        for step in -10..=30 {
            let subject = f64::from(step) * 0.5;
            let rank = percentile_rank(ComparableMetric::FcfTtmYoyPct, subject, &peers).unwrap();
            assert!(rank >= previous);
            assert!((0.0..=100.0).contains(&rank));
            previous = rank;
        }
    }

    #[test]
    fn test_subject_never_in_comparables() {
        let mut set = ComparableSet::new("acme");
        assert!(!set.insert("ACME", snapshot(1.0, 1.0, 1.0, 1.0)));
        assert!(!set.insert(" Acme ", snapshot(1.0, 1.0, 1.0, 1.0)));
        assert!(set.insert("beta", snapshot(1.0, 1.0, 1.0, 1.0)));
        assert_eq!(set.len(), 1);
        assert_eq!(set.tickers().collect::<Vec<_>>(), vec!["BETA"]);

        let json = r#"{"subject":"ACME","peers":{"ACME":{"fcf_yield_pct":1.0,"revenue_ttm_yoy_pct":null,"fcf_ttm_yoy_pct":null,"fcf_margin_ttm_pct":null}}}"#;
        let parsed: ComparableSet = serde_json::from_str(json).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_rank_sample_subject() {
        let subject = MetricDeriver::default()
            .latest("ACME", &crate::metrics::tests::sample_fundamentals())
            .unwrap();
        let percentiles = PeerPercentiles::rank(&subject, &sample_comparables());

        assert_relative_eq!(percentiles.fcf_yield_pct.unwrap(), 200.0 / 3.0);
        assert_relative_eq!(percentiles.revenue_ttm_yoy_pct.unwrap(), 200.0 / 3.0);
        assert_relative_eq!(percentiles.fcf_ttm_yoy_pct.unwrap(), 200.0 / 3.0);
        assert_relative_eq!(percentiles.fcf_margin_ttm_pct.unwrap(), 100.0);
    }

    #[test]
    fn test_rank_omits_metric_without_peer_values() {
        let subject = MetricDeriver::default()
            .latest("ACME", &crate::metrics::tests::sample_fundamentals())
            .unwrap();
        let mut partial = snapshot(4.0, 10.0, 20.0, 9.0);
        partial.fcf_ttm_yoy_pct = None;
        let set = ComparableSet::from_snapshots("ACME", [("BETA".to_string(), partial)]);

        let percentiles = PeerPercentiles::rank(&subject, &set);
        assert_eq!(percentiles.fcf_ttm_yoy_pct, None);
        assert_relative_eq!(percentiles.fcf_yield_pct.unwrap(), 100.0);

        let empty = PeerPercentiles::rank(&subject, &ComparableSet::new("ACME"));
        assert_eq!(empty, PeerPercentiles::default());
    }

    #[test]
    fn test_from_fundamentals_drops_short_history() {
        let records = crate::metrics::tests::sample_fundamentals();
        let set = ComparableSet::from_fundamentals(
            "ACME",
            &MetricDeriver::default(),
            [("BETA", &records[..]), ("GAMMA", &records[..2]), ("ACME", &records[..])],
        );
        assert_eq!(set.tickers().collect::<Vec<_>>(), vec!["BETA"]);
        assert!(set.get("beta").unwrap().fcf_margin_ttm_pct.is_some());
    }

    struct StubFetcher;

    impl PeerFetcher for StubFetcher {
        async fn fetch_peer(&self, ticker: &str) -> Result<PeerSnapshot> {
            match ticker {
                "SLOW" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(snapshot(1.0, 1.0, 1.0, 1.0))
                }
                "BROKEN" => Err(ScoreError::FetchFailed {
                    ticker: ticker.to_string(),
                    reason: "provider returned 500".to_string(),
                }),
                "ACME" => panic!("subject must not be fetched"),
                _ => Ok(snapshot(2.0, 2.0, 2.0, 2.0)),
            }
        }
    }

    #[tokio::test]
    async fn test_fetch_comparables_degrades_failed_peers() {
        let peers: Vec<String> = ["BETA", "SLOW", "BROKEN", "ACME", "GAMMA"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let set = fetch_comparables(&StubFetcher, "ACME", &peers, Duration::from_millis(50)).await;

        assert_eq!(set.tickers().collect::<Vec<_>>(), vec!["BETA", "GAMMA"]);
        assert_eq!(set.values(ComparableMetric::FcfYieldPct), vec![2.0, 2.0]);
    }
}

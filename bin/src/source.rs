//! Directory-backed data source.
//!
//! Layout, one pair of files per ticker:
//!
//! ```text
//! <dir>/<TICKER>.fundamentals.json   array of FundamentalsRecord
//! <dir>/<TICKER>.risk.json           one NewsRiskSignal
//! ```

use decision_core::{
    DataSource, FundamentalsRecord, MetricDeriver, NewsRiskSignal, PeerFetcher, PeerSnapshot,
    Result, ScoreError, ScoringInputs, fetch_comparables,
};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::process::Command;
use tracing::{debug, info};

/// Reads normalized records from a directory and refreshes them with a
/// shell command.
#[derive(Debug, Clone)]
pub(crate) struct DirectorySource {
    dir: PathBuf,
    peers: Vec<String>,
    peer_timeout: Duration,
    refresh_command: Option<String>,
    deriver: MetricDeriver,
}

impl DirectorySource {
    pub(crate) fn new(dir: impl Into<PathBuf>, peers: Vec<String>, peer_timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            peers,
            peer_timeout,
            refresh_command: None,
            deriver: MetricDeriver::default(),
        }
    }

    /// Shell command run on refresh, with `TICKER` set in its environment.
    pub(crate) fn with_refresh_command(mut self, command: Option<String>) -> Self {
        self.refresh_command = command;
        self
    }

    fn path(&self, ticker: &str, kind: &str) -> PathBuf {
        self.dir.join(format!("{}.{kind}.json", ticker.trim().to_ascii_uppercase()))
    }

    async fn read_fundamentals(&self, ticker: &str) -> Result<Vec<FundamentalsRecord>> {
        Ok(read_json(&self.path(ticker, "fundamentals")).await?.unwrap_or_default())
    }

    async fn read_risk(&self, ticker: &str) -> Result<Option<NewsRiskSignal>> {
        read_json(&self.path(ticker, "risk")).await
    }
}

/// Parse a JSON file; a missing file is `None` so freshness checks can
/// report it.
async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "Input file not found");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

impl PeerFetcher for DirectorySource {
    async fn fetch_peer(&self, ticker: &str) -> Result<PeerSnapshot> {
        let records = self.read_fundamentals(ticker).await?;
        let metrics = self.deriver.latest(ticker, &records)?;
        Ok(PeerSnapshot::from(&metrics))
    }
}

impl DataSource for DirectorySource {
    async fn load(&self, ticker: &str) -> Result<ScoringInputs> {
        let fundamentals = self.read_fundamentals(ticker).await?;
        let comparables = fetch_comparables(self, ticker, &self.peers, self.peer_timeout).await;
        let risk = self.read_risk(ticker).await?;
        Ok(ScoringInputs::new(ticker, fundamentals, comparables, risk))
    }

    async fn refresh(&self, ticker: &str) -> Result<()> {
        let Some(command) = &self.refresh_command else {
            debug!(ticker, "No refresh command, waiting for inputs to change");
            return Ok(());
        };

        info!(ticker, command = %command, "Running refresh command");
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .env("TICKER", ticker)
            .env("PEERS", self.peers.join(","))
            .status()
            .await?;
        if status.success() {
            Ok(())
        } else {
            Err(ScoreError::FetchFailed {
                ticker: ticker.to_string(),
                reason: format!("refresh command exited with {status}"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("decision-core-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn quarter_ends() -> [NaiveDate; 8] {
        [
            (2023, 3, 31),
            (2023, 6, 30),
            (2023, 9, 30),
            (2023, 12, 31),
            (2024, 3, 31),
            (2024, 6, 30),
            (2024, 9, 30),
            (2024, 12, 31),
        ]
        .map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    fn write_fundamentals(dir: &Path, ticker: &str, scale: f64) {
        let records: Vec<FundamentalsRecord> = quarter_ends()
            .into_iter()
            .enumerate()
            .map(|(i, period_end)| FundamentalsRecord {
                period_end,
                revenue: (10.0 + i as f64 * 0.5) * scale,
                operating_cash_flow: (2.0 + i as f64 * 0.1) * scale,
                capital_expenditure: -0.5 * scale,
                total_debt: 10.0 * scale,
                cash_and_equivalents: 4.0 * scale,
                market_cap: 150.0 * scale,
            })
            .collect();
        let path = dir.join(format!("{ticker}.fundamentals.json"));
        std::fs::write(path, serde_json::to_string(&records).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_load_reads_subject_and_peers() {
        let dir = scratch_dir("load");
        write_fundamentals(&dir, "ACME", 1e9);
        write_fundamentals(&dir, "BETA", 2e9);
        std::fs::write(
            dir.join("ACME.risk.json"),
            r#"{"ticker":"ACME","negative_news_7d":1,"shock_delta_7d":-0.8,"core_risk_hits_30d":3,"proxy_score_7d":54.0}"#,
        )
        .unwrap();

        let peers = vec!["BETA".to_string(), "MISSING".to_string(), "ACME".to_string()];
        let source = DirectorySource::new(&dir, peers, Duration::from_secs(5));
        let inputs = source.load("acme").await.unwrap();

        assert_eq!(inputs.fundamentals.len(), 8);
        assert_eq!(inputs.comparables.tickers().collect::<Vec<_>>(), vec!["BETA"]);
        assert_eq!(inputs.risk.unwrap().core_risk_hits_30d, 3);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_missing_files_load_empty() {
        let dir = scratch_dir("empty");
        let source = DirectorySource::new(&dir, Vec::new(), Duration::from_secs(5));
        let inputs = source.load("ACME").await.unwrap();

        assert!(inputs.fundamentals.is_empty());
        assert!(inputs.comparables.is_empty());
        assert!(inputs.risk.is_none());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_refresh_command_status() {
        let dir = scratch_dir("refresh");
        let source = DirectorySource::new(&dir, Vec::new(), Duration::from_secs(5));

        source.clone().refresh("ACME").await.unwrap();
        source
            .clone()
            .with_refresh_command(Some("test \"$TICKER\" = ACME".to_string()))
            .refresh("ACME")
            .await
            .unwrap();

        let err = source
            .with_refresh_command(Some("exit 3".to_string()))
            .refresh("ACME")
            .await
            .unwrap_err();
        assert!(matches!(err, ScoreError::FetchFailed { .. }));
        std::fs::remove_dir_all(dir).unwrap();
    }
}

//! CLI for the decision-core scoring engine.
//!
//! Reads normalized records from a data directory, scores a ticker against
//! its peers, and writes the auditable breakdown as JSON.

mod source;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use decision_core::{
    DataSource, FreshnessPolicy, RefreshConfig, RefreshOrchestrator, ScoreBreakdown, ScoringEngine,
    ScoringRules,
};
use source::DirectorySource;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "decision-core")]
#[command(about = "Deterministic fundamentals scoring with peer ranking", long_about = None)]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Score current inputs once, without refreshing
    Score(DataArgs),
    /// Refresh stale inputs with bounded retry, then score
    Run(RunArgs),
    /// Recompute a stored breakdown and check it matches
    Verify {
        /// Breakdown JSON file
        path: PathBuf,
    },
    /// Print the default scoring rules as JSON
    Rules,
}

#[derive(Args, Debug)]
struct DataArgs {
    /// Subject ticker
    #[arg(long, env = "TICKER")]
    ticker: String,

    /// Comma-separated peer tickers
    #[arg(long, env = "PEERS", value_delimiter = ',')]
    peers: Vec<String>,

    /// Directory holding <TICKER>.fundamentals.json and <TICKER>.risk.json
    #[arg(long, env = "DECISION_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// JSON file overriding the default scoring rules
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Write the breakdown here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Timeout for each peer fetch, in seconds
    #[arg(long, env = "DECISION_PEER_TIMEOUT_SEC", default_value_t = 10)]
    peer_timeout_sec: u64,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    data: DataArgs,

    /// Shell command that refreshes the data directory
    #[arg(long, env = "DECISION_REFRESH_CMD")]
    refresh_cmd: Option<String>,

    /// Attempts before giving up (0 = unbounded)
    #[arg(long, env = "DECISION_MAX_ATTEMPTS", default_value_t = 0)]
    max_attempts: u32,

    /// Seconds to wait between attempts
    #[arg(long, env = "DECISION_RETRY_SLEEP_SEC", default_value_t = 30)]
    retry_sleep_sec: u64,

    /// Oldest acceptable news signal in hours (0 disables the check)
    #[arg(long, env = "DECISION_MAX_NEWS_AGE_HOURS", default_value_t = 72)]
    max_news_age_hours: u64,

    /// Peers required before scoring
    #[arg(long, env = "DECISION_MIN_PEERS", default_value_t = 1)]
    min_peers: usize,
}

impl DataArgs {
    fn engine(&self) -> Result<ScoringEngine> {
        let rules = match &self.rules {
            Some(path) => ScoringRules::from_path(path)
                .with_context(|| format!("loading rules from {}", path.display()))?,
            None => ScoringRules::default(),
        };
        Ok(ScoringEngine::new(rules)?)
    }

    fn source(&self) -> DirectorySource {
        DirectorySource::new(
            &self.data_dir,
            self.peers.clone(),
            Duration::from_secs(self.peer_timeout_sec),
        )
    }

    fn write(&self, breakdown: &ScoreBreakdown) -> Result<()> {
        let json = breakdown.to_json()?;
        match &self.output {
            Some(path) => std::fs::write(path, json)
                .with_context(|| format!("writing breakdown to {}", path.display()))?,
            None => println!("{json}"),
        }
        Ok(())
    }
}

impl RunArgs {
    fn config(&self) -> RefreshConfig {
        RefreshConfig {
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_secs(self.retry_sleep_sec.max(1)),
            peer_fetch_timeout: Duration::from_secs(self.data.peer_timeout_sec),
            freshness: FreshnessPolicy {
                min_peers: self.min_peers,
                max_news_age_hours: self.max_news_age_hours,
                ..Default::default()
            },
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Score(args) => score(&args).await,
        Commands::Run(args) => run(&args).await,
        Commands::Verify { path } => verify(&path),
        Commands::Rules => {
            println!("{}", serde_json::to_string_pretty(&ScoringRules::default())?);
            Ok(())
        }
    }
}

async fn score(args: &DataArgs) -> Result<()> {
    let engine = args.engine()?;
    let inputs = args
        .source()
        .load(&args.ticker)
        .await
        .with_context(|| format!("loading inputs for {}", args.ticker))?;
    let breakdown = engine
        .score(&inputs)
        .with_context(|| format!("scoring {}", args.ticker))?;
    args.write(&breakdown)
}

async fn run(args: &RunArgs) -> Result<()> {
    let engine = args.data.engine()?;
    let config = args.config();
    let source = DirectorySource::new(
        &args.data.data_dir,
        args.data.peers.clone(),
        config.peer_fetch_timeout,
    )
    .with_refresh_command(args.refresh_cmd.clone());

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping before the next retry");
            cancel_tx.send_replace(true);
        }
    });

    let orchestrator = RefreshOrchestrator::new(source, engine, config).with_cancellation(cancel_rx);
    let outcome = orchestrator
        .run(&args.data.ticker)
        .await
        .with_context(|| format!("refreshing and scoring {}", args.data.ticker))?;

    info!(
        ticker = %outcome.breakdown.ticker,
        attempts = outcome.attempts,
        refreshed = outcome.refreshed,
        completed_at = %outcome.completed_at.to_rfc3339(),
        "Inputs ready"
    );
    args.data.write(&outcome.breakdown)
}

fn verify(path: &Path) -> Result<()> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading breakdown from {}", path.display()))?;
    let breakdown = ScoreBreakdown::from_json(&json)?;
    breakdown
        .verify()
        .with_context(|| format!("verifying {}", path.display()))?;
    println!(
        "OK {} {} total={} rating={}",
        breakdown.ticker, breakdown.period_end, breakdown.total, breakdown.rating
    );
    for flag in &breakdown.red_flags {
        println!("  red flag: {flag}");
    }
    Ok(())
}

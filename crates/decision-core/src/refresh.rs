//! Bounded-retry refresh around the scoring pipeline.
//!
//! Each attempt loads the current inputs and scores them if they pass the
//! [`FreshnessPolicy`]. Otherwise the upstream refresh step is triggered,
//! the inputs are reloaded, and scoring is retried. Failed attempts are
//! separated by a fixed delay until `max_attempts` is reached (`0` retries
//! indefinitely). A stale score is never returned as fresh.

use crate::{
    Result, ScoreError, breakdown::ScoreBreakdown, engine::ScoringEngine, types::ScoringInputs,
};
use chrono::{DateTime, Utc};
use derive_more::Display;
use std::{future::Future, time::Duration};
use tokio::sync::watch;
use tracing::{info, warn};

/// When inputs are complete enough to score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    /// Fundamentals periods the subject must have.
    pub min_periods: usize,
    /// Comparables the subject must have.
    pub min_peers: usize,
    /// Oldest acceptable news risk signal; `0` disables the age check.
    pub max_news_age_hours: u64,
    /// Whether a missing news risk signal makes inputs stale.
    pub require_risk_signal: bool,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            min_periods: crate::metrics::TTM_WINDOW,
            min_peers: 1,
            max_news_age_hours: 72,
            require_risk_signal: true,
        }
    }
}

impl FreshnessPolicy {
    /// Check `inputs` as of `now`, reporting every failed condition.
    pub fn check(&self, inputs: &ScoringInputs, now: DateTime<Utc>) -> Result<()> {
        let mut reasons = Vec::new();

        if inputs.fundamentals.len() < self.min_periods {
            reasons.push(format!(
                "{} fundamentals periods, need {}",
                inputs.fundamentals.len(),
                self.min_periods
            ));
        }
        if inputs.comparables.len() < self.min_peers {
            reasons.push(format!(
                "{} comparables, need {}",
                inputs.comparables.len(),
                self.min_peers
            ));
        }
        match &inputs.risk {
            None if self.require_risk_signal => reasons.push("no news risk signal".to_string()),
            None => {}
            Some(risk) if self.max_news_age_hours > 0 => match risk.as_of {
                None => reasons.push("news risk signal has no timestamp".to_string()),
                Some(as_of) => {
                    let age_hours = (now - as_of).num_minutes().max(0) as f64 / 60.0;
                    if age_hours > self.max_news_age_hours as f64 {
                        reasons.push(format!(
                            "newest news is {age_hours:.1}h old, limit {}h",
                            self.max_news_age_hours
                        ));
                    }
                }
            },
            Some(_) => {}
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ScoreError::StaleInputs {
                ticker: inputs.ticker.trim().to_ascii_uppercase(),
                reasons,
            })
        }
    }
}

/// Configuration for [`RefreshOrchestrator`].
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Attempts before giving up; `0` means unbounded.
    pub max_attempts: u32,
    /// Pause between failed attempts.
    pub retry_delay: Duration,
    /// Timeout for each individual peer fetch.
    pub peer_fetch_timeout: Duration,
    /// When loaded inputs are ready to score.
    pub freshness: FreshnessPolicy,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            retry_delay: Duration::from_secs(30),
            peer_fetch_timeout: Duration::from_secs(10),
            freshness: FreshnessPolicy::default(),
        }
    }
}

impl RefreshConfig {
    /// Whether `attempts` has reached the cap.
    pub const fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts > 0 && attempts >= self.max_attempts
    }
}

/// Orchestrator state, tagged with the attempt it refers to.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    /// Not started
    #[display("idle")]
    Idle,
    /// Loading, refreshing, or scoring
    #[display("fetching (attempt {_0})")]
    Fetching(u32),
    /// Waiting out the retry delay
    #[display("retrying after attempt {_0}")]
    Retrying(u32),
    /// Scored fresh inputs
    #[display("success on attempt {_0}")]
    Success(u32),
    /// Gave up
    #[display("exhausted after {_0} attempts")]
    Exhausted(u32),
}

/// Where the orchestrator gets inputs and how it asks for new ones.
pub trait DataSource: Send + Sync {
    /// Load the current inputs for `ticker`.
    fn load(&self, ticker: &str) -> impl Future<Output = Result<ScoringInputs>> + Send;

    /// Run the upstream refresh step for `ticker`.
    fn refresh(&self, ticker: &str) -> impl Future<Output = Result<()>> + Send;
}

/// A successful orchestrated run.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    /// Score computed from fresh inputs
    pub breakdown: ScoreBreakdown,
    /// Attempts used, including the successful one
    pub attempts: u32,
    /// Whether any refresh was triggered
    pub refreshed: bool,
    /// When scoring completed
    pub completed_at: DateTime<Utc>,
}

/// Runs the scoring pipeline, refreshing stale inputs with bounded retry.
#[derive(Debug)]
pub struct RefreshOrchestrator<S> {
    source: S,
    engine: ScoringEngine,
    config: RefreshConfig,
    state: watch::Sender<RefreshState>,
    cancel: Option<watch::Receiver<bool>>,
}

impl<S: DataSource> RefreshOrchestrator<S> {
    /// Create an orchestrator over `source`.
    pub fn new(source: S, engine: ScoringEngine, config: RefreshConfig) -> Self {
        Self {
            source,
            engine,
            config,
            state: watch::Sender::new(RefreshState::Idle),
            cancel: None,
        }
    }

    /// Stop retrying once `cancel` holds `true`.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Current state.
    pub fn state(&self) -> RefreshState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<RefreshState> {
        self.state.subscribe()
    }

    /// The wrapped data source.
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// Score `ticker`, refreshing and retrying until inputs are fresh.
    ///
    /// Errors that a refresh cannot fix (duplicate periods, invalid rules)
    /// are returned unchanged after the attempt that hit them. Running out
    /// of attempts returns [`ScoreError::RefreshExhausted`] carrying the
    /// last failure.
    pub async fn run(&self, ticker: &str) -> Result<RefreshOutcome> {
        let ticker = ticker.trim().to_ascii_uppercase();
        let mut cancel = self.cancel.clone();
        let mut refreshed = false;
        let mut attempts = 0;

        info!(
            ticker = %ticker,
            max_attempts = self.config.max_attempts,
            retry_delay = ?self.config.retry_delay,
            "Starting refresh loop"
        );

        loop {
            attempts += 1;
            self.transition(RefreshState::Fetching(attempts));

            let failure = match self.attempt(&ticker, attempts, &mut refreshed).await {
                Ok(breakdown) => {
                    self.transition(RefreshState::Success(attempts));
                    return Ok(RefreshOutcome {
                        breakdown,
                        attempts,
                        refreshed,
                        completed_at: Utc::now(),
                    });
                }
                Err(err) if !err.is_retryable() => {
                    warn!(ticker = %ticker, attempt = attempts, error = %err, "Attempt failed, not retryable");
                    return Err(err);
                }
                Err(err) => err,
            };
            warn!(ticker = %ticker, attempt = attempts, error = %failure, "Attempt failed");

            if self.config.is_exhausted(attempts) {
                self.transition(RefreshState::Exhausted(attempts));
                return Err(ScoreError::RefreshExhausted {
                    ticker,
                    attempts,
                    reason: failure.to_string(),
                });
            }

            self.transition(RefreshState::Retrying(attempts));
            self.pause(&ticker, attempts, cancel.as_mut()).await?;
        }
    }

    async fn attempt(&self, ticker: &str, attempt: u32, refreshed: &mut bool) -> Result<ScoreBreakdown> {
        match self.load_fresh(ticker).await {
            Ok(inputs) => return self.engine.score(&inputs),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => info!(ticker, attempt, reason = %err, "Inputs not ready, refreshing"),
        }

        *refreshed = true;
        self.source.refresh(ticker).await?;
        let inputs = self.load_fresh(ticker).await?;
        self.engine.score(&inputs)
    }

    async fn load_fresh(&self, ticker: &str) -> Result<ScoringInputs> {
        let inputs = self.source.load(ticker).await?;
        self.config.freshness.check(&inputs, Utc::now())?;
        Ok(inputs)
    }

    async fn pause(
        &self,
        ticker: &str,
        attempts: u32,
        cancel: Option<&mut watch::Receiver<bool>>,
    ) -> Result<()> {
        let cancelled = || ScoreError::Cancelled {
            ticker: ticker.to_string(),
            attempts,
        };
        let Some(cancel) = cancel else {
            tokio::time::sleep(self.config.retry_delay).await;
            return Ok(());
        };
        if *cancel.borrow_and_update() {
            return Err(cancelled());
        }

        let sleep = tokio::time::sleep(self.config.retry_delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return Ok(()),
                changed = cancel.changed() => match changed {
                    Ok(()) if *cancel.borrow_and_update() => {
                        info!(ticker, attempts, "Refresh cancelled");
                        return Err(cancelled());
                    }
                    Ok(()) => {}
                    Err(_) => {
                        // Sender dropped; nothing can cancel any more.
                        (&mut sleep).await;
                        return Ok(());
                    }
                },
            }
        }
    }

    fn transition(&self, state: RefreshState) {
        info!(%state, "Refresh state");
        self.state.send_replace(state);
    }
}

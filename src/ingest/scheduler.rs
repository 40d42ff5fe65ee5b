// src/ingest/scheduler.rs
//! Tiered re-fetch scheduler.
//!
//! One clock loop polls at a fixed granularity. A tier is due once its
//! interval has elapsed since its last *start*; the first tier is due
//! immediately, the others one interval after startup. Runs are single-flight
//! per tier: while a tier's previous run is still executing, a due firing is
//! suppressed and the tier fires on the first poll after that run completes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::ingest::ensure_metrics_described;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleTier {
    pub name: String,
    pub tickers: Vec<String>,
    pub interval: Duration,
}

impl ScheduleTier {
    pub fn new(name: impl Into<String>, tickers: Vec<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            tickers,
            interval: interval.max(Duration::from_secs(1)),
        }
    }
}

/// Work executed for one tier firing. Errors are logged by the scheduler and
/// never stop the loop.
#[async_trait]
pub trait TierJob: Send + Sync + 'static {
    async fn run_tier(&self, tier: &ScheduleTier) -> anyhow::Result<()>;
}

struct TierState {
    next_due: Instant,
    handle: Option<JoinHandle<()>>,
}

pub struct PriorityScheduler {
    tiers: Vec<ScheduleTier>,
    poll: Duration,
    job: Arc<dyn TierJob>,
}

impl PriorityScheduler {
    /// `tiers` in priority order.
    pub fn new(tiers: Vec<ScheduleTier>, poll: Duration, job: Arc<dyn TierJob>) -> Self {
        ensure_metrics_described();
        Self {
            tiers,
            poll: poll.max(Duration::from_millis(1)),
            job,
        }
    }

    pub fn from_config(cfg: &SchedulerConfig, job: Arc<dyn TierJob>) -> Self {
        let tiers = cfg
            .tiers
            .iter()
            .map(|t| {
                ScheduleTier::new(
                    t.name.clone(),
                    t.tickers.clone(),
                    Duration::from_secs(t.interval_secs),
                )
            })
            .collect();
        Self::new(tiers, Duration::from_secs(cfg.poll_secs), job)
    }

    pub fn tiers(&self) -> &[ScheduleTier] {
        &self.tiers
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Run until `shutdown` is cancelled, then wait for in-flight tier runs.
    pub async fn run(self, shutdown: CancellationToken) {
        let start = Instant::now();
        let mut states: Vec<TierState> = self
            .tiers
            .iter()
            .enumerate()
            .map(|(i, t)| TierState {
                next_due: if i == 0 { start } else { start + t.interval },
                handle: None,
            })
            .collect();

        info!(target: "ingest", tiers = self.tiers.len(), poll_ms = self.poll.as_millis() as u64, "scheduler started");

        let mut clock = tokio::time::interval(self.poll);
        clock.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = clock.tick() => {}
            }
            let now = Instant::now();

            for (tier, st) in self.tiers.iter().zip(states.iter_mut()) {
                if now < st.next_due {
                    continue;
                }
                if st.handle.as_ref().is_some_and(|h| !h.is_finished()) {
                    counter!("ingest_tier_suppressed_total", "tier" => tier.name.clone()).increment(1);
                    debug!(target: "ingest", tier = %tier.name, "previous run still in flight; firing suppressed");
                    continue;
                }
                if let Some(done) = st.handle.take() {
                    reap(&tier.name, done).await;
                }

                st.next_due = now + tier.interval;
                st.handle = Some(self.fire(tier));
            }
        }

        info!(target: "ingest", "scheduler stopping; waiting for in-flight tiers");
        for (tier, st) in self.tiers.iter().zip(states.iter_mut()) {
            if let Some(h) = st.handle.take() {
                reap(&tier.name, h).await;
            }
        }
        info!(target: "ingest", "scheduler stopped");
    }

    fn fire(&self, tier: &ScheduleTier) -> JoinHandle<()> {
        counter!("ingest_tier_runs_total", "tier" => tier.name.clone()).increment(1);
        gauge!("ingest_tier_last_run_ts", "tier" => tier.name.clone())
            .set(chrono::Utc::now().timestamp() as f64);
        info!(target: "ingest", tier = %tier.name, tickers = tier.tickers.len(), "tier run started");

        let job = Arc::clone(&self.job);
        let tier = tier.clone();
        tokio::spawn(async move {
            match job.run_tier(&tier).await {
                Ok(()) => debug!(target: "ingest", tier = %tier.name, "tier run finished"),
                Err(e) => warn!(target: "ingest", tier = %tier.name, error = ?e, "tier run failed"),
            }
        })
    }
}

async fn reap(tier: &str, handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        error!(target: "ingest", tier, error = ?e, "tier task panicked");
    }
}

// tests/ingest_scheduler.rs
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use market_news_ingest::config::parse_config;
use market_news_ingest::ingest::{PriorityScheduler, ScheduleTier, TierJob};

/// Each run takes longer than the tier interval.
#[derive(Default)]
struct SlowJob {
    started: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    finished: AtomicU32,
}

#[async_trait]
impl TierJob for SlowJob {
    async fn run_tier(&self, _tier: &ScheduleTier) -> anyhow::Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(900)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn overlapping_firings_are_suppressed() {
    let job = Arc::new(SlowJob::default());
    let sched = PriorityScheduler::new(
        vec![ScheduleTier::new(
            "high",
            vec!["AAPL".into()],
            Duration::from_secs(600),
        )],
        Duration::from_secs(60),
        job.clone(),
    );
    let token = CancellationToken::new();
    let handle = sched.spawn(token.clone());

    tokio::time::sleep(Duration::from_secs(1850)).await;
    token.cancel();
    handle.await.expect("scheduler task");

    let started = job.started.load(Ordering::SeqCst);
    assert_eq!(job.max_in_flight.load(Ordering::SeqCst), 1);
    // Unthrottled it would have started at 0, 600, 1200 and 1800.
    assert!((2..=3).contains(&started), "started {started} runs");
    // Shutdown waits for the in-flight run.
    assert_eq!(job.in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn awaiting_the_handle_drains_an_in_flight_run() {
    let job = Arc::new(SlowJob::default());
    let sched = PriorityScheduler::new(
        vec![ScheduleTier::new("high", vec![], Duration::from_secs(3_600))],
        Duration::from_secs(60),
        job.clone(),
    );
    let token = CancellationToken::new();
    let handle = sched.spawn(token.clone());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(job.in_flight.load(Ordering::SeqCst), 1);

    let cancelled_at = tokio::time::Instant::now();
    token.cancel();
    handle.await.expect("scheduler task");

    assert_eq!(job.finished.load(Ordering::SeqCst), 1);
    assert_eq!(job.in_flight.load(Ordering::SeqCst), 0);
    assert!(cancelled_at.elapsed() >= Duration::from_secs(870));
}

struct Failing;

#[async_trait]
impl TierJob for Failing {
    async fn run_tier(&self, tier: &ScheduleTier) -> anyhow::Result<()> {
        anyhow::bail!("tier {} exploded", tier.name)
    }
}

#[tokio::test(start_paused = true)]
async fn job_errors_do_not_stop_the_loop() {
    let sched = PriorityScheduler::new(
        vec![ScheduleTier::new("only", vec![], Duration::from_secs(60))],
        Duration::from_secs(10),
        Arc::new(Failing),
    );
    let token = CancellationToken::new();
    let handle = sched.spawn(token.clone());

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(!handle.is_finished());
    token.cancel();
    handle.await.expect("scheduler task");
}

#[test]
fn tiers_come_from_config() {
    let cfg = parse_config(
        r#"
[scheduler]
poll_secs = 30

[[scheduler.tiers]]
name = "fast"
tickers = ["aapl", "MSFT"]
interval_secs = 300

[[scheduler.tiers]]
name = "slow"
tickers = ["ko"]
interval_secs = 3600
"#,
    )
    .expect("parse");

    let sched = PriorityScheduler::from_config(&cfg.scheduler, Arc::new(Failing));
    let tiers = sched.tiers();
    assert_eq!(tiers.len(), 2);
    assert_eq!(tiers[0].name, "fast");
    assert_eq!(tiers[0].tickers, vec!["AAPL".to_string(), "MSFT".to_string()]);
    assert_eq!(tiers[0].interval, Duration::from_secs(300));
    assert_eq!(tiers[1].tickers, vec!["KO".to_string()]);
}

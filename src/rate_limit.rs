//! # Rate Limiter
//! Per-source sliding-window call budget (calls per minute + calls per day).
//!
//! Each adapter owns one limiter. Call timestamps are kept in two time-ordered
//! queues that are pruned on every check. The mutex is only held inside the
//! synchronous methods, never across an await point, so a limiter can be
//! shared between concurrent adapter tasks.
//!
//! Only the minute window is waited out. A spent daily budget is refused
//! with `RateExceeded`.
//!
//! Calls are recorded by the caller *after* a successful fetch; nothing is
//! pre-recorded, so cancelling a wait never leaves a phantom entry behind.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;
use crate::ingest::types::AdapterKind;

pub const MINUTE: Duration = Duration::from_secs(60);
pub const DAY: Duration = Duration::from_secs(86_400);

/// Budgets for one source. Zero budgets are raised to 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub calls_per_minute: u32,
    pub calls_per_day: u32,
}

impl RateLimits {
    pub fn new(calls_per_minute: u32, calls_per_day: u32) -> Self {
        Self {
            calls_per_minute: calls_per_minute.max(1),
            calls_per_day: calls_per_day.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateStats {
    pub calls_last_minute: u32,
    pub calls_last_day: u32,
    pub minute_limit: u32,
    pub day_limit: u32,
    pub minute_remaining: u32,
    pub day_remaining: u32,
}

#[derive(Debug)]
struct Windows {
    minute: VecDeque<Instant>,
    day: VecDeque<Instant>,
}

impl Windows {
    fn prune(&mut self, now: Instant) {
        prune_queue(&mut self.minute, now, MINUTE);
        prune_queue(&mut self.day, now, DAY);
    }
}

/// Entries whose age has reached the window length are dropped.
fn prune_queue(q: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = q.front() {
        if now.saturating_duration_since(front) >= window {
            q.pop_front();
        } else {
            break;
        }
    }
}

/// Time until the oldest entry of a full queue leaves its window.
fn wait_for(q: &VecDeque<Instant>, limit: u32, now: Instant, window: Duration) -> Option<Duration> {
    if (q.len() as u64) < u64::from(limit) {
        return None;
    }
    q.front()
        .map(|&oldest| window.saturating_sub(now.saturating_duration_since(oldest)))
}

#[derive(Debug)]
pub struct RateLimiter {
    limits: RateLimits,
    inner: Mutex<Windows>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        let limits = RateLimits::new(limits.calls_per_minute, limits.calls_per_day);
        Self {
            limits,
            inner: Mutex::new(Windows {
                minute: VecDeque::with_capacity(limits.calls_per_minute as usize),
                day: VecDeque::with_capacity((limits.calls_per_day as usize).min(4096)),
            }),
        }
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }

    pub fn can_make_call(&self) -> bool {
        self.can_make_call_at(Instant::now())
    }

    pub fn can_make_call_at(&self, now: Instant) -> bool {
        self.wait_time_at(now).is_none()
    }

    /// `None` when a slot is free; otherwise how long until the binding
    /// window(s) release one.
    pub fn wait_time_at(&self, now: Instant) -> Option<Duration> {
        let mut w = self.inner.lock().expect("rate limiter mutex poisoned");
        w.prune(now);
        let minute = wait_for(&w.minute, self.limits.calls_per_minute, now, MINUTE);
        let day = wait_for(&w.day, self.limits.calls_per_day, now, DAY);
        match (minute, day) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or_default().max(b.unwrap_or_default())),
        }
    }

    pub fn record_call(&self) {
        self.record_call_at(Instant::now());
    }

    pub fn record_call_at(&self, now: Instant) {
        let mut w = self.inner.lock().expect("rate limiter mutex poisoned");
        w.prune(now);
        w.minute.push_back(now);
        w.day.push_back(now);
    }

    /// True when the daily budget is spent, whatever the minute window says.
    pub fn day_exhausted_at(&self, now: Instant) -> bool {
        let mut w = self.inner.lock().expect("rate limiter mutex poisoned");
        w.prune(now);
        (w.day.len() as u64) >= u64::from(self.limits.calls_per_day)
    }

    /// Suspend until the minute window frees a slot. Re-checks after every
    /// sleep because a concurrent caller may have taken the slot in the
    /// meantime. A spent daily budget is refused at once with `RateExceeded`
    /// so the caller can move on to the next source.
    pub async fn wait_if_needed(
        &self,
        adapter: AdapterKind,
        shutdown: &CancellationToken,
    ) -> Result<(), SourceError> {
        loop {
            if shutdown.is_cancelled() {
                return Err(SourceError::Cancelled);
            }
            let now = Instant::now();
            if self.day_exhausted_at(now) {
                tracing::warn!(
                    target: "ingest",
                    adapter = %adapter,
                    day_limit = self.limits.calls_per_day,
                    "daily call budget spent"
                );
                return Err(SourceError::RateExceeded { adapter });
            }
            let Some(wait) = self.wait_time_at(now) else {
                return Ok(());
            };
            // Zero can only happen on the boundary tick; nudge past it.
            let wait = wait.max(Duration::from_millis(1));
            tracing::warn!(
                target: "ingest",
                adapter = %adapter,
                wait_ms = wait.as_millis() as u64,
                "rate limit reached, waiting"
            );
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.cancelled() => return Err(SourceError::Cancelled),
            }
        }
    }

    pub fn stats(&self) -> RateStats {
        self.stats_at(Instant::now())
    }

    pub fn stats_at(&self, now: Instant) -> RateStats {
        let mut w = self.inner.lock().expect("rate limiter mutex poisoned");
        w.prune(now);
        let m = w.minute.len() as u32;
        let d = w.day.len() as u32;
        RateStats {
            calls_last_minute: m,
            calls_last_day: d,
            minute_limit: self.limits.calls_per_minute,
            day_limit: self.limits.calls_per_day,
            minute_remaining: self.limits.calls_per_minute.saturating_sub(m),
            day_remaining: self.limits.calls_per_day.saturating_sub(d),
        }
    }
}

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::GhError;
use crate::metrics;
use crate::model::{parse_rate_limit, parse_retry_after};

#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Local token bucket capacity in requests per minute; 0 disables.
    pub max_per_minute: u32,
    /// Fraction of the hourly budget held back (refuse once
    /// `remaining <= limit * (1 - reserve)`).
    pub reserve_fraction: f64,
    /// Hourly budget estimate used until the server reports one.
    pub max_hourly: u32,
    /// Consecutive probe failures tolerated before degrading to local-only.
    pub probe_retries: u32,
    /// Outstanding job count above which the queue margin applies.
    pub queue_slack: usize,
    /// Widening added to the inter-request interval under queue pressure.
    pub queue_margin: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_per_minute: 0,
            reserve_fraction: 0.7,
            max_hourly: 5000,
            probe_retries: 3,
            queue_slack: 4,
            queue_margin: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetSource {
    Server,
    Local,
    Estimated,
}

/// Point-in-time view of the governor's budget for operators.
#[derive(Debug, Clone)]
pub struct BudgetSnapshot {
    pub limit: i64,
    pub used: i64,
    pub remaining: i64,
    pub reserve: f64,
    pub reset_at: Option<DateTime<Utc>>,
    pub source: BudgetSource,
}

struct LocalBucket {
    next_allowed: Option<Instant>,
}

struct ServerBudget {
    limit: i64,
    remaining: i64,
    used: i64,
    reset_at: Option<DateTime<Utc>>,
    retry_after: Option<Instant>,
    seen_server: bool,
    probe_failures: u32,
    degraded: bool,
}

/// Gates every remote call behind two stacked limiters: a local
/// requests-per-minute bucket and the server-reported hourly budget with a
/// reserve held back. Callers serialize on acquisition; a cancel token
/// unblocks sleepers.
pub struct RateGovernor {
    config: GovernorConfig,
    local: tokio::sync::Mutex<LocalBucket>,
    server: StdMutex<ServerBudget>,
    outstanding: AtomicUsize,
}

impl RateGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        let initial = config.max_hourly.max(1) as i64;
        Self {
            config,
            local: tokio::sync::Mutex::new(LocalBucket { next_allowed: None }),
            server: StdMutex::new(ServerBudget {
                limit: initial,
                remaining: initial,
                used: 0,
                reset_at: None,
                retry_after: None,
                seen_server: false,
                probe_failures: 0,
                degraded: false,
            }),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Blocks until one request may proceed, or the token is cancelled.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), GhError> {
        let mut bucket = self.local.lock().await;

        // An explicit Retry-After deadline always wins.
        loop {
            let gate = {
                let mut server = self.server.lock().unwrap();
                match server.retry_after {
                    Some(at) if at > Instant::now() => Some(at),
                    Some(_) => {
                        server.retry_after = None;
                        None
                    }
                    None => None,
                }
            };
            match gate {
                Some(at) => {
                    metrics::SLEEP_SECONDS
                        .with_label_values(&["retry_after"])
                        .inc_by(at.saturating_duration_since(Instant::now()).as_secs());
                    sleep_until_cancellable(at, cancel).await?;
                }
                None => break,
            }
        }

        // Local minute bucket.
        if self.config.max_per_minute > 0 {
            let mut interval = Duration::from_secs_f64(60.0 / self.config.max_per_minute as f64);
            if self.outstanding.load(Ordering::Relaxed) > self.config.queue_slack {
                interval += self.config.queue_margin;
            }
            let now = Instant::now();
            let ready_at = bucket.next_allowed.unwrap_or(now);
            if ready_at > now {
                sleep_until_cancellable(ready_at, cancel).await?;
            }
            bucket.next_allowed = Some(ready_at.max(now) + interval);
        }

        // Hourly server budget with the reserve held back.
        loop {
            let hold = {
                let server = self.server.lock().unwrap();
                if server.seen_server && !server.degraded {
                    let threshold =
                        (server.limit as f64 * (1.0 - self.config.reserve_fraction)).floor() as i64;
                    if server.remaining <= threshold {
                        server
                            .reset_at
                            .and_then(|reset| (reset - Utc::now()).to_std().ok())
                            .filter(|wait| !wait.is_zero())
                    } else {
                        None
                    }
                } else {
                    None
                }
            };
            match hold {
                Some(wait) => {
                    debug!(wait_secs = wait.as_secs(), "hourly budget exhausted; waiting for reset");
                    metrics::SLEEP_SECONDS
                        .with_label_values(&["budget_reset"])
                        .inc_by(wait.as_secs());
                    sleep_cancellable(wait + Duration::from_secs(1), cancel).await?;
                    let mut server = self.server.lock().unwrap();
                    server.remaining = server.limit;
                    server.reset_at = None;
                }
                None => break,
            }
        }

        let mut server = self.server.lock().unwrap();
        server.used += 1;
        if server.seen_server && server.remaining > 0 {
            server.remaining -= 1;
        }
        Ok(())
    }

    /// Feeds server-reported limits back from a response.
    pub fn note_response(&self, status: u16, headers: &[(String, String)]) {
        let mut server = self.server.lock().unwrap();
        if let Some(update) = parse_rate_limit(headers) {
            if let Some(limit) = update.limit {
                server.limit = limit;
            }
            server.remaining = update.remaining;
            server.reset_at = Some(update.reset);
            server.seen_server = true;
            server.degraded = false;
            server.probe_failures = 0;
            metrics::RATE_LIMIT.set(server.limit);
            metrics::RATE_REMAINING.set(server.remaining);
        }
        if status == 403 || status == 429 {
            if let Some(advice) = parse_retry_after(headers) {
                server.retry_after =
                    Some(Instant::now() + advice.wait + Duration::from_secs(1));
            }
        }
    }

    /// Applies a budget read from the dedicated rate endpoint.
    pub fn apply_budget(&self, limit: i64, remaining: i64, reset_at: DateTime<Utc>) {
        let mut server = self.server.lock().unwrap();
        server.limit = limit.max(1);
        server.remaining = remaining.max(0);
        server.reset_at = Some(reset_at);
        server.seen_server = true;
        server.degraded = false;
        server.probe_failures = 0;
        metrics::RATE_LIMIT.set(server.limit);
        metrics::RATE_REMAINING.set(server.remaining);
    }

    pub fn record_probe_failure(&self) {
        let mut server = self.server.lock().unwrap();
        server.probe_failures += 1;
        if server.probe_failures >= self.config.probe_retries && !server.degraded {
            warn!(
                failures = server.probe_failures,
                "rate endpoint unreachable; falling back to local throttling"
            );
            server.degraded = true;
        }
    }

    pub fn record_probe_success(&self) {
        let mut server = self.server.lock().unwrap();
        server.probe_failures = 0;
        server.degraded = false;
    }

    /// Reports the work pool's outstanding count for queue-margin widening.
    pub fn note_outstanding(&self, outstanding: usize) {
        self.outstanding.store(outstanding, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let server = self.server.lock().unwrap();
        let source = if server.degraded {
            BudgetSource::Local
        } else if server.seen_server {
            BudgetSource::Server
        } else {
            BudgetSource::Estimated
        };
        let remaining = if server.seen_server {
            server.remaining
        } else {
            (server.limit - server.used).max(0)
        };
        BudgetSnapshot {
            limit: server.limit,
            used: server.used,
            remaining,
            reserve: self.config.reserve_fraction,
            reset_at: server.reset_at,
            source,
        }
    }
}

async fn sleep_cancellable(wait: Duration, cancel: &CancellationToken) -> Result<(), GhError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(GhError::Cancelled),
        _ = sleep(wait) => Ok(()),
    }
}

async fn sleep_until_cancellable(at: Instant, cancel: &CancellationToken) -> Result<(), GhError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(GhError::Cancelled),
        _ = sleep_until(at) => Ok(()),
    }
}

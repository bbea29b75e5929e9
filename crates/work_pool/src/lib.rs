use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEFAULT_COMPLETED_CAPACITY: usize = 64;
const DEFAULT_SMOOTHING: f64 = 0.2;
const BACKLOG_COOLDOWN: Duration = Duration::from_secs(30);

/// Lifecycle state of a scheduled request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Metadata describing a scheduled request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub id: u64,
    pub label: String,
    pub state: RequestState,
    pub enqueued_at: Instant,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub duration: Option<Duration>,
    pub error: Option<String>,
}

/// Point-in-time view of the scheduler queues and aggregate statistics.
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub session_start: Instant,
    pub pending: Vec<RequestInfo>,
    pub running: Vec<RequestInfo>,
    pub completed: Vec<RequestInfo>,
    pub total_completed: usize,
    pub total_failed: usize,
    pub average_latency_ms: Option<f64>,
    pub clearance: Option<Duration>,
}

type Job = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;
type BacklogCallback = Arc<dyn Fn(usize, Duration) + Send + Sync>;
type PressureProbe = Arc<dyn Fn(usize) + Send + Sync>;

struct Scheduled {
    info: Arc<Mutex<RequestInfo>>,
    job: Job,
    done: oneshot::Sender<RequestState>,
}

/// Handle returned by [`WorkPool::submit`]; resolves when the job reaches a
/// terminal state.
pub struct JobHandle {
    rx: oneshot::Receiver<RequestState>,
}

impl JobHandle {
    pub async fn wait(self) -> RequestState {
        self.rx.await.unwrap_or(RequestState::Cancelled)
    }
}

struct Stats {
    pending: VecDeque<Arc<Mutex<RequestInfo>>>,
    running: Vec<Arc<Mutex<RequestInfo>>>,
    completed: VecDeque<Arc<Mutex<RequestInfo>>>,
    total_completed: usize,
    total_failed: usize,
    total_latency: Duration,
    latency_samples: usize,
    ema_rpm: f64,
    smoothing: f64,
    last_execution: Option<Instant>,
    backlog_job_threshold: usize,
    backlog_time_threshold: Duration,
    backlog_callback: Option<BacklogCallback>,
    last_backlog_alert: Option<Instant>,
    pressure_probe: Option<PressureProbe>,
}

impl Stats {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            running: Vec::new(),
            completed: VecDeque::new(),
            total_completed: 0,
            total_failed: 0,
            total_latency: Duration::ZERO,
            latency_samples: 0,
            ema_rpm: 0.0,
            smoothing: DEFAULT_SMOOTHING,
            last_execution: None,
            backlog_job_threshold: 0,
            backlog_time_threshold: Duration::ZERO,
            backlog_callback: None,
            last_backlog_alert: None,
            pressure_probe: None,
        }
    }

    fn outstanding(&self) -> usize {
        self.pending.len() + self.running.len()
    }

    fn record_execution(&mut self, now: Instant) {
        if let Some(last) = self.last_execution {
            let delta = now.saturating_duration_since(last).as_secs_f64();
            if delta > 0.0 {
                let sample = 60.0 / delta;
                self.ema_rpm = if self.ema_rpm > 0.0 {
                    self.smoothing * sample + (1.0 - self.smoothing) * self.ema_rpm
                } else {
                    sample
                };
            }
        }
        self.last_execution = Some(now);
    }

    fn clearance_for(&self, outstanding: usize) -> Option<Duration> {
        if self.ema_rpm > 0.0 {
            Some(Duration::from_secs_f64(
                (outstanding as f64 / self.ema_rpm * 60.0).ceil(),
            ))
        } else {
            None
        }
    }
}

/// Fixed-size async worker set executing named polling jobs from a FIFO
/// queue. Tracks pending/running/completed requests for display snapshots and
/// keeps a smoothed requests-per-minute estimate for backlog projections.
pub struct WorkPool {
    workers: usize,
    tx: mpsc::UnboundedSender<Scheduled>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Scheduled>>>,
    stats: Arc<Mutex<Stats>>,
    next_id: AtomicU64,
    session_start: Instant,
    completed_capacity: usize,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkPool {
    /// `workers == 0` derives the worker count from host parallelism.
    pub fn new(workers: usize) -> Self {
        let workers = if workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            workers
        };
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            workers,
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            stats: Arc::new(Mutex::new(Stats::new())),
            next_id: AtomicU64::new(1),
            session_start: Instant::now(),
            completed_capacity: DEFAULT_COMPLETED_CAPACITY,
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn set_smoothing_factor(&self, factor: f64) {
        if factor > 0.0 && factor <= 1.0 {
            self.stats.lock().unwrap().smoothing = factor;
        }
    }

    pub fn set_backlog_alert<F>(&self, job_threshold: usize, clearance_threshold: Duration, cb: F)
    where
        F: Fn(usize, Duration) + Send + Sync + 'static,
    {
        let mut stats = self.stats.lock().unwrap();
        stats.backlog_job_threshold = job_threshold;
        stats.backlog_time_threshold = clearance_threshold;
        stats.backlog_callback = Some(Arc::new(cb));
    }

    /// Registers a callback invoked with the outstanding job count whenever
    /// the queue grows or shrinks; used to widen the rate governor's
    /// inter-request interval under load.
    pub fn set_pressure_probe<F>(&self, probe: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.stats.lock().unwrap().pressure_probe = Some(Arc::new(probe));
    }

    pub fn start(&self) {
        let mut handles = self.handles.lock().unwrap();
        if !handles.is_empty() {
            return;
        }
        for _ in 0..self.workers {
            let rx = self.rx.clone();
            let stats = self.stats.clone();
            let cancel = self.cancel.clone();
            let completed_capacity = self.completed_capacity;
            handles.push(tokio::spawn(async move {
                worker_loop(rx, stats, cancel, completed_capacity).await;
            }));
        }
    }

    pub fn submit<F>(&self, label: impl Into<String>, job: F) -> JobHandle
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut label = label.into();
        if label.is_empty() {
            label = format!("request-{id}");
        }
        let info = Arc::new(Mutex::new(RequestInfo {
            id,
            label,
            state: RequestState::Pending,
            enqueued_at: Instant::now(),
            started_at: None,
            finished_at: None,
            duration: None,
            error: None,
        }));

        let (done_tx, done_rx) = oneshot::channel();
        let scheduled = Scheduled {
            info: info.clone(),
            job: Box::pin(job),
            done: done_tx,
        };

        let (probe, outstanding, alert) = {
            let mut stats = self.stats.lock().unwrap();
            stats.pending.push_back(info.clone());
            let outstanding = stats.outstanding();
            (
                stats.pressure_probe.clone(),
                outstanding,
                arm_backlog_alert(&mut stats, outstanding),
            )
        };
        if let Some(probe) = probe {
            probe(outstanding);
        }
        fire_backlog_alert(alert);

        if self.tx.send(scheduled).is_err() {
            warn!("work pool queue closed; cancelling submission");
            mark_terminal(&self.stats, &info, RequestState::Cancelled, None, 0);
        }

        JobHandle { rx: done_rx }
    }

    pub fn outstanding_jobs(&self) -> usize {
        self.stats.lock().unwrap().outstanding()
    }

    pub fn smoothed_requests_per_minute(&self) -> f64 {
        self.stats.lock().unwrap().ema_rpm
    }

    pub fn estimate_clearance_time(&self) -> Option<Duration> {
        let stats = self.stats.lock().unwrap();
        let outstanding = stats.outstanding();
        stats.clearance_for(outstanding)
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let stats = self.stats.lock().unwrap();
        let outstanding = stats.outstanding();
        PoolSnapshot {
            session_start: self.session_start,
            pending: stats.pending.iter().map(|i| i.lock().unwrap().clone()).collect(),
            running: stats.running.iter().map(|i| i.lock().unwrap().clone()).collect(),
            completed: stats.completed.iter().map(|i| i.lock().unwrap().clone()).collect(),
            total_completed: stats.total_completed,
            total_failed: stats.total_failed,
            average_latency_ms: if stats.latency_samples > 0 {
                Some(stats.total_latency.as_secs_f64() * 1000.0 / stats.latency_samples as f64)
            } else {
                None
            },
            clearance: stats.clearance_for(outstanding),
        }
    }

    /// Cancels the workers, marks still-queued jobs Cancelled, and joins.
    /// Running jobs finish unless they observe the cancel token themselves.
    /// Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();

        {
            let mut rx = self.rx.lock().await;
            while let Ok(scheduled) = rx.try_recv() {
                mark_terminal(&self.stats, &scheduled.info, RequestState::Cancelled, None, 0);
                let _ = scheduled.done.send(RequestState::Cancelled);
            }
        }

        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Scheduled>>>,
    stats: Arc<Mutex<Stats>>,
    cancel: CancellationToken,
    completed_capacity: usize,
) {
    loop {
        let scheduled = {
            let mut guard = rx.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                item = guard.recv() => item,
            }
        };
        let Some(scheduled) = scheduled else { break };

        mark_started(&stats, &scheduled.info);
        let result = scheduled.job.await;

        let (state, error) = match result {
            Ok(()) => (RequestState::Completed, None),
            Err(err) => {
                debug!(error = %err, "work pool job failed");
                (RequestState::Failed, Some(err.to_string()))
            }
        };
        mark_terminal(&stats, &scheduled.info, state, error, completed_capacity);
        let _ = scheduled.done.send(state);
    }
}

fn mark_started(stats: &Mutex<Stats>, info: &Arc<Mutex<RequestInfo>>) {
    let mut guard = stats.lock().unwrap();
    guard.pending.retain(|p| !Arc::ptr_eq(p, info));
    guard.running.push(info.clone());
    let mut request = info.lock().unwrap();
    request.state = RequestState::Running;
    request.started_at = Some(Instant::now());
}

fn mark_terminal(
    stats: &Mutex<Stats>,
    info: &Arc<Mutex<RequestInfo>>,
    state: RequestState,
    error: Option<String>,
    completed_capacity: usize,
) {
    let now = Instant::now();
    let (probe, outstanding, alert) = {
        let mut guard = stats.lock().unwrap();
        guard.pending.retain(|p| !Arc::ptr_eq(p, info));
        guard.running.retain(|r| !Arc::ptr_eq(r, info));

        {
            let mut request = info.lock().unwrap();
            request.state = state;
            request.finished_at = Some(now);
            request.error = error;
            if let Some(started) = request.started_at {
                let latency = now.saturating_duration_since(started);
                request.duration = Some(latency);
                guard.total_latency += latency;
                guard.latency_samples += 1;
            }
        }

        match state {
            RequestState::Completed => guard.total_completed += 1,
            RequestState::Failed => guard.total_failed += 1,
            _ => {}
        }
        if matches!(state, RequestState::Completed | RequestState::Failed) {
            guard.record_execution(now);
            guard.completed.push_back(info.clone());
            let capacity = completed_capacity.max(1);
            while guard.completed.len() > capacity {
                guard.completed.pop_front();
            }
        }

        let outstanding = guard.outstanding();
        (
            guard.pressure_probe.clone(),
            outstanding,
            arm_backlog_alert(&mut guard, outstanding),
        )
    };
    if let Some(probe) = probe {
        probe(outstanding);
    }
    fire_backlog_alert(alert);
}

fn arm_backlog_alert(
    stats: &mut Stats,
    outstanding: usize,
) -> Option<(BacklogCallback, usize, Duration)> {
    if stats.backlog_job_threshold == 0 || outstanding < stats.backlog_job_threshold {
        return None;
    }
    let clearance = stats.clearance_for(outstanding)?;
    if clearance < stats.backlog_time_threshold {
        return None;
    }
    let now = Instant::now();
    if let Some(last) = stats.last_backlog_alert {
        if now.saturating_duration_since(last) < BACKLOG_COOLDOWN {
            return None;
        }
    }
    let callback = stats.backlog_callback.clone()?;
    stats.last_backlog_alert = Some(now);
    Some((callback, outstanding, clearance))
}

fn fire_backlog_alert(alert: Option<(BacklogCallback, usize, Duration)>) {
    if let Some((callback, outstanding, clearance)) = alert {
        callback(outstanding, clearance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn submitted_jobs_run_and_complete() {
        let pool = WorkPool::new(2);
        pool.start();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let counter = counter.clone();
            handles.push(pool.submit("tick", async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }
        for handle in handles {
            assert_eq!(handle.wait().await, RequestState::Completed);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.total_completed, 8);
        assert_eq!(snapshot.total_failed, 0);
        assert!(snapshot.pending.is_empty());
        pool.stop().await;
    }

    #[tokio::test]
    async fn failures_are_recorded_with_error_text() {
        let pool = WorkPool::new(1);
        pool.start();
        let handle = pool.submit("boom", async { anyhow::bail!("exploded") });
        assert_eq!(handle.wait().await, RequestState::Failed);
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.total_failed, 1);
        assert_eq!(
            snapshot.completed[0].error.as_deref(),
            Some("exploded")
        );
        pool.stop().await;
    }

    #[tokio::test]
    async fn stop_cancels_queued_jobs() {
        let pool = WorkPool::new(1);
        pool.start();
        // The running job observes the pool's cancel token; the queued job
        // never starts and is drained as Cancelled.
        let cancel = pool.cancel_token();
        let blocker = pool.submit("blocker", async move {
            cancel.cancelled().await;
            Ok(())
        });
        // Give the single worker time to pick up the blocker.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let queued = pool.submit("queued", async { Ok(()) });
        pool.stop().await;
        assert_eq!(blocker.wait().await, RequestState::Completed);
        assert_eq!(queued.wait().await, RequestState::Cancelled);
        // Idempotent.
        pool.stop().await;
    }

    #[tokio::test]
    async fn completed_history_is_bounded() {
        let pool = WorkPool::new(1);
        pool.start();
        for i in 0..(DEFAULT_COMPLETED_CAPACITY + 10) {
            pool.submit(format!("job-{i}"), async { Ok(()) }).wait().await;
        }
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.completed.len(), DEFAULT_COMPLETED_CAPACITY);
        assert_eq!(
            snapshot.total_completed,
            DEFAULT_COMPLETED_CAPACITY + 10
        );
        pool.stop().await;
    }

    #[tokio::test]
    async fn ema_and_clearance_become_available_after_executions() {
        let pool = WorkPool::new(1);
        pool.start();
        assert!(pool.estimate_clearance_time().is_none());
        for _ in 0..3 {
            pool.submit("tick", async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(())
            })
            .wait()
            .await;
        }
        assert!(pool.smoothed_requests_per_minute() > 0.0);
        pool.stop().await;
    }

    #[tokio::test]
    async fn pressure_probe_sees_outstanding_counts() {
        let pool = WorkPool::new(1);
        let seen = Arc::new(AtomicUsize::new(0));
        let probe_seen = seen.clone();
        pool.set_pressure_probe(move |outstanding| {
            probe_seen.fetch_max(outstanding, Ordering::SeqCst);
        });
        pool.start();
        let gate = Arc::new(tokio::sync::Notify::new());
        let release = gate.clone();
        let first = pool.submit("hold", async move {
            release.notified().await;
            Ok(())
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = pool.submit("queued", async { Ok(()) });
        gate.notify_one();
        first.wait().await;
        second.wait().await;
        assert!(seen.load(Ordering::SeqCst) >= 2);
        pool.stop().await;
    }
}

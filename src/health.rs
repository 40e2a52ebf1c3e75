/// Health Monitor: a background sampler plus a per-backend circuit-breaker
/// state machine.
///
/// The sampling loop is grounded on the teacher's `probe_backends` worker in
/// `server.rs` (a `loop { ...; sleep(TIMEOUT).await }` pattern spawned once at
/// startup via `tokio::spawn`), generalized from "mark one flag" to the fuller
/// failure-count/threshold/reopen-window state machine the design specifies,
/// and from a shared-`Mutex<Pool>` single probe to one concurrent probe per
/// backend per tick (`tokio::task::JoinSet`).
use crate::backend::Pool;
use crate::logging::{LogSink, NoopSink};
use crate::rpc::RpcClient;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::{JoinHandle, JoinSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthStateSnapshot {
    pub status: Status,
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_response_time: Option<Duration>,
}

#[derive(Debug)]
struct HealthStateInner {
    status: Status,
    failure_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
    last_check_at: Option<DateTime<Utc>>,
    last_response_time: Option<Duration>,
}

impl Default for HealthStateInner {
    fn default() -> Self {
        HealthStateInner {
            status: Status::Healthy,
            failure_count: 0,
            last_failure_at: None,
            last_check_at: None,
            last_response_time: None,
        }
    }
}

impl HealthStateInner {
    fn snapshot(&self) -> HealthStateSnapshot {
        HealthStateSnapshot {
            status: self.status,
            failure_count: self.failure_count,
            last_failure_at: self.last_failure_at,
            last_check_at: self.last_check_at,
            last_response_time: self.last_response_time,
        }
    }

    fn on_success(&mut self) {
        self.status = Status::Healthy;
        self.failure_count = 0;
    }

    fn on_failure(&mut self, now: DateTime<Utc>, failure_threshold: u32) {
        self.failure_count += 1;
        self.last_failure_at = Some(now);
        if self.failure_count >= failure_threshold {
            self.status = Status::Unhealthy;
        }
    }

    /// `isAvailable` predicate plus its speculative-reopen side effect, both
    /// performed under the same lock so the flip can never race a concurrent
    /// status mutation.
    fn is_available(&mut self, now: DateTime<Utc>, retry_timeout: Duration) -> bool {
        match self.status {
            Status::Healthy => true,
            Status::Unhealthy => {
                let reopened = match self.last_failure_at {
                    Some(last) => {
                        now.signed_duration_since(last)
                            > chrono::Duration::from_std(retry_timeout).unwrap_or(chrono::Duration::zero())
                    }
                    None => true,
                };
                if reopened {
                    self.status = Status::Healthy;
                    self.failure_count = 0;
                }
                reopened
            }
        }
    }
}

pub struct HealthMonitor {
    states: Vec<Mutex<HealthStateInner>>,
    pool: Arc<Pool>,
    rpc: Arc<RpcClient>,
    failure_threshold: u32,
    retry_timeout: Duration,
    check_interval: Duration,
    running: Arc<AtomicBool>,
    task: AsyncMutex<Option<JoinHandle<()>>>,
    log: Arc<dyn LogSink>,
}

impl HealthMonitor {
    pub fn new(
        pool: Arc<Pool>,
        rpc: Arc<RpcClient>,
        failure_threshold: u32,
        retry_timeout: Duration,
        check_interval: Duration,
    ) -> HealthMonitor {
        let mut states = Vec::with_capacity(pool.len());
        states.resize_with(pool.len(), || Mutex::new(HealthStateInner::default()));
        HealthMonitor {
            states,
            pool,
            rpc,
            failure_threshold,
            retry_timeout,
            check_interval,
            running: Arc::new(AtomicBool::new(false)),
            task: AsyncMutex::new(None),
            log: Arc::new(NoopSink),
        }
    }

    pub fn with_log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    pub fn mark_failed(&self, index: usize) {
        let Some(entry) = self.states.get(index) else { return };
        entry.lock().on_failure(Utc::now(), self.failure_threshold);
    }

    pub fn mark_success(&self, index: usize) {
        let Some(entry) = self.states.get(index) else { return };
        entry.lock().on_success();
    }

    pub fn is_available(&self, index: usize) -> bool {
        let Some(entry) = self.states.get(index) else { return false };
        entry.lock().is_available(Utc::now(), self.retry_timeout)
    }

    pub fn get_state(&self, index: usize) -> Option<HealthStateSnapshot> {
        self.states.get(index).map(|e| e.lock().snapshot())
    }

    pub fn get_all_states(&self) -> Vec<HealthStateSnapshot> {
        self.states.iter().map(|e| e.lock().snapshot()).collect()
    }

    pub fn get_healthy(&self) -> HashSet<usize> {
        self.pool
            .indices()
            .filter(|&i| self.is_available(i))
            .collect()
    }

    /// Fire one concurrent probe per backend, wait for all of them, update
    /// state. Probes within one tick run in parallel; the sampling loop itself
    /// does not wait for this to complete before its next sleep.
    pub async fn run_health_checks(&self) {
        let mut set = JoinSet::new();
        for i in self.pool.indices() {
            let backend = self.pool[i].clone();
            let rpc = self.rpc.clone();
            set.spawn(async move {
                let start = std::time::Instant::now();
                let ok = rpc.ping(&backend).await;
                (i, ok, start.elapsed())
            });
        }
        while let Some(joined) = set.join_next().await {
            let Ok((i, ok, elapsed)) = joined else { continue };
            let now = Utc::now();
            if let Some(entry) = self.states.get(i) {
                let mut state = entry.lock();
                state.last_check_at = Some(now);
                state.last_response_time = Some(elapsed);
                if ok {
                    state.on_success();
                    self.log.debug(Some(i), "health probe succeeded");
                } else {
                    state.on_failure(now, self.failure_threshold);
                    self.log.warning(Some(i), "health probe failed");
                }
            }
        }
    }

    /// Idempotent: a second call while already running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        let this = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            while this.running.load(Ordering::SeqCst) {
                this.run_health_checks().await;
                tokio::time::sleep(this.check_interval).await;
            }
        }));
    }

    /// Idempotent: signals the sampler to exit on its next wakeup. Does not
    /// wait for the task to actually finish.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> HealthStateInner {
        HealthStateInner::default()
    }

    #[test]
    fn threshold_failures_flip_to_unhealthy() {
        let mut s = fresh();
        let now = Utc::now();
        assert_eq!(s.status, Status::Healthy);
        s.on_failure(now, 3);
        assert_eq!(s.status, Status::Healthy);
        s.on_failure(now, 3);
        assert_eq!(s.status, Status::Healthy);
        s.on_failure(now, 3);
        assert_eq!(s.status, Status::Unhealthy);
        assert!(s.failure_count >= 3);
    }

    #[test]
    fn success_resets_failure_count() {
        let mut s = fresh();
        let now = Utc::now();
        s.on_failure(now, 3);
        s.on_failure(now, 3);
        s.on_success();
        assert_eq!(s.status, Status::Healthy);
        assert_eq!(s.failure_count, 0);
    }

    #[test]
    fn unhealthy_stays_closed_before_retry_timeout() {
        let mut s = fresh();
        let now = Utc::now();
        s.on_failure(now, 1);
        assert_eq!(s.status, Status::Unhealthy);
        let almost = now + chrono::Duration::milliseconds(500);
        assert!(!s.is_available(almost, Duration::from_secs(1)));
    }

    #[test]
    fn unhealthy_reopens_after_retry_timeout() {
        let mut s = fresh();
        let now = Utc::now();
        s.on_failure(now, 1);
        assert_eq!(s.status, Status::Unhealthy);
        let later = now + chrono::Duration::milliseconds(1500);
        assert!(s.is_available(later, Duration::from_secs(1)));
        assert_eq!(s.status, Status::Healthy);
        assert_eq!(s.failure_count, 0);
    }

    #[test]
    fn healthy_is_always_available() {
        let mut s = fresh();
        assert!(s.is_available(Utc::now(), Duration::from_secs(30)));
    }
}

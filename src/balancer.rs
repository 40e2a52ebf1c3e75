/// The Load Balancer: a bounded-queue dispatcher, backend selection policy,
/// and the retry-across-backends driver.
///
/// The dispatcher's accept-and-spawn shape is adapted from the teacher's
/// `Server::run`/`Handler` pair in `server.rs` (`loop { accept; spawn a
/// per-connection task; don't wait for it }`), here popping a `ConvertRequest`
/// off a bounded channel instead of accepting a `TcpStream`. The round-robin
/// cursor is the teacher's `RoundRobinBalancing` (`AtomicUsize` advanced with
/// `fetch_add`), generalized with the health-and-load filter and best-metric
/// fallback the design calls for in place of the teacher's pluggable
/// `LoadBalancing` trait (a single fixed hybrid policy, not several
/// interchangeable algorithms, is what this system needs).
use crate::backend::Pool;
use crate::config::BalancerConfig;
use crate::error::RlbError;
use crate::health::HealthMonitor;
use crate::logging::{LogSink, NoopSink};
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::rpc::{ConvertMode, ConvertOutcome, RpcClient};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A convert request's payload, replacing the source's dynamic
/// key-presence-checked dictionary with a typed variant — see Design Note
/// "Dynamic heterogeneous request dictionary".
#[derive(Debug, Clone)]
pub enum RequestBody {
    Stream { bytes: Vec<u8> },
    FilePath { input_path: String, output_path: String },
}

struct ConvertRequest {
    id: Uuid,
    body: RequestBody,
    output_format: String,
    promise: oneshot::Sender<Result<ConvertOutcome, RlbError>>,
}

pub struct LoadBalancer {
    pool: Arc<Pool>,
    health: Arc<HealthMonitor>,
    rpc: Arc<RpcClient>,
    metrics: Arc<MetricsRegistry>,
    config: BalancerConfig,
    current_index: AtomicUsize,
    running: AtomicBool,
    sender: mpsc::Sender<ConvertRequest>,
    receiver: AsyncMutex<mpsc::Receiver<ConvertRequest>>,
    dispatcher: AsyncMutex<Option<JoinHandle<()>>>,
    log: Arc<dyn LogSink>,
}

impl LoadBalancer {
    pub fn new(
        pool: Arc<Pool>,
        health: Arc<HealthMonitor>,
        rpc: Arc<RpcClient>,
        config: BalancerConfig,
    ) -> Arc<LoadBalancer> {
        let metrics = Arc::new(MetricsRegistry::new(pool.len()));
        let (sender, receiver) = mpsc::channel(config.queue_capacity());
        Arc::new(LoadBalancer {
            pool,
            health,
            rpc,
            metrics,
            config,
            current_index: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            sender,
            receiver: AsyncMutex::new(receiver),
            dispatcher: AsyncMutex::new(None),
            log: Arc::new(NoopSink),
        })
    }

    /// Same as [`Self::new`] but with an explicit log sink, since `LoadBalancer`
    /// is always handed out as an `Arc` and so can't be rebuilt field-by-field
    /// after construction the way a plain owned struct could be.
    pub fn new_with_log_sink(
        pool: Arc<Pool>,
        health: Arc<HealthMonitor>,
        rpc: Arc<RpcClient>,
        config: BalancerConfig,
        log: Arc<dyn LogSink>,
    ) -> Arc<LoadBalancer> {
        let metrics = Arc::new(MetricsRegistry::new(pool.len()));
        let (sender, receiver) = mpsc::channel(config.queue_capacity());
        Arc::new(LoadBalancer {
            pool,
            health,
            rpc,
            metrics,
            config,
            current_index: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            sender,
            receiver: AsyncMutex::new(receiver),
            dispatcher: AsyncMutex::new(None),
            log,
        })
    }

    /// Idempotent: spawns the single dispatcher task once.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.dispatcher.lock().await;
        if task.is_some() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        let this = Arc::clone(self);
        *task = Some(tokio::spawn(this.dispatcher_loop()));
    }

    /// Idempotent: flips `running` and closes the request queue to new
    /// enqueues. Buffered requests still drain; attempts already in flight
    /// complete and push to their (possibly abandoned) promise.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.receiver.lock().await.close();
    }

    pub fn get_server_metrics(&self) -> Vec<MetricsSnapshot> {
        self.metrics.snapshot_all()
    }

    /// Enqueues the request and waits on its promise with deadline `T`
    /// (`config.request_timeout`). Enqueue itself has its own 1s push timeout.
    pub async fn convert_async(
        &self,
        body: RequestBody,
        output_format: impl Into<String>,
    ) -> Result<ConvertOutcome, RlbError> {
        let (tx, rx) = oneshot::channel();
        let request = ConvertRequest {
            id: Uuid::new_v4(),
            body,
            output_format: output_format.into(),
            promise: tx,
        };

        match tokio::time::timeout(self.config.enqueue_timeout, self.sender.send(request)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) | Err(_) => return Err(RlbError::QueueUnavailable),
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            // The worker dropped the promise without answering, or the wait
            // itself timed out: both surface as Timeout to the caller, who has
            // no way to distinguish "nobody answered" from "took too long".
            Ok(Err(_)) | Err(_) => Err(RlbError::Timeout),
        }
    }

    /// Bypasses the queue entirely: selects a backend and runs the retry
    /// driver synchronously on the caller's task. For callers that already
    /// manage their own concurrency.
    pub async fn convert_sync(
        &self,
        body: RequestBody,
        output_format: impl Into<String>,
    ) -> Result<ConvertOutcome, RlbError> {
        let output_format = output_format.into();
        self.execute_with_retry(&body, &output_format).await
    }

    async fn dispatcher_loop(self: Arc<Self>) {
        loop {
            let popped = {
                let mut guard = self.receiver.lock().await;
                tokio::time::timeout(self.config.dispatch_poll_timeout, guard.recv()).await
            };
            match popped {
                Ok(Some(request)) => self.spawn_attempt(request),
                Ok(None) => break,
                Err(_elapsed) => {
                    if !self.running.load(Ordering::SeqCst) {
                        let guard = self.receiver.lock().await;
                        if guard.is_empty() {
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Spawn the attempt task and move on; the dispatcher never waits for an
    /// individual request to finish. Backpressure comes entirely from the
    /// bounded queue upstream.
    fn spawn_attempt(self: &Arc<Self>, request: ConvertRequest) {
        self.log.debug(None, &format!("dispatching request {}", request.id));
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let result = this.execute_with_retry(&request.body, &request.output_format).await;
            // The receiver may already be gone (caller timed out) — dropping
            // the result silently is correct, not a bug: nobody is listening.
            let _ = request.promise.send(result);
        });
    }

    /// Up to `max_retries` attempts, re-selecting a backend before each one.
    /// Every attempt acquires and releases its own `active_connections` slot,
    /// so failures mid-retry never leak a dangling increment.
    async fn execute_with_retry(
        &self,
        body: &RequestBody,
        output_format: &str,
    ) -> Result<ConvertOutcome, RlbError> {
        let mut last_err: Option<RlbError> = None;

        for attempt in 1..=self.config.max_retries {
            if attempt > 1 {
                tokio::time::sleep(self.config.backoff_for(attempt)).await;
            }

            let index = self.select_backend();
            let Some(metrics) = self.metrics.get(index) else {
                last_err = Some(RlbError::InvalidConfig(format!("selected out-of-range backend {}", index)));
                continue;
            };
            let _slot = metrics.acquire_slot();

            let start = Instant::now();
            let outcome = self.dispatch_attempt(index, body, output_format).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match outcome {
                Ok(result) => {
                    metrics.record_success(elapsed_ms);
                    self.health.mark_success(index);
                    return Ok(result);
                }
                Err(err) => {
                    metrics.record_failure(Utc::now());
                    self.health.mark_failed(index);
                    self.log
                        .warning(Some(index), &format!("attempt {} failed: {}", attempt, err));
                    last_err = Some(err);
                }
            }
        }

        Err(RlbError::ExhaustedRetries {
            source: Box::new(last_err.unwrap_or(RlbError::Timeout)),
        })
    }

    async fn dispatch_attempt(
        &self,
        index: usize,
        body: &RequestBody,
        output_format: &str,
    ) -> Result<ConvertOutcome, RlbError> {
        let backend = &self.pool[index];
        match body {
            RequestBody::Stream { bytes } => {
                self.rpc
                    .convert(backend, None, Some(bytes.as_slice()), output_format, None, ConvertMode::Stream)
                    .await
            }
            RequestBody::FilePath { input_path, output_path } => {
                self.rpc
                    .convert(
                        backend,
                        Some(input_path.as_str()),
                        None,
                        output_format,
                        Some(output_path.as_str()),
                        ConvertMode::FilePath,
                    )
                    .await
            }
        }
    }

    /// Round-robin with health-and-load filter, falling back to
    /// [`Self::select_best`] when no candidate survives `2 * |pool|` steps.
    fn select_backend(&self) -> usize {
        let n = self.pool.len();
        let healthy = self.health.get_healthy();
        let now = Utc::now();
        let window = chrono::Duration::from_std(self.config.recent_error_window).unwrap_or(chrono::Duration::zero());

        let cursor = self.current_index.fetch_add(1, Ordering::Relaxed);
        let start = cursor.wrapping_add(1);

        for step in 0..(2 * n) {
            let idx = (start + step) % n;
            let Some(metrics) = self.metrics.get(idx) else { continue };

            if metrics.recent_error_window_active(self.config.recent_error_threshold, window, now) {
                continue;
            }
            if metrics.active_connections() >= self.config.concurrency as i64 {
                continue;
            }
            if !healthy.contains(&idx) {
                continue;
            }
            return idx;
        }

        self.log.notice(None, "round-robin walk exhausted, falling back to best-metric selection");
        self.select_best()
    }

    /// Minimum of `active_connections * 10 + last_response_time_ms + errors * 100`,
    /// ties broken by lowest index. Always returns a valid index for a
    /// non-empty pool, even with every backend Unhealthy.
    fn select_best(&self) -> usize {
        (0..self.pool.len())
            .min_by_key(|&i| self.metrics.get(i).map(|m| m.selection_score()).unwrap_or(i64::MAX))
            .expect("pool is non-empty by construction")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;

    fn test_lb(pool_size: usize) -> Arc<LoadBalancer> {
        let backends: Vec<_> = (0..pool_size).map(|i| Backend::new("127.0.0.1", 2000 + i as u16)).collect();
        let pool = Arc::new(Pool::new(backends).unwrap());
        let rpc = Arc::new(RpcClient::new(
            std::time::Duration::from_millis(100),
            std::time::Duration::from_millis(100),
            std::time::Duration::from_millis(100),
        ));
        let health = Arc::new(HealthMonitor::new(
            pool.clone(),
            rpc.clone(),
            3,
            std::time::Duration::from_secs(30),
            std::time::Duration::from_secs(10),
        ));
        LoadBalancer::new(pool, health, rpc, BalancerConfig::default())
    }

    #[test]
    fn select_best_returns_valid_index_even_all_unhealthy() {
        let lb = test_lb(3);
        let idx = lb.select_best();
        assert!(idx < 3);
    }

    #[test]
    fn select_backend_falls_back_when_nothing_healthy() {
        let lb = test_lb(2);
        // Nothing has been marked healthy by a probe, but HealthMonitor starts
        // every backend Healthy by default, so the round-robin walk should
        // actually succeed here; this just asserts the index is in range.
        let idx = lb.select_backend();
        assert!(idx < 2);
    }

    #[derive(Debug, Default)]
    struct RecordingSink {
        messages: parking_lot::Mutex<Vec<String>>,
    }

    impl LogSink for RecordingSink {
        fn debug(&self, _backend: Option<usize>, msg: &str) {
            self.messages.lock().push(msg.to_string());
        }
        fn info(&self, _backend: Option<usize>, _msg: &str) {}
        fn notice(&self, _backend: Option<usize>, _msg: &str) {}
        fn warning(&self, _backend: Option<usize>, _msg: &str) {}
        fn error(&self, _backend: Option<usize>, _msg: &str) {}
    }

    #[tokio::test]
    async fn dispatcher_processes_requests_in_fifo_order_by_id() {
        let sink = Arc::new(RecordingSink::default());
        // The backend address is never actually reached: the dispatcher logs
        // each request's id the instant it pops it off the queue, before the
        // (separately spawned) attempt task does any I/O, so FIFO dispatch
        // order is observable regardless of what the backend does.
        let backend = Backend::new("127.0.0.1", 1);
        let pool = Arc::new(Pool::new(vec![backend]).unwrap());
        let rpc = Arc::new(RpcClient::new(
            std::time::Duration::from_millis(10),
            std::time::Duration::from_millis(10),
            std::time::Duration::from_millis(10),
        ));
        let health = Arc::new(HealthMonitor::new(
            pool.clone(),
            rpc.clone(),
            3,
            std::time::Duration::from_secs(30),
            std::time::Duration::from_secs(10),
        ));
        let lb = LoadBalancer::new_with_log_sink(
            pool,
            health,
            rpc,
            BalancerConfig { max_retries: 1, ..BalancerConfig::default() },
            sink.clone(),
        );

        let mut submitted_ids = Vec::new();
        for _ in 0..5 {
            let (tx, _rx) = oneshot::channel();
            let id = Uuid::new_v4();
            submitted_ids.push(id);
            let request = ConvertRequest {
                id,
                body: RequestBody::Stream { bytes: Vec::new() },
                output_format: "pdf".to_string(),
                promise: tx,
            };
            lb.sender.send(request).await.unwrap();
        }

        lb.start().await;
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        lb.stop().await;

        let dispatched_ids: Vec<Uuid> = sink
            .messages
            .lock()
            .iter()
            .filter_map(|m| m.strip_prefix("dispatching request ").and_then(|s| Uuid::parse_str(s).ok()))
            .collect();
        assert_eq!(dispatched_ids, submitted_ids);
    }
}

/// Internal tunables for the balancer and health monitor.
///
/// Loading this from a file (YAML/TOML/etc) is the caller's job — that's the
/// "configuration/file globbing" collaborator this crate deliberately stays out
/// of. `BalancerConfig` only derives `Serialize`/`Deserialize` so an embedder's
/// own config loader can produce one however it likes.
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Upper bound on in-flight attempts per backend (`C` in the design).
    pub concurrency: usize,
    /// End-to-end deadline for a single `convert_async` call.
    pub request_timeout: Duration,
    /// How often the health monitor fires a probe round.
    pub check_interval: Duration,
    /// Consecutive failures before a backend flips Healthy -> Unhealthy.
    pub failure_threshold: u32,
    /// How long an Unhealthy backend stays closed before a speculative reopen.
    pub retry_timeout: Duration,
    /// Recent-error window: backends with more than this many errors in
    /// `recent_error_window` are skipped during the round-robin walk.
    pub recent_error_threshold: u64,
    pub recent_error_window: Duration,
    /// Attempts per request, including the first.
    pub max_retries: u32,
    /// Sleep before each retry attempt, indexed from the 2nd attempt onward.
    pub retry_backoff: Vec<Duration>,
    /// Timeout applied to a single push onto the request queue.
    pub enqueue_timeout: Duration,
    /// Poll timeout used by the dispatcher loop between queue pops.
    pub dispatch_poll_timeout: Duration,
    /// Connect/send/recv timeouts applied to a single RPC attempt.
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub recv_timeout: Duration,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        BalancerConfig {
            concurrency: 8,
            request_timeout: Duration::from_secs(30),
            check_interval: Duration::from_secs(10),
            failure_threshold: 3,
            retry_timeout: Duration::from_secs(30),
            recent_error_threshold: 5,
            recent_error_window: Duration::from_secs(300),
            max_retries: 3,
            retry_backoff: vec![Duration::from_millis(100), Duration::from_millis(500)],
            enqueue_timeout: Duration::from_secs(1),
            dispatch_poll_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(5),
            recv_timeout: Duration::from_secs(10),
        }
    }
}

impl BalancerConfig {
    pub fn builder() -> BalancerConfigBuilder {
        BalancerConfigBuilder::default()
    }

    /// Queue capacity is always `2 * concurrency`, per the design.
    pub fn queue_capacity(&self) -> usize {
        2 * self.concurrency
    }

    /// Backoff to sleep before retry attempt number `attempt` (1-indexed, where
    /// attempt 1 is the first try and never sleeps).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let idx = (attempt - 2) as usize;
        self.retry_backoff
            .get(idx)
            .copied()
            .unwrap_or_else(|| self.retry_backoff.last().copied().unwrap_or_default())
    }
}

#[derive(Debug, Default, Clone)]
pub struct BalancerConfigBuilder {
    inner: BalancerConfig,
}

impl BalancerConfigBuilder {
    pub fn concurrency(mut self, c: usize) -> Self {
        self.inner.concurrency = c;
        self
    }

    pub fn request_timeout(mut self, t: Duration) -> Self {
        self.inner.request_timeout = t;
        self
    }

    pub fn check_interval(mut self, t: Duration) -> Self {
        self.inner.check_interval = t;
        self
    }

    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.inner.failure_threshold = n;
        self
    }

    pub fn retry_timeout(mut self, t: Duration) -> Self {
        self.inner.retry_timeout = t;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.inner.max_retries = n;
        self
    }

    pub fn build(self) -> BalancerConfig {
        self.inner
    }
}

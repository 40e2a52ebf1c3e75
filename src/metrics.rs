/// Per-backend performance metrics.
///
/// Grounded on the teacher's atomic-field style in `backend.rs` (`AtomicBool`,
/// `AtomicUsize` with `Ordering::Relaxed`/`Acquire`), generalized to the fuller
/// counter set the design calls for and encapsulated behind a registry so
/// callers only ever see snapshots, never the live atomics — per Design Note
/// "Global mutable metric arrays must be encapsulated as a MetricsRegistry".
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Immutable point-in-time view of one backend's metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub last_response_time_ms: u64,
    pub active_connections: i64,
    pub last_error_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct ServerMetrics {
    requests: AtomicU64,
    errors: AtomicU64,
    last_response_time_ms: AtomicU64,
    active_connections: AtomicI64,
    last_error_at: Mutex<Option<DateTime<Utc>>>,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        ServerMetrics {
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_response_time_ms: AtomicU64::new(0),
            active_connections: AtomicI64::new(0),
            last_error_at: Mutex::new(None),
        }
    }
}

/// RAII guard for one in-flight attempt slot. Pairs the `active_connections`
/// increment with a guaranteed decrement on every exit path (success, error,
/// panic) — the strict pairing the design demands everywhere, including on the
/// `convert_sync` path where the teacher's source sometimes skipped it.
pub struct ConnectionSlot<'a> {
    counter: &'a AtomicI64,
}

impl<'a> Drop for ConnectionSlot<'a> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ServerMetrics {
    pub fn acquire_slot(&self) -> ConnectionSlot<'_> {
        self.active_connections.fetch_add(1, Ordering::AcqRel);
        ConnectionSlot {
            counter: &self.active_connections,
        }
    }

    pub fn active_connections(&self) -> i64 {
        self.active_connections.load(Ordering::Acquire)
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Acquire)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Acquire)
    }

    pub fn last_response_time_ms(&self) -> u64 {
        self.last_response_time_ms.load(Ordering::Acquire)
    }

    pub fn last_error_at(&self) -> Option<DateTime<Utc>> {
        *self.last_error_at.lock()
    }

    pub fn record_success(&self, response_time_ms: u64) {
        self.requests.fetch_add(1, Ordering::AcqRel);
        self.last_response_time_ms
            .store(response_time_ms, Ordering::Release);
    }

    pub fn record_failure(&self, now: DateTime<Utc>) {
        self.requests.fetch_add(1, Ordering::AcqRel);
        self.errors.fetch_add(1, Ordering::AcqRel);
        *self.last_error_at.lock() = Some(now);
    }

    /// `errors > threshold && now - last_error_at < window`, per the design's
    /// recent-error skip rule used during backend selection.
    pub fn recent_error_window_active(&self, threshold: u64, window: chrono::Duration, now: DateTime<Utc>) -> bool {
        if self.errors() <= threshold {
            return false;
        }
        match self.last_error_at() {
            Some(last) => now - last < window,
            None => false,
        }
    }

    /// Selection score: `active_connections * 10 + last_response_time_ms + errors * 100`.
    pub fn selection_score(&self) -> i64 {
        self.active_connections() * 10 + self.last_response_time_ms() as i64 + self.errors() as i64 * 100
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests(),
            errors: self.errors(),
            last_response_time_ms: self.last_response_time_ms(),
            active_connections: self.active_connections(),
            last_error_at: self.last_error_at(),
        }
    }
}

/// One `ServerMetrics` per backend, indexed in lockstep with the pool.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    entries: Vec<ServerMetrics>,
}

impl MetricsRegistry {
    pub fn new(pool_size: usize) -> MetricsRegistry {
        let mut entries = Vec::with_capacity(pool_size);
        entries.resize_with(pool_size, ServerMetrics::default);
        MetricsRegistry { entries }
    }

    pub fn get(&self, index: usize) -> Option<&ServerMetrics> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot_all(&self) -> Vec<MetricsSnapshot> {
        self.entries.iter().map(ServerMetrics::snapshot).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_pairs_increment_and_decrement() {
        let m = ServerMetrics::default();
        assert_eq!(m.active_connections(), 0);
        {
            let _slot = m.acquire_slot();
            assert_eq!(m.active_connections(), 1);
        }
        assert_eq!(m.active_connections(), 0);
    }

    #[test]
    fn slot_decrements_even_on_early_return() {
        let m = ServerMetrics::default();
        fn do_work(m: &ServerMetrics, fail: bool) -> Result<(), ()> {
            let _slot = m.acquire_slot();
            if fail {
                return Err(());
            }
            Ok(())
        }
        let _ = do_work(&m, true);
        assert_eq!(m.active_connections(), 0);
    }

    #[test]
    fn errors_never_exceed_requests() {
        let m = ServerMetrics::default();
        m.record_success(10);
        m.record_failure(Utc::now());
        assert!(m.errors() <= m.requests());
    }
}

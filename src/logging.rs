/// Injectable structured-log sink.
///
/// The core never calls `log::` macros directly outside of [`StdLogSink`] — every
/// subsystem holds an `Arc<dyn LogSink>` and logs through it, so an embedder can
/// redirect diagnostics into their own telemetry pipeline without this crate
/// forcing a particular logging backend on them.
use std::fmt;

/// A single log event, optionally correlated with a backend index in the pool.
pub trait LogSink: fmt::Debug + Send + Sync {
    fn debug(&self, backend: Option<usize>, msg: &str);
    fn info(&self, backend: Option<usize>, msg: &str);
    fn notice(&self, backend: Option<usize>, msg: &str);
    fn warning(&self, backend: Option<usize>, msg: &str);
    fn error(&self, backend: Option<usize>, msg: &str);
}

/// Default sink: swallows everything. Used when the embedder hasn't opted into
/// a logging backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl LogSink for NoopSink {
    fn debug(&self, _backend: Option<usize>, _msg: &str) {}
    fn info(&self, _backend: Option<usize>, _msg: &str) {}
    fn notice(&self, _backend: Option<usize>, _msg: &str) {}
    fn warning(&self, _backend: Option<usize>, _msg: &str) {}
    fn error(&self, _backend: Option<usize>, _msg: &str) {}
}

/// Forwards to the `log` crate. `notice` has no direct equivalent in `log` and is
/// mapped onto `Level::Info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdLogSink;

impl StdLogSink {
    fn emit(&self, level: log::Level, backend: Option<usize>, msg: &str) {
        match backend {
            Some(i) => log::log!(level, "[backend {}] {}", i, msg),
            None => log::log!(level, "{}", msg),
        }
    }
}

impl LogSink for StdLogSink {
    fn debug(&self, backend: Option<usize>, msg: &str) {
        self.emit(log::Level::Debug, backend, msg);
    }
    fn info(&self, backend: Option<usize>, msg: &str) {
        self.emit(log::Level::Info, backend, msg);
    }
    fn notice(&self, backend: Option<usize>, msg: &str) {
        self.emit(log::Level::Info, backend, msg);
    }
    fn warning(&self, backend: Option<usize>, msg: &str) {
        self.emit(log::Level::Warn, backend, msg);
    }
    fn error(&self, backend: Option<usize>, msg: &str) {
        self.emit(log::Level::Error, backend, msg);
    }
}

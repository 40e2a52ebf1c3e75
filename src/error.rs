/// Error taxonomy for the balancer, the RPC client and the wire codec.
///
/// The `log` crate and `std::io::Error` surface through `#[from]` only where the
/// resulting kind is unambiguous from the conversion site; everywhere else the
/// call site maps the error explicitly so the kind reflects *where* the failure
/// happened (connect vs. send vs. recv), not just that an `io::Error` occurred.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RlbError {
    #[error("invalid balancer configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to connect to backend: {0}")]
    ConnectFailure(#[source] std::io::Error),

    #[error("failed to send request to backend: {0}")]
    SendFailure(#[source] std::io::Error),

    #[error("failed to read response from backend: {0}")]
    RecvFailure(#[source] std::io::Error),

    #[error("timed out waiting for backend")]
    Timeout,

    #[error("malformed response from backend: {0}")]
    MalformedResponse(String),

    #[error("upstream fault {code}: {message}")]
    UpstreamError { code: i32, message: String },

    #[error("request queue unavailable")]
    QueueUnavailable,

    #[error("exhausted retries, last error: {source}")]
    ExhaustedRetries {
        #[source]
        source: Box<RlbError>,
    },
}

impl RlbError {
    /// Whether this kind of failure should trigger a retry against another backend.
    ///
    /// `QueueUnavailable` and `ExhaustedRetries` are terminal by construction and
    /// never reach this call (the retry loop produces `ExhaustedRetries` itself),
    /// but the predicate is kept total for use in tests and diagnostics.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RlbError::ConnectFailure(_)
                | RlbError::SendFailure(_)
                | RlbError::RecvFailure(_)
                | RlbError::Timeout
                | RlbError::MalformedResponse(_)
                | RlbError::UpstreamError { .. }
        )
    }
}

pub type RlbResult<T> = Result<T, RlbError>;

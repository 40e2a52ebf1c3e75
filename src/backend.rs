/// The backend pool.
///
/// A `Backend` is an immutable `{host, port}` tuple; adapted from the teacher's
/// `Backend` struct in `backend.rs`, but stripped of the mutable `alive`/traffic
/// fields it used to carry directly — those responsibilities now live in
/// [`crate::health::HealthState`] and [`crate::metrics::ServerMetrics`], one
/// vector per concern, indexed in lockstep with this pool.
use crate::error::RlbError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub host: String,
    pub port: u16,
}

impl Backend {
    pub fn new(host: impl Into<String>, port: u16) -> Backend {
        Backend {
            host: host.into(),
            port,
        }
    }

    /// `Host` header value for the wire protocol: `host:port`.
    pub fn host_header(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn is_valid(&self) -> bool {
        !self.host.is_empty() && self.port != 0
    }
}

/// Fixed, ordered set of backends. Validated once at construction and never
/// mutated afterwards (no dynamic discovery, per the design's non-goals).
#[derive(Debug, Clone)]
pub struct Pool {
    backends: Vec<Backend>,
}

impl Pool {
    pub fn new(backends: Vec<Backend>) -> Result<Pool, RlbError> {
        if backends.is_empty() {
            return Err(RlbError::InvalidConfig(
                "backend pool must contain at least one backend".into(),
            ));
        }
        if let Some(bad) = backends.iter().find(|b| !b.is_valid()) {
            return Err(RlbError::InvalidConfig(format!(
                "invalid backend entry: {:?} (host must be non-empty, port non-zero)",
                bad
            )));
        }
        Ok(Pool { backends })
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Backend> {
        self.backends.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Backend> {
        self.backends.iter()
    }

    pub fn indices(&self) -> std::ops::Range<usize> {
        0..self.backends.len()
    }
}

impl std::ops::Index<usize> for Pool {
    type Output = Backend;
    fn index(&self, index: usize) -> &Backend {
        &self.backends[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_pool() {
        let err = Pool::new(vec![]).unwrap_err();
        assert!(matches!(err, RlbError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_malformed_backend() {
        let err = Pool::new(vec![Backend::new("", 80)]).unwrap_err();
        assert!(matches!(err, RlbError::InvalidConfig(_)));
        let err = Pool::new(vec![Backend::new("host", 0)]).unwrap_err();
        assert!(matches!(err, RlbError::InvalidConfig(_)));
    }

    #[test]
    fn accepts_valid_pool() {
        let pool =
            Pool::new(vec![Backend::new("127.0.0.1", 2003), Backend::new("127.0.0.1", 2004)]).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool[0].host_header(), "127.0.0.1:2003");
    }
}

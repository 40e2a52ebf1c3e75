//! A concurrent load-balancing client for XML-RPC document conversion
//! backends: a fixed backend pool, a health monitor running independent
//! background probes, and a dispatcher that queues, selects a backend for,
//! and retries document conversion requests.
//!
//! The public entry point is [`balancer::LoadBalancer`], built from a
//! [`backend::Pool`], a [`health::HealthMonitor`] and an [`rpc::RpcClient`]
//! sharing the same pool, plus a [`config::BalancerConfig`].

pub mod backend;
pub mod balancer;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod rpc;
pub mod wire;

pub use backend::{Backend, Pool};
pub use balancer::{LoadBalancer, RequestBody};
pub use config::{BalancerConfig, BalancerConfigBuilder};
pub use error::{RlbError, RlbResult};
pub use health::{HealthMonitor, HealthStateSnapshot, Status};
pub use logging::{LogSink, NoopSink, StdLogSink};
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use rpc::{ConvertMode, ConvertOutcome, RpcClient};

//! Health oracle
//!
//! Periodically evaluates whether the currently-designated active site is
//! alive. Two variants share one interface: a stateless TCP-connect probe
//! and a metric-liveness probe that watches a monotonically non-decreasing
//! counter for staleness. The DR coordinator calls `check` at most once per
//! iteration and feeds the verdict into its decision procedure.

mod metric;
mod tcp;

pub use metric::MetricHealthCheck;
pub use tcp::TcpHealthCheck;

use async_trait::async_trait;

use crate::config::HealthConfig;
use crate::error::Result;

/// Three-valued probe verdict.
///
/// `Unknown` means the oracle could not form an opinion (probe error,
/// metric absent); it counts against the failure streak the same way
/// `Unhealthy` does, but is logged distinctly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// A single health probe. Implementations may keep state across calls
/// (the metric variant tracks the last observed counter value).
#[async_trait]
pub trait HealthCheck: Send {
    async fn check(&mut self) -> HealthStatus;
}

/// Build the oracle selected by `HEALTH_MODE`.
pub fn from_config(config: &HealthConfig) -> Result<Box<dyn HealthCheck>> {
    match config {
        HealthConfig::Tcp {
            host,
            port,
            timeout,
        } => Ok(Box::new(TcpHealthCheck::new(host.clone(), *port, *timeout))),
        HealthConfig::Metrics {
            url,
            metric,
            stale_count,
            timeout,
        } => Ok(Box::new(MetricHealthCheck::new(
            url.clone(),
            metric.clone(),
            *stale_count,
            *timeout,
        )?)),
    }
}

//! Prometheus self-metrics for the failover daemon
//!
//! Exposed on `/metrics` when `METRICS_LISTEN` is set. One process per site,
//! so the gauges are unlabeled.

use std::sync::atomic::AtomicI64;

use axum::routing::get;
use axum::Router;
use once_cell::sync::Lazy;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tracing::info;

use crate::error::{Error, Result};

/// Current consecutive-failure streak on the DR side.
pub static FAILURE_STREAK: Lazy<Gauge<i64, AtomicI64>> = Lazy::new(Gauge::default);

/// Seconds of validity left on the last lease this process observed.
pub static LEASE_SECONDS_REMAINING: Lazy<Gauge<i64, AtomicI64>> = Lazy::new(Gauge::default);

/// Takeover writes performed since process start.
pub static TAKEOVERS: Lazy<Counter> = Lazy::new(Counter::default);

/// Successful lease renewals since process start.
pub static RENEWALS: Lazy<Counter> = Lazy::new(Counter::default);

/// Failed backend writes since process start.
pub static BACKEND_WRITE_FAILURES: Lazy<Counter> = Lazy::new(Counter::default);

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();
    registry.register(
        "failover_failure_streak",
        "Consecutive unhealthy or unknown health verdicts",
        FAILURE_STREAK.clone(),
    );
    registry.register(
        "failover_lease_seconds_remaining",
        "Validity left on the last observed lease",
        LEASE_SECONDS_REMAINING.clone(),
    );
    registry.register(
        "failover_takeovers",
        "Takeover writes performed",
        TAKEOVERS.clone(),
    );
    registry.register(
        "failover_renewals",
        "Successful lease renewals",
        RENEWALS.clone(),
    );
    registry.register(
        "failover_backend_write_failures",
        "Failed DNS backend writes",
        BACKEND_WRITE_FAILURES.clone(),
    );
    registry
});

async fn render() -> String {
    let mut body = String::new();
    // Encoding only fails on a broken fmt::Write impl; String's cannot fail.
    let _ = prometheus_client::encoding::text::encode(&mut body, &REGISTRY);
    body
}

/// Serve `/metrics` on `addr` until the process exits.
pub async fn serve(addr: &str) -> Result<()> {
    let app = Router::new().route("/metrics", get(render));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("METRICS_LISTEN {addr} unusable: {e}")))?;
    info!(%addr, "metrics endpoint listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| Error::ConfigError(format!("metrics server failed: {e}")))
}

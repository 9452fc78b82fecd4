//! Collector Watcher Entry Point
//!
//! DR-site sidecar. Resolves the coordinating name every tick and starts
//! or stops the local worker so exactly the designated site collects.

use otel_failover::config::WatcherConfig;
use otel_failover::watcher::resolver::{DirectResolver, Resolve, SystemResolver};
use otel_failover::watcher::{worker, Watcher};
use otel_failover::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

async fn start() -> Result<(), Error> {
    let config = WatcherConfig::from_env()?;

    let resolver: Box<dyn Resolve> = match config.dns_server {
        Some(server) => {
            info!(%server, "querying authoritative server directly");
            Box::new(DirectResolver::new(server))
        }
        None => Box::new(SystemResolver),
    };
    let controller = worker::from_config(&config.worker).await?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received; finishing current tick");
        signal_token.cancel();
    });

    Watcher::new(config, resolver, controller).run(shutdown).await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();

    info!("starting otel-failover-watcher v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = start().await {
        error!(error = %e, "watcher failed");
        std::process::exit(e.exit_code());
    }
}

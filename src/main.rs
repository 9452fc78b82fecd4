//! Coordinator Entry Point
//!
//! One executable with operator subcommands; `run` enters the role's loop
//! and is the default when no subcommand is given.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use otel_failover::clock::SystemClock;
use otel_failover::config::Config;
use otel_failover::coordinator::Coordinator;
use otel_failover::{dns, metrics, Error};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "otel-failover",
    version,
    about = "Active/passive DNS-lease coordination for paired collector sites"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Seed the A and TXT records for this site.
    Init {
        /// Overwrite a live lease held by the other site.
        #[arg(long)]
        force: bool,
    },
    /// Enter the coordination loop for the configured role (default).
    Run,
    /// Print the current records as JSON.
    Show,
    /// Claim the records for the DR site regardless of the current lease.
    Promote,
    /// Restore the primary as active. Never happens automatically.
    Failback,
    /// Check the configuration and exit.
    Validate,
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
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
}

async fn execute(command: Command) -> Result<(), Error> {
    let config = Config::from_env()?;

    if matches!(command, Command::Validate) {
        dns::validate_provider_env(&config.provider)?;
        println!(
            "configuration ok: role={:?} provider={}",
            config.role, config.provider
        );
        return Ok(());
    }

    let backend = dns::from_provider(&config).await?;
    let metrics_listen = config.metrics_listen.clone();
    let coordinator = Coordinator::new(config, backend, Arc::new(SystemClock));

    match command {
        Command::Init { force } => coordinator.init(force).await,
        Command::Run => {
            if let Some(addr) = metrics_listen {
                tokio::spawn(async move {
                    if let Err(e) = metrics::serve(&addr).await {
                        error!(error = %e, "metrics server exited");
                    }
                });
            }
            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                info!("shutdown signal received; finishing current iteration");
                signal_token.cancel();
            });
            coordinator.run(shutdown).await
        }
        Command::Show => {
            let summary = coordinator.show().await;
            // Structured one-shot output for scripting.
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).unwrap_or_else(|_| "{}".to_string())
            );
            Ok(())
        }
        Command::Promote => coordinator.promote().await,
        Command::Failback => coordinator.failback().await,
        Command::Validate => unreachable!("handled above"),
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    info!(
        "starting otel-failover v{} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_SHA")
    );

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Run);

    if let Err(e) = execute(command).await {
        error!(error = %e, "command failed");
        std::process::exit(e.exit_code());
    }
}

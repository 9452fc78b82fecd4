//! Lease coordinator
//!
//! Drives the DNS lease forward according to role. The primary loop blindly
//! re-asserts its records every interval and never reads. The DR loop feeds
//! health verdicts and lease reads through the pure decision procedure in
//! [`decision`] and acts on the result. Operator commands (`init`,
//! `promote`, `failback`, `show`) are one-shot wrappers around the same
//! record writes and reads.

pub mod decision;


use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{Config, Role};
use crate::dns::DnsBackend;
use crate::error::{Error, Result};
use crate::health::{self, HealthCheck};
use crate::lease::{Lease, Owner};
use crate::metrics;

use decision::{Action, DrPhase, DrState, LeaseView, WaitReason};

pub struct Coordinator {
    config: Config,
    backend: Box<dyn DnsBackend>,
    clock: Arc<dyn Clock>,
}

/// Structured output of the `show` command.
#[derive(Debug, Serialize)]
pub struct LeaseSummary {
    pub record: String,
    pub a: Option<Ipv4Addr>,
    pub owner: Option<String>,
    pub expires_at: Option<u64>,
    pub expires_at_utc: Option<String>,
    pub time_remaining_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_error: Option<String>,
}

impl Coordinator {
    pub fn new(config: Config, backend: Box<dyn DnsBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            backend,
            clock,
        }
    }

    /// Write A and TXT designating `owner` as active, with a fresh expiry.
    async fn write_owner(&self, owner: Owner) -> Result<()> {
        let expires_at = self.clock.now_unix() + self.config.lease_ttl;
        self.backend
            .set_records(
                self.config.ip_of(owner),
                owner,
                expires_at,
                self.config.dns_ttl,
            )
            .await
            .map_err(|e| {
                metrics::BACKEND_WRITE_FAILURES.inc();
                Error::BackendWriteError(e)
            })
    }

    /// Seed the records for this site. Refused while another site holds a
    /// live lease, unless forced.
    pub async fn init(&self, force: bool) -> Result<()> {
        if !force {
            let snapshot = self
                .backend
                .get_records()
                .await
                .map_err(Error::BackendReadError)?;
            if let Some(txt) = snapshot.txt {
                if let Ok(lease) = Lease::parse(&txt) {
                    if lease.owner != self.config.self_owner()
                        && !lease.is_expired(self.clock.now_unix())
                    {
                        return Err(Error::PreconditionError(format!(
                            "a live lease is held by {} until {}; re-run with --force to seize it",
                            lease.owner, lease.expires_at
                        )));
                    }
                }
            }
        }
        self.write_owner(self.config.self_owner()).await?;
        info!(
            record = %self.config.record,
            owner = %self.config.self_owner(),
            "records initialized"
        );
        Ok(())
    }

    /// Operator-invoked takeover from the DR site, regardless of the
    /// current lease.
    pub async fn promote(&self) -> Result<()> {
        if self.config.role != Role::Dr {
            return Err(Error::PreconditionError(
                "promote runs on the dr site; use failback on the primary".into(),
            ));
        }
        self.write_owner(Owner::Dr).await?;
        info!(record = %self.config.record, "promoted dr to active");
        Ok(())
    }

    /// Operator-invoked restoration of the primary as active. Never
    /// performed automatically.
    pub async fn failback(&self) -> Result<()> {
        if self.config.role != Role::Primary {
            return Err(Error::PreconditionError(
                "failback runs on the primary site; use promote on the dr".into(),
            ));
        }
        self.write_owner(Owner::Primary).await?;
        info!(record = %self.config.record, "failed back to primary");
        Ok(())
    }

    /// Read and summarize the current records. Never fails; read errors
    /// surface as UNKNOWN fields.
    pub async fn show(&self) -> LeaseSummary {
        let now = self.clock.now_unix();
        let mut summary = LeaseSummary {
            record: self.config.record.clone(),
            a: None,
            owner: None,
            expires_at: None,
            expires_at_utc: None,
            time_remaining_seconds: None,
            read_error: None,
        };
        match self.backend.get_records().await {
            Err(e) => {
                summary.owner = Some("UNKNOWN".into());
                summary.read_error = Some(e.to_string());
            }
            Ok(snapshot) => {
                summary.a = snapshot.a;
                if let Some(txt) = snapshot.txt {
                    match Lease::parse(&txt) {
                        Ok(lease) => {
                            summary.owner = Some(lease.owner.to_string());
                            summary.expires_at = Some(lease.expires_at);
                            summary.expires_at_utc =
                                chrono::DateTime::from_timestamp(lease.expires_at as i64, 0)
                                    .map(|dt| dt.to_rfc3339());
                            summary.time_remaining_seconds = Some(lease.remaining(now));
                        }
                        Err(e) => {
                            summary.owner = Some("UNKNOWN".into());
                            summary.read_error = Some(e.to_string());
                        }
                    }
                }
            }
        }
        summary
    }

    /// Enter the loop for the configured role, until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        match self.config.role {
            Role::Primary => self.run_primary(shutdown).await,
            Role::Dr => {
                let health_config = self.config.health.as_ref().ok_or_else(|| {
                    Error::ConfigError("dr role requires a health oracle".into())
                })?;
                let oracle = health::from_config(health_config)?;
                self.run_dr(oracle, shutdown).await
            }
        }
    }

    /// Primary renewal loop: best-effort writes, no reads. A failed write
    /// only bumps a counter; the next interval re-asserts intent.
    pub async fn run_primary(&self, shutdown: CancellationToken) -> Result<()> {
        info!(
            record = %self.config.record,
            interval = self.config.update_interval,
            lease_ttl = self.config.lease_ttl,
            "starting primary renewal loop"
        );
        let mut consecutive_failures = 0u32;
        loop {
            match self.write_owner(Owner::Primary).await {
                Ok(()) => {
                    if consecutive_failures > 0 {
                        info!(after = consecutive_failures, "lease renewal recovered");
                    }
                    consecutive_failures = 0;
                    metrics::RENEWALS.inc();
                    metrics::LEASE_SECONDS_REMAINING.set(self.config.lease_ttl as i64);
                    debug!("lease renewed");
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(
                        error = %e,
                        consecutive = consecutive_failures,
                        "lease renewal failed"
                    );
                }
            }
            if self.pause(&shutdown).await {
                break;
            }
        }
        info!("primary renewal loop stopped");
        Ok(())
    }

    /// DR loop: one fully ordered decision per interval.
    pub async fn run_dr(
        &self,
        mut oracle: Box<dyn HealthCheck>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        info!(
            record = %self.config.record,
            interval = self.config.update_interval,
            fail_threshold = self.config.fail_threshold,
            "starting dr standby loop"
        );
        let mut state = DrState::default();
        loop {
            let verdict = oracle.check().await;
            let now = self.clock.now_unix();

            let lease_view = if decision::wants_lease_read(
                &state,
                self.config.fail_threshold,
                verdict,
            ) {
                Some(self.read_lease_view(now).await)
            } else {
                None
            };

            let action = decision::evaluate(
                &mut state,
                self.config.fail_threshold,
                self.config.self_owner(),
                now,
                verdict,
                lease_view.as_ref(),
            );
            metrics::FAILURE_STREAK.set(state.failure_streak as i64);
            self.act(&mut state, action).await;

            if self.pause(&shutdown).await {
                break;
            }
        }
        info!("dr loop stopped");
        Ok(())
    }

    async fn act(&self, state: &mut DrState, action: Action) {
        match action {
            Action::Idle => debug!(phase = ?state.phase, "healthy; nothing to do"),
            Action::Wait(WaitReason::BelowThreshold) => debug!(
                streak = state.failure_streak,
                threshold = self.config.fail_threshold,
                "failure streak below threshold"
            ),
            Action::Wait(WaitReason::LeaseValid) => info!("waiting for lease expiry"),
            Action::Wait(WaitReason::LeaseUnreadable) => {
                warn!("lease unreadable; holding position")
            }
            Action::Renew => match self.write_owner(Owner::Dr).await {
                Ok(()) => {
                    metrics::RENEWALS.inc();
                    metrics::LEASE_SECONDS_REMAINING.set(self.config.lease_ttl as i64);
                    debug!("renewed own lease");
                }
                Err(e) => warn!(error = %e, "lease renewal failed"),
            },
            Action::TakeOver => match self.write_owner(Owner::Dr).await {
                Ok(()) => {
                    state.phase = DrPhase::Active;
                    metrics::TAKEOVERS.inc();
                    warn!(
                        record = %self.config.record,
                        ip = %self.config.dr_ip,
                        "took over as active site"
                    );
                }
                Err(e) => warn!(error = %e, "takeover write failed; retrying next interval"),
            },
            Action::StandDown => {
                info!("lease reclaimed by peer; standing down");
            }
        }
    }

    /// Read the records and fold them into the decision procedure's view.
    /// Read failures and malformed TXT are logged here, once.
    async fn read_lease_view(&self, now: u64) -> LeaseView {
        match self.backend.get_records().await {
            Err(e) => {
                warn!(error = %e, "backend read failed; failing closed");
                LeaseView::Unreadable
            }
            Ok(snapshot) => match snapshot.txt {
                None => LeaseView::Absent,
                Some(txt) => match Lease::parse(&txt) {
                    Ok(lease) => {
                        metrics::LEASE_SECONDS_REMAINING.set(lease.remaining(now) as i64);
                        LeaseView::Held(lease)
                    }
                    Err(e) => {
                        warn!(error = %e, "treating malformed lease as absent");
                        LeaseView::Absent
                    }
                },
            },
        }
    }

    /// Interval sleep, interruptible by shutdown. Returns true when the
    /// loop should exit.
    async fn pause(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => true,
            _ = tokio::time::sleep(Duration::from_secs(self.config.update_interval)) => false,
        }
    }
}

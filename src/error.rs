//! Error types for the failover daemon
//!
//! One crate-level error enum; loop code catches and logs these rather than
//! letting them terminate the process. Backend errors carry the provider's
//! own classification so callers can decide whether a retry is worthwhile.

use crate::dns::BackendError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the coordinator, watcher, and their collaborators.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration. Terminates the process at startup
    /// with exit code 2.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A DNS backend read failed. On the DR side the current iteration
    /// fails closed (no takeover).
    #[error("backend read failed: {0}")]
    BackendReadError(#[source] BackendError),

    /// A DNS backend write failed. Never causes a role change; the next
    /// iteration re-asserts intent.
    #[error("backend write failed: {0}")]
    BackendWriteError(#[source] BackendError),

    /// Health probe target unreachable or its response unparseable. Mapped
    /// to an `Unknown` verdict by the oracle.
    #[error("health probe failed: {0}")]
    HealthProbeError(String),

    /// TXT record present but not of the form `owner=<role> exp=<unix>`.
    /// Treated as an absent lease for decision purposes.
    #[error("lease record malformed: {0}")]
    LeaseParseError(String),

    /// Worker start/stop command failed; the watcher retries next tick.
    #[error("worker control failed: {0}")]
    WorkerControlError(String),

    /// The coordinating name could not be resolved; the watcher preserves
    /// the current worker state and retries next tick.
    #[error("resolution failed: {0}")]
    ResolveError(String),

    /// An operator command was refused because its precondition does not
    /// hold (e.g. `init` over a live foreign lease). Exit code 4.
    #[error("precondition not met: {0}")]
    PreconditionError(String),
}

impl Error {
    /// Process exit code for this error when it reaches a binary's `main`.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ConfigError(_) => 2,
            Error::BackendReadError(_) | Error::BackendWriteError(_) => 3,
            Error::PreconditionError(_) => 4,
            _ => 1,
        }
    }
}

//! DNS backend abstraction
//!
//! The coordinating state lives in one A record and one TXT record at a
//! configured fully qualified name; the DNS system is the source of truth
//! and the only resource shared between the two sites. A backend adapter
//! reads and replaces that record pair. Where the provider offers an atomic
//! multi-record change set it must be used; otherwise the A record is
//! written before the TXT record, so an interrupted pair leaves the lease
//! metadata on the old owner and the next iteration re-evaluates.
//!
//! Adapters are selected at startup from `DNS_PROVIDER` through a static
//! registry; no dynamic loading.

mod cloudflare;
mod rfc2136;
mod route53;
mod script;

pub use cloudflare::CloudflareBackend;
pub use rfc2136::Rfc2136Backend;
pub use route53::Route53Backend;
pub use script::ScriptBackend;

use std::net::Ipv4Addr;

use async_trait::async_trait;

use crate::config::{self, Config};
use crate::error::{Error, Result};
use crate::lease::Owner;

/// Provider-classified backend failure.
///
/// `Network` covers everything transient (timeouts, 5xx, unreachable
/// servers) and is worth retrying on the next iteration. `Auth` is not
/// retryable and is surfaced once per occurrence.
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("network failure: {0}")]
    Network(String),
    #[error("record or zone not found: {0}")]
    NotFound(String),
    #[error("conflicting change: {0}")]
    Conflict(String),
}

/// Raw record pair as read from the provider. TXT parsing into a lease
/// happens in [`crate::lease`], not here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordSnapshot {
    pub a: Option<Ipv4Addr>,
    pub txt: Option<String>,
}

/// Read/write access to the coordinating record pair.
#[async_trait]
pub trait DnsBackend: Send + Sync {
    /// Idempotent replace of the A and TXT records. Implementations either
    /// apply both atomically or write A first, and never report success on
    /// a partially applied pair.
    async fn set_records(
        &self,
        ip: Ipv4Addr,
        owner: Owner,
        exp_unix: u64,
        ttl: u32,
    ) -> std::result::Result<(), BackendError>;

    /// Current values at the configured name; `None` per record when it
    /// does not exist.
    async fn get_records(&self) -> std::result::Result<RecordSnapshot, BackendError>;
}

/// Build the adapter selected by `DNS_PROVIDER`.
pub async fn from_provider(config: &Config) -> Result<Box<dyn DnsBackend>> {
    match config.provider.as_str() {
        "route53" => Ok(Box::new(Route53Backend::from_env(&config.record).await?)),
        "cloudflare" => Ok(Box::new(CloudflareBackend::from_env(&config.record)?)),
        "rfc2136" => Ok(Box::new(Rfc2136Backend::from_env(
            &config.zone,
            &config.record,
        )?)),
        "script" => Ok(Box::new(ScriptBackend::from_env(
            &config.zone,
            &config.record,
        )?)),
        other => Err(Error::ConfigError(format!(
            "unknown DNS_PROVIDER {other:?} (expected route53, cloudflare, rfc2136, or script)"
        ))),
    }
}

/// Check that the environment carries what the selected provider needs,
/// without touching the network. Used by `validate`.
pub fn validate_provider_env(provider: &str) -> Result<()> {
    match provider {
        "route53" => {
            config::required("ROUTE53_ZONE_ID")?;
        }
        "cloudflare" => {
            config::required("CLOUDFLARE_API_TOKEN")?;
            config::required("CLOUDFLARE_ZONE_ID")?;
        }
        "rfc2136" => {
            config::required("RFC2136_SERVER")?;
            // TSIG is optional, but half a key pair is a config mistake.
            let name = config::optional("RFC2136_TSIG_NAME");
            let secret = config::optional("RFC2136_TSIG_SECRET");
            if name.is_some() != secret.is_some() {
                return Err(Error::ConfigError(
                    "RFC2136_TSIG_NAME and RFC2136_TSIG_SECRET must be set together".into(),
                ));
            }
        }
        "script" => {
            config::required("SCRIPT_WRITE_CMD")?;
            config::required("SCRIPT_READ_CMD")?;
        }
        other => {
            return Err(Error::ConfigError(format!(
                "unknown DNS_PROVIDER {other:?}"
            )))
        }
    }
    Ok(())
}

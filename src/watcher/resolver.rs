//! A-record resolution for the watcher
//!
//! The watcher only ever asks one question: which IPv4 address does the
//! coordinating name point at right now. Behind a trait so tests can feed
//! canned answers. The direct variant queries a configured authoritative
//! server with caching disabled, sidestepping stale local resolver caches
//! during a failover.

use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::{Resolver, TokioResolver};

use crate::error::{Error, Result};

/// Resolve the coordinating FQDN to its A record.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve_a(&self, fqdn: &str) -> Result<Ipv4Addr>;
}

/// The operating system's resolver.
#[derive(Debug, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolve for SystemResolver {
    async fn resolve_a(&self, fqdn: &str) -> Result<Ipv4Addr> {
        let mut addrs = tokio::net::lookup_host((fqdn, 0))
            .await
            .map_err(|e| Error::ResolveError(format!("resolve {fqdn}: {e}")))?;
        addrs
            .find_map(|addr| match addr.ip() {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .ok_or_else(|| Error::ResolveError(format!("{fqdn} has no A record")))
    }
}

/// Queries one configured server directly, no caching.
#[derive(Debug)]
pub struct DirectResolver {
    resolver: TokioResolver,
}

impl DirectResolver {
    pub fn new(server: IpAddr) -> Self {
        let config = ResolverConfig::from_parts(
            None,
            Vec::new(),
            NameServerConfigGroup::from_ips_clear(&[server], 53, true),
        );
        let mut opts = ResolverOpts::default();
        opts.cache_size = 0;
        let resolver = Resolver::builder_with_config(config, TokioConnectionProvider::default())
            .with_options(opts)
            .build();
        Self { resolver }
    }
}

#[async_trait]
impl Resolve for DirectResolver {
    async fn resolve_a(&self, fqdn: &str) -> Result<Ipv4Addr> {
        let lookup = self
            .resolver
            .ipv4_lookup(fqdn)
            .await
            .map_err(|e| Error::ResolveError(format!("resolve {fqdn}: {e}")))?;
        lookup
            .iter()
            .next()
            .map(|a| a.0)
            .ok_or_else(|| Error::ResolveError(format!("{fqdn} has no A record")))
    }
}

//! Process configuration
//!
//! Both binaries are configured entirely through environment variables and
//! hold an immutable config struct for the process lifetime. Parsing errors
//! are reported as `ConfigError` (exit code 2), named after the variable
//! that failed.

use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::lease::Owner;

/// Default lease lifetime in seconds.
pub const DEFAULT_LEASE_TTL: u64 = 60;
/// Default coordinator loop cadence in seconds.
pub const DEFAULT_UPDATE_INTERVAL: u64 = 10;
/// Default consecutive-failure threshold before lease inspection.
pub const DEFAULT_FAIL_THRESHOLD: u32 = 3;
/// Default A/TXT record TTL in seconds (kept short so clients re-resolve).
pub const DEFAULT_DNS_TTL: u32 = 30;
/// Default watcher cadence in seconds.
pub const DEFAULT_CHECK_INTERVAL: u64 = 15;
/// Graceful stop deadline handed to the worker controller, in seconds.
pub const STOP_GRACE_SECONDS: u64 = 10;

/// Read a required environment variable.
pub fn required(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::ConfigError(format!("{name} must be set")))
        .and_then(|v| {
            if v.trim().is_empty() {
                Err(Error::ConfigError(format!("{name} must not be empty")))
            } else {
                Ok(v)
            }
        })
}

/// Read an optional environment variable; empty counts as unset.
pub fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse a required environment variable.
pub fn required_parse<T: FromStr>(name: &str) -> Result<T> {
    required(name)?
        .parse()
        .map_err(|_| Error::ConfigError(format!("{name} has an invalid value")))
}

/// Read and parse an environment variable, falling back to `default` when
/// unset. A set-but-unparseable value is an error, not a silent fallback.
pub fn parse_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match optional(name) {
        Some(v) => v
            .parse()
            .map_err(|_| Error::ConfigError(format!("{name} has an invalid value"))),
        None => Ok(default),
    }
}

/// Which coordinator loop this process runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Primary,
    Dr,
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(Role::Primary),
            "dr" => Ok(Role::Dr),
            other => Err(Error::ConfigError(format!(
                "ROLE must be 'primary' or 'dr', got {other:?}"
            ))),
        }
    }
}

/// Health oracle selection, DR side only.
#[derive(Clone, Debug)]
pub enum HealthConfig {
    /// TCP-connect probe against the peer site.
    Tcp {
        host: String,
        port: u16,
        timeout: Duration,
    },
    /// Metric-liveness probe: a monotonically non-decreasing counter
    /// scraped from a Prometheus text exposition.
    Metrics {
        url: String,
        metric: String,
        stale_count: u32,
        timeout: Duration,
    },
}

impl HealthConfig {
    fn from_env() -> Result<HealthConfig> {
        let timeout = Duration::from_secs(parse_or("HEALTH_TIMEOUT", 5u64)?);
        match required("HEALTH_MODE")?.to_ascii_lowercase().as_str() {
            "tcp" => Ok(HealthConfig::Tcp {
                host: required("HEALTH_HOST")?,
                port: required_parse("HEALTH_PORT")?,
                timeout,
            }),
            "metrics" => Ok(HealthConfig::Metrics {
                url: required("HEALTH_URL")?,
                metric: required("HEALTH_METRIC")?,
                stale_count: parse_or("HEALTH_STALE_COUNT", 3u32)?,
                timeout,
            }),
            other => Err(Error::ConfigError(format!(
                "HEALTH_MODE must be 'tcp' or 'metrics', got {other:?}"
            ))),
        }
    }

    /// Stale-count guard for the worst-case takeover bound; 1 for the TCP
    /// variant, which has no staleness window.
    pub fn stale_count(&self) -> u32 {
        match self {
            HealthConfig::Tcp { .. } => 1,
            HealthConfig::Metrics { stale_count, .. } => *stale_count,
        }
    }
}

/// Immutable coordinator configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub role: Role,
    pub provider: String,
    pub zone: String,
    pub record: String,
    pub dns_ttl: u32,
    pub primary_ip: Ipv4Addr,
    pub dr_ip: Ipv4Addr,
    pub lease_ttl: u64,
    pub update_interval: u64,
    pub fail_threshold: u32,
    /// Present whenever the role is DR.
    pub health: Option<HealthConfig>,
    /// Optional `host:port` for the self-metrics endpoint.
    pub metrics_listen: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        let role: Role = required_parse("ROLE")?;
        let health = match role {
            Role::Dr => Some(HealthConfig::from_env()?),
            Role::Primary => None,
        };
        let config = Config {
            role,
            provider: required("DNS_PROVIDER")?.to_ascii_lowercase(),
            zone: required("DNS_ZONE")?,
            record: required("DNS_RECORD")?,
            dns_ttl: parse_or("DNS_TTL", DEFAULT_DNS_TTL)?,
            primary_ip: required_parse("PRIMARY_IP")?,
            dr_ip: required_parse("DR_IP")?,
            lease_ttl: parse_or("LEASE_TTL", DEFAULT_LEASE_TTL)?,
            update_interval: parse_or("UPDATE_INTERVAL", DEFAULT_UPDATE_INTERVAL)?,
            fail_threshold: parse_or("FAIL_THRESHOLD", DEFAULT_FAIL_THRESHOLD)?,
            health,
            metrics_listen: optional("METRICS_LISTEN"),
        };
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if self.lease_ttl == 0 || self.update_interval == 0 {
            return Err(Error::ConfigError(
                "LEASE_TTL and UPDATE_INTERVAL must be positive".into(),
            ));
        }
        if self.update_interval >= self.lease_ttl {
            return Err(Error::ConfigError(format!(
                "UPDATE_INTERVAL ({}) must be shorter than LEASE_TTL ({}) or the lease \
                 expires between renewals",
                self.update_interval, self.lease_ttl
            )));
        }
        if self.fail_threshold == 0 {
            return Err(Error::ConfigError("FAIL_THRESHOLD must be positive".into()));
        }
        if self.primary_ip == self.dr_ip {
            return Err(Error::ConfigError(
                "PRIMARY_IP and DR_IP must differ".into(),
            ));
        }
        Ok(())
    }

    /// The lease owner token this site writes for itself.
    pub fn self_owner(&self) -> Owner {
        match self.role {
            Role::Primary => Owner::Primary,
            Role::Dr => Owner::Dr,
        }
    }

    /// This site's address.
    pub fn self_ip(&self) -> Ipv4Addr {
        match self.role {
            Role::Primary => self.primary_ip,
            Role::Dr => self.dr_ip,
        }
    }

    /// The address belonging to `owner`.
    pub fn ip_of(&self, owner: Owner) -> Ipv4Addr {
        match owner {
            Owner::Primary => self.primary_ip,
            Owner::Dr => self.dr_ip,
        }
    }
}

/// Worker controller selection for the watcher.
#[derive(Clone, Debug)]
pub enum WorkerConfig {
    /// Start/stop a named container through the local container runtime.
    Container { runtime: String, name: String },
    /// Scale a named Kubernetes Deployment between 0 and 1 replicas.
    Deployment { namespace: String, name: String },
}

/// Immutable watcher configuration.
#[derive(Clone, Debug)]
pub struct WatcherConfig {
    /// The coordinating FQDN whose A record designates the active site.
    pub record: String,
    /// This site's address; the worker runs only while the A record
    /// points here.
    pub my_ip: Ipv4Addr,
    pub check_interval: u64,
    /// When set, queries go straight to this server instead of the system
    /// resolver, bypassing local caches.
    pub dns_server: Option<IpAddr>,
    pub worker: WorkerConfig,
}

impl WatcherConfig {
    pub fn from_env() -> Result<WatcherConfig> {
        let worker = match required("WORKER_MODE")?.to_ascii_lowercase().as_str() {
            "container" => WorkerConfig::Container {
                runtime: parse_or("CONTAINER_RUNTIME", "docker".to_string())?,
                name: required("CONTAINER_NAME")?,
            },
            "deployment" => WorkerConfig::Deployment {
                namespace: required("DEPLOY_NAMESPACE")?,
                name: required("DEPLOY_NAME")?,
            },
            other => {
                return Err(Error::ConfigError(format!(
                    "WORKER_MODE must be 'container' or 'deployment', got {other:?}"
                )))
            }
        };
        let dns_server = match optional("DNS_SERVER") {
            Some(v) => Some(v.parse().map_err(|_| {
                Error::ConfigError("DNS_SERVER must be an IP address".into())
            })?),
            None => None,
        };
        let my_ip: Ipv4Addr = required_parse("MY_IP")?;
        // When the coordinator's site addresses are configured alongside the
        // watcher, MY_IP must be one of them; anything else means the two
        // processes disagree about this site's identity.
        let known_sites: Vec<Ipv4Addr> = ["PRIMARY_IP", "DR_IP"]
            .iter()
            .filter_map(|key| optional(key))
            .filter_map(|v| v.parse().ok())
            .collect();
        if !known_sites.is_empty() && !known_sites.contains(&my_ip) {
            return Err(Error::ConfigError(
                "MY_IP must equal PRIMARY_IP or DR_IP".into(),
            ));
        }
        Ok(WatcherConfig {
            record: required("DNS_RECORD")?,
            my_ip,
            check_interval: parse_or("OTEL_CHECK_INTERVAL", DEFAULT_CHECK_INTERVAL)?,
            dns_server,
            worker,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global; serialize the tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "ROLE",
            "DNS_PROVIDER",
            "DNS_ZONE",
            "DNS_RECORD",
            "DNS_TTL",
            "PRIMARY_IP",
            "DR_IP",
            "LEASE_TTL",
            "UPDATE_INTERVAL",
            "FAIL_THRESHOLD",
            "HEALTH_MODE",
            "HEALTH_HOST",
            "HEALTH_PORT",
            "HEALTH_TIMEOUT",
            "HEALTH_URL",
            "HEALTH_METRIC",
            "HEALTH_STALE_COUNT",
            "METRICS_LISTEN",
            "DNS_SERVER",
            "MY_IP",
            "OTEL_CHECK_INTERVAL",
            "WORKER_MODE",
            "CONTAINER_NAME",
            "CONTAINER_RUNTIME",
            "DEPLOY_NAMESPACE",
            "DEPLOY_NAME",
        ] {
            std::env::remove_var(key);
        }
    }

    fn set_primary_env() {
        std::env::set_var("ROLE", "primary");
        std::env::set_var("DNS_PROVIDER", "script");
        std::env::set_var("DNS_ZONE", "example.net");
        std::env::set_var("DNS_RECORD", "collector.example.net");
        std::env::set_var("PRIMARY_IP", "10.0.1.10");
        std::env::set_var("DR_IP", "10.0.2.10");
    }

    #[test]
    fn primary_config_uses_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        set_primary_env();

        let config = Config::from_env().unwrap();
        assert_eq!(config.role, Role::Primary);
        assert_eq!(config.lease_ttl, DEFAULT_LEASE_TTL);
        assert_eq!(config.update_interval, DEFAULT_UPDATE_INTERVAL);
        assert_eq!(config.fail_threshold, DEFAULT_FAIL_THRESHOLD);
        assert_eq!(config.self_owner(), Owner::Primary);
        assert_eq!(config.self_ip(), "10.0.1.10".parse::<Ipv4Addr>().unwrap());
        assert!(config.health.is_none());
    }

    #[test]
    fn dr_role_requires_health_mode() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        set_primary_env();
        std::env::set_var("ROLE", "dr");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));

        std::env::set_var("HEALTH_MODE", "tcp");
        std::env::set_var("HEALTH_HOST", "10.0.1.10");
        std::env::set_var("HEALTH_PORT", "13133");
        let config = Config::from_env().unwrap();
        assert!(matches!(config.health, Some(HealthConfig::Tcp { .. })));
        assert_eq!(config.self_owner(), Owner::Dr);
    }

    #[test]
    fn interval_must_undercut_lease_ttl() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        set_primary_env();
        std::env::set_var("LEASE_TTL", "10");
        std::env::set_var("UPDATE_INTERVAL", "10");

        assert!(Config::from_env().is_err());
    }

    #[test]
    fn unparseable_value_is_an_error_not_a_fallback() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        set_primary_env();
        std::env::set_var("LEASE_TTL", "sixty");

        assert!(Config::from_env().is_err());
    }

    #[test]
    fn watcher_config_container_mode() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("DNS_RECORD", "collector.example.net");
        std::env::set_var("MY_IP", "10.0.2.10");
        std::env::set_var("WORKER_MODE", "container");
        std::env::set_var("CONTAINER_NAME", "otel-collector");

        let config = WatcherConfig::from_env().unwrap();
        assert_eq!(config.check_interval, DEFAULT_CHECK_INTERVAL);
        assert!(config.dns_server.is_none());
        match config.worker {
            WorkerConfig::Container { runtime, name } => {
                assert_eq!(runtime, "docker");
                assert_eq!(name, "otel-collector");
            }
            other => panic!("unexpected worker config: {other:?}"),
        }
    }

    #[test]
    fn watcher_my_ip_must_match_a_site_address() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("DNS_RECORD", "collector.example.net");
        std::env::set_var("PRIMARY_IP", "10.0.1.10");
        std::env::set_var("DR_IP", "10.0.2.10");
        std::env::set_var("MY_IP", "10.0.9.99");
        std::env::set_var("WORKER_MODE", "container");
        std::env::set_var("CONTAINER_NAME", "otel-collector");

        assert!(WatcherConfig::from_env().is_err());

        std::env::set_var("MY_IP", "10.0.2.10");
        assert!(WatcherConfig::from_env().is_ok());
    }

    #[test]
    fn watcher_config_rejects_bad_dns_server() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("DNS_RECORD", "collector.example.net");
        std::env::set_var("MY_IP", "10.0.2.10");
        std::env::set_var("WORKER_MODE", "deployment");
        std::env::set_var("DEPLOY_NAMESPACE", "telemetry");
        std::env::set_var("DEPLOY_NAME", "otel-collector");
        std::env::set_var("DNS_SERVER", "ns1.example.net");

        assert!(WatcherConfig::from_env().is_err());
    }
}

//! TCP-connect health probe

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{HealthCheck, HealthStatus};

/// Opens a TCP connection to the target each call. A completed handshake is
/// healthy; refused or timed-out connects are unhealthy; anything else
/// (resolver failures, odd socket errors) is unknown. Holds no state
/// between calls.
#[derive(Debug)]
pub struct TcpHealthCheck {
    addr: String,
    connect_timeout: Duration,
}

impl TcpHealthCheck {
    pub fn new(host: String, port: u16, connect_timeout: Duration) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            connect_timeout,
        }
    }
}

#[async_trait]
impl HealthCheck for TcpHealthCheck {
    async fn check(&mut self) -> HealthStatus {
        match timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_stream)) => {
                debug!(addr = %self.addr, "tcp probe connected");
                HealthStatus::Healthy
            }
            Ok(Err(e)) => match e.kind() {
                ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::TimedOut => {
                    warn!(addr = %self.addr, error = %e, "tcp probe failed");
                    HealthStatus::Unhealthy
                }
                _ => {
                    warn!(addr = %self.addr, error = %e, "tcp probe errored");
                    HealthStatus::Unknown
                }
            },
            Err(_) => {
                warn!(addr = %self.addr, timeout = ?self.connect_timeout, "tcp probe timed out");
                HealthStatus::Unhealthy
            }
        }
    }
}

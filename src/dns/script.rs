//! Script backend adapter
//!
//! Escape hatch for DNS systems without a native adapter: a pair of
//! operator-supplied programs. The write program receives the new record
//! values as positional arguments and environment variables and signals
//! failure with a nonzero exit. The read program prints a two-field JSON
//! object `{"A": <string|null>, "TXT": <string|null>}` on stdout and has a
//! hard 30-second wall-time limit.

use std::net::Ipv4Addr;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{BackendError, DnsBackend, RecordSnapshot};
use crate::config;
use crate::error::Result;
use crate::lease::{Lease, Owner};

const SCRIPT_DEADLINE: Duration = Duration::from_secs(30);

pub struct ScriptBackend {
    write_cmd: String,
    read_cmd: String,
    zone: String,
    record: String,
}

#[derive(Debug, Deserialize)]
struct ScriptRecords {
    #[serde(rename = "A")]
    a: Option<String>,
    #[serde(rename = "TXT")]
    txt: Option<String>,
}

impl ScriptBackend {
    pub fn from_env(zone: &str, record: &str) -> Result<Self> {
        Ok(Self {
            write_cmd: config::required("SCRIPT_WRITE_CMD")?,
            read_cmd: config::required("SCRIPT_READ_CMD")?,
            zone: zone.to_string(),
            record: record.to_string(),
        })
    }

    pub fn new(write_cmd: String, read_cmd: String, zone: String, record: String) -> Self {
        Self {
            write_cmd,
            read_cmd,
            zone,
            record,
        }
    }

    async fn run(
        &self,
        program: &str,
        args: &[String],
        extra_env: &[(&str, String)],
    ) -> std::result::Result<std::process::Output, BackendError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .env("FAILOVER_ZONE", &self.zone)
            .env("FAILOVER_RECORD", &self.record)
            .envs(extra_env.iter().map(|(k, v)| (*k, v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| BackendError::Network(format!("failed to spawn {program}: {e}")))?;

        match timeout(SCRIPT_DEADLINE, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(BackendError::Network(format!("{program} failed: {e}"))),
            Err(_) => Err(BackendError::Network(format!(
                "{program} exceeded the {}s deadline",
                SCRIPT_DEADLINE.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl DnsBackend for ScriptBackend {
    async fn set_records(
        &self,
        ip: Ipv4Addr,
        owner: Owner,
        exp_unix: u64,
        ttl: u32,
    ) -> std::result::Result<(), BackendError> {
        let args = [
            ip.to_string(),
            owner.to_string(),
            exp_unix.to_string(),
            ttl.to_string(),
        ];
        let env = [
            ("FAILOVER_IP", ip.to_string()),
            ("FAILOVER_OWNER", owner.to_string()),
            ("FAILOVER_EXPIRES", exp_unix.to_string()),
            ("FAILOVER_TTL", ttl.to_string()),
            ("FAILOVER_TXT", Lease::new(owner, exp_unix).to_txt()),
        ];
        let output = self.run(&self.write_cmd, &args, &env).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::Network(format!(
                "{} exited with {}: {}",
                self.write_cmd,
                output.status,
                stderr.trim()
            )));
        }
        debug!(record = %self.record, %ip, "script backend write succeeded");
        Ok(())
    }

    async fn get_records(&self) -> std::result::Result<RecordSnapshot, BackendError> {
        let output = self.run(&self.read_cmd, &[], &[]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::Network(format!(
                "{} exited with {}: {}",
                self.read_cmd,
                output.status,
                stderr.trim()
            )));
        }
        let records: ScriptRecords = serde_json::from_slice(&output.stdout).map_err(|e| {
            BackendError::Network(format!("{} printed invalid JSON: {e}", self.read_cmd))
        })?;
        Ok(RecordSnapshot {
            a: records.a.and_then(|v| v.parse().ok()),
            txt: records.txt,
        })
    }
}

//! Worker controllers
//!
//! The worker is the external telemetry-collection process the watcher
//! starts and stops to mirror the observed active site. Two controllers
//! share one idempotent interface: container lifecycle through the local
//! container runtime CLI, and replica count on a Kubernetes Deployment.
//! Both return only once the worker has observably reached the target
//! state or a deadline passes; a deadline is an error the watcher logs and
//! retries next tick.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, Patch, PatchParams};
use serde_json::json;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::WorkerConfig;
use crate::error::{Error, Result};

/// How long a single runtime CLI invocation may take.
const COMMAND_DEADLINE: Duration = Duration::from_secs(30);
/// How long to wait for the worker to reach the target state.
const CONVERGE_DEADLINE: Duration = Duration::from_secs(60);
/// Poll cadence while waiting for convergence.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Start/stop control over the worker process.
#[async_trait]
pub trait WorkerController: Send + Sync {
    /// Bring the worker up; a no-op when it is already running.
    async fn ensure_running(&self) -> Result<()>;

    /// Bring the worker down, allowing `grace_seconds` for a clean exit;
    /// a no-op when it is already stopped.
    async fn ensure_stopped(&self, grace_seconds: u64) -> Result<()>;
}

/// Build the controller selected by `WORKER_MODE`.
pub async fn from_config(config: &WorkerConfig) -> Result<Box<dyn WorkerController>> {
    match config {
        WorkerConfig::Container { runtime, name } => Ok(Box::new(ContainerController::new(
            runtime.clone(),
            name.clone(),
        ))),
        WorkerConfig::Deployment { namespace, name } => {
            let client = kube::Client::try_default().await.map_err(|e| {
                Error::ConfigError(format!("kubernetes client unavailable: {e}"))
            })?;
            Ok(Box::new(DeploymentController::new(
                Api::namespaced(client, namespace),
                name.clone(),
            )))
        }
    }
}

/// Controls a named container via the runtime CLI (`docker` or `podman`).
pub struct ContainerController {
    runtime: String,
    name: String,
}

impl ContainerController {
    pub fn new(runtime: String, name: String) -> Self {
        Self { runtime, name }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let mut command = Command::new(&self.runtime);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            Error::WorkerControlError(format!("failed to spawn {}: {e}", self.runtime))
        })?;
        let output = match timeout(COMMAND_DEADLINE, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::WorkerControlError(format!(
                    "{} {args:?} failed: {e}",
                    self.runtime
                )))
            }
            Err(_) => {
                return Err(Error::WorkerControlError(format!(
                    "{} {args:?} exceeded the {}s deadline",
                    self.runtime,
                    COMMAND_DEADLINE.as_secs()
                )))
            }
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::WorkerControlError(format!(
                "{} {args:?} exited with {}: {}",
                self.runtime,
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn is_running(&self) -> Result<bool> {
        let state = self
            .run(&["inspect", "-f", "{{.State.Running}}", &self.name])
            .await?;
        Ok(state == "true")
    }
}

#[async_trait]
impl WorkerController for ContainerController {
    async fn ensure_running(&self) -> Result<()> {
        if self.is_running().await? {
            debug!(container = %self.name, "worker already running");
            return Ok(());
        }
        self.run(&["start", &self.name]).await?;
        if !self.is_running().await? {
            return Err(Error::WorkerControlError(format!(
                "container {} did not reach running state",
                self.name
            )));
        }
        info!(container = %self.name, "worker started");
        Ok(())
    }

    async fn ensure_stopped(&self, grace_seconds: u64) -> Result<()> {
        if !self.is_running().await? {
            debug!(container = %self.name, "worker already stopped");
            return Ok(());
        }
        let grace = grace_seconds.to_string();
        self.run(&["stop", "-t", &grace, &self.name]).await?;
        if self.is_running().await? {
            return Err(Error::WorkerControlError(format!(
                "container {} still running after stop",
                self.name
            )));
        }
        info!(container = %self.name, "worker stopped");
        Ok(())
    }
}

/// Scales a named Deployment between 0 and 1 replicas.
pub struct DeploymentController {
    api: Api<Deployment>,
    name: String,
}

impl DeploymentController {
    pub fn new(api: Api<Deployment>, name: String) -> Self {
        Self { api, name }
    }

    async fn scale(&self, replicas: i32) -> Result<()> {
        let patch = json!({"spec": {"replicas": replicas}});
        self.api
            .patch(&self.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| {
                Error::WorkerControlError(format!("scale {} to {replicas}: {e}", self.name))
            })?;
        Ok(())
    }

    async fn ready_replicas(&self) -> Result<i32> {
        let deployment = self.api.get(&self.name).await.map_err(|e| {
            Error::WorkerControlError(format!("get deployment {}: {e}", self.name))
        })?;
        Ok(deployment
            .status
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0))
    }

    /// Poll until `target` ready replicas are reported or the deadline
    /// passes.
    async fn wait_for(&self, target: i32, deadline: Duration) -> Result<()> {
        let wait = async {
            loop {
                if self.ready_replicas().await? == target {
                    return Ok(());
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        match timeout(deadline, wait).await {
            Ok(result) => result,
            Err(_) => Err(Error::WorkerControlError(format!(
                "deployment {} did not reach {target} ready replicas within {}s",
                self.name,
                deadline.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl WorkerController for DeploymentController {
    async fn ensure_running(&self) -> Result<()> {
        if self.ready_replicas().await? >= 1 {
            debug!(deployment = %self.name, "worker already running");
            return Ok(());
        }
        self.scale(1).await?;
        self.wait_for(1, CONVERGE_DEADLINE).await?;
        info!(deployment = %self.name, "worker scaled up");
        Ok(())
    }

    async fn ensure_stopped(&self, grace_seconds: u64) -> Result<()> {
        if self.ready_replicas().await? == 0 {
            debug!(deployment = %self.name, "worker already stopped");
            return Ok(());
        }
        self.scale(0).await?;
        // Pod termination grace plus a margin for the status to settle.
        self.wait_for(0, Duration::from_secs(grace_seconds) + POLL_INTERVAL * 5)
            .await?;
        info!(deployment = %self.name, "worker scaled down");
        Ok(())
    }
}

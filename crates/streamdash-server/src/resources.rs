//! Per-server CPU/memory sampling through an external process.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use streamdash_core::resources::ResourceSnapshot;

use crate::config::ResourceMonitorConfig;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("failed to spawn resource monitor: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("resource monitor did not finish within {0:?}")]
    Timeout(Duration),
    #[error("resource monitor i/o failed: {0}")]
    Io(#[source] std::io::Error),
    #[error("resource monitor exited with {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },
    #[error("resource monitor printed invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Source of resource metrics for one live refresh.
#[async_trait]
pub trait ResourceMonitor: Send + Sync {
    async fn sample(&self) -> Result<ResourceSnapshot, MonitorError>;
}

/// Runs a command once per sample and parses its stdout as JSON. The child
/// is killed if it outlives the timeout.
#[derive(Debug, Clone)]
pub struct CommandResourceMonitor {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandResourceMonitor {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &ResourceMonitorConfig) -> Self {
        Self::new(
            config.command.clone(),
            config.args.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl ResourceMonitor for CommandResourceMonitor {
    async fn sample(&self) -> Result<ResourceSnapshot, MonitorError> {
        let child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(MonitorError::Spawn)?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| MonitorError::Timeout(self.timeout))?
            .map_err(MonitorError::Io)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MonitorError::Exit {
                code: output.status.code(),
                stderr: stderr.trim().chars().take(512).collect(),
            });
        }
        let value: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        Ok(ResourceSnapshot::from_value(&value))
    }
}

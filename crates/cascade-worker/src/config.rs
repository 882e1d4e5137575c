//! Worker configuration.

use cascade_core::protocol::StageDescriptor;
use cascade_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use sysinfo::System;

/// Worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker name, used in logs.
    #[serde(default = "default_name")]
    pub name: String,
    /// Coordinator base URL. When absent, the URL is read from `urifile`.
    #[serde(default)]
    pub coordinator_url: Option<String>,
    /// File the coordinator wrote its endpoint address to.
    #[serde(default)]
    pub urifile: Option<PathBuf>,
    /// Memory this worker can give a single stage, in gigabytes.
    #[serde(default = "detect_mem_gb")]
    pub mem_gb: f64,
    /// Processor slots this worker can give a single stage.
    #[serde(default = "detect_procs")]
    pub procs: u32,
    /// Seconds to sleep when the coordinator has nothing runnable.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Heartbeat interval in seconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Bind address for the shutdown listener.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

fn default_name() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "worker".to_string());
    format!("{}-{}", host, std::process::id())
}

fn detect_mem_gb() -> f64 {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0)
}

fn detect_procs() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

fn default_poll_interval() -> u64 {
    5
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            coordinator_url: None,
            urifile: None,
            mem_gb: detect_mem_gb(),
            procs: detect_procs(),
            poll_interval_secs: default_poll_interval(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Resource match: can this worker host the stage? The decision is the
    /// worker's; the coordinator dispatches resource-oblivious and relies
    /// on requeue when the answer is no.
    pub fn can_host(&self, descriptor: &StageDescriptor) -> bool {
        descriptor.mem_gb <= self.mem_gb && descriptor.procs <= self.procs
    }
}

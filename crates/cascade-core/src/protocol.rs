//! Wire types for the coordinator/worker protocol.
//!
//! Workers see the DAG only through these messages: they register, pull
//! stage indices, fetch descriptors, and report outcomes. The coordinator
//! serializes every operation against its scheduler state.

use crate::stage::Stage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Worker registration. The URI is the worker's callback address, used for
/// the shutdown call at pipeline termination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub worker_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// Number of workers registered after this call.
    pub registered: usize,
}

/// Result of a dispatch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchResponse {
    /// A stage was popped from the ready-queue and is now running.
    Stage { index: usize },
    /// Nothing runnable right now; poll again later.
    Idle,
    /// The pipeline is complete; the worker should exit its loop.
    Shutdown,
}

/// Everything a worker needs to host and execute one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDescriptor {
    pub index: usize,
    pub name: String,
    /// Rendered argument vector; absent for abstract stages.
    pub argv: Option<Vec<String>>,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    pub log_file: PathBuf,
    pub mem_gb: f64,
    pub procs: u32,
}

impl StageDescriptor {
    pub fn new(index: usize, stage: &Stage) -> Self {
        Self {
            index,
            name: stage.name().to_string(),
            argv: stage.argv().map(|a| a.to_vec()),
            inputs: stage.inputs().to_vec(),
            outputs: stage.outputs().to_vec(),
            log_file: stage.log_file().to_path_buf(),
            mem_gb: stage.mem_gb(),
            procs: stage.procs(),
        }
    }

    /// Mirror of the scheduler-side completeness rule, re-checked on the
    /// worker immediately before spawning.
    pub fn is_effectively_complete(&self) -> bool {
        self.outputs
            .iter()
            .chain(self.inputs.iter())
            .all(|p| p.exists())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedRequest {
    pub worker_uri: String,
}

/// Periodic worker health report. Observability only: the coordinator logs
/// stale workers but never reschedules their stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_uri: String,
    /// Index of the stage currently executing, if any.
    pub running: Option<usize>,
    pub cpu_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LoopResponse {
    /// True while any stage remains unprocessed.
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::ArgFragment;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dispatch_response_wire_format() {
        let json = serde_json::to_string(&DispatchResponse::Stage { index: 3 }).unwrap();
        assert_eq!(json, r#"{"status":"stage","index":3}"#);

        let parsed: DispatchResponse = serde_json::from_str(r#"{"status":"shutdown"}"#).unwrap();
        assert_eq!(parsed, DispatchResponse::Shutdown);
    }

    #[test]
    fn test_descriptor_from_stage() {
        let stage = Stage::command(&[
            ArgFragment::text("cp"),
            ArgFragment::input("/a"),
            ArgFragment::output("/b"),
        ])
        .unwrap()
        .with_mem(4.0)
        .with_procs(2);

        let descriptor = StageDescriptor::new(7, &stage);
        assert_eq!(descriptor.index, 7);
        assert_eq!(descriptor.name, "cp");
        assert_eq!(descriptor.argv.as_deref().unwrap(), &["cp", "/a", "/b"]);
        assert_eq!(descriptor.mem_gb, 4.0);
        assert_eq!(descriptor.procs, 2);
    }
}

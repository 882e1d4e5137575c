//! Pipeline stages.
//!
//! A stage is one externally-executed unit of work: a command line with
//! declared input and output files, a log file, and resource requirements.
//! Stages are immutable after registration; only their runtime status moves.

use crate::error::{Error, Result};
use crate::fragment::ArgFragment;
use chrono::Local;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Default memory allotted per stage, in gigabytes.
pub const DEFAULT_MEM_GB: f64 = 2.0;

/// Default number of processor slots per stage.
pub const DEFAULT_PROCS: u32 = 1;

/// Runtime status of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Unset,
    Runnable,
    Running,
    Finished,
    Failed,
}

/// What a stage actually is: a concrete command line, or a bare
/// declaration of files with no command of its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StagePayload {
    Command { argv: Vec<String> },
    Abstract,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    name: String,
    inputs: Vec<PathBuf>,
    outputs: Vec<PathBuf>,
    log_file: PathBuf,
    mem_gb: f64,
    procs: u32,
    status: StageStatus,
    payload: StagePayload,
}

impl Stage {
    /// Build a command stage from tagged fragments.
    ///
    /// Every fragment renders into one argv element; inputs, outputs, and
    /// the log file are derived by filtering. The stage name is the first
    /// argv element, and the log file defaults to
    /// `<command>.<iso-timestamp>.log` when no log fragment is given.
    pub fn command(fragments: &[ArgFragment]) -> Result<Self> {
        if fragments.is_empty() {
            return Err(Error::InvalidStage("empty argument vector".to_string()));
        }

        let mut argv = Vec::with_capacity(fragments.len());
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        let mut log_file = None;

        for fragment in fragments {
            match fragment {
                ArgFragment::Input(p) => inputs.push(p.clone()),
                ArgFragment::Output(p) => outputs.push(p.clone()),
                ArgFragment::Log(p) => log_file = Some(p.clone()),
                ArgFragment::Text(_) => {}
            }
            argv.push(fragment.render());
        }

        let name = argv[0].clone();
        let log_file = log_file.unwrap_or_else(|| default_log_file(&name));

        Ok(Self {
            name,
            inputs,
            outputs,
            log_file,
            mem_gb: DEFAULT_MEM_GB,
            procs: DEFAULT_PROCS,
            status: StageStatus::Unset,
            payload: StagePayload::Command { argv },
        })
    }

    /// Build an abstract stage: declared files only, no command.
    pub fn abstracted(
        name: impl Into<String>,
        inputs: Vec<PathBuf>,
        outputs: Vec<PathBuf>,
    ) -> Self {
        let name = name.into();
        let log_file = default_log_file(&name);
        Self {
            name,
            inputs,
            outputs,
            log_file,
            mem_gb: DEFAULT_MEM_GB,
            procs: DEFAULT_PROCS,
            status: StageStatus::Unset,
            payload: StagePayload::Abstract,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_mem(mut self, mem_gb: f64) -> Self {
        self.mem_gb = mem_gb;
        self
    }

    pub fn with_procs(mut self, procs: u32) -> Self {
        self.procs = procs;
        self
    }

    pub fn with_log(mut self, log_file: impl Into<PathBuf>) -> Self {
        self.log_file = log_file.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    pub fn mem_gb(&self) -> f64 {
        self.mem_gb
    }

    pub fn procs(&self) -> u32 {
        self.procs
    }

    pub fn status(&self) -> StageStatus {
        self.status
    }

    pub fn payload(&self) -> &StagePayload {
        &self.payload
    }

    /// The rendered argument vector, for command stages.
    pub fn argv(&self) -> Option<&[String]> {
        match &self.payload {
            StagePayload::Command { argv } => Some(argv),
            StagePayload::Abstract => None,
        }
    }

    pub fn is_command(&self) -> bool {
        matches!(self.payload, StagePayload::Command { .. })
    }

    pub fn is_finished(&self) -> bool {
        self.status == StageStatus::Finished
    }

    pub fn set_runnable(&mut self) {
        self.status = StageStatus::Runnable;
    }

    pub fn set_running(&mut self) {
        self.status = StageStatus::Running;
    }

    pub fn set_finished(&mut self) {
        self.status = StageStatus::Finished;
    }

    pub fn set_failed(&mut self) {
        self.status = StageStatus::Failed;
    }

    pub fn set_unset(&mut self) {
        self.status = StageStatus::Unset;
    }

    /// Stable identity fingerprint, used to deduplicate equal stages.
    ///
    /// Command stages hash their whitespace-joined argv; abstract stages
    /// hash their declared output paths followed by their input paths.
    pub fn identity(&self) -> String {
        let mut hasher = Sha256::new();
        match &self.payload {
            StagePayload::Command { argv } => {
                hasher.update(argv.join(" ").as_bytes());
            }
            StagePayload::Abstract => {
                for path in self.outputs.iter().chain(self.inputs.iter()) {
                    hasher.update(path.display().to_string().as_bytes());
                }
            }
        }
        hex::encode(hasher.finalize())
    }

    /// True when every declared output and input file already exists on
    /// disk. Missing inputs count against completeness: such a stage is
    /// treated as not-yet-runnable rather than done.
    pub fn is_effectively_complete(&self) -> bool {
        self.outputs
            .iter()
            .chain(self.inputs.iter())
            .all(|p| p.exists())
    }

    /// The rendered command line, as it appears in logs and stage listings.
    pub fn render(&self) -> String {
        match &self.payload {
            StagePayload::Command { argv } => argv.join(" "),
            StagePayload::Abstract => self.name.clone(),
        }
    }
}

fn default_log_file(name: &str) -> PathBuf {
    PathBuf::from(format!(
        "{}.{}.log",
        name,
        Local::now().format("%Y-%m-%dT%H:%M:%S%.6f")
    ))
}

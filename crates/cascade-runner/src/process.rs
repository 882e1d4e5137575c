//! Spawning stage commands on the local host.
//!
//! The runner treats a stage as "spawn this argv, stream stdout/stderr to
//! this log file, return the exit code". The log file starts with a host
//! and timestamp header followed by the rendered command; the child's
//! output is appended unaltered.

use cascade_core::protocol::StageDescriptor;
use cascade_core::{Error, Result};
use chrono::Local;
use std::fs::File;
use std::io::Write;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

/// Exit code reported when the command cannot be spawned at all.
const SPAWN_FAILURE_CODE: i32 = 127;

/// Outcome of executing one stage locally.
#[derive(Debug, Clone, Copy)]
pub struct StageOutcome {
    pub exit_code: i32,
    pub success: bool,
    pub duration_ms: u64,
    /// The stage's declared files already existed; nothing was spawned.
    pub skipped: bool,
}

/// Execute a command stage, writing its log file.
///
/// A stage whose declared inputs and outputs all exist is not spawned: the
/// skip is noted in the log and the stage counts as successful. A spawn
/// failure is a stage failure, not an error.
pub async fn execute_stage(descriptor: &StageDescriptor) -> Result<StageOutcome> {
    let start = std::time::Instant::now();
    let argv = descriptor.argv.as_deref().ok_or_else(|| {
        Error::InvalidStage(format!("stage {} has no command", descriptor.index))
    })?;

    let mut log = File::create(&descriptor.log_file)?;
    writeln!(
        log,
        "Running on: {} at {}",
        local_hostname(),
        Local::now().format("%Y-%m-%dT%H:%M:%S%.6f")
    )?;
    writeln!(log, "{}", argv.join(" "))?;
    log.flush()?;

    if descriptor.is_effectively_complete() {
        writeln!(log, "All declared files exist. Skipping stage.")?;
        info!(index = descriptor.index, "Stage already complete, not spawned");
        return Ok(StageOutcome {
            exit_code: 0,
            success: true,
            duration_ms: start.elapsed().as_millis() as u64,
            skipped: true,
        });
    }

    let status = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::from(log.try_clone()?))
        .stderr(Stdio::from(log.try_clone()?))
        .status()
        .await;

    let exit_code = match status {
        Ok(status) => status.code().unwrap_or(-1),
        Err(e) => {
            warn!(index = descriptor.index, error = %e, "Failed to spawn stage command");
            writeln!(log, "Failed to spawn: {}", e)?;
            SPAWN_FAILURE_CODE
        }
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    info!(
        index = descriptor.index,
        exit_code, duration_ms, "Stage process completed"
    );

    Ok(StageOutcome {
        exit_code,
        success: exit_code == 0,
        duration_ms,
        skipped: false,
    })
}

fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

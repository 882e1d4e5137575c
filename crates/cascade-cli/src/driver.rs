//! Driver flows behind the CLI commands.

use crate::commands::{QueueMode, ServeArgs, WorkerArgs};
use crate::manifest;
use anyhow::{Context, bail};
use cascade_core::Error;
use cascade_coordinator::{AppState, Coordinator};
use cascade_scheduler::{CheckpointStore, Scheduler, script};
use cascade_worker::{Worker, WorkerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Run the coordinator over a manifest. Returns the process exit code:
/// zero on full completion, nonzero when any stage failed.
pub async fn serve(args: ServeArgs) -> anyhow::Result<u8> {
    let mut dag = manifest::load(&args.manifest)
        .with_context(|| format!("loading manifest {}", args.manifest.display()))?;
    if dag.is_empty() {
        return Err(Error::EmptyPipeline.into());
    }

    if args.queue == QueueMode::ScriptOnly {
        dag.create_edges();
        dag.ensure_acyclic()?;
        let submit = args
            .submit_template
            .as_deref()
            .unwrap_or(script::DEFAULT_SUBMIT_COMMAND);
        let (lines, skipped) = script::batch_script(&dag, submit, &args.pipeline_name)?;
        std::fs::write(&args.script_out, lines.join("\n") + "\n")?;
        info!(
            skipped,
            path = %args.script_out.display(),
            "Batch submission script written"
        );
        return Ok(0);
    }

    let backup_dir = args
        .backup_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{}-backups", args.pipeline_name)));
    let store = CheckpointStore::create(&backup_dir)?;
    dag.print_stages(&args.pipeline_name, store.dir())?;

    let mut scheduler = if args.restart {
        if store.exists() {
            Scheduler::restore(store)?
        } else {
            warn!(dir = %backup_dir.display(), "No checkpoint found; starting fresh");
            Scheduler::new(dag).with_checkpoint(store)
        }
    } else {
        Scheduler::new(dag).with_checkpoint(store)
    };

    scheduler.initialize()?;
    scheduler.skip_completed_stages()?;

    if !scheduler.continue_loop() {
        info!("Every stage is already processed");
        return Ok(exit_code(&scheduler));
    }

    let state = Arc::new(AppState::new(scheduler));
    let urifile = if args.use_ns {
        None
    } else {
        Some(args.urifile.clone().unwrap_or_else(|| PathBuf::from("uri")))
    };
    let coordinator = Coordinator::bind(Arc::clone(&state), args.bind, urifile.as_deref()).await?;

    if args.queue == QueueMode::Batch {
        submit_batch_workers(&args, coordinator.uri()).await?;
    } else {
        spawn_local_workers(args.num_exec, coordinator.uri());
    }

    coordinator.serve().await?;

    let scheduler = state.scheduler.lock().await;
    Ok(exit_code(&scheduler))
}

/// Run a standalone worker.
pub async fn worker(args: WorkerArgs) -> anyhow::Result<u8> {
    let mut config = match &args.config {
        Some(path) => WorkerConfig::from_file(path)?,
        None => WorkerConfig::default(),
    };
    if args.uri.is_some() {
        config.coordinator_url = args.uri.clone();
    }
    if args.urifile.is_some() {
        config.urifile = args.urifile.clone();
    }
    if let Some(name) = args.name.clone() {
        config.name = name;
    }
    if let Some(mem) = args.mem {
        config.mem_gb = mem;
    }
    if let Some(procs) = args.procs {
        config.procs = procs;
    }
    if let Some(poll) = args.poll_secs {
        config.poll_interval_secs = poll;
    }

    Worker::new(config)?.run().await?;
    Ok(0)
}

fn exit_code(scheduler: &Scheduler) -> u8 {
    if scheduler.has_failures() { 1 } else { 0 }
}

fn spawn_local_workers(count: u32, uri: &str) {
    for i in 0..count {
        let config = WorkerConfig {
            name: format!("local-{}", i),
            coordinator_url: Some(uri.to_string()),
            poll_interval_secs: 1,
            ..WorkerConfig::default()
        };
        tokio::spawn(async move {
            match Worker::new(config) {
                Ok(worker) => {
                    if let Err(e) = worker.run().await {
                        error!(error = %e, "Worker exited with error");
                    }
                }
                Err(e) => error!(error = %e, "Failed to build worker"),
            }
        });
    }
    if count > 0 {
        info!(count, "Launched local workers");
    }
}

/// Submit workers through the external batch-submission command. The
/// command itself is an external collaborator; Cascade only invokes it.
async fn submit_batch_workers(args: &ServeArgs, uri: &str) -> anyhow::Result<()> {
    let template = args
        .submit_template
        .as_deref()
        .context("--queue batch requires --submit-template")?;
    let exe = std::env::current_exe()?;
    let count = args.num_exec.max(1);

    for i in 0..count {
        let command = format!("{} {} worker --uri {}", template, exe.display(), uri);
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .status()
            .await?;
        if !status.success() {
            bail!("batch submission failed for worker {}: {}", i, status);
        }
    }
    info!(count, "Submitted workers to the batch queue");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tokio::time::{Duration, timeout};

    fn serve_args(manifest: PathBuf, backup: PathBuf) -> ServeArgs {
        ServeArgs {
            manifest,
            num_exec: 1,
            queue: QueueMode::None,
            urifile: None,
            use_ns: true,
            pipeline_name: "test".to_string(),
            backup_dir: Some(backup),
            restart: false,
            bind: "127.0.0.1:0".parse().unwrap(),
            submit_template: None,
            script_out: PathBuf::from("batch_script"),
        }
    }

    fn write_manifest(path: &Path, body: &str) {
        std::fs::write(path, body).unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_linear_chain_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().display();
        let manifest_path = dir.path().join("pipeline.yaml");
        write_manifest(
            &manifest_path,
            &format!(
                r#"
stages:
  - args: ["touch", "out:{root}/x"]
    log: {root}/a.log
    mem: 0.1
  - args: ["cp", "in:{root}/x", "out:{root}/y"]
    log: {root}/b.log
    mem: 0.1
"#
            ),
        );

        let code = timeout(
            Duration::from_secs(60),
            serve(serve_args(manifest_path, dir.path().join("backups"))),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(code, 0);
        assert!(dir.path().join("x").exists());
        assert!(dir.path().join("y").exists());
        assert!(dir.path().join("a.log").exists());
        assert!(dir.path().join("b.log").exists());
        assert!(
            dir.path()
                .join("backups")
                .join("test-pipeline-stages.txt")
                .exists()
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failure_blocks_dependents_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().display();
        let manifest_path = dir.path().join("pipeline.yaml");
        write_manifest(
            &manifest_path,
            &format!(
                r#"
stages:
  - args: ["touch", "out:{root}/x"]
    log: {root}/a.log
    mem: 0.1
  - args: ["sh", "-c", "exit 1", "in:{root}/x", "out:{root}/z"]
    log: {root}/b.log
    mem: 0.1
  - args: ["cp", "in:{root}/z", "out:{root}/w"]
    log: {root}/c.log
    mem: 0.1
"#
            ),
        );

        let code = timeout(
            Duration::from_secs(60),
            serve(serve_args(manifest_path, dir.path().join("backups"))),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(code, 1);
        assert!(dir.path().join("x").exists());
        assert!(!dir.path().join("z").exists());
        // the blocked descendant never ran
        assert!(!dir.path().join("c.log").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_warm_start_skips_existing_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().display();
        std::fs::write(dir.path().join("x"), "already here").unwrap();

        let manifest_path = dir.path().join("pipeline.yaml");
        write_manifest(
            &manifest_path,
            &format!(
                r#"
stages:
  - args: ["sh", "-c", "exit 1", "out:{root}/x"]
    log: {root}/a.log
    mem: 0.1
  - args: ["cp", "in:{root}/x", "out:{root}/y"]
    log: {root}/b.log
    mem: 0.1
"#
            ),
        );

        // the producer would fail if dispatched; warm start must skip it
        let code = timeout(
            Duration::from_secs(60),
            serve(serve_args(manifest_path, dir.path().join("backups"))),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(code, 0);
        assert!(dir.path().join("y").exists());
        assert!(!dir.path().join("a.log").exists());
    }

    #[tokio::test]
    async fn test_script_only_writes_script_and_exits() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("pipeline.yaml");
        write_manifest(
            &manifest_path,
            r#"
stages:
  - args: ["touch", "out:/data/x"]
  - args: ["cp", "in:/data/x", "out:/data/y"]
"#,
        );

        let mut args = serve_args(manifest_path, dir.path().join("backups"));
        args.queue = QueueMode::ScriptOnly;
        args.script_out = dir.path().join("batch_script");
        args.submit_template = Some("qsub".to_string());

        let code = serve(args).await.unwrap();
        assert_eq!(code, 0);

        let script = std::fs::read_to_string(dir.path().join("batch_script")).unwrap();
        assert!(script.contains("qsub -J test_0 touch /data/x"));
        assert!(script.contains("qalter -hold_jid test_0 test_1"));
        // script-only mode never starts the coordinator or checkpointing
        assert!(!dir.path().join("backups").exists());
    }
}

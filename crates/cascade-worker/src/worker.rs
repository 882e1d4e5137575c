//! The worker loop.
//!
//! A worker registers its callback URI, then repeatedly asks the
//! coordinator for a runnable stage. Stages it cannot host are returned to
//! the queue; everything else is executed locally and reported finished or
//! failed by exit code. The loop ends when the coordinator delivers the
//! shutdown call (or a dispatch response says shutdown).

use crate::client::CoordinatorClient;
use crate::config::WorkerConfig;
use crate::heartbeat::HeartbeatService;
use axum::{Router, http::StatusCode, routing::post};
use cascade_core::Result;
use cascade_core::protocol::DispatchResponse;
use cascade_runner::execute_stage;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};
use tracing::{debug, error, info, warn};

/// Consecutive coordinator errors tolerated before the worker gives up.
const MAX_CONSECUTIVE_ERRORS: u32 = 5;

pub struct Worker {
    config: WorkerConfig,
    client: CoordinatorClient,
}

impl Worker {
    pub fn new(config: WorkerConfig) -> Result<Self> {
        let client = CoordinatorClient::discover(
            config.coordinator_url.as_deref(),
            config.urifile.as_deref(),
        )?;
        Ok(Self { config, client })
    }

    /// Register, serve the shutdown listener, and pull stages until the
    /// coordinator shuts this worker down.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        let worker_uri = format!("http://{}", listener.local_addr()?);

        let listener_tx = Arc::clone(&shutdown_tx);
        let app = Router::new().route(
            "/shutdown",
            post(move || {
                let tx = Arc::clone(&listener_tx);
                async move {
                    info!("Shutdown call received from coordinator");
                    let _ = tx.send(true);
                    StatusCode::OK
                }
            }),
        );
        let listener_task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        self.client.register(&worker_uri).await?;
        info!(name = %self.config.name, uri = %worker_uri, "Worker registered");

        let (running_tx, running_rx) = watch::channel(None);
        let heartbeat = HeartbeatService::new(
            self.client.clone(),
            worker_uri.clone(),
            self.config.heartbeat_interval_secs,
            running_rx,
        );
        let heartbeat_shutdown = shutdown_rx.clone();
        let heartbeat_task = tokio::spawn(async move {
            heartbeat.run(heartbeat_shutdown).await;
        });

        let mut consecutive_errors = 0u32;
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            match self.client.dispatch().await {
                Ok(DispatchResponse::Shutdown) => {
                    info!("Coordinator reports pipeline complete");
                    break;
                }
                Ok(DispatchResponse::Idle) => {
                    consecutive_errors = 0;
                    tokio::select! {
                        _ = sleep(Duration::from_secs(self.config.poll_interval_secs)) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
                Ok(DispatchResponse::Stage { index }) => {
                    consecutive_errors = 0;
                    if let Err(e) = self.handle_stage(index, &worker_uri, &running_tx).await {
                        warn!(index, error = %e, "Failed to report stage outcome");
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        warn!(error = %e, "Coordinator unreachable; worker exiting");
                        break;
                    }
                    debug!(error = %e, attempt = consecutive_errors, "Dispatch failed, retrying");
                    sleep(Duration::from_secs(self.config.poll_interval_secs)).await;
                }
            }
        }

        let _ = shutdown_tx.send(true);
        let _ = heartbeat_task.await;
        listener_task.abort();
        info!(name = %self.config.name, "Worker loop exited");
        Ok(())
    }

    async fn handle_stage(
        &self,
        index: usize,
        worker_uri: &str,
        running_tx: &watch::Sender<Option<usize>>,
    ) -> Result<()> {
        let descriptor = self.client.get_stage(index).await?;

        if !self.config.can_host(&descriptor) {
            info!(
                index,
                need_mem_gb = descriptor.mem_gb,
                need_procs = descriptor.procs,
                "Under-resourced for stage; returning it to the queue"
            );
            return self.client.requeue(index).await;
        }

        self.client.stage_started(index, worker_uri).await?;

        // Abstract stages carry no command and complete trivially.
        if descriptor.argv.is_none() {
            debug!(index, "Abstract stage; reporting finished");
            return self.client.stage_finished(index).await;
        }

        let _ = running_tx.send(Some(index));
        let outcome = execute_stage(&descriptor).await;
        let _ = running_tx.send(None);

        match outcome {
            Ok(outcome) if outcome.success => {
                info!(index, duration_ms = outcome.duration_ms, "Stage finished");
                self.client.stage_finished(index).await
            }
            Ok(outcome) => {
                warn!(index, exit_code = outcome.exit_code, "Stage failed");
                self.client.stage_failed(index).await
            }
            Err(e) => {
                error!(index, error = %e, "Stage execution error");
                self.client.stage_failed(index).await
            }
        }
    }
}

//! Heartbeat loop for periodic health reporting.

use crate::client::CoordinatorClient;
use cascade_core::protocol::HeartbeatRequest;
use sysinfo::System;
use tokio::sync::watch;
use tokio::time::{Duration, interval};
use tracing::{debug, info, warn};

/// Periodically reports worker health to the coordinator. Pure
/// observability: a missed heartbeat never reschedules work.
pub struct HeartbeatService {
    client: CoordinatorClient,
    worker_uri: String,
    interval_secs: u64,
    running_rx: watch::Receiver<Option<usize>>,
}

impl HeartbeatService {
    pub fn new(
        client: CoordinatorClient,
        worker_uri: String,
        interval_secs: u64,
        running_rx: watch::Receiver<Option<usize>>,
    ) -> Self {
        Self {
            client,
            worker_uri,
            interval_secs,
            running_rx,
        }
    }

    /// Run the heartbeat loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));
        let mut sys = System::new();

        info!(
            worker = %self.worker_uri,
            interval_secs = self.interval_secs,
            "Starting heartbeat service"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.send_heartbeat(&mut sys).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Heartbeat service shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn send_heartbeat(&self, sys: &mut System) {
        sys.refresh_memory();
        sys.refresh_cpu_usage();

        let req = HeartbeatRequest {
            worker_uri: self.worker_uri.clone(),
            running: *self.running_rx.borrow(),
            cpu_percent: sys.global_cpu_usage() as f64,
            memory_used_bytes: sys.used_memory(),
            memory_total_bytes: sys.total_memory(),
        };

        if let Err(e) = self.client.heartbeat(&req).await {
            warn!(error = %e, "Failed to send heartbeat");
        } else {
            debug!(worker = %self.worker_uri, "Heartbeat sent");
        }
    }
}

//! Coordinator server lifecycle.
//!
//! Binding and serving are split so a driver can learn the bound address
//! (and hand it to locally spawned workers) before the serve loop starts.

use crate::routes::create_router;
use crate::state::AppState;
use cascade_core::Result;
use chrono::Utc;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::{Duration, interval};
use tracing::{info, warn};

/// Seconds of heartbeat silence before a worker is logged as stale.
const STALE_HEARTBEAT_SECS: i64 = 120;

pub struct Coordinator {
    state: Arc<AppState>,
    listener: TcpListener,
    uri: String,
}

impl Coordinator {
    /// Bind the endpoint and advertise it. When a uri-file path is given,
    /// the address is written there verbatim for workers to discover.
    pub async fn bind(
        state: Arc<AppState>,
        addr: SocketAddr,
        urifile: Option<&Path>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let uri = format!("http://{}", listener.local_addr()?);
        if let Some(path) = urifile {
            std::fs::write(path, &uri)?;
            info!(uri = %uri, urifile = %path.display(), "Coordinator endpoint written");
        }
        info!(uri = %uri, "Coordinator listening");
        Ok(Self {
            state,
            listener,
            uri,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Serve until shutdown latches (every stage processed), then deliver
    /// the shutdown call to each registered worker and exit.
    pub async fn serve(self) -> Result<()> {
        let Self {
            state, listener, ..
        } = self;

        let watchdog = tokio::spawn(stale_client_watchdog(
            Arc::clone(&state),
            state.subscribe_shutdown(),
        ));

        let shutdown_state = Arc::clone(&state);
        let mut shutdown_rx = state.subscribe_shutdown();
        let router = create_router(Arc::clone(&state));

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|&latched| latched).await;
                shutdown_workers(&shutdown_state).await;
            })
            .await?;

        watchdog.abort();
        info!("All pipeline stages processed; coordinator shut down");
        Ok(())
    }
}

/// POST the shutdown call to every registered worker and deregister it.
async fn shutdown_workers(state: &AppState) {
    let uris: Vec<String> = state.clients.lock().await.keys().cloned().collect();
    if uris.is_empty() {
        return;
    }
    info!(count = uris.len(), "Unregistering clients");

    let client = reqwest::Client::new();
    for uri in uris {
        match client
            .post(format!("{}/shutdown", uri))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(_) => info!(worker = %uri, "Shutdown call delivered"),
            Err(e) => warn!(worker = %uri, error = %e, "Shutdown call failed"),
        }
        state.clients.lock().await.remove(&uri);
    }
}

/// Log workers that have gone silent. Their stages stay `running` and are
/// never rescheduled; this only makes the stall visible.
async fn stale_client_watchdog(state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let clients = state.clients.lock().await;
                for (uri, last_seen) in clients.iter() {
                    let silent = (Utc::now() - *last_seen).num_seconds();
                    if silent > STALE_HEARTBEAT_SECS {
                        warn!(
                            worker = %uri,
                            silent_secs = silent,
                            "No heartbeat from worker; dispatched stages are not rescheduled"
                        );
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

//! Application state shared across handlers.

use cascade_scheduler::Scheduler;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::{Mutex, watch};

/// Shared coordinator state. The scheduler mutex is the single
/// mutual-exclusion discipline for the run state; the client map tracks
/// registered worker URIs and their last heartbeat.
pub struct AppState {
    pub scheduler: Mutex<Scheduler>,
    pub clients: Mutex<HashMap<String, DateTime<Utc>>>,
    shutdown: watch::Sender<bool>,
}

impl AppState {
    pub fn new(scheduler: Scheduler) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            scheduler: Mutex::new(scheduler),
            clients: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    /// Latch shutdown. Once latched, dispatch stops handing out stages and
    /// the serve loop begins its graceful exit.
    pub fn latch_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

//! JanitorService - periodic cleanup of expired operations and held tickets
//!
//! Each tick:
//! - evicts operations and cached results past the retention horizon
//! - releases tickets held for operations that finished or were evicted

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, interval};
use tracing::{debug, error, info};

use crate::state::AppState;

/// Counts from one cleanup pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepResult {
    pub evicted_operations: usize,
    pub released_tickets: usize,
}

pub struct JanitorService {
    state: Arc<AppState>,
    handle: Mutex<Option<tokio::task::AbortHandle>>,
}

impl JanitorService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            handle: Mutex::new(None),
        }
    }

    /// Run one cleanup pass.
    pub async fn sweep(&self) -> SweepResult {
        let evicted_operations = match self.state.orchestrator.evict_expired() {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "Eviction sweep failed");
                0
            }
        };
        let released_tickets = self
            .state
            .tickets
            .release_settled(&self.state.orchestrator)
            .await;

        SweepResult {
            evicted_operations,
            released_tickets,
        }
    }

    /// Start periodic sweeping, replacing any running loop.
    pub async fn start(self: Arc<Self>, interval_secs: u64) {
        let mut handle = self.handle.lock().await;
        if let Some(existing) = handle.take() {
            existing.abort();
        }

        info!(interval_secs = interval_secs, "Starting janitor");

        let service = Arc::clone(&self);
        let task = tokio::spawn(async move {
            let mut tick = interval(Duration::from_secs(interval_secs));

            loop {
                tick.tick().await;

                let result = service.sweep().await;
                if result != SweepResult::default() {
                    debug!(
                        evicted_operations = result.evicted_operations,
                        released_tickets = result.released_tickets,
                        "Janitor sweep"
                    );
                }
            }
        });

        *handle = Some(task.abort_handle());
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
            info!("Stopped janitor");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.handle.lock().await.is_some()
    }
}

//! Application state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use lro_core::{Orchestrator, Ticket};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::config::Config;

/// Tickets held on behalf of HTTP callers, keyed by operation id.
///
/// HTTP callers cannot hold a [`Ticket`] themselves, so the server keeps one
/// per accepted submission. Callers that deduplicate onto the same operation
/// each get their own ticket; `DELETE` releases one of them, a terminal fetch
/// or the janitor releases the rest.
#[derive(Debug, Default)]
pub struct TicketRegistry {
    tickets: RwLock<HashMap<String, Vec<Ticket>>>,
}

impl TicketRegistry {
    pub fn new() -> Self {
        Self {
            tickets: RwLock::new(HashMap::new()),
        }
    }

    pub async fn hold(&self, ticket: Ticket) {
        let mut tickets = self.tickets.write().await;
        tickets
            .entry(ticket.operation_id().to_string())
            .or_default()
            .push(ticket);
    }

    /// Drop one caller's ticket. Returns whether one was held.
    pub async fn release_one(&self, operation_id: &str) -> bool {
        let mut tickets = self.tickets.write().await;
        let Some(held) = tickets.get_mut(operation_id) else {
            return false;
        };
        let released = held.pop().is_some();
        if held.is_empty() {
            tickets.remove(operation_id);
        }
        released
    }

    /// Drop every ticket held for an operation. Returns how many were held.
    pub async fn release_all(&self, operation_id: &str) -> usize {
        let mut tickets = self.tickets.write().await;
        tickets.remove(operation_id).map_or(0, |held| held.len())
    }

    /// Release tickets whose operations finished or disappeared.
    pub async fn release_settled(&self, orchestrator: &Orchestrator) -> usize {
        let mut tickets = self.tickets.write().await;
        let mut released = 0;
        tickets.retain(|id, held| {
            let live = orchestrator.contains(id)
                && held
                    .first()
                    .is_some_and(|ticket| !ticket.snapshot().status.is_terminal());
            if !live {
                released += held.len();
            }
            live
        });
        released
    }

    /// Number of tickets held across all operations.
    pub async fn len(&self) -> usize {
        self.tickets.read().await.values().map(Vec::len).sum()
    }

    /// Number of tickets held for one operation.
    pub async fn held_for(&self, operation_id: &str) -> usize {
        self.tickets
            .read()
            .await
            .get(operation_id)
            .map_or(0, Vec::len)
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    pub tickets: Arc<TicketRegistry>,
    /// SHA-256 of the configured API token
    pub token_digest: Option<[u8; 32]>,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config, orchestrator: Arc<Orchestrator>) -> Arc<Self> {
        let token_digest = config.api_token.as_deref().map(digest);
        Arc::new(Self {
            config: Arc::new(config),
            orchestrator,
            tickets: Arc::new(TicketRegistry::new()),
            token_digest,
            start_time: Instant::now(),
        })
    }
}

/// SHA-256 digest of a token
pub fn digest(token: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(token.as_bytes()));
    out
}

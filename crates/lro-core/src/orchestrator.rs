//! Orchestrator - submission, attachment and result lookup for analysis operations.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Orchestrator                             │
//! │  submit(payload)                                                 │
//! │    │ classify_payload ──► Reject ──► Error::Validation           │
//! │    │ fingerprint                                                 │
//! │    ▼                                                             │
//! │  Registry (one lock) ─── RequestCache: New / Attached / Cached   │
//! │    │                  └─ operations: id → OperationCell          │
//! │    ▼ New                                                         │
//! │  Driver task (owns Operation) ── watch ──► Tickets / get_result  │
//! │    submit ─► Polling ─► Succeeded | Failed | TimedOut            │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each operation's mutable state lives in exactly one driver task; everyone
//! else reads snapshots through a `watch` channel. Results are immutable
//! `Arc<CanonicalResult>` once published.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::classify::{PayloadDecision, classify_payload};
use crate::config::OrchestratorConfig;
use crate::dedup::{Registration, RequestCache};
use crate::error::{Error, Result};
use crate::fingerprint::RequestFingerprint;
use crate::poller::Driver;
use crate::types::{CanonicalResult, Operation, OperationStatus, OutputShape, WorkPayload};
use crate::upstream::{AnalysisService, BlobStore};

// ─────────────────────────────────────────────────────────────────────────────
// Operation cell & tickets
// ─────────────────────────────────────────────────────────────────────────────

/// Shared, read-only view of one operation plus its attachment count.
pub(crate) struct OperationCell {
    pub(crate) operation_id: String,
    pub(crate) fingerprint: RequestFingerprint,
    pub(crate) shape: OutputShape,
    state: watch::Receiver<Operation>,
    attached: AtomicUsize,
    detached_since: Mutex<Option<Instant>>,
    finished_at: Mutex<Option<Instant>>,
}

impl OperationCell {
    fn new(
        operation_id: String,
        fingerprint: RequestFingerprint,
        shape: OutputShape,
        state: watch::Receiver<Operation>,
    ) -> Self {
        Self {
            operation_id,
            fingerprint,
            shape,
            state,
            attached: AtomicUsize::new(0),
            detached_since: Mutex::new(None),
            finished_at: Mutex::new(None),
        }
    }

    pub(crate) fn snapshot(&self) -> Operation {
        self.state.borrow().clone()
    }

    fn attach(&self) {
        self.attached.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut since) = self.detached_since.lock() {
            *since = None;
        }
    }

    fn detach(&self) {
        if self.attached.fetch_sub(1, Ordering::SeqCst) == 1 {
            if let Ok(mut since) = self.detached_since.lock() {
                *since = Some(Instant::now());
            }
        }
    }

    fn mark_finished(&self, at: Instant) {
        if let Ok(mut finished) = self.finished_at.lock() {
            *finished = Some(at);
        }
    }

    /// Terminal for at least `retention` as of `now`.
    fn expired(&self, now: Instant, retention: Duration) -> bool {
        self.finished_at
            .lock()
            .ok()
            .and_then(|finished| *finished)
            .is_some_and(|at| now.saturating_duration_since(at) >= retention)
    }

    /// How long the operation has had no attached caller.
    pub(crate) fn idle_for(&self) -> Option<Duration> {
        if self.attached.load(Ordering::SeqCst) > 0 {
            return None;
        }
        self.detached_since
            .lock()
            .ok()
            .and_then(|since| since.map(|t| t.elapsed()))
    }
}

/// One caller's interest in an operation. Dropping the ticket detaches the
/// caller; the operation keeps running for other attached callers.
pub struct Ticket {
    cell: Arc<OperationCell>,
}

impl Ticket {
    fn new(cell: Arc<OperationCell>) -> Self {
        cell.attach();
        Self { cell }
    }

    pub fn operation_id(&self) -> &str {
        &self.cell.operation_id
    }

    pub fn fingerprint(&self) -> &RequestFingerprint {
        &self.cell.fingerprint
    }

    /// Current state of the operation.
    pub fn snapshot(&self) -> Operation {
        self.cell.snapshot()
    }

    /// Wait for the operation to reach a terminal state.
    pub async fn wait(&self) -> Result<Arc<CanonicalResult>> {
        let mut rx = self.cell.state.clone();
        let op = match rx.wait_for(|op| op.status.is_terminal()).await {
            Ok(op) => op.clone(),
            Err(_) => return Err(Error::Abandoned(self.cell.operation_id.clone())),
        };
        terminal_result(&op)
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.cell.detach();
    }
}

impl std::fmt::Debug for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticket")
            .field("operation_id", &self.cell.operation_id)
            .finish()
    }
}

fn terminal_result(op: &Operation) -> Result<Arc<CanonicalResult>> {
    match op.status {
        OperationStatus::Succeeded => op
            .result
            .clone()
            .ok_or_else(|| Error::Other(format!("operation {} succeeded without a result", op.operation_id))),
        _ => Err(op.to_error().unwrap_or_else(|| {
            Error::Other(format!(
                "operation {} ended in {} without an error",
                op.operation_id, op.status
            ))
        })),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public results
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a submission.
#[derive(Debug)]
pub enum Submission {
    /// Terminal result available now (cache hit or synchronous upstream result)
    Completed {
        operation_id: String,
        result: Arc<CanonicalResult>,
    },
    /// Work is in progress; the ticket keeps the caller attached
    Pending(Ticket),
}

impl Submission {
    pub fn operation_id(&self) -> &str {
        match self {
            Submission::Completed { operation_id, .. } => operation_id,
            Submission::Pending(ticket) => ticket.operation_id(),
        }
    }
}

/// Answer to a "get result" query.
#[derive(Debug, Clone)]
pub enum ResultView {
    Processing {
        operation_id: String,
        status: OperationStatus,
        poll_count: u32,
        retry_after: Duration,
    },
    Completed(Arc<CanonicalResult>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStats {
    pub operations: usize,
    pub in_flight: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cached_results: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

struct Registry {
    operations: HashMap<String, Arc<OperationCell>>,
    cache: RequestCache,
}

impl Registry {
    /// Drop cached results and terminal operations past the retention horizon.
    /// Both are timed from the same terminal instant, so a cached result never
    /// outlives its operation. Returns the number of operations removed.
    fn sweep_expired(&mut self, now: Instant, retention: Duration) -> usize {
        let mut removed = 0;
        for id in self.cache.evict_expired(now.into_std()) {
            if self.operations.remove(&id).is_some() {
                removed += 1;
            }
        }
        self.operations.retain(|_, cell| {
            let expired = cell.expired(now, retention);
            if expired {
                removed += 1;
            }
            !expired
        });
        removed
    }
}

/// Explicitly constructed orchestrator; each instance has its own registry.
pub struct Orchestrator {
    pub(crate) config: OrchestratorConfig,
    pub(crate) service: Arc<dyn AnalysisService>,
    pub(crate) blobs: Arc<dyn BlobStore>,
    pub(crate) poll_permits: Arc<Semaphore>,
    registry: Mutex<Registry>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        service: Arc<dyn AnalysisService>,
        blobs: Arc<dyn BlobStore>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            poll_permits: Arc::new(Semaphore::new(config.max_concurrent_polls)),
            registry: Mutex::new(Registry {
                operations: HashMap::new(),
                cache: RequestCache::new(&config.cache),
            }),
            config,
            service,
            blobs,
        }))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Submit a unit of work.
    ///
    /// Returns a cached result, attaches to equivalent in-flight work, or
    /// starts a new operation and waits until it either completes
    /// synchronously or enters polling.
    pub async fn submit(self: &Arc<Self>, payload: WorkPayload) -> Result<Submission> {
        let decision = classify_payload(&payload);
        match &decision {
            PayloadDecision::Reject { reason } => {
                warn!(analyzer_id = %payload.analyzer_id, reason = %reason, "Payload rejected");
                return Err(Error::validation(reason.clone()));
            }
            PayloadDecision::FetchSchema { url } => {
                info!(analyzer_id = %payload.analyzer_id, schema_url = %url, "Schema will be fetched from blob storage");
            }
            PayloadDecision::Ready => {
                debug!(analyzer_id = %payload.analyzer_id, "Payload ready");
            }
        }

        let fingerprint = RequestFingerprint::of(&payload)?;
        let candidate_id = uuid::Uuid::new_v4().to_string();

        let (ticket, spawn) = {
            let mut registry = self.lock_registry()?;
            let swept = registry.sweep_expired(Instant::now(), self.config.cache.retention());
            if swept > 0 {
                debug!(removed = swept, "Evicted expired operations");
            }
            match registry.cache.register(&fingerprint, &candidate_id) {
                Registration::Cached {
                    operation_id,
                    result,
                } => {
                    info!(
                        operation_id = %operation_id,
                        fingerprint = %fingerprint.short(),
                        "Serving cached result"
                    );
                    return Ok(Submission::Completed {
                        operation_id,
                        result,
                    });
                }
                Registration::Attached(existing) => match registry.operations.get(&existing).cloned() {
                    Some(cell) => {
                        info!(
                            operation_id = %existing,
                            fingerprint = %fingerprint.short(),
                            "Attached to in-flight operation"
                        );
                        (Ticket::new(cell), None)
                    }
                    None => {
                        // Fingerprint pointed at an evicted operation; take it over.
                        registry.cache.abandon(&fingerprint, &existing);
                        registry.cache.register(&fingerprint, &candidate_id);
                        let (ticket, tx) = Self::create_operation(
                            &mut registry,
                            &candidate_id,
                            &fingerprint,
                            payload.output_shape,
                        );
                        (ticket, Some(tx))
                    }
                },
                Registration::New => {
                    let (ticket, tx) = Self::create_operation(
                        &mut registry,
                        &candidate_id,
                        &fingerprint,
                        payload.output_shape,
                    );
                    (ticket, Some(tx))
                }
            }
        };

        if let Some(tx) = spawn {
            info!(
                operation_id = %candidate_id,
                fingerprint = %fingerprint.short(),
                analyzer_id = %payload.analyzer_id,
                "Submitting new operation"
            );
            let driver = Driver::new(Arc::clone(self), Arc::clone(&ticket.cell), tx, payload, decision);
            tokio::spawn(driver.run());
        }

        let mut rx = ticket.cell.state.clone();
        let op = match rx
            .wait_for(|op| op.status != OperationStatus::Submitted)
            .await
        {
            Ok(op) => op.clone(),
            Err(_) => return Err(Error::Abandoned(ticket.operation_id().to_string())),
        };

        if op.status.is_terminal() {
            let result = terminal_result(&op)?;
            return Ok(Submission::Completed {
                operation_id: op.operation_id,
                result,
            });
        }

        Ok(Submission::Pending(ticket))
    }

    /// Submit and wait for the terminal result.
    pub async fn submit_and_wait(self: &Arc<Self>, payload: WorkPayload) -> Result<Arc<CanonicalResult>> {
        match self.submit(payload).await? {
            Submission::Completed { result, .. } => Ok(result),
            Submission::Pending(ticket) => ticket.wait().await,
        }
    }

    /// Look up an operation's result.
    pub fn get_result(&self, operation_id: &str) -> Result<ResultView> {
        let op = self
            .operation(operation_id)?
            .ok_or_else(|| Error::OperationNotFound(operation_id.to_string()))?;

        match op.status {
            OperationStatus::Submitted | OperationStatus::Polling => Ok(ResultView::Processing {
                retry_after: self.config.poll.delay_for(op.poll_count, None),
                operation_id: op.operation_id,
                status: op.status,
                poll_count: op.poll_count,
            }),
            _ => terminal_result(&op).map(ResultView::Completed),
        }
    }

    /// Snapshot of an operation.
    pub fn operation(&self, operation_id: &str) -> Result<Option<Operation>> {
        let registry = self.lock_registry()?;
        Ok(registry
            .operations
            .get(operation_id)
            .map(|cell| cell.snapshot()))
    }

    pub fn contains(&self, operation_id: &str) -> bool {
        self.lock_registry()
            .map(|r| r.operations.contains_key(operation_id))
            .unwrap_or(false)
    }

    /// Attach a new caller to an existing operation.
    pub fn attach(&self, operation_id: &str) -> Result<Ticket> {
        let registry = self.lock_registry()?;
        registry
            .operations
            .get(operation_id)
            .map(|cell| Ticket::new(Arc::clone(cell)))
            .ok_or_else(|| Error::OperationNotFound(operation_id.to_string()))
    }

    /// Wait for an operation to finish.
    pub async fn wait(&self, operation_id: &str) -> Result<Arc<CanonicalResult>> {
        let ticket = self.attach(operation_id)?;
        ticket.wait().await
    }

    /// Drop terminal operations and cached results past the retention horizon.
    /// Returns the number of operations removed.
    pub fn evict_expired(&self) -> Result<usize> {
        let mut registry = self.lock_registry()?;
        let removed = registry.sweep_expired(Instant::now(), self.config.cache.retention());
        if removed > 0 {
            debug!(removed = removed, "Evicted expired operations");
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<OrchestratorStats> {
        let registry = self.lock_registry()?;
        let mut stats = OrchestratorStats {
            operations: registry.operations.len(),
            cached_results: registry.cache.completed_count(),
            ..Default::default()
        };
        for cell in registry.operations.values() {
            match cell.state.borrow().status {
                OperationStatus::Submitted | OperationStatus::Polling => stats.in_flight += 1,
                OperationStatus::Succeeded => stats.succeeded += 1,
                OperationStatus::Failed => stats.failed += 1,
                OperationStatus::TimedOut => stats.timed_out += 1,
            }
        }
        Ok(stats)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Driver hooks
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a terminal operation in the fingerprint index.
    pub(crate) fn record_terminal(&self, cell: &OperationCell, op: &Operation) {
        let Ok(mut registry) = self.lock_registry() else {
            error!(operation_id = %cell.operation_id, "Registry lock poisoned; terminal state not indexed");
            return;
        };

        let now = Instant::now();
        cell.mark_finished(now);
        match (&op.status, &op.result) {
            (OperationStatus::Succeeded, Some(result)) => {
                let evicted = registry.cache.complete(
                    &cell.fingerprint,
                    &cell.operation_id,
                    Arc::clone(result),
                    now.into_std(),
                );
                for id in evicted {
                    debug!(operation_id = %id, "Evicted by cache size bound");
                    registry.operations.remove(&id);
                }
            }
            _ => registry.cache.abandon(&cell.fingerprint, &cell.operation_id),
        }
    }

    /// Remove an operation nobody is attached to once the grace period has
    /// passed. Returns true when the caller should stop driving it.
    pub(crate) fn try_abandon(&self, cell: &OperationCell) -> bool {
        let grace = self.config.detach_grace();
        let Ok(mut registry) = self.lock_registry() else {
            return false;
        };

        match cell.idle_for() {
            Some(idle) if idle >= grace => {
                registry.cache.abandon(&cell.fingerprint, &cell.operation_id);
                registry.operations.remove(&cell.operation_id);
                true
            }
            _ => false,
        }
    }

    fn create_operation(
        registry: &mut Registry,
        operation_id: &str,
        fingerprint: &RequestFingerprint,
        shape: OutputShape,
    ) -> (Ticket, watch::Sender<Operation>) {
        let (tx, rx) = watch::channel(Operation::new(operation_id, fingerprint.as_str()));
        let cell = Arc::new(OperationCell::new(
            operation_id.to_string(),
            fingerprint.clone(),
            shape,
            rx,
        ));
        registry
            .operations
            .insert(operation_id.to_string(), Arc::clone(&cell));
        (Ticket::new(cell), tx)
    }

    fn lock_registry(&self) -> Result<MutexGuard<'_, Registry>> {
        self.registry.lock().map_err(|_| Error::LockPoisoned)
    }
}

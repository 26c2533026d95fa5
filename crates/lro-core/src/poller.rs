//! Per-operation driver task.
//!
//! The driver is the only writer of its [`Operation`]. It runs the submission
//! phase (schema resolution, analyzer creation, analyze call) and then polls
//! the operation location until a terminal state, publishing a snapshot after
//! every transition.
//!
//! Poll loop:
//! - at most `max_concurrent_polls` drivers poll at the same time
//! - delays grow per [`PollPolicy::delay_for`], lengthened by Retry-After
//! - transient poll errors are retried on the next tick and still count
//! - hitting `max_attempts` or `max_duration` ends in `TimedOut`, once
//! - with no attached callers past the detach grace, polling stops

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tokio::sync::watch;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::classify::{
    PayloadDecision, PollDecision, SubmitDecision, classify_poll_response, classify_submit_response,
};
use crate::config::PollPolicy;
use crate::error::{Error, Result};
use crate::normalizer::{NormalizeOptions, normalize};
use crate::orchestrator::{OperationCell, Orchestrator};
use crate::schema::normalize_field_schema;
use crate::types::{
    FailureKind, Operation, OperationFailure, OperationStatus, SchemaSource, WorkPayload,
};

enum DriveEnd {
    Terminal,
    Abandoned,
}

pub(crate) struct Driver {
    orchestrator: Arc<Orchestrator>,
    cell: Arc<OperationCell>,
    tx: watch::Sender<Operation>,
    op: Operation,
    payload: WorkPayload,
    decision: PayloadDecision,
    started: Instant,
}

impl Driver {
    pub(crate) fn new(
        orchestrator: Arc<Orchestrator>,
        cell: Arc<OperationCell>,
        tx: watch::Sender<Operation>,
        payload: WorkPayload,
        decision: PayloadDecision,
    ) -> Self {
        let op = tx.borrow().clone();
        Self {
            orchestrator,
            cell,
            tx,
            op,
            payload,
            decision,
            started: Instant::now(),
        }
    }

    pub(crate) async fn run(mut self) {
        match self.drive().await {
            DriveEnd::Terminal => {
                self.orchestrator.record_terminal(&self.cell, &self.op);
                self.publish();
                info!(
                    operation_id = %self.op.operation_id,
                    status = %self.op.status,
                    poll_count = self.op.poll_count,
                    elapsed_ms = self.op.elapsed_ms(),
                    "Operation finished"
                );
            }
            DriveEnd::Abandoned => {
                info!(
                    operation_id = %self.op.operation_id,
                    poll_count = self.op.poll_count,
                    "No callers attached; operation abandoned"
                );
            }
        }
    }

    fn policy(&self) -> &PollPolicy {
        &self.orchestrator.config.poll
    }

    fn deadline(&self) -> Instant {
        self.started + self.policy().max_duration()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Submission phase
    // ─────────────────────────────────────────────────────────────────────────

    async fn drive(&mut self) -> DriveEnd {
        let definition = match self.resolve_schema().await {
            Ok(definition) => definition,
            Err(e) => return self.fail_with(e),
        };

        if let Some(definition) = definition {
            if let Err(e) = self.ensure_analyzer(&definition).await {
                return self.fail_with(e);
            }
        }

        let request = analyze_request(&self.payload);
        let response = match self
            .orchestrator
            .service
            .analyze(&self.payload.analyzer_id, &request)
            .await
        {
            Ok(response) => response,
            Err(e) => return self.fail_with(e),
        };

        match classify_submit_response(&response) {
            SubmitDecision::Completed {
                upstream_status,
                body,
            } => {
                debug!(operation_id = %self.op.operation_id, "Upstream answered synchronously");
                self.succeed(upstream_status, &body);
                DriveEnd::Terminal
            }
            SubmitDecision::Failed {
                upstream_status,
                message,
                details,
            } => {
                self.fail(FailureKind::UpstreamFailure, Some(upstream_status), message, details);
                DriveEnd::Terminal
            }
            SubmitDecision::Rejected {
                http_status,
                message,
                details,
            } => {
                self.fail(FailureKind::Validation, Some(http_status.to_string()), message, details);
                DriveEnd::Terminal
            }
            SubmitDecision::Unavailable {
                http_status,
                message,
            } => {
                self.fail(FailureKind::Transient, Some(http_status.to_string()), message, Value::Null);
                DriveEnd::Terminal
            }
            SubmitDecision::Accepted {
                operation_location,
                upstream_status,
                upstream_id,
                retry_after,
            } => {
                self.op.status = OperationStatus::Polling;
                self.op.operation_location = Some(operation_location.clone());
                self.op.upstream_id = upstream_id;
                self.op.last_upstream_status = upstream_status;
                self.publish();
                info!(
                    operation_id = %self.op.operation_id,
                    operation_location = %operation_location,
                    "Operation accepted; polling"
                );
                self.poll_loop(&operation_location, retry_after).await
            }
        }
    }

    /// Schema definition to install before analyzing, already shaped.
    async fn resolve_schema(&self) -> Result<Option<Value>> {
        let raw = match (&self.decision, &self.payload.schema) {
            (PayloadDecision::Reject { reason }, _) => return Err(Error::validation(reason.clone())),
            (PayloadDecision::FetchSchema { url }, _) => {
                let bytes = self.orchestrator.blobs.fetch(url).await?;
                serde_json::from_slice::<Value>(&bytes).map_err(|e| {
                    Error::validation(format!("Schema blob is not valid JSON: {}", e))
                })?
            }
            (PayloadDecision::Ready, Some(SchemaSource::Inline { definition })) => definition.clone(),
            (PayloadDecision::Ready, _) => return Ok(None),
        };

        normalize_field_schema(&raw).map(Some).map_err(Error::validation)
    }

    /// Create (or replace) the analyzer, waiting out its LRO if it returns one.
    async fn ensure_analyzer(&self, definition: &Value) -> Result<()> {
        let analyzer_id = &self.payload.analyzer_id;
        let response = self
            .orchestrator
            .service
            .create_analyzer(analyzer_id, definition)
            .await?;

        let (location, mut hint) = match classify_submit_response(&response) {
            SubmitDecision::Completed { .. } => return Ok(()),
            SubmitDecision::Accepted {
                operation_location,
                retry_after,
                ..
            } => (operation_location, retry_after),
            other => return Err(self.submit_error(other)),
        };

        debug!(analyzer_id = %analyzer_id, location = %location, "Waiting for analyzer creation");
        let policy = self.policy().clone();
        let mut attempts = 0u32;
        let mut last_status = String::new();

        loop {
            if attempts >= policy.max_attempts || Instant::now() >= self.deadline() {
                return Err(Error::Timeout {
                    operation_id: self.op.operation_id.clone(),
                    upstream_status: last_status,
                    poll_count: attempts,
                    elapsed_ms: self.started.elapsed().as_millis() as u64,
                });
            }

            sleep(policy.delay_for(attempts, hint)).await;
            attempts += 1;

            let response = match self.orchestrator.service.poll(&location).await {
                Ok(response) => response,
                Err(e) if e.is_retryable() => {
                    warn!(analyzer_id = %analyzer_id, error = %e, "Analyzer poll failed; retrying");
                    hint = None;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match classify_poll_response(&response) {
                PollDecision::Completed { .. } => return Ok(()),
                PollDecision::Pending {
                    upstream_status,
                    retry_after,
                    ..
                } => {
                    last_status = upstream_status.unwrap_or_default();
                    hint = retry_after;
                }
                PollDecision::Unavailable { .. } => hint = None,
                PollDecision::Failed {
                    upstream_status,
                    message,
                    details,
                } => {
                    return Err(Error::UpstreamFailure {
                        operation_id: self.op.operation_id.clone(),
                        upstream_status,
                        message: format!("Analyzer creation failed: {}", message),
                        details,
                    });
                }
                PollDecision::Rejected {
                    http_status,
                    message,
                    details,
                } => {
                    return Err(Error::Validation {
                        message: format!("Analyzer creation rejected: {}", message),
                        operation_id: Some(self.op.operation_id.clone()),
                        upstream_status: Some(http_status.to_string()),
                        details: Some(details),
                    });
                }
            }
        }
    }

    fn submit_error(&self, decision: SubmitDecision) -> Error {
        let operation_id = Some(self.op.operation_id.clone());
        match decision {
            SubmitDecision::Rejected {
                http_status,
                message,
                details,
            } => Error::Validation {
                message,
                operation_id,
                upstream_status: Some(http_status.to_string()),
                details: Some(details),
            },
            SubmitDecision::Unavailable {
                http_status,
                message,
            } => Error::Transient {
                message,
                operation_id,
                upstream_status: Some(http_status.to_string()),
            },
            SubmitDecision::Failed {
                upstream_status,
                message,
                details,
            } => Error::UpstreamFailure {
                operation_id: self.op.operation_id.clone(),
                upstream_status,
                message,
                details,
            },
            SubmitDecision::Completed { .. } | SubmitDecision::Accepted { .. } => {
                Error::Other("unexpected submit decision".into())
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Polling phase
    // ─────────────────────────────────────────────────────────────────────────

    async fn poll_loop(&mut self, location: &str, first_hint: Option<Duration>) -> DriveEnd {
        let permits = Arc::clone(&self.orchestrator.poll_permits);
        let _permit = match permits.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.fail(
                    FailureKind::Transient,
                    None,
                    "orchestrator is shutting down".into(),
                    Value::Null,
                );
                return DriveEnd::Terminal;
            }
        };

        let policy = self.policy().clone();
        let deadline = self.deadline();
        let mut hint = first_hint;

        loop {
            if self.orchestrator.try_abandon(&self.cell) {
                return DriveEnd::Abandoned;
            }

            let delay = policy.delay_for(self.op.poll_count, hint);
            let now = Instant::now();
            if now >= deadline {
                self.time_out();
                return DriveEnd::Terminal;
            }
            sleep(delay.min(deadline - now)).await;
            if Instant::now() >= deadline {
                self.time_out();
                return DriveEnd::Terminal;
            }

            let response = self.orchestrator.service.poll(location).await;
            self.op.poll_count += 1;
            self.op.last_polled_at = Some(Utc::now());
            hint = None;

            match response {
                Err(e) if e.is_retryable() => {
                    warn!(
                        operation_id = %self.op.operation_id,
                        poll_count = self.op.poll_count,
                        error = %e,
                        "Poll failed; retrying"
                    );
                }
                Err(e) => {
                    self.fail_with(e);
                    return DriveEnd::Terminal;
                }
                Ok(response) => match classify_poll_response(&response) {
                    PollDecision::Completed {
                        upstream_status,
                        body,
                    } => {
                        self.succeed(Some(upstream_status), &body);
                        return DriveEnd::Terminal;
                    }
                    PollDecision::Failed {
                        upstream_status,
                        message,
                        details,
                    } => {
                        self.fail(FailureKind::UpstreamFailure, Some(upstream_status), message, details);
                        return DriveEnd::Terminal;
                    }
                    PollDecision::Rejected {
                        http_status,
                        message,
                        details,
                    } => {
                        self.fail(
                            FailureKind::UpstreamFailure,
                            Some(http_status.to_string()),
                            message,
                            details,
                        );
                        return DriveEnd::Terminal;
                    }
                    PollDecision::Unavailable {
                        http_status,
                        message,
                    } => {
                        warn!(
                            operation_id = %self.op.operation_id,
                            http_status = http_status,
                            message = %message,
                            "Upstream unavailable while polling; retrying"
                        );
                    }
                    PollDecision::Pending {
                        upstream_status,
                        retry_after,
                        recognized,
                    } => {
                        if !recognized {
                            warn!(
                                operation_id = %self.op.operation_id,
                                upstream_status = ?upstream_status,
                                "Unrecognized upstream status; continuing to poll"
                            );
                        }
                        if upstream_status.is_some() {
                            self.op.last_upstream_status = upstream_status;
                        }
                        hint = retry_after;
                    }
                },
            }

            if self.op.poll_count >= policy.max_attempts {
                self.time_out();
                return DriveEnd::Terminal;
            }

            debug!(
                operation_id = %self.op.operation_id,
                poll_count = self.op.poll_count,
                upstream_status = ?self.op.last_upstream_status,
                "Still in progress"
            );
            self.publish();
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transitions
    // ─────────────────────────────────────────────────────────────────────────

    fn succeed(&mut self, upstream_status: Option<String>, body: &Value) {
        let fallback_id = self
            .op
            .upstream_id
            .clone()
            .unwrap_or_else(|| self.op.operation_id.clone());
        let result = normalize(
            body,
            &NormalizeOptions {
                fallback_id: Some(&fallback_id),
                shape: self.cell.shape,
            },
        );

        if upstream_status.is_some() {
            self.op.last_upstream_status = upstream_status;
        }
        self.op.status = OperationStatus::Succeeded;
        self.op.result = Some(Arc::new(result));
        self.op.completed_at = Some(Utc::now());
    }

    fn fail(&mut self, kind: FailureKind, upstream_status: Option<String>, message: String, details: Value) {
        warn!(
            operation_id = %self.op.operation_id,
            kind = ?kind,
            upstream_status = ?upstream_status,
            message = %message,
            "Operation failed"
        );

        if upstream_status.is_some() {
            self.op.last_upstream_status = upstream_status.clone();
        }
        self.op.status = match kind {
            FailureKind::Timeout => OperationStatus::TimedOut,
            _ => OperationStatus::Failed,
        };
        self.op.error = Some(OperationFailure {
            kind,
            upstream_status,
            message,
            details,
        });
        self.op.completed_at = Some(Utc::now());
    }

    fn fail_with(&mut self, error: Error) -> DriveEnd {
        let upstream_status = error.upstream_status().map(str::to_string);
        let (kind, details) = match &error {
            Error::Validation { details, .. } => {
                (FailureKind::Validation, details.clone().unwrap_or(Value::Null))
            }
            Error::UpstreamFailure { details, .. } => (FailureKind::UpstreamFailure, details.clone()),
            Error::Timeout {
                poll_count,
                elapsed_ms,
                ..
            } => (
                FailureKind::Timeout,
                json!({ "poll_count": poll_count, "elapsed_ms": elapsed_ms }),
            ),
            _ => (FailureKind::Transient, Value::Null),
        };
        let message = match &error {
            Error::Validation { message, .. }
            | Error::Transient { message, .. }
            | Error::UpstreamFailure { message, .. } => message.clone(),
            other => other.to_string(),
        };
        self.fail(kind, upstream_status, message, details);
        DriveEnd::Terminal
    }

    fn time_out(&mut self) {
        let details = json!({
            "poll_count": self.op.poll_count,
            "elapsed_ms": self.started.elapsed().as_millis() as u64,
            "operation_location": self.op.operation_location,
            "last_upstream_status": self.op.last_upstream_status,
        });
        let message = format!(
            "Operation did not finish after {} polls",
            self.op.poll_count
        );
        self.fail(
            FailureKind::Timeout,
            self.op.last_upstream_status.clone(),
            message,
            details,
        );
    }

    fn publish(&self) {
        self.tx.send_replace(self.op.clone());
    }
}

/// Analyze request body: the document url plus caller parameters.
pub(crate) fn analyze_request(payload: &WorkPayload) -> Value {
    let mut body = Map::new();
    body.insert("url".into(), Value::String(payload.document_url.clone()));
    for (key, value) in &payload.parameters {
        body.insert(key.clone(), value.clone());
    }
    Value::Object(body)
}

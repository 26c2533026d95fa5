//! Request deduplication and completed-result cache.
//!
//! Keyed by [`RequestFingerprint`]. An in-flight entry makes equivalent
//! submissions attach to the same operation; a completed entry serves the
//! cached result without touching the upstream. Completed entries expire after
//! the retention horizon and are evicted least-recently-completed first when
//! the size bound is hit.
//!
//! The cache is a plain synchronous structure; the orchestrator guards it
//! together with the operation map so both change under one lock. Nothing here
//! evicts on its own behalf: expiry happens only through [`RequestCache::evict_expired`]
//! and the size bound in [`RequestCache::complete`], both of which hand the
//! evicted operation ids back to the caller.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::CacheConfig;
use crate::fingerprint::RequestFingerprint;
use crate::types::CanonicalResult;

/// Outcome of registering a fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    /// No equivalent work known; the candidate operation id now owns the fingerprint
    New,
    /// Equivalent work is in flight under this operation id
    Attached(String),
    /// Equivalent work already completed
    Cached {
        operation_id: String,
        result: Arc<CanonicalResult>,
    },
}

#[derive(Debug)]
enum Entry {
    InFlight {
        operation_id: String,
    },
    Completed {
        operation_id: String,
        result: Arc<CanonicalResult>,
        completed_at: Instant,
    },
}

#[derive(Debug)]
pub struct RequestCache {
    entries: HashMap<RequestFingerprint, Entry>,
    /// Completion order; may hold stale pairs for entries already replaced
    completed: VecDeque<(Instant, RequestFingerprint)>,
    retention: Duration,
    max_entries: usize,
}

impl RequestCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            completed: VecDeque::new(),
            retention: config.retention(),
            max_entries: config.max_entries.max(1),
        }
    }

    /// Register interest in a fingerprint. Sweep expired entries first.
    pub fn register(
        &mut self,
        fingerprint: &RequestFingerprint,
        candidate_operation_id: &str,
    ) -> Registration {
        match self.entries.get(fingerprint) {
            Some(Entry::InFlight { operation_id }) => Registration::Attached(operation_id.clone()),
            Some(Entry::Completed {
                operation_id,
                result,
                ..
            }) => Registration::Cached {
                operation_id: operation_id.clone(),
                result: Arc::clone(result),
            },
            None => {
                self.entries.insert(
                    fingerprint.clone(),
                    Entry::InFlight {
                        operation_id: candidate_operation_id.to_string(),
                    },
                );
                Registration::New
            }
        }
    }

    /// Record a completed result. Returns operation ids evicted by the size bound.
    pub fn complete(
        &mut self,
        fingerprint: &RequestFingerprint,
        operation_id: &str,
        result: Arc<CanonicalResult>,
        now: Instant,
    ) -> Vec<String> {
        if !self.owned_by(fingerprint, operation_id) {
            return Vec::new();
        }

        self.entries.insert(
            fingerprint.clone(),
            Entry::Completed {
                operation_id: operation_id.to_string(),
                result,
                completed_at: now,
            },
        );
        self.completed.push_back((now, fingerprint.clone()));
        self.evict_over_capacity()
    }

    /// Drop an in-flight entry whose operation did not produce a result.
    pub fn abandon(&mut self, fingerprint: &RequestFingerprint, operation_id: &str) {
        if matches!(
            self.entries.get(fingerprint),
            Some(Entry::InFlight { operation_id: owner }) if owner == operation_id
        ) {
            self.entries.remove(fingerprint);
        }
    }

    /// Cached result for a fingerprint, if completed and not expired.
    pub fn lookup(&self, fingerprint: &RequestFingerprint, now: Instant) -> Option<Arc<CanonicalResult>> {
        match self.entries.get(fingerprint) {
            Some(Entry::Completed {
                result,
                completed_at,
                ..
            }) if now.saturating_duration_since(*completed_at) < self.retention => {
                Some(Arc::clone(result))
            }
            _ => None,
        }
    }

    /// Remove completed entries older than the retention horizon.
    /// Returns the evicted operation ids.
    pub fn evict_expired(&mut self, now: Instant) -> Vec<String> {
        let mut evicted = Vec::new();
        while let Some((completed_at, _)) = self.completed.front() {
            if now.saturating_duration_since(*completed_at) < self.retention {
                break;
            }
            if let Some((completed_at, fingerprint)) = self.completed.pop_front() {
                if let Some(id) = self.remove_if_completed_at(&fingerprint, completed_at) {
                    evicted.push(id);
                }
            }
        }
        evicted
    }

    pub fn in_flight_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e, Entry::InFlight { .. }))
            .count()
    }

    pub fn completed_count(&self) -> usize {
        self.entries.len() - self.in_flight_count()
    }

    fn owned_by(&self, fingerprint: &RequestFingerprint, operation_id: &str) -> bool {
        match self.entries.get(fingerprint) {
            Some(Entry::InFlight { operation_id: owner }) => owner == operation_id,
            Some(Entry::Completed { .. }) => false,
            // Entry was dropped (e.g. abandoned); accept the late completion
            None => true,
        }
    }

    fn evict_over_capacity(&mut self) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.completed_count() > self.max_entries {
            let Some((completed_at, fingerprint)) = self.completed.pop_front() else {
                break;
            };
            if let Some(id) = self.remove_if_completed_at(&fingerprint, completed_at) {
                evicted.push(id);
            }
        }
        evicted
    }

    /// Remove the entry only if it is the completion recorded at `completed_at`,
    /// so stale queue pairs never evict a newer completion.
    fn remove_if_completed_at(&mut self, fingerprint: &RequestFingerprint, at: Instant) -> Option<String> {
        match self.entries.get(fingerprint) {
            Some(Entry::Completed { completed_at, .. }) if *completed_at == at => {
                match self.entries.remove(fingerprint) {
                    Some(Entry::Completed { operation_id, .. }) => Some(operation_id),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

//! In-memory doubles for the upstream analysis service and blob store.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lro_core::{
    AnalysisService, BlobStore, Error, Orchestrator, OrchestratorConfig, PollPolicy, Result,
    UpstreamResponse,
};
use serde_json::{Value, json};

pub const LOCATION: &str =
    "https://upstream.example.com/contentunderstanding/analyzerResults/abc-123?api-version=2025-05-01-preview";

/// One scripted upstream reply.
#[derive(Clone, Debug)]
pub enum Reply {
    Respond(UpstreamResponse),
    TransportError,
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Reply::Respond(UpstreamResponse::new(200, body))
    }

    pub fn status(status: u16, body: Value) -> Self {
        Reply::Respond(UpstreamResponse::new(status, body))
    }

    pub fn accepted(body: Value) -> Self {
        Reply::Respond(UpstreamResponse::new(202, body).with_operation_location(LOCATION))
    }

    pub fn running() -> Self {
        Reply::ok(json!({ "status": "Running" }))
    }

    fn into_result(self) -> Result<UpstreamResponse> {
        match self {
            Reply::Respond(resp) => Ok(resp),
            Reply::TransportError => Err(Error::transient("connection reset by peer")),
        }
    }
}

/// Queue that keeps repeating its last reply once drained.
#[derive(Default)]
struct Script(Mutex<VecDeque<Reply>>);

impl Script {
    fn push(&self, reply: Reply) {
        self.0.lock().unwrap().push_back(reply);
    }

    fn next(&self) -> Result<UpstreamResponse> {
        let mut queue = self.0.lock().unwrap();
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        reply
            .unwrap_or_else(|| Reply::status(500, json!({ "error": { "message": "unscripted" } })))
            .into_result()
    }
}

#[derive(Default)]
pub struct ScriptedService {
    create: Script,
    analyze: Script,
    polls: Script,
    pub create_calls: AtomicUsize,
    pub analyze_calls: AtomicUsize,
    pub poll_calls: AtomicUsize,
    pub definitions: Mutex<Vec<Value>>,
    pub analyze_requests: Mutex<Vec<Value>>,
    pub polled_locations: Mutex<Vec<String>>,
    analyze_delay: Mutex<Option<Duration>>,
}

impl ScriptedService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_create(&self, reply: Reply) -> &Self {
        self.create.push(reply);
        self
    }

    pub fn on_analyze(&self, reply: Reply) -> &Self {
        self.analyze.push(reply);
        self
    }

    pub fn on_poll(&self, reply: Reply) -> &Self {
        self.polls.push(reply);
        self
    }

    pub fn delay_analyze(&self, delay: Duration) {
        *self.analyze_delay.lock().unwrap() = Some(delay);
    }

    pub fn analyze_count(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisService for ScriptedService {
    async fn create_analyzer(&self, _analyzer_id: &str, definition: &Value) -> Result<UpstreamResponse> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.definitions.lock().unwrap().push(definition.clone());
        self.create.next()
    }

    async fn analyze(&self, _analyzer_id: &str, request: &Value) -> Result<UpstreamResponse> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        self.analyze_requests.lock().unwrap().push(request.clone());
        let delay = *self.analyze_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.analyze.next()
    }

    async fn poll(&self, operation_location: &str) -> Result<UpstreamResponse> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        self.polled_locations
            .lock()
            .unwrap()
            .push(operation_location.to_string());
        self.polls.next()
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    pub fetches: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, url: &str, value: &Value) {
        self.blobs
            .lock()
            .unwrap()
            .insert(url.to_string(), serde_json::to_vec(value).unwrap());
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.blobs
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::validation(format!("Referenced blob returned HTTP 404: {}", url)))
    }
}

pub fn fast_policy(max_attempts: u32) -> PollPolicy {
    PollPolicy::fixed(Duration::from_millis(10), max_attempts)
}

pub fn orchestrator(
    service: &Arc<ScriptedService>,
    blobs: &Arc<MemoryBlobStore>,
    config: OrchestratorConfig,
) -> Arc<Orchestrator> {
    Orchestrator::new(config, service.clone(), blobs.clone()).unwrap()
}

pub fn default_config() -> OrchestratorConfig {
    OrchestratorConfig::default().with_poll(fast_policy(20))
}

//! Classifiers turning raw inputs and upstream responses into typed decisions.
//!
//! Each decision is computed once at its call site and carried forward; no
//! downstream code re-inspects the payload or response to decide again. In
//! particular an empty-but-present value (empty `parameters`, an empty field
//! list) is a valid payload and never triggers an alternate path.

use reqwest::Url;
use serde_json::{Value, json};
use std::time::Duration;

use crate::status::{StatusClass, classify_status};
use crate::types::{SchemaSource, WorkPayload};
use crate::upstream::UpstreamResponse;

// ─────────────────────────────────────────────────────────────────────────────
// HTTP status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpClass {
    Success,
    /// 4xx other than 408/429: the request itself is wrong
    Rejected,
    /// 5xx, 408, 429: worth retrying later
    Unavailable,
}

pub fn classify_http(status: u16) -> HttpClass {
    match status {
        200..=299 => HttpClass::Success,
        408 | 429 => HttpClass::Unavailable,
        400..=499 => HttpClass::Rejected,
        _ => HttpClass::Unavailable,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payload
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum PayloadDecision {
    /// Everything needed is inline
    Ready,
    /// The analyzer definition must be fetched from blob storage first
    FetchSchema { url: String },
    /// Incomplete or malformed; fail fast
    Reject { reason: String },
}

pub fn classify_payload(payload: &WorkPayload) -> PayloadDecision {
    let reject = |reason: String| PayloadDecision::Reject { reason };

    let analyzer_id = payload.analyzer_id.trim();
    if analyzer_id.is_empty() {
        return reject("analyzer_id is required".into());
    }
    if !analyzer_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return reject(format!(
            "analyzer_id '{}' may only contain letters, digits, '-', '_' and '.'",
            analyzer_id
        ));
    }

    if payload.document_url.trim().is_empty() {
        return reject("document_url is required".into());
    }
    if let Err(reason) = check_http_url(&payload.document_url) {
        return reject(format!("document_url {}", reason));
    }

    if payload.parameters.contains_key("url") {
        return reject("parameters must not override the document url".into());
    }

    match &payload.schema {
        None => PayloadDecision::Ready,
        Some(SchemaSource::Inline { definition }) => {
            if definition.is_object() {
                PayloadDecision::Ready
            } else {
                reject("inline schema definition must be a JSON object".into())
            }
        }
        Some(SchemaSource::Blob { url }) => {
            if url.trim().is_empty() {
                return reject("schema blob url is required".into());
            }
            match check_http_url(url) {
                Ok(()) => PayloadDecision::FetchSchema { url: url.clone() },
                Err(reason) => reject(format!("schema blob url {}", reason)),
            }
        }
    }
}

fn check_http_url(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw.trim()).map_err(|e| format!("is not a valid URL: {}", e))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("has unsupported scheme '{}'", other)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Upstream responses
// ─────────────────────────────────────────────────────────────────────────────

/// How to proceed after the initial create/analyze call.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitDecision {
    /// Terminal payload returned directly; no polling
    Completed {
        upstream_status: Option<String>,
        body: Value,
    },
    /// Terminal failure returned directly
    Failed {
        upstream_status: String,
        message: String,
        details: Value,
    },
    /// Long-running operation; poll the location verbatim
    Accepted {
        operation_location: String,
        upstream_status: Option<String>,
        upstream_id: Option<String>,
        retry_after: Option<Duration>,
    },
    /// 4xx: the upstream refused the request
    Rejected {
        http_status: u16,
        message: String,
        details: Value,
    },
    /// 5xx/429/408
    Unavailable { http_status: u16, message: String },
}

pub fn classify_submit_response(resp: &UpstreamResponse) -> SubmitDecision {
    match classify_http(resp.status) {
        HttpClass::Rejected => {
            let (message, details) = extract_upstream_error(&resp.body);
            return SubmitDecision::Rejected {
                http_status: resp.status,
                message,
                details,
            };
        }
        HttpClass::Unavailable => {
            let (message, _) = extract_upstream_error(&resp.body);
            return SubmitDecision::Unavailable {
                http_status: resp.status,
                message,
            };
        }
        HttpClass::Success => {}
    }

    let raw_status = body_status(&resp.body);
    let class = raw_status.as_deref().map(classify_status);

    if class == Some(StatusClass::Failed) {
        let (message, details) = extract_upstream_error(&resp.body);
        return SubmitDecision::Failed {
            upstream_status: raw_status.unwrap_or_default(),
            message,
            details,
        };
    }

    match &resp.operation_location {
        Some(location) => {
            let finished = match class {
                Some(StatusClass::Succeeded) => true,
                None => resp.status != 202,
                _ => false,
            };
            if finished && has_result_content(&resp.body) {
                SubmitDecision::Completed {
                    upstream_status: raw_status,
                    body: resp.body.clone(),
                }
            } else {
                SubmitDecision::Accepted {
                    operation_location: location.clone(),
                    upstream_status: raw_status,
                    upstream_id: body_id(&resp.body),
                    retry_after: resp.retry_after,
                }
            }
        }
        None => {
            let pending = class == Some(StatusClass::InProgress) || resp.status == 202;
            if pending && !has_result_content(&resp.body) {
                SubmitDecision::Failed {
                    upstream_status: raw_status.unwrap_or_else(|| resp.status.to_string()),
                    message: "upstream accepted the request without an operation-location header"
                        .into(),
                    details: resp.body.clone(),
                }
            } else {
                SubmitDecision::Completed {
                    upstream_status: raw_status,
                    body: resp.body.clone(),
                }
            }
        }
    }
}

/// What one poll attempt tells us.
#[derive(Debug, Clone, PartialEq)]
pub enum PollDecision {
    Pending {
        upstream_status: Option<String>,
        retry_after: Option<Duration>,
        /// false when the status string matched no known token
        recognized: bool,
    },
    Completed {
        upstream_status: String,
        body: Value,
    },
    Failed {
        upstream_status: String,
        message: String,
        details: Value,
    },
    Rejected {
        http_status: u16,
        message: String,
        details: Value,
    },
    Unavailable {
        http_status: u16,
        message: String,
    },
}

pub fn classify_poll_response(resp: &UpstreamResponse) -> PollDecision {
    match classify_http(resp.status) {
        HttpClass::Rejected => {
            let (message, details) = extract_upstream_error(&resp.body);
            return PollDecision::Rejected {
                http_status: resp.status,
                message,
                details,
            };
        }
        HttpClass::Unavailable => {
            let (message, _) = extract_upstream_error(&resp.body);
            return PollDecision::Unavailable {
                http_status: resp.status,
                message,
            };
        }
        HttpClass::Success => {}
    }

    let raw_status = body_status(&resp.body);
    match raw_status.as_deref().map(classify_status) {
        Some(StatusClass::Succeeded) => PollDecision::Completed {
            upstream_status: raw_status.unwrap_or_default(),
            body: resp.body.clone(),
        },
        Some(StatusClass::Failed) => {
            let (message, details) = extract_upstream_error(&resp.body);
            PollDecision::Failed {
                upstream_status: raw_status.unwrap_or_default(),
                message,
                details,
            }
        }
        Some(StatusClass::InProgress) => PollDecision::Pending {
            upstream_status: raw_status,
            retry_after: resp.retry_after,
            recognized: true,
        },
        None if resp.status != 202 && has_result_content(&resp.body) => PollDecision::Completed {
            upstream_status: String::new(),
            body: resp.body.clone(),
        },
        Some(StatusClass::Unknown) | None => PollDecision::Pending {
            upstream_status: raw_status,
            retry_after: resp.retry_after,
            recognized: false,
        },
    }
}

/// Pull a human-readable message and the structured error out of an upstream body.
pub fn extract_upstream_error(body: &Value) -> (String, Value) {
    let error = body
        .get("error")
        .or_else(|| body.pointer("/result/error"))
        .cloned();

    match error {
        Some(err @ Value::Object(_)) => {
            let code = err.get("code").and_then(Value::as_str);
            let message = err.get("message").and_then(Value::as_str);
            let inner = err
                .pointer("/innererror/message")
                .or_else(|| err.pointer("/innerError/message"))
                .and_then(Value::as_str);

            let mut text = match (code, message) {
                (Some(c), Some(m)) => format!("{}: {}", c, m),
                (None, Some(m)) => m.to_string(),
                (Some(c), None) => c.to_string(),
                (None, None) => "upstream reported an error without a message".to_string(),
            };
            if let Some(inner) = inner {
                text.push_str(&format!(" ({})", inner));
            }
            (text, err)
        }
        Some(Value::String(s)) => (s.clone(), json!({ "message": s })),
        _ => match body {
            Value::String(s) if !s.is_empty() => (s.clone(), Value::Null),
            _ => (
                "upstream reported a failure without error details".to_string(),
                Value::Null,
            ),
        },
    }
}

/// Raw status string reported in a body, unnormalized.
pub fn body_status(body: &Value) -> Option<String> {
    body.get("status")
        .or_else(|| body.pointer("/result/status"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn body_id(body: &Value) -> Option<String> {
    body.get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn has_result_content(body: &Value) -> bool {
    ["contents", "result", "analyzeResult"]
        .iter()
        .any(|key| body.get(key).is_some())
}

//! Upstream status normalization.
//!
//! Upstream status strings arrive with inconsistent capitalization
//! ("Running", "running", "NotStarted", "READY"). Every comparison site in the
//! crate goes through [`normalize_status`] / [`classify_status`]; nothing else
//! lower-cases or matches status text.

use serde::{Deserialize, Serialize};

const IN_PROGRESS: &[&str] = &[
    "notstarted",
    "queued",
    "pending",
    "accepted",
    "running",
    "inprogress",
    "processing",
];

const SUCCEEDED: &[&str] = &["succeeded", "ready", "completed", "success", "done"];

const FAILED: &[&str] = &["failed", "error", "canceled", "cancelled"];

/// Lower-case and trim a raw upstream status.
pub fn normalize_status(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Coarse meaning of an upstream status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    InProgress,
    Succeeded,
    Failed,
    Unknown,
}

impl StatusClass {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StatusClass::Succeeded | StatusClass::Failed)
    }
}

/// Classify a raw upstream status string, case-insensitively.
///
/// Separators are ignored so "Not Started", "not_started" and "NotStarted"
/// all land on the same token.
pub fn classify_status(raw: &str) -> StatusClass {
    let normalized = normalize_status(raw);
    let token: String = normalized
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .collect();

    if SUCCEEDED.contains(&token.as_str()) {
        StatusClass::Succeeded
    } else if FAILED.contains(&token.as_str()) {
        StatusClass::Failed
    } else if IN_PROGRESS.contains(&token.as_str()) {
        StatusClass::InProgress
    } else {
        StatusClass::Unknown
    }
}

//! Append-only run audit: step logs and screenshot artifacts.
//!
//! | Module | Role |
//! |--------|------|
//! | [`logger`] | Write side: per-run step log and screenshots, bounded context cache |
//! | [`runs`]   | Read side: run listing, step logs, screenshot resolution |
//!
//! On-disk layout under the runs root:
//!
//! ```text
//! <root>/<runId>/steps.jsonl
//! <root>/<runId>/screenshots/step_<stepId>.{png|jpg}
//! ```
//!
//! Run and step ids are checked with [`is_valid_id`] before any path is
//! built from them.

pub mod logger;
pub mod runs;

use serde::{Deserialize, Serialize};

pub use logger::{RunContext, RunLogger, MAX_CACHED_RUNS};
pub use runs::{RunSteps, RunSummary, RunsService, ScreenshotFile};

/// Step log file name inside a run directory.
pub const STEPS_FILE: &str = "steps.jsonl";

/// Screenshot directory name inside a run directory.
pub const SCREENSHOTS_DIR: &str = "screenshots";

const MAX_ID_LEN: usize = 128;

/// `true` for non-empty ids made only of ASCII letters, digits, `-`, `_`.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Fresh random id (UUID v4, simple form).
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// One line of `steps.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepLogEntry {
    pub step_id: String,
    /// Operation or step kind, e.g. `"input.mouse.click"`.
    pub endpoint: String,
    pub ts_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
}

impl StepLogEntry {
    /// Entry stamped with the current time; the remaining fields are set
    /// by the caller.
    pub fn new(step_id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            endpoint: endpoint.into(),
            ts_ms: chrono::Utc::now().timestamp_millis(),
            request: None,
            response: None,
            ok: None,
            error: None,
            duration_ms: None,
            screenshot_path: None,
        }
    }
}

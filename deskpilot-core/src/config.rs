//! Agent configuration.
//!
//! Read from a JSON file with camelCase keys.  Every field has a default,
//! so an empty object (or a missing file) is a valid configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audit::runs::DEFAULT_LIST_LIMIT;
use crate::errors::AutomationError;
use crate::input::Humanize;

fn default_runs_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("deskpilot").join("runs"))
        .unwrap_or_else(|| PathBuf::from("runs"))
}

fn default_list_runs_limit() -> usize {
    DEFAULT_LIST_LIMIT
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Root of the run audit store.
    #[serde(default = "default_runs_dir")]
    pub runs_dir: PathBuf,
    /// Runs returned by a listing when the caller gives no limit.
    #[serde(default = "default_list_runs_limit")]
    pub list_runs_limit: usize,
    /// Humanization for input requests that carry none.
    #[serde(default)]
    pub default_humanize: Option<Humanize>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            runs_dir: default_runs_dir(),
            list_runs_limit: DEFAULT_LIST_LIMIT,
            default_humanize: None,
        }
    }
}

impl AgentConfig {
    /// Load `path`.  A missing file yields the defaults; unreadable or
    /// malformed files are errors.
    pub fn load(path: &Path) -> Result<Self, AutomationError> {
        if !path.exists() {
            log::debug!("config {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn with_runs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runs_dir = dir.into();
        self
    }
}

//! Read side of the run audit.
//!
//! Every lookup validates its ids first, then canonicalizes the resolved
//! path and requires it to stay under the canonical runs root.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;

use super::{is_valid_id, SCREENSHOTS_DIR, STEPS_FILE};
use crate::capture::CaptureFormat;
use crate::errors::AutomationError;

/// Default number of runs returned by [`RunsService::list_runs`].
pub const DEFAULT_LIST_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub last_write_utc: DateTime<Utc>,
    pub steps_count: usize,
    pub has_screenshots: bool,
}

/// Raw step log of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSteps {
    pub run_id: String,
    pub count: usize,
    /// `steps.jsonl` verbatim.
    pub content: String,
}

/// A resolved screenshot artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenshotFile {
    pub path: PathBuf,
    pub content_type: &'static str,
}

impl ScreenshotFile {
    pub fn read(&self) -> Result<Vec<u8>, AutomationError> {
        Ok(fs::read(&self.path)?)
    }
}

fn count_lines(content: &str) -> usize {
    content.lines().filter(|l| !l.trim().is_empty()).count()
}

#[derive(Debug, Clone)]
pub struct RunsService {
    root: PathBuf,
}

impl RunsService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn check_id(kind: &str, id: &str) -> Result<(), AutomationError> {
        if is_valid_id(id) {
            Ok(())
        } else {
            Err(AutomationError::Validation(format!("invalid {kind} id {id:?}")))
        }
    }

    /// Canonicalize `path` and require it under the canonical root.
    fn contain(&self, path: &Path) -> Result<PathBuf, AutomationError> {
        let not_found = || AutomationError::NotFound(path.display().to_string());

        let root = self.root.canonicalize().map_err(|_| not_found())?;
        let resolved = path.canonicalize().map_err(|_| not_found())?;
        if resolved.starts_with(&root) {
            Ok(resolved)
        } else {
            log::warn!("path {} escapes runs root {}", resolved.display(), root.display());
            Err(not_found())
        }
    }

    /// Most recently written runs first, at most `limit`.
    pub fn list_runs(&self, limit: usize) -> Result<Vec<RunSummary>, AutomationError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut dirs: Vec<(SystemTime, String, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !is_valid_id(&name) {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_dir() {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            dirs.push((modified, name, entry.path()));
        }

        dirs.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        dirs.truncate(limit);

        let summaries = dirs
            .into_par_iter()
            .map(|(modified, run_id, dir)| {
                let steps_count = fs::read_to_string(dir.join(STEPS_FILE))
                    .map(|c| count_lines(&c))
                    .unwrap_or(0);
                let has_screenshots = fs::read_dir(dir.join(SCREENSHOTS_DIR))
                    .map(|mut d| d.next().is_some())
                    .unwrap_or(false);
                RunSummary {
                    run_id,
                    last_write_utc: DateTime::<Utc>::from(modified),
                    steps_count,
                    has_screenshots,
                }
            })
            .collect();
        Ok(summaries)
    }

    pub fn get_steps(&self, run_id: &str) -> Result<RunSteps, AutomationError> {
        Self::check_id("run", run_id)?;

        let path = self.contain(&self.root.join(run_id).join(STEPS_FILE))?;
        let content = fs::read_to_string(path)?;
        Ok(RunSteps {
            run_id: run_id.to_owned(),
            count: count_lines(&content),
            content,
        })
    }

    /// Resolve `screenshots/step_<step_id>.png`, else `.jpg`.
    pub fn get_screenshot(&self, run_id: &str, step_id: &str) -> Result<ScreenshotFile, AutomationError> {
        Self::check_id("run", run_id)?;
        Self::check_id("step", step_id)?;

        let dir = self.contain(&self.root.join(run_id).join(SCREENSHOTS_DIR))?;
        for format in [CaptureFormat::Png, CaptureFormat::Jpeg] {
            let candidate = dir.join(format!("step_{step_id}.{}", format.extension()));
            if !candidate.is_file() {
                continue;
            }
            let path = self.contain(&candidate)?;
            return Ok(ScreenshotFile {
                path,
                content_type: format.content_type(),
            });
        }
        Err(AutomationError::NotFound(format!(
            "screenshot for step {step_id} in run {run_id}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{RunLogger, StepLogEntry};

    fn seeded() -> (tempfile::TempDir, RunsService) {
        let tmp = tempfile::tempdir().unwrap();
        let logger = RunLogger::new(tmp.path());
        for step in ["a", "b", "c"] {
            logger.log_step("alpha", &StepLogEntry::new(step, "sleep")).unwrap();
        }
        logger.log_step("beta", &StepLogEntry::new("x", "capture")).unwrap();
        logger
            .save_screenshot("beta", "x", b"\x89PNG", CaptureFormat::Png)
            .unwrap();
        let service = RunsService::new(tmp.path());
        (tmp, service)
    }

    #[test]
    fn test_list_runs_summaries() {
        let (_tmp, service) = seeded();
        let runs = service.list_runs(DEFAULT_LIST_LIMIT).unwrap();
        assert_eq!(runs.len(), 2);

        let alpha = runs.iter().find(|r| r.run_id == "alpha").unwrap();
        assert_eq!(alpha.steps_count, 3);
        assert!(!alpha.has_screenshots);

        let beta = runs.iter().find(|r| r.run_id == "beta").unwrap();
        assert!(beta.has_screenshots);

        assert_eq!(service.list_runs(1).unwrap().len(), 1);
    }

    #[test]
    fn test_list_runs_skips_invalid_names_and_files() {
        let (tmp, service) = seeded();
        fs::create_dir(tmp.path().join("bad.name")).unwrap();
        fs::write(tmp.path().join("loose_file"), b"x").unwrap();
        let runs = service.list_runs(10).unwrap();
        assert!(runs.iter().all(|r| r.run_id == "alpha" || r.run_id == "beta"));
    }

    #[test]
    fn test_list_runs_on_missing_root() {
        let service = RunsService::new("/nonexistent/deskpilot/runs");
        assert!(service.list_runs(5).unwrap().is_empty());
    }

    #[test]
    fn test_get_steps() {
        let (_tmp, service) = seeded();
        let steps = service.get_steps("alpha").unwrap();
        assert_eq!(steps.count, 3);
        assert!(steps.content.contains("\"stepId\":\"b\""));
        assert_eq!(service.get_steps("missing").unwrap_err().status_code(), 404);
    }

    #[test]
    fn test_get_screenshot() {
        let (_tmp, service) = seeded();
        let shot = service.get_screenshot("beta", "x").unwrap();
        assert_eq!(shot.content_type, "image/png");
        assert_eq!(shot.read().unwrap(), b"\x89PNG");
        assert_eq!(service.get_screenshot("beta", "y").unwrap_err().status_code(), 404);
    }

    #[test]
    fn test_traversal_ids_rejected() {
        let (_tmp, service) = seeded();
        for bad in ["..", "../alpha", "alpha/..", "/etc", "a\\b"] {
            assert_eq!(service.get_steps(bad).unwrap_err().status_code(), 400);
            assert_eq!(service.get_screenshot(bad, "x").unwrap_err().status_code(), 400);
            assert_eq!(service.get_screenshot("beta", bad).unwrap_err().status_code(), 400);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_contained() {
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join(STEPS_FILE), b"{}\n").unwrap();

        let (tmp, service) = seeded();
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("escape")).unwrap();
        assert_eq!(service.get_steps("escape").unwrap_err().status_code(), 404);
    }
}

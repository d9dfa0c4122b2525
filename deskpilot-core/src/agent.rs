//! One-stop facade over every component.
//!
//! An [`Agent`] owns the backend seams, the capture and input pipelines,
//! the macro engine, the shared [`RunGuard`], and both sides of the run
//! audit.  It is cheap to clone and safe to share across request threads.
//!
//! Input and macro operations hold the run guard for their whole
//! duration and report `409` while another sequence is in flight.
//! Capture and every read-only operation run unguarded.
//!
//! Single actions are audited only when the caller names a run id.
//! Macros always are; a run id is generated when none is given.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use crate::audit::{is_valid_id, new_id, RunLogger, RunSteps, RunSummary, RunsService, ScreenshotFile, StepLogEntry};
use crate::capture::{CaptureEngine, CaptureFailure, CaptureRequest, CaptureResult};
use crate::config::AgentConfig;
use crate::display::{DisplayEnvironment, DisplayInfo};
use crate::errors::AutomationError;
use crate::geometry::RectPx;
use crate::guard::RunGuard;
use crate::input::{
    InputBackend, KeyInjector, KeyInputRequest, KeyInputResult, MouseCommand, MouseInjector, MouseInputRequest,
    MouseInputResult,
};
use crate::platform::{native_backend, Backend};
use crate::runner::{MacroEngine, MacroRunRequest, MacroRunResult};
use crate::window::{WindowCatalog, WindowInfo, WindowMatch};

/// A capture plus where it was recorded, when it was.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedImage {
    #[serde(flatten)]
    pub result: CaptureResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
}

/// Cursor and screen snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorInfo {
    pub cursor_x: Option<i32>,
    pub cursor_y: Option<i32>,
    pub virtual_screen_rect_px: RectPx,
    pub foreground_hwnd: Option<u64>,
}

fn mouse_endpoint(kind: MouseCommand) -> &'static str {
    match kind {
        MouseCommand::Move => "input.mouse.move",
        MouseCommand::Click => "input.mouse.click",
        MouseCommand::Double => "input.mouse.double",
        MouseCommand::Right => "input.mouse.right",
        MouseCommand::Wheel => "input.mouse.wheel",
        MouseCommand::Drag => "input.mouse.drag",
    }
}

fn invalid_run_id(run_id: &str) -> AutomationError {
    AutomationError::Validation(format!("invalid run id {run_id:?}"))
}

#[derive(Clone)]
pub struct Agent {
    displays: Arc<dyn DisplayEnvironment>,
    windows: Arc<dyn WindowCatalog>,
    input: Arc<dyn InputBackend>,
    capture: CaptureEngine,
    mouse: MouseInjector,
    keys: KeyInjector,
    macros: MacroEngine,
    guard: Arc<RunGuard>,
    audit: Arc<RunLogger>,
    runs: RunsService,
    config: AgentConfig,
}

impl Agent {
    pub fn new(backend: Backend, config: AgentConfig) -> Self {
        let Backend {
            displays,
            windows,
            pixels,
            input,
        } = backend;

        let capture = CaptureEngine::new(displays.clone(), windows.clone(), pixels);
        let mouse = MouseInjector::new(input.clone(), displays.clone());
        let keys = KeyInjector::new(input.clone());
        let audit = Arc::new(RunLogger::new(config.runs_dir.clone()));
        let guard = Arc::new(RunGuard::new());
        let macros = MacroEngine::new(guard.clone(), windows.clone(), capture.clone(), mouse.clone(), keys.clone())
            .with_audit(audit.clone())
            .with_default_humanize(config.default_humanize);

        log::debug!("agent runs root: {}", config.runs_dir.display());

        Self {
            displays,
            windows,
            input,
            capture,
            mouse,
            keys,
            macros,
            guard,
            audit,
            runs: RunsService::new(config.runs_dir.clone()),
            config,
        }
    }

    /// Agent over this platform's native backend.
    pub fn native(config: AgentConfig) -> Self {
        Self::new(native_backend(), config)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// The shared run guard.
    pub fn guard(&self) -> &Arc<RunGuard> {
        &self.guard
    }

    pub fn is_busy(&self) -> bool {
        self.guard.is_busy()
    }

    // -- windows and displays ----------------------------------------------

    pub fn list_displays(&self) -> Vec<DisplayInfo> {
        self.displays.list_displays()
    }

    pub fn list_windows(&self) -> Result<Vec<WindowInfo>, AutomationError> {
        self.windows.list_windows()
    }

    pub fn focus_window(&self, matcher: &WindowMatch) -> Result<Option<WindowInfo>, AutomationError> {
        self.windows.focus_window(matcher)
    }

    pub fn cursor_info(&self) -> CursorInfo {
        let cursor = self.input.cursor_pos();
        CursorInfo {
            cursor_x: cursor.map(|c| c.0),
            cursor_y: cursor.map(|c| c.1),
            virtual_screen_rect_px: self.displays.virtual_screen_rect(),
            foreground_hwnd: self.windows.foreground_window(),
        }
    }

    // -- capture -----------------------------------------------------------

    /// Capture; with a run id, also save the image and log the step.
    pub fn capture(&self, request: &CaptureRequest, run_id: Option<&str>) -> Result<CapturedImage, CaptureFailure> {
        if run_id.is_some_and(|id| !is_valid_id(id)) {
            return Err(CaptureFailure::new("BAD_RUN_ID"));
        }

        let started = Instant::now();
        let outcome = self.capture.capture_with_diagnostics(request);
        let Some(run_id) = run_id else {
            return outcome.map(|result| CapturedImage {
                result,
                step_id: None,
                screenshot_path: None,
            });
        };

        let step_id = new_id();
        let mut entry = StepLogEntry::new(step_id.as_str(), "capture");
        entry.request = serde_json::to_value(request).ok();

        let captured = match outcome {
            Ok(result) => {
                let screenshot_path = self
                    .audit
                    .save_screenshot(run_id, &step_id, &result.image_bytes, result.format)
                    .map_err(|e| log::warn!("run {run_id}: failed to save screenshot for {step_id}: {e}"))
                    .ok();
                entry.response = serde_json::to_value(&result).ok();
                entry.ok = Some(true);
                entry.screenshot_path = screenshot_path.clone();
                Ok(CapturedImage {
                    result,
                    step_id: Some(step_id.clone()),
                    screenshot_path,
                })
            }
            Err(failure) => {
                entry.response = serde_json::to_value(&failure).ok();
                entry.ok = Some(false);
                entry.error = Some(failure.to_string());
                Err(failure)
            }
        };

        entry.duration_ms = Some(started.elapsed().as_millis() as u64);
        self.record(run_id, &entry);
        captured
    }

    // -- input -------------------------------------------------------------

    /// One mouse action under the run guard.
    pub fn mouse(&self, request: &MouseInputRequest, run_id: Option<&str>) -> MouseInputResult {
        if let Some(id) = run_id.filter(|id| !is_valid_id(id)) {
            return MouseInputResult::failure(&invalid_run_id(id), None);
        }
        let Some(_ticket) = self.guard.try_ticket() else {
            return MouseInputResult::failure(&AutomationError::Busy, None);
        };

        let started = Instant::now();
        let mut request = request.clone();
        if request.humanize.is_none() {
            request.humanize = self.config.default_humanize;
        }
        let result = self.mouse.execute(&request);

        if let Some(run_id) = run_id {
            let endpoint = mouse_endpoint(request.kind);
            self.record_action(run_id, endpoint, &request, &result, result.ok, result.error.as_deref(), started);
        }
        result
    }

    /// One key chord under the run guard.
    pub fn keys(&self, request: &KeyInputRequest, run_id: Option<&str>) -> KeyInputResult {
        if let Some(id) = run_id.filter(|id| !is_valid_id(id)) {
            return KeyInputResult::rejected(invalid_run_id(id));
        }
        let Some(_ticket) = self.guard.try_ticket() else {
            return KeyInputResult::rejected(AutomationError::Busy);
        };

        let started = Instant::now();
        let mut request = request.clone();
        if request.humanize.is_none() {
            request.humanize = self.config.default_humanize;
        }
        let result = self.keys.execute(&request);

        if let Some(run_id) = run_id {
            self.record_action(run_id, "input.key.press", &request, &result, result.ok, result.error.as_deref(), started);
        }
        result
    }

    // -- macros ------------------------------------------------------------

    /// Run a macro.  The engine takes the run guard itself, and every step
    /// lands in the run's log.
    pub fn run_macro(&self, request: &MacroRunRequest, run_id: Option<&str>) -> MacroRunResult {
        let run_id = run_id.map(str::to_owned).unwrap_or_else(new_id);
        self.macros.execute(request, &run_id)
    }

    // -- runs --------------------------------------------------------------

    /// Recent runs, newest first.  `None` uses the configured limit.
    pub fn list_runs(&self, limit: Option<usize>) -> Result<Vec<RunSummary>, AutomationError> {
        self.runs.list_runs(limit.unwrap_or(self.config.list_runs_limit))
    }

    pub fn get_steps(&self, run_id: &str) -> Result<RunSteps, AutomationError> {
        self.runs.get_steps(run_id)
    }

    pub fn get_screenshot(&self, run_id: &str, step_id: &str) -> Result<ScreenshotFile, AutomationError> {
        self.runs.get_screenshot(run_id, step_id)
    }

    // -- audit helpers -----------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn record_action<Req: Serialize, Resp: Serialize>(
        &self,
        run_id: &str,
        endpoint: &str,
        request: &Req,
        response: &Resp,
        ok: bool,
        error: Option<&str>,
        started: Instant,
    ) {
        let mut entry = StepLogEntry::new(new_id(), endpoint);
        entry.request = serde_json::to_value(request).ok();
        entry.response = serde_json::to_value(response).ok().filter(|v| !v.is_null());
        entry.ok = Some(ok);
        entry.error = error.map(str::to_owned);
        entry.duration_ms = Some(started.elapsed().as_millis() as u64);
        self.record(run_id, &entry);
    }

    fn record(&self, run_id: &str, entry: &StepLogEntry) {
        if let Err(e) = self.audit.log_step(run_id, entry) {
            log::warn!("run {run_id}: failed to record {} step {}: {e}", entry.endpoint, entry.step_id);
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("runs_dir", &self.config.runs_dir)
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

/// Base64 JSON view of a capture, as the worker protocol returns it.
pub fn captured_image_json(image: &CapturedImage) -> Value {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;

    let mut value = serde_json::to_value(image).unwrap_or(Value::Null);
    if let Some(obj) = value.as_object_mut() {
        obj.insert("imageB64".into(), Value::String(BASE64.encode(&image.result.image_bytes)));
    }
    value
}

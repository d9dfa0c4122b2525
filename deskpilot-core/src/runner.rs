//! Macro execution: an ordered list of typed steps run to completion or to
//! the first failing step whose policy is `stop`.
//!
//! Steps arrive as raw JSON ([`StepSpec`]) and are parsed one at a time,
//! so a malformed step becomes a 400 result for that step instead of
//! rejecting the whole run.  A step that panics is reported as a 500
//! `INTERNAL_ERROR` and never takes the run down with it.
//!
//! With a [`RunLogger`] attached, every step result is appended to the
//! run's step log and capture steps save their image as a screenshot.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::audit::{is_valid_id, new_id, RunLogger, StepLogEntry};
use crate::capture::{CaptureEngine, CaptureRequest};
use crate::errors::AutomationError;
use crate::guard::RunGuard;
use crate::input::{
    Humanize, KeyCommand, KeyInjector, KeyInputRequest, MouseButton, MouseCommand, MouseInjector, MouseInputRequest,
};
use crate::window::{WindowCatalog, WindowMatch};

// ---------------------------------------------------------------------------
// Step model
// ---------------------------------------------------------------------------

/// What to do after a failed step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnFailure {
    #[default]
    Stop,
    Continue,
}

/// Pointer fields shared by every mouse step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MouseArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button: Option<MouseButton>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x2: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y2: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dx: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dy: Option<i32>,
    /// Wheel delta applied to the axis chosen by `horizontal`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horizontal: Option<bool>,
}

impl MouseArgs {
    pub fn at(x: i32, y: i32) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::default()
        }
    }

    fn to_request(&self, kind: MouseCommand, humanize: Option<Humanize>) -> MouseInputRequest {
        let (dx, dy) = match self.delta {
            Some(delta) if self.horizontal.unwrap_or(false) => (Some(delta), Some(0)),
            Some(delta) => (self.dx, Some(delta)),
            None => (self.dx, self.dy),
        };
        MouseInputRequest {
            kind,
            x: self.x,
            y: self.y,
            button: self.button,
            dx,
            dy,
            x2: self.x2,
            y2: self.y2,
            humanize,
        }
    }
}

/// The closed set of step kinds, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StepAction {
    #[serde(rename = "window.focus")]
    WindowFocus {
        #[serde(rename = "match", default)]
        matcher: Option<WindowMatch>,
    },
    #[serde(rename = "capture")]
    Capture(CaptureRequest),
    #[serde(rename = "input.mouse.move")]
    MouseMove(MouseArgs),
    #[serde(rename = "input.mouse.click", alias = "input.mouse")]
    MouseClick(MouseArgs),
    #[serde(rename = "input.mouse.double")]
    MouseDouble(MouseArgs),
    #[serde(rename = "input.mouse.right")]
    MouseRight(MouseArgs),
    #[serde(rename = "input.mouse.drag")]
    MouseDrag(MouseArgs),
    #[serde(rename = "input.mouse.wheel", alias = "input.wheel")]
    MouseWheel(MouseArgs),
    #[serde(rename = "input.key.press", alias = "input.key")]
    KeyPress {
        #[serde(default)]
        keys: Vec<String>,
    },
    #[serde(rename = "sleep")]
    Sleep {
        #[serde(default)]
        ms: i64,
    },
}

impl StepAction {
    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::WindowFocus { .. } => "window.focus",
            StepAction::Capture(_) => "capture",
            StepAction::MouseMove(_) => "input.mouse.move",
            StepAction::MouseClick(_) => "input.mouse.click",
            StepAction::MouseDouble(_) => "input.mouse.double",
            StepAction::MouseRight(_) => "input.mouse.right",
            StepAction::MouseDrag(_) => "input.mouse.drag",
            StepAction::MouseWheel(_) => "input.mouse.wheel",
            StepAction::KeyPress { .. } => "input.key.press",
            StepAction::Sleep { .. } => "sleep",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MacroStep {
    /// Caller-supplied step id; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<OnFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humanize: Option<Humanize>,
    #[serde(flatten)]
    pub action: StepAction,
}

impl MacroStep {
    pub fn new(action: StepAction) -> Self {
        Self {
            id: None,
            on_failure: None,
            humanize: None,
            action,
        }
    }

    pub fn on_failure(mut self, policy: OnFailure) -> Self {
        self.on_failure = Some(policy);
        self
    }
}

/// A step as received, parsed when its turn comes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepSpec(pub Value);

impl StepSpec {
    pub fn parse(&self) -> Result<MacroStep, AutomationError> {
        MacroStep::deserialize(&self.0).map_err(|e| AutomationError::Validation(format!("invalid step: {e}")))
    }

    fn raw_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }
}

impl From<MacroStep> for StepSpec {
    fn from(step: MacroStep) -> Self {
        StepSpec(serde_json::to_value(step).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MacroDefaults {
    pub humanize: Option<Humanize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MacroRunRequest {
    pub steps: Vec<StepSpec>,
    pub defaults: Option<MacroDefaults>,
    /// Policy for steps that do not set their own.
    pub on_failure: Option<OnFailure>,
    /// Legacy switch: `false` is `continue`, `true` is `stop`.
    pub fail_fast: Option<bool>,
}

impl MacroRunRequest {
    pub fn new(steps: impl IntoIterator<Item = MacroStep>) -> Self {
        Self {
            steps: steps.into_iter().map(StepSpec::from).collect(),
            ..Self::default()
        }
    }

    fn run_policy(&self) -> OnFailure {
        match (self.on_failure, self.fail_fast) {
            (Some(policy), _) => policy,
            (None, Some(false)) => OnFailure::Continue,
            _ => OnFailure::Stop,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MacroStepResult {
    pub step_id: String,
    pub kind: String,
    pub ok: bool,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MacroRunResult {
    pub run_id: String,
    pub ok: bool,
    pub steps: Vec<MacroStepResult>,
    /// `pending` when the run was rejected before its first step.
    pub state: RunState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MacroRunResult {
    pub(crate) fn rejected(run_id: &str, err: AutomationError) -> Self {
        Self {
            run_id: run_id.to_owned(),
            ok: false,
            steps: Vec::new(),
            state: RunState::Pending,
            status_code: Some(err.status_code()),
            error: Some(err.to_string()),
        }
    }
}

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Running,
    Completed,
}

impl RunState {
    /// `Pending -> Running`.  Any other state stays put.
    fn start(self) -> Self {
        match self {
            RunState::Pending => RunState::Running,
            other => other,
        }
    }

    /// `Running -> Completed`.  A run that never started stays pending.
    fn finish(self) -> Self {
        match self {
            RunState::Running => RunState::Completed,
            other => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Step failures
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct StepFailure {
    status: u16,
    error: String,
    data: Option<Value>,
}

impl StepFailure {
    fn new(status: u16, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            data: None,
        }
    }
}

impl From<AutomationError> for StepFailure {
    fn from(err: AutomationError) -> Self {
        let data = err.os_code().map(|code| json!({ "lastError": code }));
        Self {
            status: err.status_code(),
            error: err.to_string(),
            data,
        }
    }
}

struct StepSuccess {
    data: Value,
    screenshot_path: Option<String>,
}

impl StepSuccess {
    fn data(data: Value) -> Self {
        Self {
            data,
            screenshot_path: None,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "step panicked".to_owned()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Sequences steps over the window, capture, and input components.
///
/// A run executes only while it holds the shared [`RunGuard`]; a second
/// run started meanwhile is rejected with 409.
#[derive(Clone)]
pub struct MacroEngine {
    guard: Arc<RunGuard>,
    windows: Arc<dyn WindowCatalog>,
    capture: CaptureEngine,
    mouse: MouseInjector,
    keys: KeyInjector,
    audit: Option<Arc<RunLogger>>,
    default_humanize: Option<Humanize>,
}

impl MacroEngine {
    pub fn new(
        guard: Arc<RunGuard>,
        windows: Arc<dyn WindowCatalog>,
        capture: CaptureEngine,
        mouse: MouseInjector,
        keys: KeyInjector,
    ) -> Self {
        Self {
            guard,
            windows,
            capture,
            mouse,
            keys,
            audit: None,
            default_humanize: None,
        }
    }

    /// Record every step to `logger`.
    pub fn with_audit(mut self, logger: Arc<RunLogger>) -> Self {
        self.audit = Some(logger);
        self
    }

    /// Humanization for input steps when neither the step nor the run
    /// supplies one.
    pub fn with_default_humanize(mut self, humanize: Option<Humanize>) -> Self {
        self.default_humanize = humanize;
        self
    }

    /// Run `request` under `run_id`, holding the run guard throughout.
    pub fn execute(&self, request: &MacroRunRequest, run_id: &str) -> MacroRunResult {
        let Some(_ticket) = self.guard.try_ticket() else {
            log::info!("run {run_id}: rejected, another sequence is in flight");
            return MacroRunResult::rejected(run_id, AutomationError::Busy);
        };
        if !is_valid_id(run_id) {
            return MacroRunResult::rejected(
                run_id,
                AutomationError::Validation(format!("invalid run id {run_id:?}")),
            );
        }
        if request.steps.is_empty() {
            return MacroRunResult::rejected(
                run_id,
                AutomationError::Validation("steps array is required".into()),
            );
        }

        let run_policy = request.run_policy();
        let run_humanize = request
            .defaults
            .as_ref()
            .and_then(|d| d.humanize)
            .or(self.default_humanize);

        let mut state = RunState::Pending.start();
        log::debug!("run {run_id}: {state:?} with {} steps", request.steps.len());

        let mut results = Vec::with_capacity(request.steps.len());
        let mut all_ok = true;
        let mut pending = request.steps.iter().enumerate();

        while state == RunState::Running {
            let Some((index, spec)) = pending.next() else {
                state = state.finish();
                break;
            };
            let (result, policy) = self.run_step(spec, run_id, run_policy, run_humanize);
            if !result.ok {
                log::info!(
                    "run {run_id}: step {index} ({}) failed with {}: {}",
                    result.kind,
                    result.status_code,
                    result.error.as_deref().unwrap_or_default()
                );
                all_ok = false;
                if policy == OnFailure::Stop {
                    state = state.finish();
                }
            }
            results.push(result);
        }

        log::debug!("run {run_id}: {state:?}, ok={all_ok}, {} step results", results.len());

        MacroRunResult {
            run_id: run_id.to_owned(),
            ok: all_ok,
            steps: results,
            state,
            status_code: None,
            error: None,
        }
    }

    fn run_step(
        &self,
        spec: &StepSpec,
        run_id: &str,
        run_policy: OnFailure,
        run_humanize: Option<Humanize>,
    ) -> (MacroStepResult, OnFailure) {
        let started = Instant::now();

        let parsed = spec.parse().and_then(|step| match &step.id {
            Some(id) if !is_valid_id(id) => Err(AutomationError::Validation(format!("invalid step id {id:?}"))),
            _ => Ok(step),
        });

        let (step_id, kind, policy, outcome) = match parsed {
            Ok(step) => {
                let step_id = step.id.clone().unwrap_or_else(new_id);
                let policy = step.on_failure.unwrap_or(run_policy);
                let humanize = step.humanize.or(run_humanize);
                let outcome = catch_unwind(AssertUnwindSafe(|| self.dispatch(&step, &step_id, run_id, humanize)))
                    .unwrap_or_else(|payload| {
                        let msg = panic_message(payload.as_ref());
                        log::error!("run {run_id}: step {step_id} panicked: {msg}");
                        Err(StepFailure::new(500, format!("INTERNAL_ERROR: {msg}")))
                    });
                (step_id, step.action.kind().to_owned(), policy, outcome)
            }
            Err(e) => {
                let step_id = spec
                    .raw_str("id")
                    .filter(|id| is_valid_id(id))
                    .map(str::to_owned)
                    .unwrap_or_else(new_id);
                let policy = spec
                    .0
                    .get("onFailure")
                    .and_then(|v| OnFailure::deserialize(v).ok())
                    .unwrap_or(run_policy);
                let kind = spec.raw_str("kind").unwrap_or("unknown").to_owned();
                (step_id, kind, policy, Err(StepFailure::from(e)))
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let result = match outcome {
            Ok(success) => {
                self.audit_step(run_id, &step_id, &kind, spec, Some(&success.data), true, None, duration_ms, success.screenshot_path);
                MacroStepResult {
                    step_id,
                    kind,
                    ok: true,
                    status_code: 200,
                    error: None,
                    data: Some(success.data),
                    duration_ms,
                }
            }
            Err(failure) => {
                self.audit_step(run_id, &step_id, &kind, spec, failure.data.as_ref(), false, Some(&failure.error), duration_ms, None);
                MacroStepResult {
                    step_id,
                    kind,
                    ok: false,
                    status_code: failure.status,
                    error: Some(failure.error),
                    data: failure.data,
                    duration_ms,
                }
            }
        };
        (result, policy)
    }

    #[allow(clippy::too_many_arguments)]
    fn audit_step(
        &self,
        run_id: &str,
        step_id: &str,
        kind: &str,
        spec: &StepSpec,
        response: Option<&Value>,
        ok: bool,
        error: Option<&str>,
        duration_ms: u64,
        screenshot_path: Option<String>,
    ) {
        let Some(audit) = &self.audit else {
            return;
        };

        // Image bytes live in the screenshot file, not in the log line.
        let response = response.cloned().map(|mut v| {
            if let Some(obj) = v.as_object_mut() {
                obj.remove("imageB64");
            }
            v
        });

        let mut entry = StepLogEntry::new(step_id, kind);
        entry.request = Some(spec.0.clone());
        entry.response = response;
        entry.ok = Some(ok);
        entry.error = error.map(str::to_owned);
        entry.duration_ms = Some(duration_ms);
        entry.screenshot_path = screenshot_path;

        if let Err(e) = audit.log_step(run_id, &entry) {
            log::warn!("run {run_id}: failed to record step {step_id}: {e}");
        }
    }

    fn dispatch(
        &self,
        step: &MacroStep,
        step_id: &str,
        run_id: &str,
        humanize: Option<Humanize>,
    ) -> Result<StepSuccess, StepFailure> {
        match &step.action {
            StepAction::WindowFocus { matcher } => self.focus(matcher.as_ref()),
            StepAction::Capture(request) => self.capture(request, step_id, run_id),
            StepAction::MouseMove(args) => self.mouse(args, MouseCommand::Move, humanize),
            StepAction::MouseClick(args) => self.mouse(args, MouseCommand::Click, humanize),
            StepAction::MouseDouble(args) => self.mouse(args, MouseCommand::Double, humanize),
            StepAction::MouseRight(args) => self.mouse(args, MouseCommand::Right, humanize),
            StepAction::MouseDrag(args) => self.mouse(args, MouseCommand::Drag, humanize),
            StepAction::MouseWheel(args) => self.mouse(args, MouseCommand::Wheel, humanize),
            StepAction::KeyPress { keys } => self.key_press(keys, humanize),
            StepAction::Sleep { ms } => {
                if *ms < 0 {
                    return Err(StepFailure::new(400, "BAD_REQUEST: ms must be >= 0"));
                }
                if *ms > 0 {
                    std::thread::sleep(Duration::from_millis(*ms as u64));
                }
                Ok(StepSuccess::data(json!({ "sleptMs": ms })))
            }
        }
    }

    fn focus(&self, matcher: Option<&WindowMatch>) -> Result<StepSuccess, StepFailure> {
        let Some(matcher) = matcher.filter(|m| !m.is_empty()) else {
            return Err(StepFailure::new(400, "BAD_MATCH"));
        };
        match self.windows.focus_window(matcher)? {
            Some(window) => Ok(StepSuccess::data(serde_json::to_value(window).map_err(AutomationError::from)?)),
            None => Err(StepFailure::new(404, "WINDOW_NOT_FOUND")),
        }
    }

    fn capture(&self, request: &CaptureRequest, step_id: &str, run_id: &str) -> Result<StepSuccess, StepFailure> {
        let result = self.capture.capture_with_diagnostics(request).map_err(|failure| StepFailure {
            status: failure.status_code(),
            error: failure.to_string(),
            data: serde_json::to_value(&failure).ok(),
        })?;

        let screenshot_path = self.audit.as_ref().and_then(|audit| {
            audit
                .save_screenshot(run_id, step_id, &result.image_bytes, result.format)
                .map_err(|e| log::warn!("run {run_id}: failed to save screenshot for {step_id}: {e}"))
                .ok()
        });

        let mut data = serde_json::to_value(&result).map_err(AutomationError::from)?;
        if let Some(obj) = data.as_object_mut() {
            obj.insert("imageB64".into(), Value::String(BASE64.encode(&result.image_bytes)));
            if let Some(path) = &screenshot_path {
                obj.insert("screenshotPath".into(), Value::String(path.clone()));
            }
        }
        Ok(StepSuccess {
            data,
            screenshot_path,
        })
    }

    fn mouse(&self, args: &MouseArgs, kind: MouseCommand, humanize: Option<Humanize>) -> Result<StepSuccess, StepFailure> {
        let result = self.mouse.execute(&args.to_request(kind, humanize));
        let data = serde_json::to_value(&result).map_err(AutomationError::from)?;
        if result.ok {
            Ok(StepSuccess::data(data))
        } else {
            Err(StepFailure {
                status: result.status_code,
                error: result.error.unwrap_or_else(|| "UNKNOWN_ERROR".into()),
                data: Some(data),
            })
        }
    }

    fn key_press(&self, keys: &[String], humanize: Option<Humanize>) -> Result<StepSuccess, StepFailure> {
        let request = KeyInputRequest {
            kind: KeyCommand::Press,
            keys: keys.to_vec(),
            humanize,
        };
        let result = self.keys.execute(&request);
        let data = serde_json::to_value(&result).map_err(AutomationError::from)?;
        if result.ok {
            Ok(StepSuccess::data(data))
        } else {
            Err(StepFailure {
                status: result.status_code,
                error: result.error.unwrap_or_else(|| "UNKNOWN_ERROR".into()),
                data: Some(data),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::NullPixelSource;
    use crate::display::NullDisplayEnvironment;
    use crate::geometry::RectPx;
    use crate::input::NullInputBackend;
    use crate::window::{NullWindowCatalog, WindowInfo};

    fn engine_with(windows: Arc<dyn WindowCatalog>) -> MacroEngine {
        engine_guarded(windows, Arc::new(RunGuard::new()))
    }

    fn engine_guarded(windows: Arc<dyn WindowCatalog>, guard: Arc<RunGuard>) -> MacroEngine {
        let displays = Arc::new(NullDisplayEnvironment);
        let input = Arc::new(NullInputBackend);
        MacroEngine::new(
            guard,
            windows.clone(),
            CaptureEngine::new(displays.clone(), windows, Arc::new(NullPixelSource)),
            MouseInjector::new(input.clone(), displays),
            KeyInjector::new(input),
        )
    }

    fn engine() -> MacroEngine {
        engine_with(Arc::new(NullWindowCatalog))
    }

    fn sleep(ms: i64) -> MacroStep {
        MacroStep::new(StepAction::Sleep { ms })
    }

    #[test]
    fn test_stop_policy_halts_after_failure() {
        let request = MacroRunRequest::new([sleep(0), sleep(-1), sleep(0)]);
        let result = engine().execute(&request, "run1");
        assert!(!result.ok);
        assert_eq!(result.steps.len(), 2);
        assert!(result.steps[0].ok);
        assert!(!result.steps[1].ok);
        assert_eq!(result.steps[1].status_code, 400);
        assert_eq!(result.state, RunState::Completed);
    }

    #[test]
    fn test_engine_rejects_run_while_ticket_held() {
        let guard = Arc::new(RunGuard::new());
        let engine = engine_guarded(Arc::new(NullWindowCatalog), guard.clone());
        let request = MacroRunRequest::new([sleep(0)]);

        let ticket = guard.try_ticket().unwrap();
        let result = engine.execute(&request, "run1");
        assert!(!result.ok);
        assert_eq!(result.status_code, Some(409));
        assert_eq!(result.state, RunState::Pending);
        assert!(result.steps.is_empty());

        drop(ticket);
        let result = engine.execute(&request, "run1");
        assert!(result.ok);
        assert_eq!(result.state, RunState::Completed);
        assert!(!guard.is_busy());
    }

    #[test]
    fn test_state_transitions() {
        assert_eq!(RunState::Pending.start(), RunState::Running);
        assert_eq!(RunState::Running.finish(), RunState::Completed);
        assert_eq!(RunState::Pending.finish(), RunState::Pending);
        assert_eq!(RunState::Completed.start(), RunState::Completed);
    }

    #[test]
    fn test_continue_policy_runs_everything() {
        let request = MacroRunRequest::new([sleep(0), sleep(-1).on_failure(OnFailure::Continue), sleep(0)]);
        let result = engine().execute(&request, "run1");
        assert!(!result.ok);
        assert_eq!(result.steps.len(), 3);
        assert!(result.steps[2].ok);
    }

    #[test]
    fn test_run_level_policy_and_fail_fast() {
        let mut request = MacroRunRequest::new([sleep(-1), sleep(0)]);
        request.on_failure = Some(OnFailure::Continue);
        assert_eq!(engine().execute(&request, "r").steps.len(), 2);

        request.on_failure = None;
        request.fail_fast = Some(false);
        assert_eq!(engine().execute(&request, "r").steps.len(), 2);

        request.fail_fast = Some(true);
        assert_eq!(engine().execute(&request, "r").steps.len(), 1);
    }

    #[test]
    fn test_empty_steps_rejected() {
        let result = engine().execute(&MacroRunRequest::default(), "run1");
        assert!(!result.ok);
        assert_eq!(result.status_code, Some(400));
    }

    #[test]
    fn test_invalid_run_id_rejected() {
        let result = engine().execute(&MacroRunRequest::new([sleep(0)]), "../up");
        assert_eq!(result.status_code, Some(400));
        assert!(result.steps.is_empty());
    }

    #[test]
    fn test_unknown_kind_is_step_level_validation() {
        let request = MacroRunRequest {
            steps: vec![
                StepSpec(json!({ "kind": "teleport", "onFailure": "continue" })),
                StepSpec(json!({ "kind": "sleep", "ms": 0, "id": "after" })),
            ],
            ..MacroRunRequest::default()
        };
        let result = engine().execute(&request, "run1");
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[0].status_code, 400);
        assert_eq!(result.steps[0].kind, "teleport");
        assert_eq!(result.steps[1].step_id, "after");
        assert!(result.steps[1].ok);
    }

    #[test]
    fn test_aliases_parse() {
        let step = StepSpec(json!({ "kind": "input.key", "keys": ["ENTER"] })).parse().unwrap();
        assert_eq!(step.action.kind(), "input.key.press");

        let step = StepSpec(json!({ "kind": "input.wheel", "delta": 240, "horizontal": true }))
            .parse()
            .unwrap();
        let StepAction::MouseWheel(args) = &step.action else {
            panic!("expected wheel");
        };
        let req = args.to_request(MouseCommand::Wheel, None);
        assert_eq!((req.dx, req.dy), (Some(240), Some(0)));
    }

    #[test]
    fn test_capture_step_parses_request() {
        let step = StepSpec(json!({
            "kind": "capture",
            "mode": "region",
            "region": { "x": 0, "y": 0, "w": 10, "h": 10 },
            "format": "jpeg",
            "quality": 70
        }))
        .parse()
        .unwrap();
        let StepAction::Capture(req) = step.action else {
            panic!("expected capture");
        };
        assert_eq!(req.region, Some(RectPx::new(0, 0, 10, 10)));
        assert_eq!(req.quality, 70);
    }

    #[test]
    fn test_focus_requires_match() {
        let request = MacroRunRequest::new([MacroStep::new(StepAction::WindowFocus { matcher: None })]);
        let result = engine().execute(&request, "run1");
        assert_eq!(result.steps[0].error.as_deref(), Some("BAD_MATCH"));
    }

    #[test]
    fn test_null_backend_input_step_is_501() {
        let request = MacroRunRequest::new([MacroStep::new(StepAction::MouseClick(MouseArgs::at(1, 1)))]);
        let result = engine().execute(&request, "run1");
        assert_eq!(result.steps[0].status_code, 501);
    }

    struct PanickingCatalog;

    impl WindowCatalog for PanickingCatalog {
        fn list_windows(&self) -> Result<Vec<WindowInfo>, AutomationError> {
            panic!("enumeration exploded")
        }
        fn foreground_window(&self) -> Option<u64> {
            None
        }
        fn window_rect(&self, _hwnd: u64) -> Option<RectPx> {
            None
        }
        fn activate(&self, _window: &WindowInfo) -> Result<bool, AutomationError> {
            Ok(false)
        }
    }

    #[test]
    fn test_step_panic_becomes_internal_error() {
        let request = MacroRunRequest::new([
            MacroStep::new(StepAction::WindowFocus {
                matcher: Some(WindowMatch::title_contains("x")),
            })
            .on_failure(OnFailure::Continue),
            sleep(0),
        ]);
        let result = engine_with(Arc::new(PanickingCatalog)).execute(&request, "run1");
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[0].status_code, 500);
        assert!(result.steps[0].error.as_deref().unwrap().contains("INTERNAL_ERROR"));
        assert!(result.steps[1].ok);
    }

    #[test]
    fn test_steps_are_audited() {
        let tmp = tempfile::tempdir().unwrap();
        let logger = Arc::new(RunLogger::new(tmp.path()));
        let request = MacroRunRequest::new([sleep(0), sleep(-5)]);
        let result = engine().with_audit(logger).execute(&request, "audited");
        assert_eq!(result.steps.len(), 2);

        let content = std::fs::read_to_string(tmp.path().join("audited").join("steps.jsonl")).unwrap();
        let entries: Vec<StepLogEntry> = content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].endpoint, "sleep");
        assert_eq!(entries[1].ok, Some(false));
        assert_eq!(entries[1].step_id, result.steps[1].step_id);
    }

    #[test]
    fn test_step_serialization_round_shape() {
        let step = MacroStep {
            id: Some("s1".into()),
            on_failure: Some(OnFailure::Continue),
            humanize: None,
            action: StepAction::Sleep { ms: 5 },
        };
        let v = serde_json::to_value(&step).unwrap();
        assert_eq!(v, json!({ "id": "s1", "onFailure": "continue", "kind": "sleep", "ms": 5 }));
    }
}

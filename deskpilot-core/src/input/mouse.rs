//! Mouse commands: move, click, double, right, wheel, drag.
//!
//! Coordinates are physical pixels on the virtual screen.  A move sets the
//! cursor position directly and also injects an absolute-move event so
//! that listeners watching the synthetic input stream see it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{physical_to_absolute, Humanize, InputBackend, MouseButton, MouseEvent};
use crate::display::DisplayEnvironment;
use crate::errors::AutomationError;

/// Default wheel delta: one notch toward the user.
pub const DEFAULT_WHEEL_DELTA: i32 = -120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseCommand {
    Move,
    Click,
    Double,
    Right,
    Wheel,
    Drag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MouseInputRequest {
    pub kind: MouseCommand,
    #[serde(default)]
    pub x: Option<i32>,
    #[serde(default)]
    pub y: Option<i32>,
    /// Button for `click` / `double`; `right` always uses the right button.
    #[serde(default)]
    pub button: Option<MouseButton>,
    /// Horizontal wheel delta.
    #[serde(default)]
    pub dx: Option<i32>,
    /// Vertical wheel delta, [`DEFAULT_WHEEL_DELTA`] when absent.
    #[serde(default)]
    pub dy: Option<i32>,
    #[serde(default)]
    pub x2: Option<i32>,
    #[serde(default)]
    pub y2: Option<i32>,
    #[serde(default)]
    pub humanize: Option<Humanize>,
}

impl MouseInputRequest {
    pub fn new(kind: MouseCommand) -> Self {
        Self {
            kind,
            x: None,
            y: None,
            button: None,
            dx: None,
            dy: None,
            x2: None,
            y2: None,
            humanize: None,
        }
    }

    pub fn at(kind: MouseCommand, x: i32, y: i32) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::new(kind)
        }
    }

    /// Check required fields.  Runs before any native call.
    pub fn validate(&self) -> Result<(), AutomationError> {
        let name = match self.kind {
            MouseCommand::Wheel => return Ok(()),
            MouseCommand::Move => "move",
            MouseCommand::Click | MouseCommand::Double | MouseCommand::Right => "click",
            MouseCommand::Drag => "drag",
        };
        if self.x.is_none() || self.y.is_none() {
            return Err(AutomationError::Validation(format!(
                "x and y are required for {name}"
            )));
        }
        if self.kind == MouseCommand::Drag && (self.x2.is_none() || self.y2.is_none()) {
            return Err(AutomationError::Validation(
                "x2 and y2 are required for drag".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MouseInputResult {
    pub ok: bool,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// OS error code of the failing native call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor_x: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor_y: Option<i32>,
}

impl MouseInputResult {
    fn success(cursor: Option<(i32, i32)>) -> Self {
        Self {
            ok: true,
            status_code: 200,
            error: None,
            last_error: None,
            cursor_x: cursor.map(|c| c.0),
            cursor_y: cursor.map(|c| c.1),
        }
    }

    pub(crate) fn failure(err: &AutomationError, cursor: Option<(i32, i32)>) -> Self {
        Self {
            ok: false,
            status_code: err.status_code(),
            error: Some(err.to_string()),
            last_error: err.os_code(),
            cursor_x: cursor.map(|c| c.0),
            cursor_y: cursor.map(|c| c.1),
        }
    }
}

/// Attach a description of the attempted action to a native failure.
fn context(err: AutomationError, op: impl FnOnce() -> String) -> AutomationError {
    match err {
        AutomationError::Native { code, .. } => AutomationError::Native { op: op(), code },
        other => other,
    }
}

/// Executes [`MouseInputRequest`]s against an [`InputBackend`].
#[derive(Clone)]
pub struct MouseInjector {
    backend: Arc<dyn InputBackend>,
    displays: Arc<dyn DisplayEnvironment>,
}

impl MouseInjector {
    pub fn new(backend: Arc<dyn InputBackend>, displays: Arc<dyn DisplayEnvironment>) -> Self {
        Self { backend, displays }
    }

    /// Validate and execute.  Never fails outright: every error becomes a
    /// structured result with its status code and OS error.
    pub fn execute(&self, request: &MouseInputRequest) -> MouseInputResult {
        if let Err(e) = request.validate() {
            return MouseInputResult::failure(&e, None);
        }

        let humanize = request.humanize.unwrap_or_default();
        humanize.pause();

        match self.run(request, &humanize) {
            Ok(()) => MouseInputResult::success(self.backend.cursor_pos()),
            Err(e) => {
                if e.is_permission_denied() {
                    log::warn!("mouse {:?} blocked by secure desktop or elevation", request.kind);
                } else {
                    log::debug!("mouse {:?} failed: {e}", request.kind);
                }
                MouseInputResult::failure(&e, self.backend.cursor_pos())
            }
        }
    }

    fn run(&self, request: &MouseInputRequest, humanize: &Humanize) -> Result<(), AutomationError> {
        // Required coordinates were checked by `validate`.
        let (x, y) = (request.x.unwrap_or_default(), request.y.unwrap_or_default());
        match request.kind {
            MouseCommand::Move => self.move_to(x, y, humanize),
            MouseCommand::Click => self.click(x, y, request.button.unwrap_or_default(), 1, humanize),
            MouseCommand::Double => self.click(x, y, request.button.unwrap_or_default(), 2, humanize),
            MouseCommand::Right => self.click(x, y, MouseButton::Right, 1, humanize),
            MouseCommand::Wheel => self.wheel(
                request.x.zip(request.y),
                request.dx.unwrap_or(0),
                request.dy.unwrap_or(DEFAULT_WHEEL_DELTA),
            ),
            MouseCommand::Drag => self.drag(
                (x, y),
                (request.x2.unwrap_or_default(), request.y2.unwrap_or_default()),
                humanize,
            ),
        }
    }

    /// Direct cursor placement.  Only a permission-class or unsupported
    /// failure is fatal; otherwise the absolute-move event still follows.
    fn place_cursor(&self, x: i32, y: i32) -> Result<(), AutomationError> {
        match self.backend.set_cursor_pos(x, y) {
            Ok(()) => Ok(()),
            Err(e @ (AutomationError::PermissionDenied { .. } | AutomationError::NotImplemented)) => Err(e),
            Err(e) => {
                log::debug!("set_cursor_pos({x},{y}) failed: {e}");
                Ok(())
            }
        }
    }

    fn move_to(&self, x: i32, y: i32, humanize: &Humanize) -> Result<(), AutomationError> {
        let (tx, ty) = humanize.jitter(x, y);
        self.place_cursor(tx, ty)?;

        let (ax, ay) = physical_to_absolute(tx, ty, self.displays.virtual_screen_rect());
        self.backend
            .send_mouse(MouseEvent::MoveAbsolute { x: ax, y: ay })
            .map_err(|e| context(e, || format!("move to ({x},{y})")))
    }

    fn click(&self, x: i32, y: i32, button: MouseButton, clicks: u32, humanize: &Humanize) -> Result<(), AutomationError> {
        self.move_to(x, y, humanize)?;
        humanize.pause();

        for i in 0..clicks {
            if i > 0 {
                humanize.pause();
            }
            self.backend
                .send_mouse(MouseEvent::ButtonDown(button))
                .and_then(|()| self.backend.send_mouse(MouseEvent::ButtonUp(button)))
                .map_err(|e| context(e, || format!("click {button:?}")))?;
        }
        Ok(())
    }

    fn wheel(&self, at: Option<(i32, i32)>, dx: i32, dy: i32) -> Result<(), AutomationError> {
        if let Some((x, y)) = at {
            self.place_cursor(x, y)?;
        }

        let op = || format!("wheel dx={dx} dy={dy}");
        if dy != 0 {
            self.backend
                .send_mouse(MouseEvent::Wheel {
                    delta: dy,
                    horizontal: false,
                })
                .map_err(|e| context(e, op))?;
        }
        if dx != 0 {
            self.backend
                .send_mouse(MouseEvent::Wheel {
                    delta: dx,
                    horizontal: true,
                })
                .map_err(|e| context(e, op))?;
        }
        Ok(())
    }

    fn drag(&self, from: (i32, i32), to: (i32, i32), humanize: &Humanize) -> Result<(), AutomationError> {
        self.move_to(from.0, from.1, humanize)?;
        humanize.pause();

        self.backend
            .send_mouse(MouseEvent::ButtonDown(MouseButton::Left))
            .map_err(|e| context(e, || "drag mouse down".into()))?;
        humanize.pause();

        self.move_to(to.0, to.1, humanize)?;
        humanize.pause();

        self.backend
            .send_mouse(MouseEvent::ButtonUp(MouseButton::Left))
            .map_err(|e| context(e, || "drag mouse up".into()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::DisplayInfo;
    use crate::errors::ERROR_ACCESS_DENIED;
    use crate::geometry::RectPx;
    use crate::input::{KeyEvent, NullInputBackend};
    use parking_lot::Mutex;

    struct Screen;

    impl DisplayEnvironment for Screen {
        fn list_displays(&self) -> Vec<DisplayInfo> {
            Vec::new()
        }
        fn virtual_screen_rect(&self) -> RectPx {
            RectPx::new(0, 0, 1920, 1080)
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<MouseEvent>>,
        cursor: Mutex<Vec<(i32, i32)>>,
        fail_with: Option<u32>,
    }

    impl InputBackend for Recorder {
        fn set_cursor_pos(&self, x: i32, y: i32) -> Result<(), AutomationError> {
            self.cursor.lock().push((x, y));
            Ok(())
        }
        fn cursor_pos(&self) -> Option<(i32, i32)> {
            self.cursor.lock().last().copied()
        }
        fn send_mouse(&self, event: MouseEvent) -> Result<(), AutomationError> {
            if let Some(code) = self.fail_with {
                return Err(AutomationError::from_os_code("SendInput", code));
            }
            self.events.lock().push(event);
            Ok(())
        }
        fn send_key(&self, _event: KeyEvent) -> Result<(), AutomationError> {
            Ok(())
        }
    }

    fn injector(recorder: Arc<Recorder>) -> MouseInjector {
        MouseInjector::new(recorder, Arc::new(Screen))
    }

    #[test]
    fn test_move_sets_cursor_and_sends_absolute() {
        let rec = Arc::new(Recorder::default());
        let result = injector(rec.clone()).execute(&MouseInputRequest::at(MouseCommand::Move, 960, 540));
        assert!(result.ok);
        assert_eq!(result.status_code, 200);
        assert_eq!((result.cursor_x, result.cursor_y), (Some(960), Some(540)));
        assert_eq!(
            *rec.events.lock(),
            vec![MouseEvent::MoveAbsolute { x: 32768, y: 32768 }]
        );
    }

    #[test]
    fn test_double_click_sends_two_pairs() {
        let rec = Arc::new(Recorder::default());
        let result = injector(rec.clone()).execute(&MouseInputRequest::at(MouseCommand::Double, 10, 10));
        assert!(result.ok);
        let events = rec.events.lock();
        assert_eq!(events.len(), 5);
        assert_eq!(events[1], MouseEvent::ButtonDown(MouseButton::Left));
        assert_eq!(events[4], MouseEvent::ButtonUp(MouseButton::Left));
    }

    #[test]
    fn test_right_click_uses_right_button() {
        let rec = Arc::new(Recorder::default());
        let mut request = MouseInputRequest::at(MouseCommand::Right, 10, 10);
        request.button = Some(MouseButton::Left);
        injector(rec.clone()).execute(&request);
        assert_eq!(rec.events.lock()[1], MouseEvent::ButtonDown(MouseButton::Right));
    }

    #[test]
    fn test_drag_sequence() {
        let rec = Arc::new(Recorder::default());
        let mut request = MouseInputRequest::at(MouseCommand::Drag, 0, 0);
        request.x2 = Some(1919);
        request.y2 = Some(0);
        assert!(injector(rec.clone()).execute(&request).ok);

        let events = rec.events.lock();
        assert!(matches!(events[0], MouseEvent::MoveAbsolute { x: 0, y: 0 }));
        assert_eq!(events[1], MouseEvent::ButtonDown(MouseButton::Left));
        assert!(matches!(events[2], MouseEvent::MoveAbsolute { x: 65502, .. }));
        assert_eq!(events[3], MouseEvent::ButtonUp(MouseButton::Left));
        assert_eq!(*rec.cursor.lock(), vec![(0, 0), (1919, 0)]);
    }

    #[test]
    fn test_wheel_defaults_and_skips_zero_axes() {
        let rec = Arc::new(Recorder::default());
        let result = injector(rec.clone()).execute(&MouseInputRequest::new(MouseCommand::Wheel));
        assert!(result.ok);
        assert_eq!(
            *rec.events.lock(),
            vec![MouseEvent::Wheel {
                delta: DEFAULT_WHEEL_DELTA,
                horizontal: false
            }]
        );
        assert!(rec.cursor.lock().is_empty());

        let rec = Arc::new(Recorder::default());
        let mut request = MouseInputRequest::at(MouseCommand::Wheel, 5, 5);
        request.dx = Some(240);
        request.dy = Some(0);
        injector(rec.clone()).execute(&request);
        assert_eq!(
            *rec.events.lock(),
            vec![MouseEvent::Wheel {
                delta: 240,
                horizontal: true
            }]
        );
        assert_eq!(*rec.cursor.lock(), vec![(5, 5)]);
    }

    #[test]
    fn test_validation_precedes_native_calls() {
        let rec = Arc::new(Recorder::default());
        let inj = injector(rec.clone());

        let result = inj.execute(&MouseInputRequest::new(MouseCommand::Click));
        assert!(!result.ok);
        assert_eq!(result.status_code, 400);

        let result = inj.execute(&MouseInputRequest::at(MouseCommand::Drag, 1, 1));
        assert_eq!(result.status_code, 400);
        assert!(result.error.unwrap().contains("x2 and y2"));

        assert!(rec.events.lock().is_empty());
        assert!(rec.cursor.lock().is_empty());
    }

    #[test]
    fn test_access_denied_is_uac_required() {
        let rec = Arc::new(Recorder {
            fail_with: Some(ERROR_ACCESS_DENIED),
            ..Recorder::default()
        });
        let result = injector(rec).execute(&MouseInputRequest::at(MouseCommand::Click, 1, 1));
        assert!(!result.ok);
        assert_eq!(result.status_code, 412);
        assert_eq!(result.error.as_deref(), Some("UAC_REQUIRED"));
        assert_eq!(result.last_error, Some(ERROR_ACCESS_DENIED));
    }

    #[test]
    fn test_generic_failure_carries_context() {
        let rec = Arc::new(Recorder {
            fail_with: Some(87),
            ..Recorder::default()
        });
        let result = injector(rec).execute(&MouseInputRequest::at(MouseCommand::Move, 3, 4));
        assert_eq!(result.status_code, 500);
        assert!(result.error.unwrap().contains("move to (3,4)"));
        assert_eq!(result.last_error, Some(87));
        assert_eq!((result.cursor_x, result.cursor_y), (Some(3), Some(4)));
    }

    #[test]
    fn test_null_backend_not_implemented() {
        let inj = MouseInjector::new(Arc::new(NullInputBackend), Arc::new(Screen));
        let result = inj.execute(&MouseInputRequest::at(MouseCommand::Move, 1, 1));
        assert_eq!(result.status_code, 501);
    }

    #[test]
    fn test_request_deserialization() {
        let req: MouseInputRequest = serde_json::from_str(
            r#"{"kind":"drag","x":1,"y":2,"x2":3,"y2":4,"humanize":{"jitterPx":1}}"#,
        )
        .unwrap();
        assert_eq!(req.kind, MouseCommand::Drag);
        assert_eq!(req.humanize.map(|h| h.jitter_px), Some(1));
        assert!(serde_json::from_str::<MouseInputRequest>(r#"{"kind":"hover"}"#).is_err());
    }

    #[test]
    fn test_result_serialization_skips_empty_fields() {
        let json = serde_json::to_string(&MouseInputResult::success(None)).unwrap();
        assert_eq!(json, r#"{"ok":true,"statusCode":200}"#);
    }
}

//! End-to-end tests for the `Agent` over in-memory backends.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use deskpilot_core::audit::StepLogEntry;
use deskpilot_core::capture::{CaptureRequest, Frame, PixelSource};
use deskpilot_core::display::{order_displays, DisplayEnvironment, DisplayInfo, RawDisplay};
use deskpilot_core::geometry::RectPx;
use deskpilot_core::input::{InputBackend, KeyEvent, KeyInputRequest, MouseCommand, MouseEvent, MouseInputRequest};
use deskpilot_core::runner::MacroRunRequest;
use deskpilot_core::window::{WindowCatalog, WindowInfo, WindowMatch};
use deskpilot_core::{Agent, AgentConfig, AutomationError, Backend};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct OneMonitor;

impl DisplayEnvironment for OneMonitor {
    fn list_displays(&self) -> Vec<DisplayInfo> {
        let full = RectPx::new(0, 0, 1920, 1080);
        order_displays(vec![RawDisplay {
            device_name: r"\\.\DISPLAY1".into(),
            is_primary: true,
            bounds: full,
            work_area: RectPx::new(0, 0, 1920, 1040),
            dpi_x: 144,
            dpi_y: 144,
        }])
    }

    fn virtual_screen_rect(&self) -> RectPx {
        RectPx::new(0, 0, 1920, 1080)
    }
}

#[derive(Default)]
struct Desktop {
    focused: Mutex<Option<u64>>,
}

fn notepad() -> WindowInfo {
    WindowInfo {
        hwnd: 0x1001,
        title: "notes.txt - Notepad".into(),
        process_name: "notepad".into(),
        rect_px: RectPx::new(100, 100, 640, 480),
        is_visible: true,
        is_minimized: false,
    }
}

impl WindowCatalog for Desktop {
    fn list_windows(&self) -> Result<Vec<WindowInfo>, AutomationError> {
        Ok(vec![notepad()])
    }

    fn foreground_window(&self) -> Option<u64> {
        *self.focused.lock()
    }

    fn window_rect(&self, hwnd: u64) -> Option<RectPx> {
        (hwnd == notepad().hwnd).then(|| notepad().rect_px)
    }

    fn activate(&self, window: &WindowInfo) -> Result<bool, AutomationError> {
        *self.focused.lock() = Some(window.hwnd);
        Ok(true)
    }
}

struct Canvas;

impl PixelSource for Canvas {
    fn copy_screen_rect(&self, rect: RectPx) -> Result<Frame, AutomationError> {
        let (w, h) = (rect.w as u32, rect.h as u32);
        Ok(Frame {
            width: w,
            height: h,
            data: [0u8, 128, 255, 255].repeat((w * h) as usize),
        })
    }

    fn render_window(&self, _hwnd: u64, rect: RectPx, _full_content: bool) -> Result<Frame, AutomationError> {
        self.copy_screen_rect(rect)
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl InputBackend for Recorder {
    fn set_cursor_pos(&self, x: i32, y: i32) -> Result<(), AutomationError> {
        self.events.lock().push(format!("cursor {x},{y}"));
        Ok(())
    }

    fn cursor_pos(&self) -> Option<(i32, i32)> {
        Some((7, 8))
    }

    fn send_mouse(&self, event: MouseEvent) -> Result<(), AutomationError> {
        self.events.lock().push(format!("{event:?}"));
        Ok(())
    }

    fn send_key(&self, event: KeyEvent) -> Result<(), AutomationError> {
        self.events.lock().push(format!("key {:#04x} up={}", event.vk, event.key_up));
        Ok(())
    }
}

struct Harness {
    agent: Agent,
    input: Arc<Recorder>,
    _tmp: tempfile::TempDir,
}

fn harness() -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let input = Arc::new(Recorder::default());
    let backend = Backend {
        displays: Arc::new(OneMonitor),
        windows: Arc::new(Desktop::default()),
        pixels: Arc::new(Canvas),
        input: input.clone(),
    };
    let agent = Agent::new(backend, AgentConfig::default().with_runs_dir(tmp.path()));
    Harness {
        agent,
        input,
        _tmp: tmp,
    }
}

fn log_entries(agent: &Agent, run_id: &str) -> Vec<StepLogEntry> {
    agent
        .get_steps(run_id)
        .unwrap()
        .content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn macro_request(value: serde_json::Value) -> MacroRunRequest {
    serde_json::from_value(value).unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_region_capture_is_saved_and_listed() {
    let h = harness();
    let request = CaptureRequest::region(RectPx::new(10, 20, 32, 16));

    let captured = h.agent.capture(&request, Some("run-a")).unwrap();
    assert_eq!(captured.result.metadata.region_rect_px, RectPx::new(10, 20, 32, 16));
    assert_eq!(captured.result.metadata.dpi, 144);
    assert_eq!(captured.result.metadata.scale, 1.5);
    assert_eq!(captured.result.metadata.display_index, Some(0));

    let step_id = captured.step_id.clone().unwrap();
    assert_eq!(
        captured.screenshot_path.as_deref(),
        Some(format!("screenshots/step_{step_id}.png").as_str())
    );

    let shot = h.agent.get_screenshot("run-a", &step_id).unwrap();
    assert_eq!(shot.content_type, "image/png");
    assert_eq!(shot.read().unwrap(), captured.result.image_bytes);

    let entries = log_entries(&h.agent, "run-a");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].endpoint, "capture");
    assert_eq!(entries[0].ok, Some(true));

    let runs = h.agent.list_runs(None).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, "run-a");
    assert_eq!(runs[0].steps_count, 1);
    assert!(runs[0].has_screenshots);
}

#[test]
fn test_capture_without_run_id_writes_nothing() {
    let h = harness();
    let captured = h.agent.capture(&CaptureRequest::default(), None).unwrap();
    assert_eq!(captured.result.metadata.region_rect_px, RectPx::new(0, 0, 1920, 1080));
    assert!(captured.step_id.is_none());
    assert!(h.agent.list_runs(None).unwrap().is_empty());
}

#[test]
fn test_macro_focus_capture_click() {
    let h = harness();
    let request = macro_request(json!({
        "steps": [
            { "kind": "window.focus", "match": { "titleContains": "notepad" } },
            { "id": "shot1", "kind": "capture", "mode": "window", "window": { "processName": "NOTEPAD" } },
            { "kind": "input.mouse.click", "x": 200, "y": 150 },
            { "kind": "input.key", "keys": ["CTRL", "S"] }
        ]
    }));

    let result = h.agent.run_macro(&request, Some("macro1"));
    assert!(result.ok, "{result:?}");
    assert_eq!(result.run_id, "macro1");
    assert_eq!(result.steps.len(), 4);

    let capture = &result.steps[1];
    assert_eq!(capture.step_id, "shot1");
    let data = capture.data.as_ref().unwrap();
    assert_eq!(data["selectedWindow"]["hwnd"], 0x1001);
    assert!(data["imageB64"].as_str().is_some_and(|s| !s.is_empty()));
    assert_eq!(data["screenshotPath"], "screenshots/step_shot1.png");

    let events = h.input.events.lock().clone();
    assert!(events.contains(&"cursor 200,150".to_string()));
    assert!(events.iter().any(|e| e.starts_with("key 0x11 up=false")));

    let entries = log_entries(&h.agent, "macro1");
    assert_eq!(entries.len(), 4);
    let logged = entries[1].response.as_ref().unwrap();
    assert!(logged.get("imageB64").is_none());
    assert_eq!(entries[1].screenshot_path.as_deref(), Some("screenshots/step_shot1.png"));
    assert!(h.agent.get_screenshot("macro1", "shot1").is_ok());
}

#[test]
fn test_macro_stop_and_continue_policies() {
    let h = harness();
    let steps = json!([
        { "kind": "sleep", "ms": 0 },
        { "kind": "window.focus", "match": { "titleContains": "calculator" } },
        { "kind": "sleep", "ms": 0 }
    ]);

    let stopped = h.agent.run_macro(&macro_request(json!({ "steps": steps })), Some("stop"));
    assert!(!stopped.ok);
    assert_eq!(stopped.steps.len(), 2);
    assert_eq!(stopped.steps[1].status_code, 404);

    let continued = h
        .agent
        .run_macro(&macro_request(json!({ "steps": steps, "onFailure": "continue" })), Some("cont"));
    assert!(!continued.ok);
    assert_eq!(continued.steps.len(), 3);
    assert!(continued.steps[2].ok);
    assert_eq!(log_entries(&h.agent, "cont").len(), 3);
}

#[test]
fn test_unknown_step_kind_is_step_level_400() {
    let h = harness();
    let request = macro_request(json!({
        "steps": [{ "kind": "teleport" }, { "kind": "sleep" }],
        "failFast": false
    }));
    let result = h.agent.run_macro(&request, None);
    assert_eq!(result.steps.len(), 2);
    assert_eq!(result.steps[0].status_code, 400);
    assert!(result.steps[1].ok);
}

#[test]
fn test_busy_guard_rejects_input_and_macros() {
    let h = harness();
    let ticket = h.agent.guard().try_ticket().unwrap();

    let mouse = h.agent.mouse(&MouseInputRequest::at(MouseCommand::Click, 1, 1), None);
    assert_eq!(mouse.status_code, 409);
    let keys = h.agent.keys(&KeyInputRequest::press(["A"]), None);
    assert_eq!(keys.status_code, 409);
    let run = h
        .agent
        .run_macro(&macro_request(json!({ "steps": [{ "kind": "sleep" }] })), Some("busy"));
    assert_eq!(run.status_code, Some(409));
    assert!(run.steps.is_empty());

    // Capture is never gated.
    let region = CaptureRequest::region(RectPx::new(0, 0, 8, 8));
    assert!(h.agent.capture(&region, None).is_ok());
    assert!(h.input.events.lock().is_empty());

    drop(ticket);
    assert!(h.agent.mouse(&MouseInputRequest::at(MouseCommand::Click, 1, 1), None).ok);
    assert!(!h.agent.is_busy());
}

#[test]
fn test_evicted_runs_stay_readable() {
    let h = harness();
    for i in 0..55 {
        let run_id = format!("run{i:02}");
        let result = h.agent.keys(&KeyInputRequest::press(["TAB"]), Some(&run_id));
        assert!(result.ok);
    }

    for i in [0, 27, 54] {
        let entries = log_entries(&h.agent, &format!("run{i:02}"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].endpoint, "input.key.press");
    }

    // Writing to an evicted run appends rather than truncating.
    h.agent.keys(&KeyInputRequest::press(["TAB"]), Some("run00"));
    assert_eq!(log_entries(&h.agent, "run00").len(), 2);
    assert_eq!(h.agent.list_runs(Some(100)).unwrap().len(), 55);
    assert_eq!(h.agent.list_runs(None).unwrap().len(), 20);
}

#[test]
fn test_traversal_ids_are_rejected() {
    let h = harness();
    h.agent
        .capture(&CaptureRequest::region(RectPx::new(0, 0, 4, 4)), Some("safe"))
        .unwrap();

    assert_eq!(h.agent.get_steps("..").unwrap_err().status_code(), 400);
    assert_eq!(h.agent.get_steps("../safe").unwrap_err().status_code(), 400);
    assert_eq!(h.agent.get_screenshot("safe", "../steps").unwrap_err().status_code(), 400);
    assert_eq!(h.agent.get_steps("missing").unwrap_err().status_code(), 404);
    assert_eq!(h.agent.get_screenshot("safe", "nope").unwrap_err().status_code(), 404);
}

#[test]
fn test_focus_window_matches_process_exactly() {
    let h = harness();
    let window = h
        .agent
        .focus_window(&WindowMatch::process("Notepad.exe"))
        .unwrap();
    assert!(window.is_none());

    let window = h.agent.focus_window(&WindowMatch::process("notepad")).unwrap().unwrap();
    assert_eq!(window.hwnd, 0x1001);
    assert_eq!(h.agent.cursor_info().foreground_hwnd, Some(0x1001));
}

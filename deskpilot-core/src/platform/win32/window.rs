//! Top-level window enumeration and focus.

use std::ffi::OsString;
use std::os::windows::ffi::OsStringExt;

use windows::Win32::Foundation::{BOOL, FALSE, HWND, LPARAM, RECT, TRUE};
use windows::Win32::System::Threading::{AttachThreadInput, GetCurrentThreadId};
use windows::Win32::UI::WindowsAndMessaging::{
    BringWindowToTop, EnumWindows, GetForegroundWindow, GetWindowRect, GetWindowTextLengthW, GetWindowTextW,
    GetWindowThreadProcessId, IsIconic, IsWindow, IsWindowVisible, SetForegroundWindow, ShowWindow, SHOW_WINDOW_CMD,
    SW_RESTORE,
};

use super::{from_hwnd, to_hwnd};
use crate::errors::AutomationError;
use crate::geometry::RectPx;
use crate::process::lookup_process_names;
use crate::window::{WindowCatalog, WindowInfo};

/// Sent before every activation.  Restoring a window that is neither
/// minimized nor maximized leaves it as it is.
const ACTIVATE_SHOW: SHOW_WINDOW_CMD = SW_RESTORE;

fn read_window_title(hwnd: HWND) -> String {
    let len = unsafe { GetWindowTextLengthW(hwnd) };
    if len <= 0 {
        return String::new();
    }
    let mut buf = vec![0u16; (len + 1) as usize];
    let copied = unsafe { GetWindowTextW(hwnd, &mut buf) };
    if copied <= 0 {
        return String::new();
    }
    OsString::from_wide(&buf[..copied as usize])
        .to_string_lossy()
        .into_owned()
}

fn read_window_rect(hwnd: HWND) -> Option<RectPx> {
    let mut rect = RECT::default();
    unsafe { GetWindowRect(hwnd, &mut rect) }.ok()?;
    Some(RectPx::from_ltrb(rect.left, rect.top, rect.right, rect.bottom))
}

/// Returns `(thread_id, process_id)`; both zero for a dead handle.
fn window_thread_process(hwnd: HWND) -> (u32, u32) {
    let mut pid = 0u32;
    let tid = unsafe { GetWindowThreadProcessId(hwnd, Some(&mut pid)) };
    (tid, pid)
}

/// Callback for `EnumWindows` that collects every top-level handle.
unsafe extern "system" fn collect_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let handles = unsafe { &mut *(lparam.0 as *mut Vec<HWND>) };
    if !hwnd.0.is_null() {
        handles.push(hwnd);
    }
    TRUE
}

/// Input queues of two threads joined for the guard's lifetime.
///
/// `SetForegroundWindow` is refused unless the caller owns the foreground
/// input queue; attaching to the foreground thread borrows that right.
struct ThreadInputAttachment {
    from: u32,
    to: u32,
}

impl ThreadInputAttachment {
    fn attach(from: u32, to: u32) -> Option<Self> {
        if from == 0 || to == 0 || from == to {
            return None;
        }
        unsafe { AttachThreadInput(from, to, TRUE) }
            .as_bool()
            .then_some(Self { from, to })
    }
}

impl Drop for ThreadInputAttachment {
    fn drop(&mut self) {
        unsafe {
            let _ = AttachThreadInput(self.from, self.to, FALSE);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Win32Windows;

impl WindowCatalog for Win32Windows {
    fn list_windows(&self) -> Result<Vec<WindowInfo>, AutomationError> {
        let mut handles: Vec<HWND> = Vec::with_capacity(256);
        unsafe { EnumWindows(Some(collect_window), LPARAM(&mut handles as *mut Vec<HWND> as isize)) }?;

        let mut rows = Vec::with_capacity(handles.len());
        for hwnd in handles {
            let Some(rect_px) = read_window_rect(hwnd) else {
                continue;
            };
            let (_, pid) = window_thread_process(hwnd);
            rows.push((hwnd, pid, rect_px));
        }

        let pids: Vec<u32> = rows.iter().map(|(_, pid, _)| *pid).collect();
        let names = lookup_process_names(&pids);

        let windows: Vec<WindowInfo> = rows
            .into_iter()
            .map(|(hwnd, pid, rect_px)| WindowInfo {
                hwnd: from_hwnd(hwnd),
                title: read_window_title(hwnd),
                process_name: names.get(&pid).cloned().unwrap_or_default(),
                rect_px,
                is_visible: unsafe { IsWindowVisible(hwnd) }.as_bool(),
                is_minimized: unsafe { IsIconic(hwnd) }.as_bool(),
            })
            .collect();

        log::debug!("enumerated {} top-level windows", windows.len());
        Ok(windows)
    }

    fn foreground_window(&self) -> Option<u64> {
        let hwnd = unsafe { GetForegroundWindow() };
        (!hwnd.0.is_null()).then(|| from_hwnd(hwnd))
    }

    fn window_rect(&self, hwnd: u64) -> Option<RectPx> {
        let hwnd = to_hwnd(hwnd);
        if !unsafe { IsWindow(hwnd) }.as_bool() {
            return None;
        }
        read_window_rect(hwnd)
    }

    fn activate(&self, window: &WindowInfo) -> Result<bool, AutomationError> {
        let hwnd = to_hwnd(window.hwnd);
        if !unsafe { IsWindow(hwnd) }.as_bool() {
            return Err(AutomationError::NotFound(format!("window 0x{:X} no longer exists", window.hwnd)));
        }

        unsafe {
            let _ = ShowWindow(hwnd, ACTIVATE_SHOW);
        }

        if unsafe { SetForegroundWindow(hwnd) }.as_bool() {
            return Ok(true);
        }

        // Foreground lock: borrow the foreground thread's input queue.
        let foreground = unsafe { GetForegroundWindow() };
        let (foreground_thread, _) = window_thread_process(foreground);
        let (target_thread, _) = window_thread_process(hwnd);
        let current = unsafe { GetCurrentThreadId() };

        {
            let _to_foreground = ThreadInputAttachment::attach(current, foreground_thread);
            let _to_target = ThreadInputAttachment::attach(current, target_thread);
            unsafe {
                let _ = BringWindowToTop(hwnd);
                let _ = SetForegroundWindow(hwnd);
            }
        }

        let focused = unsafe { GetForegroundWindow() } == hwnd;
        if !focused {
            log::debug!("activate: hwnd=0x{:X} refused by foreground lock", window.hwnd);
        }
        Ok(focused)
    }
}

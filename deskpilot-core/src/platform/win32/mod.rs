//! Win32 implementations of the native seams.
//!
//! | Module | Seam |
//! |--------|------|
//! | [`display`] | `DisplayEnvironment` via `EnumDisplayMonitors` + `GetDpiForMonitor` |
//! | [`window`]  | `WindowCatalog` via `EnumWindows`, focus via `SetForegroundWindow` |
//! | [`capture`] | `PixelSource` via `PrintWindow` and GDI `BitBlt` |
//! | [`input`]   | `InputBackend` via `SendInput` / `SetCursorPos` |

pub mod capture;
pub mod display;
pub mod input;
pub mod window;

use std::sync::Arc;

use windows::Win32::Foundation::{GetLastError, HWND};
use windows::Win32::UI::HiDpi::{
    AreDpiAwarenessContextsEqual, GetThreadDpiAwarenessContext, SetProcessDpiAwarenessContext,
    DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE, DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2,
    DPI_AWARENESS_CONTEXT_SYSTEM_AWARE, DPI_AWARENESS_CONTEXT_UNAWARE, DPI_AWARENESS_CONTEXT_UNAWARE_GDISCALED,
};

use super::Backend;

/// The Win32 backend.
pub fn backend() -> Backend {
    Backend {
        displays: Arc::new(display::Win32Displays),
        windows: Arc::new(window::Win32Windows),
        pixels: Arc::new(capture::GdiPixelSource),
        input: Arc::new(input::SendInputBackend),
    }
}

/// Opaque handle back to an `HWND`.
pub(crate) fn to_hwnd(handle: u64) -> HWND {
    HWND(handle as isize as *mut core::ffi::c_void)
}

pub(crate) fn from_hwnd(hwnd: HWND) -> u64 {
    hwnd.0 as isize as u64
}

/// Calling thread's last Win32 error code.
pub(crate) fn last_error_code() -> u32 {
    unsafe { GetLastError() }.0
}

pub fn enable_per_monitor_dpi_awareness() -> bool {
    if let Err(e) = unsafe { SetProcessDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2) } {
        // Already set (manifest or an earlier call) is reported as an error too.
        log::debug!("SetProcessDpiAwarenessContext: {e}");
    }
    dpi_awareness_mode() == "PerMonitorV2"
}

pub fn dpi_awareness_mode() -> &'static str {
    let ctx = unsafe { GetThreadDpiAwarenessContext() };
    if ctx.0.is_null() {
        return "Unknown";
    }

    let known = [
        (DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2, "PerMonitorV2"),
        (DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE, "PerMonitor"),
        (DPI_AWARENESS_CONTEXT_SYSTEM_AWARE, "SystemAware"),
        (DPI_AWARENESS_CONTEXT_UNAWARE, "Unaware"),
        (DPI_AWARENESS_CONTEXT_UNAWARE_GDISCALED, "UnawareGdiScaled"),
    ];
    known
        .into_iter()
        .find(|(candidate, _)| unsafe { AreDpiAwarenessContextsEqual(ctx, *candidate) }.as_bool())
        .map(|(_, name)| name)
        .unwrap_or("Unknown")
}

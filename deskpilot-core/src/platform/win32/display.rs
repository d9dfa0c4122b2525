//! Monitor enumeration.

use std::ffi::OsString;
use std::os::windows::ffi::OsStringExt;

use windows::Win32::Foundation::{BOOL, LPARAM, RECT, TRUE};
use windows::Win32::Graphics::Gdi::{EnumDisplayMonitors, GetMonitorInfoW, HDC, HMONITOR, MONITORINFO, MONITORINFOEXW};
use windows::Win32::UI::HiDpi::{GetDpiForMonitor, MDT_EFFECTIVE_DPI};
use windows::Win32::UI::WindowsAndMessaging::{
    GetSystemMetrics, SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN, SM_XVIRTUALSCREEN, SM_YVIRTUALSCREEN,
};

use crate::display::{order_displays, DisplayEnvironment, DisplayInfo, RawDisplay, BASELINE_DPI};
use crate::geometry::RectPx;

/// `MONITORINFO::dwFlags` bit for the primary monitor.
const MONITORINFOF_PRIMARY: u32 = 1;

fn rect_px(r: &RECT) -> RectPx {
    RectPx::from_ltrb(r.left, r.top, r.right, r.bottom)
}

/// Callback for `EnumDisplayMonitors` that collects monitor handles.
unsafe extern "system" fn collect_monitor(monitor: HMONITOR, _hdc: HDC, _clip: *mut RECT, lparam: LPARAM) -> BOOL {
    let monitors = unsafe { &mut *(lparam.0 as *mut Vec<HMONITOR>) };
    monitors.push(monitor);
    TRUE
}

fn describe(monitor: HMONITOR) -> Option<RawDisplay> {
    let mut info = MONITORINFOEXW::default();
    info.monitorInfo.cbSize = std::mem::size_of::<MONITORINFOEXW>() as u32;
    let ok = unsafe { GetMonitorInfoW(monitor, &mut info as *mut MONITORINFOEXW as *mut MONITORINFO) };
    if !ok.as_bool() {
        return None;
    }

    let (mut dpi_x, mut dpi_y) = (0u32, 0u32);
    if unsafe { GetDpiForMonitor(monitor, MDT_EFFECTIVE_DPI, &mut dpi_x, &mut dpi_y) }.is_err() || dpi_x == 0 {
        dpi_x = BASELINE_DPI;
        dpi_y = BASELINE_DPI;
    }

    let name_len = info.szDevice.iter().position(|&c| c == 0).unwrap_or(info.szDevice.len());
    let device_name = OsString::from_wide(&info.szDevice[..name_len])
        .to_string_lossy()
        .into_owned();

    Some(RawDisplay {
        device_name,
        is_primary: info.monitorInfo.dwFlags & MONITORINFOF_PRIMARY != 0,
        bounds: rect_px(&info.monitorInfo.rcMonitor),
        work_area: rect_px(&info.monitorInfo.rcWork),
        dpi_x,
        dpi_y,
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Win32Displays;

impl DisplayEnvironment for Win32Displays {
    fn list_displays(&self) -> Vec<DisplayInfo> {
        let mut monitors: Vec<HMONITOR> = Vec::with_capacity(4);
        let ok = unsafe {
            EnumDisplayMonitors(
                HDC::default(),
                None,
                Some(collect_monitor),
                LPARAM(&mut monitors as *mut Vec<HMONITOR> as isize),
            )
        };
        if !ok.as_bool() {
            log::warn!("EnumDisplayMonitors failed");
            return Vec::new();
        }

        order_displays(monitors.into_iter().filter_map(describe).collect())
    }

    fn virtual_screen_rect(&self) -> RectPx {
        unsafe {
            RectPx::new(
                GetSystemMetrics(SM_XVIRTUALSCREEN),
                GetSystemMetrics(SM_YVIRTUALSCREEN),
                GetSystemMetrics(SM_CXVIRTUALSCREEN),
                GetSystemMetrics(SM_CYVIRTUALSCREEN),
            )
        }
    }
}

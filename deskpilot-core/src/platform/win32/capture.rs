//! GDI pixel capture.
//!
//! Every device context, bitmap and selection is held in a guard so the
//! GDI objects are released on all paths, including early returns.
//! Pixels come back top-down BGRA with alpha forced to 255 (32-bit
//! `BI_RGB` DIBs leave it zero).

use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC, GetDIBits, ReleaseDC,
    SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS, HBITMAP, HDC, HGDIOBJ, SRCCOPY,
};
use windows::Win32::Storage::Xps::{PrintWindow, PRINT_WINDOW_FLAGS};

use super::{last_error_code, to_hwnd};
use crate::capture::{Frame, PixelSource};
use crate::errors::AutomationError;
use crate::geometry::RectPx;

/// `PW_RENDERFULLCONTENT`: include DirectComposition / layered content.
const PW_RENDERFULLCONTENT: PRINT_WINDOW_FLAGS = PRINT_WINDOW_FLAGS(2);

fn gdi_failure(op: &'static str) -> AutomationError {
    AutomationError::from_os_code(op, last_error_code())
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

struct ScreenDc(HDC);

impl ScreenDc {
    fn acquire() -> Result<Self, AutomationError> {
        let dc = unsafe { GetDC(HWND(std::ptr::null_mut())) };
        if dc.is_invalid() {
            return Err(gdi_failure("GetDC"));
        }
        Ok(Self(dc))
    }
}

impl Drop for ScreenDc {
    fn drop(&mut self) {
        unsafe {
            let _ = ReleaseDC(HWND(std::ptr::null_mut()), self.0);
        }
    }
}

struct MemoryDc(HDC);

impl MemoryDc {
    fn compatible_with(dc: HDC) -> Result<Self, AutomationError> {
        let mem = unsafe { CreateCompatibleDC(dc) };
        if mem.is_invalid() {
            return Err(gdi_failure("CreateCompatibleDC"));
        }
        Ok(Self(mem))
    }
}

impl Drop for MemoryDc {
    fn drop(&mut self) {
        unsafe {
            let _ = DeleteDC(self.0);
        }
    }
}

struct Bitmap(HBITMAP);

impl Bitmap {
    fn compatible_with(dc: HDC, width: i32, height: i32) -> Result<Self, AutomationError> {
        let bitmap = unsafe { CreateCompatibleBitmap(dc, width, height) };
        if bitmap.is_invalid() {
            return Err(gdi_failure("CreateCompatibleBitmap"));
        }
        Ok(Self(bitmap))
    }
}

impl Drop for Bitmap {
    fn drop(&mut self) {
        unsafe {
            let _ = DeleteObject(self.0);
        }
    }
}

/// Restores the previously selected object on drop.  Must be dropped
/// before the bitmap it selected.
struct Selection {
    dc: HDC,
    previous: HGDIOBJ,
}

impl Selection {
    fn select(dc: HDC, bitmap: &Bitmap) -> Self {
        let previous = unsafe { SelectObject(dc, bitmap.0) };
        Self { dc, previous }
    }
}

impl Drop for Selection {
    fn drop(&mut self) {
        unsafe {
            SelectObject(self.dc, self.previous);
        }
    }
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

/// Read a bitmap out as top-down BGRA.  The bitmap must not be selected
/// into any DC.
fn read_pixels(dc: HDC, bitmap: &Bitmap, width: u32, height: u32) -> Result<Frame, AutomationError> {
    let mut pixels = vec![0u8; width as usize * height as usize * 4];

    let mut bmi = BITMAPINFO {
        bmiHeader: BITMAPINFOHEADER {
            biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
            biWidth: width as i32,
            // Negative height = top-down rows.
            biHeight: -(height as i32),
            biPlanes: 1,
            biBitCount: 32,
            biCompression: BI_RGB.0,
            ..Default::default()
        },
        bmiColors: [Default::default()],
    };

    let lines = unsafe {
        GetDIBits(
            dc,
            bitmap.0,
            0,
            height,
            Some(pixels.as_mut_ptr() as *mut _),
            &mut bmi,
            DIB_RGB_COLORS,
        )
    };
    if lines == 0 {
        return Err(gdi_failure("GetDIBits"));
    }

    for px in pixels.chunks_exact_mut(4) {
        px[3] = 255;
    }

    Ok(Frame {
        width,
        height,
        data: pixels,
    })
}

fn checked_size(rect: RectPx) -> Result<(u32, u32), AutomationError> {
    if rect.is_degenerate() {
        return Err(AutomationError::Validation(format!(
            "cannot capture a {}x{} rectangle",
            rect.w, rect.h
        )));
    }
    Ok((rect.w as u32, rect.h as u32))
}

/// Capture via GDI: `BitBlt` from the screen DC and `PrintWindow` for
/// off-screen window rendering.
#[derive(Debug, Default, Clone, Copy)]
pub struct GdiPixelSource;

impl PixelSource for GdiPixelSource {
    fn copy_screen_rect(&self, rect: RectPx) -> Result<Frame, AutomationError> {
        let (width, height) = checked_size(rect)?;
        let screen = ScreenDc::acquire()?;
        let mem = MemoryDc::compatible_with(screen.0)?;
        let bitmap = Bitmap::compatible_with(screen.0, rect.w, rect.h)?;

        {
            let _selected = Selection::select(mem.0, &bitmap);
            unsafe { BitBlt(mem.0, 0, 0, rect.w, rect.h, screen.0, rect.x, rect.y, SRCCOPY) }?;
        }

        read_pixels(mem.0, &bitmap, width, height)
    }

    fn render_window(&self, hwnd: u64, rect: RectPx, full_content: bool) -> Result<Frame, AutomationError> {
        let (width, height) = checked_size(rect)?;
        let screen = ScreenDc::acquire()?;
        let mem = MemoryDc::compatible_with(screen.0)?;
        let bitmap = Bitmap::compatible_with(screen.0, rect.w, rect.h)?;

        {
            let _selected = Selection::select(mem.0, &bitmap);
            let flags = if full_content { PW_RENDERFULLCONTENT } else { PRINT_WINDOW_FLAGS(0) };
            if !unsafe { PrintWindow(to_hwnd(hwnd), mem.0, flags) }.as_bool() {
                return Err(gdi_failure("PrintWindow"));
            }
        }

        read_pixels(mem.0, &bitmap, width, height)
    }
}

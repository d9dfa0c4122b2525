//! Screen, window, and region capture with DPI-aware metadata.
//!
//! [`CaptureEngine`] resolves what to capture, asks a [`PixelSource`] for
//! raw BGRA pixels, encodes them with the [`image`] crate, and stamps the
//! result with the display that contains the center of the captured rect.
//!
//! # Window resolution
//!
//! Window captures enumerate every top-level window, filter by the
//! request's [`WindowMatch`], and rank survivors with [`score_window`].
//! Rendering tries an off-screen composite (with, then without, the
//! full-content flag) before falling back to a plain screen copy of the
//! window's rectangle.  The fallback captures whatever is on top of an
//! occluded window.
//!
//! # Failures
//!
//! Every failure is a [`CaptureFailure`] value with a stable reason code
//! and, for window captures, up to [`MAX_DIAGNOSTIC_CANDIDATES`] window
//! summaries to help the caller refine the match.

use std::io::Cursor;
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::display::{select_by_rect_center, DisplayEnvironment, DisplayInfo, BASELINE_DPI};
use crate::errors::AutomationError;
use crate::geometry::RectPx;
use crate::window::{CompiledMatch, WindowCatalog, WindowInfo, WindowMatch};

/// Default JPEG quality when the request does not specify one.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Upper bound on window summaries attached to a failure.
pub const MAX_DIAGNOSTIC_CANDIDATES: usize = 5;

/// Titles in diagnostic summaries are cut to this many characters.
const SUMMARY_TITLE_MAX: usize = 60;

// ---------------------------------------------------------------------------
// Request / result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    #[default]
    Screen,
    Window,
    Region,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    #[default]
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
}

impl CaptureFormat {
    /// File extension used for saved screenshots.
    pub fn extension(self) -> &'static str {
        match self {
            CaptureFormat::Png => "png",
            CaptureFormat::Jpeg => "jpg",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            CaptureFormat::Png => "image/png",
            CaptureFormat::Jpeg => "image/jpeg",
        }
    }
}

fn default_quality() -> u8 {
    DEFAULT_JPEG_QUALITY
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    #[serde(default)]
    pub mode: CaptureMode,
    #[serde(default)]
    pub window: Option<WindowMatch>,
    #[serde(default)]
    pub region: Option<RectPx>,
    #[serde(default)]
    pub format: CaptureFormat,
    /// JPEG quality, 0-100.
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default)]
    pub display_index: Option<usize>,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Screen,
            window: None,
            region: None,
            format: CaptureFormat::Png,
            quality: DEFAULT_JPEG_QUALITY,
            display_index: None,
        }
    }
}

impl CaptureRequest {
    pub fn region(rect: RectPx) -> Self {
        Self {
            mode: CaptureMode::Region,
            region: Some(rect),
            ..Self::default()
        }
    }

    pub fn window(matcher: WindowMatch) -> Self {
        Self {
            mode: CaptureMode::Window,
            window: Some(matcher),
            ..Self::default()
        }
    }
}

/// Where and when a capture was taken.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMetadata {
    pub region_rect_px: RectPx,
    pub window_rect_px: Option<RectPx>,
    /// Unix timestamp in milliseconds.
    pub ts: i64,
    pub scale: f64,
    pub dpi: u32,
    pub display_index: Option<usize>,
    pub device_name: Option<String>,
}

/// The window a window-mode capture actually selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowCaptureInfo {
    pub hwnd: u64,
    pub title: String,
    pub process_name: String,
    pub rect_px: RectPx,
    pub is_visible: bool,
    pub is_minimized: bool,
    pub score: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResult {
    #[serde(skip)]
    pub image_bytes: Vec<u8>,
    pub format: CaptureFormat,
    pub metadata: CaptureMetadata,
    pub selected_window: Option<WindowCaptureInfo>,
}

/// Diagnostic summary of a window considered (or visible) during a
/// failed window capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowCandidateSummary {
    pub hwnd: u64,
    pub title: String,
    pub process_name: String,
    pub score: i32,
    pub is_visible: bool,
    pub is_minimized: bool,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("CAPTURE_FAILED: {reason}")]
pub struct CaptureFailure {
    pub reason: String,
    pub candidates: Option<Vec<WindowCandidateSummary>>,
}

impl CaptureFailure {
    pub(crate) fn new(reason: &str) -> Self {
        Self {
            reason: reason.to_owned(),
            candidates: None,
        }
    }

    fn with_candidates(reason: &str, candidates: Vec<WindowCandidateSummary>) -> Self {
        Self {
            reason: reason.to_owned(),
            candidates: Some(candidates),
        }
    }

    /// HTTP-style status for this failure.
    pub fn status_code(&self) -> u16 {
        match self.reason.as_str() {
            "NO_WINDOW_MATCH_PROVIDED" | "NO_REGION_PROVIDED" | "INVALID_RECT" | "BAD_REGEX" | "BAD_RUN_ID" => 400,
            "NOT_IMPLEMENTED" => 501,
            "CAPTURE_OPERATION_FAILED" | "ENCODE_FAILED" => 500,
            _ => 404,
        }
    }
}

// ---------------------------------------------------------------------------
// Pixel source seam
// ---------------------------------------------------------------------------

/// Raw BGRA pixel data.
///
/// Pixels are stored row-major, top-to-bottom, 4 bytes per pixel in BGRA
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Length == `width * height * 4`.
    pub data: Vec<u8>,
}

/// Native pixel grabbing.  Every drawing surface an implementation
/// acquires must be released before the call returns.
pub trait PixelSource: Send + Sync {
    /// Copy `rect` straight from the screen.
    fn copy_screen_rect(&self, rect: RectPx) -> Result<Frame, AutomationError>;

    /// Render a window's content off-screen into a `rect`-sized surface.
    /// `full_content` requests layered / hardware-accelerated content too.
    fn render_window(&self, hwnd: u64, rect: RectPx, full_content: bool) -> Result<Frame, AutomationError>;
}

/// Backend for platforms without capture support.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPixelSource;

impl PixelSource for NullPixelSource {
    fn copy_screen_rect(&self, _rect: RectPx) -> Result<Frame, AutomationError> {
        Err(AutomationError::NotImplemented)
    }

    fn render_window(&self, _hwnd: u64, _rect: RectPx, _full_content: bool) -> Result<Frame, AutomationError> {
        Err(AutomationError::NotImplemented)
    }
}

// ---------------------------------------------------------------------------
// Window scoring
// ---------------------------------------------------------------------------

/// Rank a matching window.  Weights: visible and not minimized +100
/// (visible only +50), positive area +50, area / 100000 up to +30, title
/// substring hit +20, exact process hit +30, foreground +200.
pub fn score_window(window: &WindowInfo, matcher: &CompiledMatch, foreground: Option<u64>) -> i32 {
    let mut score = 0;

    if window.is_visible && !window.is_minimized {
        score += 100;
    } else if window.is_visible {
        score += 50;
    }

    let area = window.rect_px.area();
    if area > 0 {
        score += 50;
        score += (area / 100_000).min(30) as i32;
    }

    if matcher.title_matched(window) {
        score += 20;
    }
    if matcher.process_matched(window) {
        score += 30;
    }
    if foreground.is_some_and(|fg| fg != 0 && fg == window.hwnd) {
        score += 200;
    }

    score
}

/// Filter `windows` by `matcher` and sort by score, highest first.  Ties
/// keep enumeration order.
pub fn score_and_rank<'a>(
    windows: &'a [WindowInfo],
    matcher: &CompiledMatch,
    foreground: Option<u64>,
) -> Vec<(&'a WindowInfo, i32)> {
    let mut scored: Vec<(&WindowInfo, i32)> = windows
        .iter()
        .filter(|w| matcher.matches(w))
        .map(|w| (w, score_window(w, matcher, foreground)))
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored
}

fn truncate_title(title: &str) -> String {
    if title.chars().count() <= SUMMARY_TITLE_MAX {
        title.to_owned()
    } else {
        let head: String = title.chars().take(SUMMARY_TITLE_MAX - 3).collect();
        format!("{head}...")
    }
}

fn summarize(window: &WindowInfo, score: i32) -> WindowCandidateSummary {
    WindowCandidateSummary {
        hwnd: window.hwnd,
        title: truncate_title(&window.title),
        process_name: window.process_name.clone(),
        score,
        is_visible: window.is_visible,
        is_minimized: window.is_minimized,
        width: window.rect_px.w,
        height: window.rect_px.h,
    }
}

fn scored_candidates(scored: &[(&WindowInfo, i32)]) -> Vec<WindowCandidateSummary> {
    scored
        .iter()
        .take(MAX_DIAGNOSTIC_CANDIDATES)
        .map(|(w, s)| summarize(w, *s))
        .collect()
}

fn visible_candidates(windows: &[WindowInfo]) -> Vec<WindowCandidateSummary> {
    windows
        .iter()
        .filter(|w| w.is_visible && !w.is_minimized && !w.rect_px.is_degenerate())
        .take(MAX_DIAGNOSTIC_CANDIDATES)
        .map(|w| summarize(w, 0))
        .collect()
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a BGRA frame as PNG (lossless) or JPEG at `quality`.
///
/// If the quality-parameterised JPEG encoder fails, the frame is encoded
/// again with the default JPEG settings rather than failing the capture.
pub fn encode_frame(frame: &Frame, format: CaptureFormat, quality: u8) -> Result<Vec<u8>, AutomationError> {
    let encode_err = |e: image::ImageError| AutomationError::Encode(e.to_string());

    match format {
        CaptureFormat::Png => {
            // BGRA -> RGBA for the `image` crate.
            let rgba: Vec<u8> = frame
                .data
                .chunks_exact(4)
                .flat_map(|px| [px[2], px[1], px[0], px[3]])
                .collect();
            let img = image::RgbaImage::from_raw(frame.width, frame.height, rgba)
                .ok_or_else(|| AutomationError::Encode("frame buffer size mismatch".into()))?;

            let mut buf: Vec<u8> = Vec::new();
            img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
                .map_err(encode_err)?;
            Ok(buf)
        }
        CaptureFormat::Jpeg => {
            // JPEG has no alpha channel: BGRA -> RGB.
            let rgb: Vec<u8> = frame
                .data
                .chunks_exact(4)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect();
            let img = image::RgbImage::from_raw(frame.width, frame.height, rgb)
                .ok_or_else(|| AutomationError::Encode("frame buffer size mismatch".into()))?;

            let mut buf: Vec<u8> = Vec::new();
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
            match img.write_with_encoder(encoder) {
                Ok(()) => Ok(buf),
                Err(e) => {
                    log::warn!("JPEG encode at quality {quality} failed ({e}); using default quality");
                    let mut buf: Vec<u8> = Vec::new();
                    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)
                        .map_err(encode_err)?;
                    Ok(buf)
                }
            }
        }
    }
}

/// Scale, DPI, and display identity for the display containing the
/// center of `rect` (nearest centroid otherwise).  Defaults to
/// `scale = 1.0, dpi = 96` when no display is known.
pub fn attribute_display(displays: &[DisplayInfo], rect: &RectPx) -> (f64, u32, Option<usize>, Option<String>) {
    match select_by_rect_center(displays, rect) {
        Some(d) => (d.scale_x, d.dpi_x, Some(d.index), Some(d.device_name.clone())),
        None => (1.0, BASELINE_DPI, None, None),
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Capture pipeline over display, window, and pixel backends.
#[derive(Clone)]
pub struct CaptureEngine {
    displays: Arc<dyn DisplayEnvironment>,
    windows: Arc<dyn WindowCatalog>,
    pixels: Arc<dyn PixelSource>,
}

impl CaptureEngine {
    pub fn new(
        displays: Arc<dyn DisplayEnvironment>,
        windows: Arc<dyn WindowCatalog>,
        pixels: Arc<dyn PixelSource>,
    ) -> Self {
        Self {
            displays,
            windows,
            pixels,
        }
    }

    /// Capture and discard failure diagnostics.
    pub fn capture(&self, request: &CaptureRequest) -> Option<CaptureResult> {
        self.capture_with_diagnostics(request).ok()
    }

    /// Capture, returning a structured failure on any error.
    pub fn capture_with_diagnostics(&self, request: &CaptureRequest) -> Result<CaptureResult, CaptureFailure> {
        match request.mode {
            CaptureMode::Screen => self.capture_screen(request),
            CaptureMode::Window => self.capture_window(request),
            CaptureMode::Region => self.capture_region(request),
        }
    }

    fn capture_screen(&self, request: &CaptureRequest) -> Result<CaptureResult, CaptureFailure> {
        let displays = self.displays.list_displays();

        let rect = match request.display_index {
            Some(idx) => match displays.iter().find(|d| d.index == idx) {
                Some(d) => d.bounds_rect_px,
                None => return Err(CaptureFailure::new("DISPLAY_NOT_FOUND")),
            },
            None => displays
                .iter()
                .find(|d| d.is_primary)
                .map(|d| d.bounds_rect_px)
                .unwrap_or_else(|| self.displays.virtual_screen_rect()),
        };

        if rect.is_degenerate() {
            return Err(CaptureFailure::new("INVALID_RECT"));
        }

        let frame = self.pixels.copy_screen_rect(rect).map_err(grab_failure)?;
        self.finish(&frame, rect, None, None, request)
    }

    fn capture_region(&self, request: &CaptureRequest) -> Result<CaptureResult, CaptureFailure> {
        let Some(rect) = request.region else {
            return Err(CaptureFailure::new("NO_REGION_PROVIDED"));
        };
        if rect.is_degenerate() {
            return Err(CaptureFailure::new("INVALID_RECT"));
        }

        let frame = self.pixels.copy_screen_rect(rect).map_err(grab_failure)?;
        self.finish(&frame, rect, None, None, request)
    }

    fn capture_window(&self, request: &CaptureRequest) -> Result<CaptureResult, CaptureFailure> {
        let Some(matcher) = &request.window else {
            return Err(CaptureFailure::new("NO_WINDOW_MATCH_PROVIDED"));
        };
        let compiled = matcher
            .compile()
            .map_err(|_| CaptureFailure::new("BAD_REGEX"))?;

        let windows = self.windows.list_windows().map_err(grab_failure)?;
        let foreground = self.windows.foreground_window();
        let scored = score_and_rank(&windows, &compiled, foreground);

        if scored.is_empty() {
            return Err(CaptureFailure::with_candidates(
                "NO_MATCHING_WINDOWS",
                visible_candidates(&windows),
            ));
        }

        // Only the top-scored window is tried; lower scores are diagnostics.
        let (target, score) = scored[0];
        let rect = match self.windows.window_rect(target.hwnd) {
            None => {
                return Err(CaptureFailure::with_candidates(
                    "WINDOW_RECT_UNAVAILABLE",
                    scored_candidates(&scored),
                ))
            }
            Some(rect) if rect.is_degenerate() => {
                return Err(CaptureFailure::with_candidates(
                    "WINDOW_RECT_INVALID",
                    scored_candidates(&scored),
                ))
            }
            Some(rect) => rect,
        };

        let frame = match self.render_with_fallback(target.hwnd, rect) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("capture_window: all strategies failed for hwnd=0x{:X}: {e}", target.hwnd);
                return Err(CaptureFailure::with_candidates(
                    "CAPTURE_OPERATION_FAILED",
                    scored_candidates(&scored),
                ));
            }
        };

        let selected_window = WindowCaptureInfo {
            hwnd: target.hwnd,
            title: target.title.clone(),
            process_name: target.process_name.clone(),
            rect_px: rect,
            is_visible: target.is_visible,
            is_minimized: target.is_minimized,
            score,
        };
        self.finish(&frame, rect, Some(rect), Some(selected_window), request)
    }

    /// Off-screen render with the full-content flag, then without it, then
    /// a plain screen copy of the window rect.
    fn render_with_fallback(&self, hwnd: u64, rect: RectPx) -> Result<Frame, AutomationError> {
        match self.pixels.render_window(hwnd, rect, true) {
            Ok(frame) => return Ok(frame),
            Err(e) => log::debug!("render_window(full content) failed for hwnd=0x{hwnd:X}: {e}"),
        }
        match self.pixels.render_window(hwnd, rect, false) {
            Ok(frame) => return Ok(frame),
            Err(e) => log::debug!("render_window failed for hwnd=0x{hwnd:X}: {e}; copying screen rect"),
        }
        self.pixels.copy_screen_rect(rect)
    }

    fn finish(
        &self,
        frame: &Frame,
        region: RectPx,
        window_rect: Option<RectPx>,
        selected_window: Option<WindowCaptureInfo>,
        request: &CaptureRequest,
    ) -> Result<CaptureResult, CaptureFailure> {
        let image_bytes = encode_frame(frame, request.format, request.quality).map_err(|e| {
            log::warn!("capture encode failed: {e}");
            CaptureFailure::new("ENCODE_FAILED")
        })?;

        let displays = self.displays.list_displays();
        let (scale, dpi, display_index, device_name) = attribute_display(&displays, &region);

        Ok(CaptureResult {
            image_bytes,
            format: request.format,
            metadata: CaptureMetadata {
                region_rect_px: region,
                window_rect_px: window_rect,
                ts: chrono::Utc::now().timestamp_millis(),
                scale,
                dpi,
                display_index,
                device_name,
            },
            selected_window,
        })
    }
}

fn grab_failure(err: AutomationError) -> CaptureFailure {
    match err {
        AutomationError::NotImplemented => CaptureFailure::new("NOT_IMPLEMENTED"),
        other => {
            log::warn!("capture failed: {other}");
            CaptureFailure::new("CAPTURE_OPERATION_FAILED")
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

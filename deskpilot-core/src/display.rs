//! Monitor enumeration and point-to-display attribution.
//!
//! [`DisplayEnvironment`] is the seam between the pure selection logic in
//! this module and the native monitor enumeration in
//! [`crate::platform`].  Display lists are recomputed on every call and
//! never diffed, so callers own the returned `Vec` outright.

use serde::Serialize;

use crate::geometry::RectPx;

/// Baseline DPI that corresponds to a 100% scale factor.
pub const BASELINE_DPI: u32 = 96;

/// One connected monitor, in physical pixels.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    /// Stable index: primary first, then top-left to bottom-right.
    pub index: usize,
    pub device_name: String,
    pub is_primary: bool,
    pub bounds_rect_px: RectPx,
    pub work_area_rect_px: RectPx,
    pub dpi_x: u32,
    pub dpi_y: u32,
    pub scale_x: f64,
    pub scale_y: f64,
}

/// A monitor as reported by the OS, before ordering and indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDisplay {
    pub device_name: String,
    pub is_primary: bool,
    pub bounds: RectPx,
    pub work_area: RectPx,
    pub dpi_x: u32,
    pub dpi_y: u32,
}

/// Source of monitor geometry.
pub trait DisplayEnvironment: Send + Sync {
    /// All connected monitors.  Returns an empty list, never an error, when
    /// nothing can be enumerated.
    fn list_displays(&self) -> Vec<DisplayInfo>;

    /// Bounding rectangle spanning every monitor.
    fn virtual_screen_rect(&self) -> RectPx;
}

/// Backend for platforms without a display implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDisplayEnvironment;

impl DisplayEnvironment for NullDisplayEnvironment {
    fn list_displays(&self) -> Vec<DisplayInfo> {
        Vec::new()
    }

    fn virtual_screen_rect(&self) -> RectPx {
        RectPx::default()
    }
}

/// Sort raw monitors into the stable order (primary first, then by `x`,
/// then by `y`) and assign indices and scale factors.
pub fn order_displays(mut raw: Vec<RawDisplay>) -> Vec<DisplayInfo> {
    raw.sort_by(|a, b| {
        b.is_primary
            .cmp(&a.is_primary)
            .then(a.bounds.x.cmp(&b.bounds.x))
            .then(a.bounds.y.cmp(&b.bounds.y))
    });

    raw.into_iter()
        .enumerate()
        .map(|(index, d)| DisplayInfo {
            index,
            device_name: d.device_name,
            is_primary: d.is_primary,
            bounds_rect_px: d.bounds,
            work_area_rect_px: d.work_area,
            dpi_x: d.dpi_x,
            dpi_y: d.dpi_y,
            scale_x: d.dpi_x as f64 / BASELINE_DPI as f64,
            scale_y: d.dpi_y as f64 / BASELINE_DPI as f64,
        })
        .collect()
}

/// The display whose bounds contain `(x, y)`; otherwise the display whose
/// bounds-centroid is nearest.  Ties go to the earlier display.  `None`
/// only for an empty list.
pub fn select_by_point(displays: &[DisplayInfo], x: i32, y: i32) -> Option<&DisplayInfo> {
    if let Some(hit) = displays.iter().find(|d| d.bounds_rect_px.contains(x, y)) {
        return Some(hit);
    }

    let (px, py) = (x as f64, y as f64);
    let mut best: Option<(&DisplayInfo, f64)> = None;
    for d in displays {
        let (cx, cy) = d.bounds_rect_px.centroid();
        let dist = (cx - px).powi(2) + (cy - py).powi(2);
        match best {
            Some((_, best_dist)) if dist >= best_dist => {}
            _ => best = Some((d, dist)),
        }
    }
    best.map(|(d, _)| d)
}

/// [`select_by_point`] applied to the integer-truncated center of `rect`.
pub fn select_by_rect_center<'a>(displays: &'a [DisplayInfo], rect: &RectPx) -> Option<&'a DisplayInfo> {
    let (cx, cy) = rect.center();
    select_by_point(displays, cx, cy)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str, primary: bool, bounds: RectPx, dpi: u32) -> RawDisplay {
        RawDisplay {
            device_name: name.into(),
            is_primary: primary,
            bounds,
            work_area: bounds,
            dpi_x: dpi,
            dpi_y: dpi,
        }
    }

    fn two_monitors() -> Vec<DisplayInfo> {
        order_displays(vec![
            raw(r"\\.\DISPLAY2", false, RectPx::new(1920, 0, 2560, 1440), 144),
            raw(r"\\.\DISPLAY1", true, RectPx::new(0, 0, 1920, 1080), 96),
        ])
    }

    #[test]
    fn test_order_primary_first_then_position() {
        let displays = order_displays(vec![
            raw("C", false, RectPx::new(1920, 0, 100, 100), 96),
            raw("B", false, RectPx::new(-1920, 0, 100, 100), 96),
            raw("A", true, RectPx::new(0, 0, 100, 100), 96),
        ]);
        let names: Vec<&str> = displays.iter().map(|d| d.device_name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(displays[2].index, 2);
    }

    #[test]
    fn test_scale_is_dpi_over_96() {
        let displays = two_monitors();
        assert_eq!(displays[0].scale_x, 1.0);
        assert_eq!(displays[1].scale_x, 1.5);
    }

    #[test]
    fn test_select_by_point_containment() {
        let displays = two_monitors();
        assert_eq!(select_by_point(&displays, 10, 10).map(|d| d.index), Some(0));
        assert_eq!(select_by_point(&displays, 1920, 0).map(|d| d.index), Some(1));
    }

    #[test]
    fn test_select_by_point_falls_back_to_nearest_centroid() {
        let displays = two_monitors();
        // Below the right-hand monitor: nearer its centroid (3200, 720).
        let d = select_by_point(&displays, 3200, 2000).map(|d| d.index);
        assert_eq!(d, Some(1));
        // Far to the left: nearer the primary's centroid.
        let d = select_by_point(&displays, -5000, 500).map(|d| d.index);
        assert_eq!(d, Some(0));
    }

    #[test]
    fn test_nearest_centroid_tie_prefers_enumeration_order() {
        let displays = order_displays(vec![
            raw("A", true, RectPx::new(0, 0, 100, 100), 96),
            raw("B", false, RectPx::new(200, 0, 100, 100), 96),
        ]);
        // (150, 50) lies in the gap, equidistant from both centroids.
        assert_eq!(select_by_point(&displays, 150, 50).map(|d| d.index), Some(0));
    }

    #[test]
    fn test_nearest_distance_is_minimal() {
        let displays = order_displays(vec![
            raw("A", true, RectPx::new(0, 0, 1000, 1000), 96),
            raw("B", false, RectPx::new(3000, 0, 500, 500), 96),
            raw("C", false, RectPx::new(0, 3000, 800, 600), 96),
        ]);
        for &(x, y) in &[(2000, 200), (-400, 5000), (4000, 4000), (1500, 1500)] {
            let chosen = select_by_point(&displays, x, y).map(|d| d.bounds_rect_px.centroid());
            let dist = |c: (f64, f64)| (c.0 - x as f64).powi(2) + (c.1 - y as f64).powi(2);
            let chosen = chosen.map(dist).unwrap_or(f64::MAX);
            for d in &displays {
                assert!(chosen <= dist(d.bounds_rect_px.centroid()));
            }
        }
    }

    #[test]
    fn test_select_on_empty_list() {
        assert!(select_by_point(&[], 0, 0).is_none());
        assert!(select_by_rect_center(&[], &RectPx::new(0, 0, 10, 10)).is_none());
    }

    #[test]
    fn test_select_by_rect_center_uses_center() {
        let displays = two_monitors();
        // Mostly on the primary, but the center is on the second monitor.
        let rect = RectPx::new(1800, 100, 400, 100);
        assert_eq!(select_by_rect_center(&displays, &rect).map(|d| d.index), Some(1));
    }

    #[test]
    fn test_display_info_serialization() {
        let displays = two_monitors();
        let json = serde_json::to_string(&displays[0]).unwrap();
        assert!(json.contains("\"isPrimary\":true"));
        assert!(json.contains("\"boundsRectPx\""));
    }
}

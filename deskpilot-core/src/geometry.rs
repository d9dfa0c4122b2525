//! Physical-pixel rectangles.
//!
//! All rectangles are axis-aligned `(x, y, w, h)` in the virtual-screen
//! coordinate space, inclusive-min / exclusive-max for containment.

use serde::{Deserialize, Serialize};

/// Rectangle in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RectPx {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl RectPx {
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// Build from Win32-style `left/top/right/bottom` edges, clamping
    /// negative extents to zero.
    pub fn from_ltrb(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            x: left,
            y: top,
            w: (right - left).max(0),
            h: (bottom - top).max(0),
        }
    }

    /// `true` when the rectangle has no area (`w <= 0` or `h <= 0`).
    pub fn is_degenerate(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    pub fn area(&self) -> i64 {
        if self.is_degenerate() {
            0
        } else {
            self.w as i64 * self.h as i64
        }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.w && y < self.y + self.h
    }

    /// Integer-truncated center point.
    pub fn center(&self) -> (i32, i32) {
        (self.x + self.w / 2, self.y + self.h / 2)
    }

    /// Exact center, used for nearest-centroid distances.
    pub fn centroid(&self) -> (f64, f64) {
        (
            self.x as f64 + self.w as f64 / 2.0,
            self.y as f64 + self.h as f64 / 2.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_is_half_open() {
        let r = RectPx::new(0, 0, 100, 50);
        assert!(r.contains(0, 0));
        assert!(r.contains(99, 49));
        assert!(!r.contains(100, 10));
        assert!(!r.contains(10, 50));
        assert!(!r.contains(-1, 0));
    }

    #[test]
    fn test_from_ltrb_clamps_inverted_edges() {
        assert_eq!(RectPx::from_ltrb(10, 10, 5, 30), RectPx::new(10, 10, 0, 20));
        assert!(RectPx::from_ltrb(10, 10, 5, 30).is_degenerate());
    }

    #[test]
    fn test_center_truncates() {
        assert_eq!(RectPx::new(-1920, 0, 1921, 1081).center(), (-960, 540));
        assert_eq!(RectPx::new(0, 0, 3, 3).center(), (1, 1));
    }

    #[test]
    fn test_area_of_degenerate_is_zero() {
        assert_eq!(RectPx::new(0, 0, -5, 10).area(), 0);
        assert_eq!(RectPx::new(0, 0, 1920, 1080).area(), 2_073_600);
    }
}

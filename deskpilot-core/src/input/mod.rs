//! Synthetic mouse and keyboard input.
//!
//! The injectors in [`mouse`] and [`keyboard`] validate requests, apply
//! humanization, and translate logical commands into [`MouseEvent`] /
//! [`KeyEvent`] values.  An [`InputBackend`] delivers those events to the
//! OS one at a time so that every failure is attributable to a single
//! event and its OS error code.

pub mod keyboard;
pub mod mouse;

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::AutomationError;
use crate::geometry::RectPx;

pub use keyboard::{KeyCommand, KeyInjector, KeyInputAttempt, KeyInputRequest, KeyInputResult};
pub use mouse::{MouseCommand, MouseInjector, MouseInputRequest, MouseInputResult};

/// Upper bound of the normalized absolute-pointer space.
pub const ABSOLUTE_MAX: i32 = 65_535;

// ---------------------------------------------------------------------------
// Humanization
// ---------------------------------------------------------------------------

/// Randomized timing and positioning applied to synthetic input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Humanize {
    /// Uniform offset in `[-jitter_px, +jitter_px]` added to each axis.
    pub jitter_px: i32,
    /// `[min, max]` inter-event delay in milliseconds.
    pub delay_ms: Option<[i64; 2]>,
}

impl Humanize {
    /// Normalized delay bounds: negatives clamp to zero and an inverted
    /// range raises `max` to `min`.
    pub fn delay_bounds(&self) -> Option<(u64, u64)> {
        let [min, max] = self.delay_ms?;
        let min = min.max(0) as u64;
        let max = (max.max(0) as u64).max(min);
        Some((min, max))
    }

    /// Sleep the calling thread for a uniform random delay in the
    /// configured range.  No-op without a delay spec.
    pub fn pause(&self) {
        if let Some(ms) = self.sample_delay_ms() {
            if ms > 0 {
                std::thread::sleep(Duration::from_millis(ms));
            }
        }
    }

    pub fn sample_delay_ms(&self) -> Option<u64> {
        let (min, max) = self.delay_bounds()?;
        Some(rand::thread_rng().gen_range(min..=max))
    }

    /// Offset `(x, y)` by an independent uniform jitter on each axis.
    pub fn jitter(&self, x: i32, y: i32) -> (i32, i32) {
        if self.jitter_px <= 0 {
            return (x, y);
        }
        let j = self.jitter_px;
        let mut rng = rand::thread_rng();
        (
            x.saturating_add(rng.gen_range(-j..=j)),
            y.saturating_add(rng.gen_range(-j..=j)),
        )
    }
}

// ---------------------------------------------------------------------------
// Coordinates
// ---------------------------------------------------------------------------

fn physical_axis_to_absolute(phys: i32, origin: i32, size: i32) -> i32 {
    if size <= 0 {
        return 0;
    }
    let size = size as i64;
    let scaled = ((phys as i64 - origin as i64) * 65_536 + size / 2) / size;
    scaled.clamp(0, ABSOLUTE_MAX as i64) as i32
}

/// Convert physical pixels to the 16-bit normalized absolute-pointer space
/// spanning the whole virtual screen:
/// `abs = clamp(((phys - origin) * 65536 + size / 2) / size, 0, 65535)`.
pub fn physical_to_absolute(x: i32, y: i32, virtual_screen: RectPx) -> (i32, i32) {
    (
        physical_axis_to_absolute(x, virtual_screen.x, virtual_screen.w),
        physical_axis_to_absolute(y, virtual_screen.y, virtual_screen.h),
    )
}

// ---------------------------------------------------------------------------
// Backend seam
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

/// One native mouse event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseEvent {
    /// Move to normalized absolute coordinates (see [`physical_to_absolute`]).
    MoveAbsolute { x: i32, y: i32 },
    ButtonDown(MouseButton),
    ButtonUp(MouseButton),
    /// Wheel rotation in multiples of 120 per notch.
    Wheel { delta: i32, horizontal: bool },
}

/// One native key transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub vk: u16,
    pub extended: bool,
    pub key_up: bool,
}

impl KeyEvent {
    /// Native flag bits for this event (`0x1` extended, `0x2` key up).
    pub fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.extended {
            flags |= 0x1;
        }
        if self.key_up {
            flags |= 0x2;
        }
        flags
    }
}

/// OS input primitives.  Failures carry the OS error code, so an
/// access-denied rejection surfaces as [`AutomationError::PermissionDenied`].
pub trait InputBackend: Send + Sync {
    /// Move the cursor directly to physical coordinates.
    fn set_cursor_pos(&self, x: i32, y: i32) -> Result<(), AutomationError>;

    /// Current cursor position, if it can be read.
    fn cursor_pos(&self) -> Option<(i32, i32)>;

    fn send_mouse(&self, event: MouseEvent) -> Result<(), AutomationError>;

    fn send_key(&self, event: KeyEvent) -> Result<(), AutomationError>;
}

/// Backend for platforms without input support.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullInputBackend;

impl InputBackend for NullInputBackend {
    fn set_cursor_pos(&self, _x: i32, _y: i32) -> Result<(), AutomationError> {
        Err(AutomationError::NotImplemented)
    }

    fn cursor_pos(&self) -> Option<(i32, i32)> {
        None
    }

    fn send_mouse(&self, _event: MouseEvent) -> Result<(), AutomationError> {
        Err(AutomationError::NotImplemented)
    }

    fn send_key(&self, _event: KeyEvent) -> Result<(), AutomationError> {
        Err(AutomationError::NotImplemented)
    }
}

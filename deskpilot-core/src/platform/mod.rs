//! Native backends behind the component traits.
//!
//! Only Windows has a real implementation ([`win32`]).  Every other target
//! gets the null backends, which report `NOT_IMPLEMENTED` (501).

#[cfg(windows)]
pub mod win32;

use std::sync::Arc;

use crate::capture::{NullPixelSource, PixelSource};
use crate::display::{DisplayEnvironment, NullDisplayEnvironment};
use crate::input::{InputBackend, NullInputBackend};
use crate::window::{NullWindowCatalog, WindowCatalog};

/// One implementation of every native seam.
#[derive(Clone)]
pub struct Backend {
    pub displays: Arc<dyn DisplayEnvironment>,
    pub windows: Arc<dyn WindowCatalog>,
    pub pixels: Arc<dyn PixelSource>,
    pub input: Arc<dyn InputBackend>,
}

impl Backend {
    /// Backend whose every operation is unsupported.
    pub fn null() -> Self {
        Self {
            displays: Arc::new(NullDisplayEnvironment),
            windows: Arc::new(NullWindowCatalog),
            pixels: Arc::new(NullPixelSource),
            input: Arc::new(NullInputBackend),
        }
    }
}

/// The real backend for this platform, or [`Backend::null`].
pub fn native_backend() -> Backend {
    #[cfg(windows)]
    {
        win32::backend()
    }
    #[cfg(not(windows))]
    {
        log::warn!("no native automation backend on this platform; operations report NOT_IMPLEMENTED");
        Backend::null()
    }
}

/// Opt the process into per-monitor (v2) DPI awareness so that every
/// coordinate is in physical pixels.  Returns whether the mode is active
/// afterwards.  Must run before any window is created.
pub fn enable_per_monitor_dpi_awareness() -> bool {
    #[cfg(windows)]
    {
        win32::enable_per_monitor_dpi_awareness()
    }
    #[cfg(not(windows))]
    {
        false
    }
}

/// Current DPI awareness of the calling thread: `PerMonitorV2`,
/// `PerMonitor`, `SystemAware`, `Unaware`, `UnawareGdiScaled`, `Unknown`,
/// or `NotApplicable` off Windows.
pub fn dpi_awareness_mode() -> &'static str {
    #[cfg(windows)]
    {
        win32::dpi_awareness_mode()
    }
    #[cfg(not(windows))]
    {
        "NotApplicable"
    }
}

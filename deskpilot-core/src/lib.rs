//! `deskpilot_core` -- desktop automation engine.
//!
//! Screen and window capture, synthetic mouse/keyboard input, window
//! focus, and audited macro runs.  Every native call sits behind a trait
//! in [`platform`]; off Windows the null backend reports
//! `NOT_IMPLEMENTED` (501).  Consumed by the `deskpilot-cli` binaries.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`errors`] | `AutomationError` enum via `thiserror`, HTTP-style status codes |
//! | [`geometry`] | `RectPx` physical-pixel rectangle |
//! | [`display`] | Monitor listing, ordering, point/rect attribution |
//! | [`window`] | Window matching, focus target selection, `WindowCatalog` |
//! | [`process`] | Owning-process names via `sysinfo` |
//! | [`capture`] | Screen/window/region capture, PNG/JPEG encoding via `image` |
//! | [`input`] | Mouse and keyboard injection with humanization |
//! | [`runner`] | Macro engine |
//! | [`guard`] | `RunGuard` single-run gate |
//! | [`audit`] | Run step logs, screenshots, run listing |
//! | [`config`] | `AgentConfig` |
//! | [`platform`] | Native backends (`windows` crate) |
//! | [`agent`] | `Agent` facade over all of the above |

pub mod agent;
pub mod audit;
pub mod capture;
pub mod config;
pub mod display;
pub mod errors;
pub mod geometry;
pub mod guard;
pub mod input;
pub mod platform;
pub mod process;
pub mod runner;
pub mod window;

pub use agent::{Agent, CapturedImage, CursorInfo};
pub use config::AgentConfig;
pub use errors::AutomationError;
pub use platform::Backend;

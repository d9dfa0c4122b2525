//! Error types for `deskpilot_core`.
//!
//! Every fallible operation funnels into [`AutomationError`], which uses
//! `thiserror` for `Display` and `Error` derives.  Each variant maps onto an
//! HTTP-style status code via [`AutomationError::status_code`] so that
//! transport layers can forward failures without re-classifying them.

use thiserror::Error;

/// Win32 `ERROR_ACCESS_DENIED`.  `SendInput` reports this when the active
/// desktop is a secure desktop (UAC prompt, lock screen) or an elevated
/// window has focus.
pub const ERROR_ACCESS_DENIED: u32 = 5;

/// Top-level error type for the `deskpilot_core` library.
#[derive(Debug, Error)]
pub enum AutomationError {
    /// Malformed or missing request fields, unknown kinds, bad patterns.
    /// Always raised before any native call is issued.
    #[error("BAD_REQUEST: {0}")]
    Validation(String),

    /// A window, display, run, or file could not be resolved.
    #[error("NOT_FOUND: {0}")]
    NotFound(String),

    /// A native call failed with the given OS error code.
    #[error("INPUT_FAILED: {op} (os error {code})")]
    Native { op: String, code: u32 },

    /// A captured frame could not be encoded.
    #[error("ENCODE_FAILED: {0}")]
    Encode(String),

    /// Input was blocked by a secure desktop or elevation boundary.
    #[error("UAC_REQUIRED")]
    PermissionDenied { code: u32 },

    /// The real backend is not available on this platform.
    #[error("NOT_IMPLEMENTED")]
    NotImplemented,

    /// Another automation sequence currently holds the run guard.
    #[error("BUSY: another run is in progress")]
    Busy,

    #[error("IO_ERROR: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON_ERROR: {0}")]
    Json(#[from] serde_json::Error),
}

impl AutomationError {
    /// Classify a failed native injection call by its OS error code.
    pub fn from_os_code(op: impl Into<String>, code: u32) -> Self {
        if code == ERROR_ACCESS_DENIED {
            AutomationError::PermissionDenied { code }
        } else {
            AutomationError::Native {
                op: op.into(),
                code,
            }
        }
    }

    /// HTTP-style status code for this failure class.
    pub fn status_code(&self) -> u16 {
        match self {
            AutomationError::Validation(_) => 400,
            AutomationError::NotFound(_) => 404,
            AutomationError::Busy => 409,
            AutomationError::PermissionDenied { .. } => 412,
            AutomationError::NotImplemented => 501,
            AutomationError::Native { .. }
            | AutomationError::Encode(_)
            | AutomationError::Io(_)
            | AutomationError::Json(_) => 500,
        }
    }

    /// OS error code carried by native and permission failures.
    pub fn os_code(&self) -> Option<u32> {
        match self {
            AutomationError::Native { code, .. } | AutomationError::PermissionDenied { code } => {
                Some(*code)
            }
            _ => None,
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, AutomationError::PermissionDenied { .. })
    }
}

/// Convert a `windows::core::Error` (Win32 / HRESULT failure) into the
/// native or permission variant, recovering the Win32 code from
/// `HRESULT_FROM_WIN32` values.
#[cfg(windows)]
impl From<windows::core::Error> for AutomationError {
    fn from(err: windows::core::Error) -> Self {
        let hr = err.code().0 as u32;
        let code = if hr & 0xFFFF_0000 == 0x8007_0000 {
            hr & 0xFFFF
        } else {
            hr
        };
        AutomationError::from_os_code(err.message(), code)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_denied_is_permission_class() {
        let err = AutomationError::from_os_code("SendInput", ERROR_ACCESS_DENIED);
        assert!(err.is_permission_denied());
        assert_eq!(err.status_code(), 412);
        assert_eq!(err.to_string(), "UAC_REQUIRED");
    }

    #[test]
    fn test_other_codes_are_native_failures() {
        let err = AutomationError::from_os_code("SendInput", 87);
        assert!(!err.is_permission_denied());
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.os_code(), Some(87));
        assert!(err.to_string().contains("SendInput"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AutomationError::Validation("x".into()).status_code(), 400);
        assert_eq!(AutomationError::NotFound("x".into()).status_code(), 404);
        assert_eq!(AutomationError::Busy.status_code(), 409);
        assert_eq!(AutomationError::NotImplemented.status_code(), 501);
    }
}

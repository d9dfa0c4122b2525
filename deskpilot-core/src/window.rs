//! Top-level window catalog: enumeration, matching, and focus.
//!
//! Window lists are snapshots.  A handle returned by
//! [`WindowCatalog::list_windows`] may be stale by the time it is used, so
//! every consumer treats "no longer resolvable" as an ordinary failure.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::errors::AutomationError;
use crate::geometry::RectPx;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// Owned snapshot of a top-level window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowInfo {
    /// Opaque native handle.
    pub hwnd: u64,
    pub title: String,
    pub process_name: String,
    pub rect_px: RectPx,
    pub is_visible: bool,
    pub is_minimized: bool,
}

/// Window filter.  Every provided criterion must match; blank strings are
/// treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WindowMatch {
    /// Case-insensitive title substring.
    pub title_contains: Option<String>,
    /// Case-insensitive title regex.
    pub title_regex: Option<String>,
    /// Case-insensitive exact process name (without `.exe`).
    pub process_name: Option<String>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl WindowMatch {
    pub fn title_contains(text: impl Into<String>) -> Self {
        Self {
            title_contains: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn process(name: impl Into<String>) -> Self {
        Self {
            process_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// `true` when no criterion is set.
    pub fn is_empty(&self) -> bool {
        non_blank(&self.title_contains).is_none()
            && non_blank(&self.title_regex).is_none()
            && non_blank(&self.process_name).is_none()
    }

    /// Validate and compile the filter.  An invalid regex is rejected here,
    /// before any window is enumerated.
    pub fn compile(&self) -> Result<CompiledMatch, AutomationError> {
        let title_regex = match non_blank(&self.title_regex) {
            Some(pattern) => Some(
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| AutomationError::Validation(format!("BAD_REGEX: {e}")))?,
            ),
            None => None,
        };

        Ok(CompiledMatch {
            title_contains: non_blank(&self.title_contains).map(str::to_lowercase),
            title_regex,
            process_name: non_blank(&self.process_name).map(str::to_lowercase),
        })
    }
}

/// A validated [`WindowMatch`], ready to test windows against.
#[derive(Debug, Clone)]
pub struct CompiledMatch {
    title_contains: Option<String>,
    title_regex: Option<Regex>,
    process_name: Option<String>,
}

impl CompiledMatch {
    pub fn matches(&self, window: &WindowInfo) -> bool {
        if self.title_contains.is_some() && !self.title_matched(window) {
            return false;
        }
        if let Some(re) = &self.title_regex {
            if !re.is_match(&window.title) {
                return false;
            }
        }
        if self.process_name.is_some() && !self.process_matched(window) {
            return false;
        }
        true
    }

    /// `true` when a non-empty title substring criterion matched.
    pub fn title_matched(&self, window: &WindowInfo) -> bool {
        self.title_contains
            .as_deref()
            .is_some_and(|needle| window.title.to_lowercase().contains(needle))
    }

    /// `true` when a process-name criterion matched exactly.
    pub fn process_matched(&self, window: &WindowInfo) -> bool {
        self.process_name
            .as_deref()
            .is_some_and(|name| window.process_name.to_lowercase() == name)
    }
}

/// Pick the focus target: the first visible, non-minimized match in
/// enumeration order, else the first match of any visibility.
pub fn select_focus_target<'a>(
    windows: &'a [WindowInfo],
    matcher: &CompiledMatch,
) -> Option<&'a WindowInfo> {
    windows
        .iter()
        .filter(|w| matcher.matches(w))
        .find(|w| w.is_visible && !w.is_minimized)
        .or_else(|| windows.iter().find(|w| matcher.matches(w)))
}

// ---------------------------------------------------------------------------
// Catalog seam
// ---------------------------------------------------------------------------

/// Source of top-level windows and focus control.
pub trait WindowCatalog: Send + Sync {
    /// Full top-level enumeration.  Windows whose geometry cannot be
    /// queried are skipped.
    fn list_windows(&self) -> Result<Vec<WindowInfo>, AutomationError>;

    /// Handle of the current foreground window, if any.
    fn foreground_window(&self) -> Option<u64>;

    /// Live rectangle of a window; `None` when the handle no longer
    /// resolves.
    fn window_rect(&self, hwnd: u64) -> Option<RectPx>;

    /// Restore the window and try to bring it to the foreground.  Returns
    /// whether the window ended up in the foreground.  Best effort: the OS
    /// foreground lock may refuse activation without reporting an error.
    fn activate(&self, window: &WindowInfo) -> Result<bool, AutomationError>;

    /// Select a window matching `matcher` and focus it.
    ///
    /// Returns `Ok(None)` when nothing matches.  A window that was selected
    /// but could not be brought to the foreground is still returned.
    fn focus_window(&self, matcher: &WindowMatch) -> Result<Option<WindowInfo>, AutomationError> {
        if matcher.is_empty() {
            return Err(AutomationError::Validation(
                "BAD_MATCH: window match requires at least one criterion".into(),
            ));
        }
        let compiled = matcher.compile()?;
        let windows = self.list_windows()?;
        let Some(target) = select_focus_target(&windows, &compiled) else {
            return Ok(None);
        };

        if !self.activate(target)? {
            log::warn!(
                "focus_window: hwnd=0x{:X} ({:?}) did not reach the foreground",
                target.hwnd,
                target.title
            );
        }
        Ok(Some(target.clone()))
    }
}

/// Backend for platforms without window support.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullWindowCatalog;

impl WindowCatalog for NullWindowCatalog {
    fn list_windows(&self) -> Result<Vec<WindowInfo>, AutomationError> {
        Err(AutomationError::NotImplemented)
    }

    fn foreground_window(&self) -> Option<u64> {
        None
    }

    fn window_rect(&self, _hwnd: u64) -> Option<RectPx> {
        None
    }

    fn activate(&self, _window: &WindowInfo) -> Result<bool, AutomationError> {
        Err(AutomationError::NotImplemented)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn win(hwnd: u64, title: &str, process: &str, visible: bool, minimized: bool) -> WindowInfo {
        WindowInfo {
            hwnd,
            title: title.into(),
            process_name: process.into(),
            rect_px: RectPx::new(0, 0, 800, 600),
            is_visible: visible,
            is_minimized: minimized,
        }
    }

    struct FakeCatalog {
        windows: Vec<WindowInfo>,
        activated: Mutex<Vec<u64>>,
    }

    impl WindowCatalog for FakeCatalog {
        fn list_windows(&self) -> Result<Vec<WindowInfo>, AutomationError> {
            Ok(self.windows.clone())
        }
        fn foreground_window(&self) -> Option<u64> {
            None
        }
        fn window_rect(&self, hwnd: u64) -> Option<RectPx> {
            self.windows.iter().find(|w| w.hwnd == hwnd).map(|w| w.rect_px)
        }
        fn activate(&self, window: &WindowInfo) -> Result<bool, AutomationError> {
            self.activated.lock().push(window.hwnd);
            Ok(false)
        }
    }

    #[test]
    fn test_match_criteria_are_anded() {
        let m = WindowMatch {
            title_contains: Some("NOTE".into()),
            title_regex: None,
            process_name: Some("notepad".into()),
        }
        .compile()
        .unwrap();
        assert!(m.matches(&win(1, "Untitled - Notepad", "Notepad", true, false)));
        assert!(!m.matches(&win(2, "Untitled - Notepad", "wordpad", true, false)));
        assert!(!m.matches(&win(3, "Calculator", "notepad", true, false)));
    }

    #[test]
    fn test_regex_is_case_insensitive() {
        let m = WindowMatch {
            title_regex: Some(r"^untitled - \w+$".into()),
            ..WindowMatch::default()
        }
        .compile()
        .unwrap();
        assert!(m.matches(&win(1, "Untitled - Notepad", "notepad", true, false)));
        assert!(!m.matches(&win(2, "Document1 - Word", "winword", true, false)));
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let err = WindowMatch {
            title_regex: Some("(unclosed".into()),
            ..WindowMatch::default()
        }
        .compile()
        .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("BAD_REGEX"));
    }

    #[test]
    fn test_blank_criteria_are_ignored() {
        let m = WindowMatch {
            title_contains: Some("   ".into()),
            title_regex: Some(String::new()),
            process_name: None,
        };
        assert!(m.is_empty());
        assert!(m.compile().unwrap().matches(&win(1, "anything", "x", false, true)));
    }

    #[test]
    fn test_focus_target_prefers_visible_unminimized() {
        let windows = vec![
            win(1, "Editor - a.txt", "editor", true, true),
            win(2, "Editor - b.txt", "editor", false, false),
            win(3, "Editor - c.txt", "editor", true, false),
        ];
        let m = WindowMatch::process("editor").compile().unwrap();
        assert_eq!(select_focus_target(&windows, &m).map(|w| w.hwnd), Some(3));
    }

    #[test]
    fn test_focus_target_falls_back_to_first_match() {
        let windows = vec![
            win(1, "Other", "other", true, false),
            win(2, "Editor - a.txt", "editor", true, true),
            win(3, "Editor - b.txt", "editor", false, false),
        ];
        let m = WindowMatch::process("editor").compile().unwrap();
        assert_eq!(select_focus_target(&windows, &m).map(|w| w.hwnd), Some(2));
    }

    #[test]
    fn test_focus_window_returns_selection_even_if_activation_refused() {
        let catalog = FakeCatalog {
            windows: vec![win(7, "Terminal", "wt", true, false)],
            activated: Mutex::new(Vec::new()),
        };
        let focused = catalog
            .focus_window(&WindowMatch::title_contains("term"))
            .unwrap();
        assert_eq!(focused.map(|w| w.hwnd), Some(7));
        assert_eq!(*catalog.activated.lock(), vec![7]);
    }

    #[test]
    fn test_focus_window_no_match() {
        let catalog = FakeCatalog {
            windows: vec![win(7, "Terminal", "wt", true, false)],
            activated: Mutex::new(Vec::new()),
        };
        let focused = catalog
            .focus_window(&WindowMatch::title_contains("browser"))
            .unwrap();
        assert!(focused.is_none());
        assert!(catalog.activated.lock().is_empty());
    }

    #[test]
    fn test_focus_window_rejects_empty_match() {
        let catalog = FakeCatalog {
            windows: vec![],
            activated: Mutex::new(Vec::new()),
        };
        let err = catalog.focus_window(&WindowMatch::default()).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_window_match_deserialization() {
        let m: WindowMatch =
            serde_json::from_str(r#"{"titleContains":"Notepad","processName":"notepad"}"#).unwrap();
        assert_eq!(m.title_contains.as_deref(), Some("Notepad"));
        assert!(m.title_regex.is_none());
    }
}

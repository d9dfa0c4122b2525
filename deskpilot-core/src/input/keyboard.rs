//! Key presses by name.
//!
//! A press of `n` keys sends key-down events in order, then key-up events
//! in reverse order, so `["CTRL", "SHIFT", "ESC"]` releases `ESC` first.
//! Every name is resolved before the first event is sent.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{Humanize, InputBackend, KeyEvent};
use crate::errors::AutomationError;

// ---------------------------------------------------------------------------
// Key table
// ---------------------------------------------------------------------------

/// Resolve a key name (case-insensitive) to its virtual-key code and
/// whether it needs the extended-key flag.
pub fn lookup_key(name: &str) -> Option<(u16, bool)> {
    let upper = name.trim().to_ascii_uppercase();

    // Single letters and top-row digits map onto their ASCII codes.
    if upper.len() == 1 {
        let c = upper.as_bytes()[0];
        if c.is_ascii_uppercase() || c.is_ascii_digit() {
            return Some((c as u16, false));
        }
    }

    // F1-F24
    if let Some(n) = upper.strip_prefix('F').and_then(|n| n.parse::<u16>().ok()) {
        if (1..=24).contains(&n) {
            return Some((0x70 + n - 1, false));
        }
    }

    // NUMPAD0-NUMPAD9
    if let Some(n) = upper.strip_prefix("NUMPAD").and_then(|n| n.parse::<u16>().ok()) {
        if n <= 9 {
            return Some((0x60 + n, false));
        }
    }

    let entry = match upper.as_str() {
        // Modifiers
        "CTRL" | "CONTROL" => (0x11, false),
        "ALT" | "MENU" => (0x12, false),
        "SHIFT" => (0x10, false),
        "LCTRL" | "LCONTROL" => (0xA2, false),
        "RCTRL" | "RCONTROL" => (0xA3, true),
        "LSHIFT" => (0xA0, false),
        "RSHIFT" => (0xA1, false),
        "LALT" => (0xA4, false),
        "RALT" | "ALTGR" => (0xA5, true),
        "WIN" | "LWIN" | "META" => (0x5B, true),
        "RWIN" => (0x5C, true),
        "APPS" | "CONTEXTMENU" => (0x5D, true),

        // Editing and control
        "ENTER" | "RETURN" => (0x0D, false),
        "ESC" | "ESCAPE" => (0x1B, false),
        "TAB" => (0x09, false),
        "BACKSPACE" | "BACK" => (0x08, false),
        "SPACE" => (0x20, false),
        "PRINTSCREEN" | "PRTSC" => (0x2C, true),
        "PAUSE" => (0x13, false),
        "CAPSLOCK" => (0x14, false),
        "NUMLOCK" => (0x90, true),
        "SCROLLLOCK" => (0x91, false),

        // Navigation cluster (extended)
        "DELETE" | "DEL" => (0x2E, true),
        "INSERT" | "INS" => (0x2D, true),
        "HOME" => (0x24, true),
        "END" => (0x23, true),
        "PAGEUP" | "PGUP" => (0x21, true),
        "PAGEDOWN" | "PGDN" => (0x22, true),
        "UP" => (0x26, true),
        "DOWN" => (0x28, true),
        "LEFT" => (0x25, true),
        "RIGHT" => (0x27, true),

        // Numeric pad operators
        "MULTIPLY" => (0x6A, false),
        "ADD" => (0x6B, false),
        "SUBTRACT" => (0x6D, false),
        "DECIMAL" => (0x6E, false),
        "DIVIDE" => (0x6F, true),
        "NUMPADENTER" => (0x0D, true),

        // Punctuation (US layout OEM keys)
        "MINUS" => (0xBD, false),
        "PLUS" | "EQUALS" => (0xBB, false),
        "LBRACKET" => (0xDB, false),
        "RBRACKET" => (0xDD, false),
        "BACKSLASH" => (0xDC, false),
        "SEMICOLON" => (0xBA, false),
        "QUOTE" => (0xDE, false),
        "COMMA" => (0xBC, false),
        "PERIOD" => (0xBE, false),
        "SLASH" => (0xBF, false),
        "TILDE" | "GRAVE" => (0xC0, false),

        _ => return None,
    };
    Some(entry)
}

// ---------------------------------------------------------------------------
// Request / result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyCommand {
    #[default]
    Press,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInputRequest {
    #[serde(default)]
    pub kind: KeyCommand,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub humanize: Option<Humanize>,
}

impl KeyInputRequest {
    pub fn press<S: Into<String>>(keys: impl IntoIterator<Item = S>) -> Self {
        Self {
            kind: KeyCommand::Press,
            keys: keys.into_iter().map(Into::into).collect(),
            humanize: None,
        }
    }
}

/// One native key event as it was attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInputAttempt {
    pub key: String,
    /// `"down"` or `"up"`.
    pub action: &'static str,
    pub vk: u16,
    pub flags: u32,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_error: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInputDiagnostics {
    pub keys_attempted: Vec<String>,
    pub attempts: Vec<KeyInputAttempt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInputResult {
    pub ok: bool,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<KeyInputDiagnostics>,
}

impl KeyInputResult {
    pub(crate) fn rejected(err: AutomationError) -> Self {
        Self {
            ok: false,
            status_code: err.status_code(),
            error: Some(err.to_string()),
            last_error: None,
            diagnostics: None,
        }
    }
}

struct ResolvedKey {
    name: String,
    vk: u16,
    extended: bool,
}

fn resolve_keys(request: &KeyInputRequest) -> Result<Vec<ResolvedKey>, AutomationError> {
    if request.keys.is_empty() {
        return Err(AutomationError::Validation(
            "keys array is required and must not be empty".into(),
        ));
    }

    request
        .keys
        .iter()
        .map(|key| {
            if key.trim().is_empty() {
                return Err(AutomationError::Validation("key name cannot be empty".into()));
            }
            let (vk, extended) = lookup_key(key)
                .ok_or_else(|| AutomationError::Validation(format!("unknown key '{key}'")))?;
            Ok(ResolvedKey {
                name: key.trim().to_ascii_uppercase(),
                vk,
                extended,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Injector
// ---------------------------------------------------------------------------

/// Executes [`KeyInputRequest`]s against an [`InputBackend`].
#[derive(Clone)]
pub struct KeyInjector {
    backend: Arc<dyn InputBackend>,
}

impl KeyInjector {
    pub fn new(backend: Arc<dyn InputBackend>) -> Self {
        Self { backend }
    }

    pub fn execute(&self, request: &KeyInputRequest) -> KeyInputResult {
        let keys = match resolve_keys(request) {
            Ok(keys) => keys,
            Err(e) => return KeyInputResult::rejected(e),
        };
        let humanize = request.humanize.unwrap_or_default();

        let mut attempts = Vec::with_capacity(keys.len() * 2);
        let outcome = self.press(&keys, &humanize, &mut attempts);

        let diagnostics = Some(KeyInputDiagnostics {
            keys_attempted: request.keys.clone(),
            attempts,
        });

        match outcome {
            Ok(()) => KeyInputResult {
                ok: true,
                status_code: 200,
                error: None,
                last_error: None,
                diagnostics,
            },
            Err(e) => {
                log::debug!("key press {:?} failed: {e}", request.keys);
                KeyInputResult {
                    ok: false,
                    status_code: e.status_code(),
                    error: Some(e.to_string()),
                    last_error: e.os_code(),
                    diagnostics,
                }
            }
        }
    }

    fn press(
        &self,
        keys: &[ResolvedKey],
        humanize: &Humanize,
        attempts: &mut Vec<KeyInputAttempt>,
    ) -> Result<(), AutomationError> {
        for (i, key) in keys.iter().enumerate() {
            humanize.pause();
            if let Err(e) = self.send(key, false, attempts) {
                // Release what is already down so no modifier stays stuck.
                for pressed in keys[..i].iter().rev() {
                    let _ = self.send(pressed, true, attempts);
                }
                return Err(e);
            }
        }

        for key in keys.iter().rev() {
            humanize.pause();
            self.send(key, true, attempts)?;
        }
        Ok(())
    }

    fn send(&self, key: &ResolvedKey, key_up: bool, attempts: &mut Vec<KeyInputAttempt>) -> Result<(), AutomationError> {
        let event = KeyEvent {
            vk: key.vk,
            extended: key.extended,
            key_up,
        };
        let action = if key_up { "up" } else { "down" };
        let result = self.backend.send_key(event);

        attempts.push(KeyInputAttempt {
            key: key.name.clone(),
            action,
            vk: key.vk,
            flags: event.flags(),
            ok: result.is_ok(),
            os_error: result.as_ref().err().and_then(AutomationError::os_code),
        });

        result.map_err(|e| match e {
            AutomationError::Native { code, .. } => AutomationError::Native {
                op: format!("key{action} {} (vk=0x{:02X})", key.name, key.vk),
                code,
            },
            other => other,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Keyboard and mouse injection via `SendInput`.

use windows::Win32::Foundation::POINT;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT, KEYBD_EVENT_FLAGS, MOUSEEVENTF_ABSOLUTE,
    MOUSEEVENTF_HWHEEL, MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP,
    MOUSEEVENTF_MOVE, MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP, MOUSEEVENTF_VIRTUALDESK, MOUSEEVENTF_WHEEL,
    MOUSEINPUT, MOUSE_EVENT_FLAGS, VIRTUAL_KEY,
};
use windows::Win32::UI::WindowsAndMessaging::{GetCursorPos, SetCursorPos};

use super::last_error_code;
use crate::errors::AutomationError;
use crate::input::{InputBackend, KeyEvent, MouseButton, MouseEvent};

const INPUT_SIZE: i32 = std::mem::size_of::<INPUT>() as i32;

const ABSOLUTE_MOVE: MOUSE_EVENT_FLAGS =
    MOUSE_EVENT_FLAGS(MOUSEEVENTF_MOVE.0 | MOUSEEVENTF_ABSOLUTE.0 | MOUSEEVENTF_VIRTUALDESK.0);

fn mouse_input(dx: i32, dy: i32, data: i32, flags: MOUSE_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT {
                dx,
                dy,
                // Signed for WHEEL/HWHEEL; `as u32` keeps the bit pattern.
                mouseData: data as u32,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn key_input(event: KeyEvent) -> INPUT {
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY(event.vk),
                wScan: 0,
                dwFlags: KEYBD_EVENT_FLAGS(event.flags()),
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn button_flags(button: MouseButton, down: bool) -> MOUSE_EVENT_FLAGS {
    match (button, down) {
        (MouseButton::Left, true) => MOUSEEVENTF_LEFTDOWN,
        (MouseButton::Left, false) => MOUSEEVENTF_LEFTUP,
        (MouseButton::Right, true) => MOUSEEVENTF_RIGHTDOWN,
        (MouseButton::Right, false) => MOUSEEVENTF_RIGHTUP,
        (MouseButton::Middle, true) => MOUSEEVENTF_MIDDLEDOWN,
        (MouseButton::Middle, false) => MOUSEEVENTF_MIDDLEUP,
    }
}

/// Inject one event.  `SendInput` reports 0 when the event was blocked,
/// typically by UIPI against an elevated foreground window.
fn send_one(input: INPUT, op: &'static str) -> Result<(), AutomationError> {
    let sent = unsafe { SendInput(&[input], INPUT_SIZE) };
    if sent == 0 {
        return Err(AutomationError::from_os_code(op, last_error_code()));
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SendInputBackend;

impl InputBackend for SendInputBackend {
    fn set_cursor_pos(&self, x: i32, y: i32) -> Result<(), AutomationError> {
        unsafe { SetCursorPos(x, y) }?;
        Ok(())
    }

    fn cursor_pos(&self) -> Option<(i32, i32)> {
        let mut point = POINT::default();
        unsafe { GetCursorPos(&mut point) }.ok()?;
        Some((point.x, point.y))
    }

    fn send_mouse(&self, event: MouseEvent) -> Result<(), AutomationError> {
        let input = match event {
            MouseEvent::MoveAbsolute { x, y } => mouse_input(x, y, 0, ABSOLUTE_MOVE),
            MouseEvent::ButtonDown(button) => mouse_input(0, 0, 0, button_flags(button, true)),
            MouseEvent::ButtonUp(button) => mouse_input(0, 0, 0, button_flags(button, false)),
            MouseEvent::Wheel { delta, horizontal } => {
                let flags = if horizontal { MOUSEEVENTF_HWHEEL } else { MOUSEEVENTF_WHEEL };
                mouse_input(0, 0, delta, flags)
            }
        };
        send_one(input, "SendInput(mouse)")
    }

    fn send_key(&self, event: KeyEvent) -> Result<(), AutomationError> {
        send_one(key_input(event), "SendInput(keyboard)")
    }
}

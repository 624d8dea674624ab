//! Host-side input state.
//!
//! Frontends translate their native events into [`InputEvent`]s. The bridge applies them to an
//! [`InputSnapshot`] as they arrive and pushes the snapshot into guest memory once per tick, so
//! the guest sees the state at push time rather than at event time.

use crate::abi::{KEY_CODE_OFFSET, KEY_COUNT};

mod script;

pub use script::{InputScript, ScriptError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputEvent {
    KeyDown(u32),
    KeyUp(u32),
    MouseDown,
    MouseUp,
    MouseMove { x: i32, y: i32 },
}

/// Map a key code onto its slot in the key table.
pub fn key_slot(code: u32) -> Option<usize> {
    let slot = code.checked_sub(KEY_CODE_OFFSET)? as usize;
    (slot < KEY_COUNT).then_some(slot)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputSnapshot {
    pub keys: [bool; KEY_COUNT],
    /// `None` until the first move event.
    pub mouse: Option<(i32, i32)>,
    pub mouse_down: bool,
}

impl Default for InputSnapshot {
    fn default() -> Self {
        Self {
            keys: [false; KEY_COUNT],
            mouse: None,
            mouse_down: false,
        }
    }
}

impl InputSnapshot {
    pub fn apply(&mut self, event: InputEvent) {
        match event {
            InputEvent::KeyDown(code) | InputEvent::KeyUp(code) => {
                let Some(slot) = key_slot(code) else {
                    tracing::trace!(code, "dropping out-of-range key code");
                    return;
                };
                self.keys[slot] = matches!(event, InputEvent::KeyDown(_));
            }
            InputEvent::MouseDown => self.mouse_down = true,
            InputEvent::MouseUp => self.mouse_down = false,
            InputEvent::MouseMove { x, y } => self.mouse = Some((x, y)),
        }
    }

    pub fn is_key_down(&self, code: u32) -> bool {
        key_slot(code).is_some_and(|slot| self.keys[slot])
    }

    /// The key table as pushed to the guest: one byte per slot, 0 or 1.
    pub fn key_table(&self) -> [u8; KEY_COUNT] {
        self.keys.map(u8::from)
    }
}

/// Joypad buttons the libretro frontend forwards, and the key codes they press.
pub const JOYPAD_KEYMAP: [(JoypadKey, u32); 10] = [
    (JoypadKey::Up, b'W' as u32),
    (JoypadKey::Down, b'S' as u32),
    (JoypadKey::Left, b'A' as u32),
    (JoypadKey::Right, b'D' as u32),
    (JoypadKey::A, b'K' as u32),
    (JoypadKey::B, b'J' as u32),
    (JoypadKey::X, b'I' as u32),
    (JoypadKey::Y, b'U' as u32),
    (JoypadKey::Start, b' ' as u32),
    (JoypadKey::Select, b'Q' as u32),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoypadKey {
    Up,
    Down,
    Left,
    Right,
    A,
    B,
    X,
    Y,
    Start,
    Select,
}

/// Turns per-frame joypad polls into key events on state change.
#[derive(Default, Debug)]
pub struct JoypadKeys {
    held: [bool; JOYPAD_KEYMAP.len()],
}

impl JoypadKeys {
    /// `pressed` reports the current state of each mapped button.
    pub fn poll(&mut self, mut pressed: impl FnMut(JoypadKey) -> bool) -> Vec<InputEvent> {
        let mut events = Vec::new();
        for (held, (button, code)) in self.held.iter_mut().zip(JOYPAD_KEYMAP) {
            let now = pressed(button);
            if now != *held {
                *held = now;
                events.push(if now {
                    InputEvent::KeyDown(code)
                } else {
                    InputEvent::KeyUp(code)
                });
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_codes_map_with_offset() {
        assert_eq!(key_slot(32), Some(0));
        assert_eq!(key_slot(b'A' as u32), Some(33));
        assert_eq!(key_slot(287), Some(255));
        assert_eq!(key_slot(31), None);
        assert_eq!(key_slot(288), None);
    }

    #[test]
    fn press_then_release_leaves_key_up() {
        let mut input = InputSnapshot::default();
        input.apply(InputEvent::KeyDown(65));
        input.apply(InputEvent::KeyUp(65));
        assert!(!input.is_key_down(65));
        assert!(input.key_table().iter().all(|&k| k == 0));
    }

    #[test]
    fn out_of_range_codes_are_dropped() {
        let mut input = InputSnapshot::default();
        input.apply(InputEvent::KeyDown(13));
        input.apply(InputEvent::KeyDown(1000));
        assert_eq!(input, InputSnapshot::default());
    }

    #[test]
    fn mouse_position_is_unknown_until_moved() {
        let mut input = InputSnapshot::default();
        input.apply(InputEvent::MouseDown);
        assert_eq!(input.mouse, None);
        assert!(input.mouse_down);

        input.apply(InputEvent::MouseMove { x: 3, y: -4 });
        input.apply(InputEvent::MouseUp);
        assert_eq!(input.mouse, Some((3, -4)));
        assert!(!input.mouse_down);
    }

    #[test]
    fn joypad_emits_events_only_on_change() {
        let mut joypad = JoypadKeys::default();
        let up_held = |b: JoypadKey| b == JoypadKey::Up;

        assert_eq!(joypad.poll(up_held), vec![InputEvent::KeyDown(b'W' as u32)]);
        assert!(joypad.poll(up_held).is_empty());
        assert_eq!(joypad.poll(|_| false), vec![InputEvent::KeyUp(b'W' as u32)]);
    }
}

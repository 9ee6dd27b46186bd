//! Host input translation: joystick bitmask updates and logical key events.

use bitflags::bitflags;

bitflags! {
    /// Joystick direction lines, active when set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct JoystickMask: u8 {
        const UP = 0x01;
        const DOWN = 0x02;
        const LEFT = 0x04;
        const RIGHT = 0x08;
    }
}

/// One emulated joystick port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Joystick {
    pub direction: JoystickMask,
    pub firing: bool,
}

/// A host key event identified by a logical key name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEvent {
    Pressed(String),
    Released(String),
}

impl KeyEvent {
    pub fn pressed(name: &str) -> Self {
        KeyEvent::Pressed(name.to_string())
    }

    pub fn released(name: &str) -> Self {
        KeyEvent::Released(name.to_string())
    }
}

impl Joystick {
    /// Apply a host key event mapped onto this joystick.
    ///
    /// Returns `true` when the event was consumed as joystick input; other
    /// keys pass through to the logical keyboard unchanged.
    pub fn apply_key(&mut self, event: &KeyEvent) -> bool {
        let (name, pressed) = match event {
            KeyEvent::Pressed(name) => (name.as_str(), true),
            KeyEvent::Released(name) => (name.as_str(), false),
        };
        let mask = match name {
            "Up" => JoystickMask::UP,
            "Down" => JoystickMask::DOWN,
            "Left" => JoystickMask::LEFT,
            "Right" => JoystickMask::RIGHT,
            "Fire" => {
                self.firing = pressed;
                return true;
            }
            _ => return false,
        };
        self.direction.set(mask, pressed);
        true
    }
}

//! Static keyboard layout: physical key codes to logical controls.

use super::state::Button;
use evdev::Key;

/// Directional pseudo-button of a stick driven from the keyboard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StickSide {
    Left,
    Right,
}

/// Logical control a key drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Control {
    Stick(StickSide, Direction),
    Button(Button),
}

const fn stick(side: StickSide, direction: Direction) -> Control {
    Control::Stick(side, direction)
}

const fn button(button: Button) -> Control {
    Control::Button(button)
}

pub const KEY_MAP: &[(Key, Control)] = &[
    // Left stick
    (Key::KEY_W, stick(StickSide::Left, Direction::Up)),
    (Key::KEY_A, stick(StickSide::Left, Direction::Left)),
    (Key::KEY_D, stick(StickSide::Left, Direction::Right)),
    (Key::KEY_S, stick(StickSide::Left, Direction::Down)),
    (Key::KEY_T, button(Button::LeftStickPress)),
    // Right stick
    (Key::KEY_UP, stick(StickSide::Right, Direction::Up)),
    (Key::KEY_LEFT, stick(StickSide::Right, Direction::Left)),
    (Key::KEY_RIGHT, stick(StickSide::Right, Direction::Right)),
    (Key::KEY_DOWN, stick(StickSide::Right, Direction::Down)),
    (Key::KEY_Y, button(Button::RightStickPress)),
    // Dpad
    (Key::KEY_G, button(Button::DpadUp)),
    (Key::KEY_V, button(Button::DpadLeft)),
    (Key::KEY_N, button(Button::DpadRight)),
    (Key::KEY_B, button(Button::DpadDown)),
    // Home & Capture
    (Key::KEY_LEFTBRACE, button(Button::Home)),
    (Key::KEY_RIGHTBRACE, button(Button::Capture)),
    // Plus & Minus
    (Key::KEY_6, button(Button::Plus)),
    (Key::KEY_7, button(Button::Minus)),
    // Face buttons
    (Key::KEY_L, button(Button::A)),
    (Key::KEY_K, button(Button::B)),
    (Key::KEY_I, button(Button::X)),
    (Key::KEY_J, button(Button::Y)),
    // Shoulders
    (Key::KEY_1, button(Button::L)),
    (Key::KEY_2, button(Button::Zl)),
    (Key::KEY_8, button(Button::Zr)),
    (Key::KEY_9, button(Button::R)),
];

/// Looks up the control bound to `key`; unmapped keys yield `None`.
pub fn lookup(key: Key) -> Option<Control> {
    KEY_MAP
        .iter()
        .find(|(mapped, _)| *mapped == key)
        .map(|(_, control)| *control)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_are_unique() {
        let keys: HashSet<u16> = KEY_MAP.iter().map(|(key, _)| key.code()).collect();
        assert_eq!(keys.len(), KEY_MAP.len());
    }

    #[test]
    fn controls_are_unique() {
        let controls: HashSet<Control> = KEY_MAP.iter().map(|(_, control)| *control).collect();
        assert_eq!(controls.len(), KEY_MAP.len());
    }

    #[test]
    fn lookup_resolves_face_and_stick_keys() {
        assert_eq!(lookup(Key::KEY_L), Some(Control::Button(Button::A)));
        assert_eq!(
            lookup(Key::KEY_A),
            Some(Control::Stick(StickSide::Left, Direction::Left))
        );
        assert_eq!(
            lookup(Key::KEY_DOWN),
            Some(Control::Stick(StickSide::Right, Direction::Down))
        );
    }

    #[test]
    fn unmapped_keys_are_ignored() {
        assert_eq!(lookup(Key::KEY_ESC), None);
        assert_eq!(lookup(Key::KEY_F12), None);
    }
}

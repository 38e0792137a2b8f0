//! Input source adapters writing into the canonical state.
//!
//! Exactly one variant is active. The keyboard variant is edge driven and
//! derives stick values on capture; the gamepad variant polls its bound pad.

use super::gamepad::{GamepadBackend, GamepadError, PadId, PadSnapshot};
use super::keyboard::{KeyAction, KeyEvent};
use super::keymap::{self, Control, Direction, StickSide};
use super::state::{scale_axis, Button, ControllerState, StickState, STICK_MAX};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputSource {
    Keyboard,
    Gamepad(PadId),
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::Keyboard => write!(f, "keyboard"),
            InputSource::Gamepad(pad) => write!(f, "gamepad {}", pad),
        }
    }
}

/// Held-state of every mapped keyboard control.
#[derive(Clone, Debug, Default)]
pub struct KeyboardInput {
    held: HashSet<Control>,
}

impl KeyboardInput {
    /// Applies one key edge. Returns whether a held flag changed.
    ///
    /// Repeats never toggle, and pressing an already held key is a no-op.
    pub fn handle(&mut self, event: KeyEvent) -> bool {
        let Some(control) = keymap::lookup(event.key) else {
            return false;
        };
        match event.action {
            KeyAction::Press => self.held.insert(control),
            KeyAction::Release => self.held.remove(&control),
            KeyAction::Repeat => false,
        }
    }

    fn is_held(&self, control: Control) -> bool {
        self.held.contains(&control)
    }

    fn derive_stick(&self, side: StickSide, stick: &mut StickState) {
        let max = STICK_MAX as i32;
        let mut x = 0;
        let mut y = 0;
        if self.is_held(Control::Stick(side, Direction::Left)) {
            x -= max;
        }
        if self.is_held(Control::Stick(side, Direction::Right)) {
            x += max;
        }
        if self.is_held(Control::Stick(side, Direction::Up)) {
            y += max;
        }
        if self.is_held(Control::Stick(side, Direction::Down)) {
            y -= max;
        }
        stick.set_axes(x, y);
    }

    pub fn capture(&self, state: &mut ControllerState) {
        self.derive_stick(StickSide::Left, &mut state.left);
        self.derive_stick(StickSide::Right, &mut state.right);
        for button in Button::ALL {
            state.set_button(button, self.is_held(Control::Button(button)));
        }
    }
}

/// Standard-layout button index for each control, if the layout has one.
fn pad_index(button: Button) -> Option<usize> {
    match button {
        Button::B => Some(0),
        Button::A => Some(1),
        Button::Y => Some(2),
        Button::X => Some(3),
        Button::L => Some(4),
        Button::R => Some(5),
        Button::Zl => Some(6),
        Button::Zr => Some(7),
        Button::Plus => Some(8),
        Button::Minus => Some(9),
        Button::LeftStickPress => Some(10),
        Button::RightStickPress => Some(11),
        Button::DpadUp => Some(12),
        Button::DpadDown => Some(13),
        Button::DpadLeft => Some(14),
        Button::DpadRight => Some(15),
        Button::Home => Some(16),
        Button::Capture => Some(17),
        Button::JoyconLeftSr
        | Button::JoyconLeftSl
        | Button::JoyconRightSr
        | Button::JoyconRightSl => None,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GamepadInput {
    pad: PadId,
}

impl GamepadInput {
    pub fn new(pad: PadId) -> Self {
        Self { pad }
    }

    pub fn pad(&self) -> PadId {
        self.pad
    }

    pub fn capture(&self, snapshot: &PadSnapshot, state: &mut ControllerState) {
        // hardware reports up as negative, the canonical state up as positive
        state.left.x = scale_axis(snapshot.axis(0));
        state.left.y = scale_axis(-snapshot.axis(1));
        state.right.x = scale_axis(snapshot.axis(2));
        state.right.y = scale_axis(-snapshot.axis(3));

        for button in Button::ALL {
            let pressed = pad_index(button).is_some_and(|index| snapshot.pressed(index));
            state.set_button(button, pressed);
        }
    }
}

/// The active input source together with its capture state.
#[derive(Clone, Debug)]
pub enum InputAdapter {
    Keyboard(KeyboardInput),
    Gamepad(GamepadInput),
}

impl Default for InputAdapter {
    fn default() -> Self {
        InputAdapter::Keyboard(KeyboardInput::default())
    }
}

impl InputAdapter {
    pub fn source(&self) -> InputSource {
        match self {
            InputAdapter::Keyboard(_) => InputSource::Keyboard,
            InputAdapter::Gamepad(gamepad) => InputSource::Gamepad(gamepad.pad()),
        }
    }

    /// Replaces the active variant. The old variant's key state or pad
    /// binding is dropped before the new one takes over.
    pub fn switch_to(&mut self, source: InputSource) -> bool {
        if self.source() == source {
            debug!("Input source already {}", source);
            return false;
        }
        let previous = self.source();
        *self = match source {
            InputSource::Keyboard => InputAdapter::Keyboard(KeyboardInput::default()),
            InputSource::Gamepad(pad) => InputAdapter::Gamepad(GamepadInput::new(pad)),
        };
        info!("Input source switched: {} -> {}", previous, source);
        true
    }

    /// Key edges only reach the keyboard variant.
    pub fn handle_key(&mut self, event: KeyEvent) -> bool {
        match self {
            InputAdapter::Keyboard(keyboard) => keyboard.handle(event),
            InputAdapter::Gamepad(_) => false,
        }
    }

    /// Falls back to the keyboard if `pad` is the bound gamepad.
    pub fn release_pad(&mut self, pad: PadId) -> bool {
        match self {
            InputAdapter::Gamepad(gamepad) if gamepad.pad() == pad => {
                self.switch_to(InputSource::Keyboard)
            }
            _ => false,
        }
    }

    pub fn capture(
        &self,
        pads: &dyn GamepadBackend,
        state: &mut ControllerState,
    ) -> Result<(), GamepadError> {
        match self {
            InputAdapter::Keyboard(keyboard) => keyboard.capture(state),
            InputAdapter::Gamepad(gamepad) => {
                let snapshot = pads.snapshot(gamepad.pad())?;
                gamepad.capture(&snapshot, state);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::gamepad::fake::FakePads;
    use super::*;
    use evdev::Key;

    fn captured(keyboard: &KeyboardInput) -> ControllerState {
        let mut state = ControllerState::default();
        keyboard.capture(&mut state);
        state
    }

    #[test]
    fn opposite_directions_cancel() {
        let mut keyboard = KeyboardInput::default();
        keyboard.handle(KeyEvent::press(Key::KEY_A));
        keyboard.handle(KeyEvent::press(Key::KEY_D));
        assert_eq!(captured(&keyboard).left.x, 0);

        keyboard.handle(KeyEvent::release(Key::KEY_A));
        assert_eq!(captured(&keyboard).left.x, 100);

        keyboard.handle(KeyEvent::press(Key::KEY_A));
        keyboard.handle(KeyEvent::release(Key::KEY_D));
        assert_eq!(captured(&keyboard).left.x, -100);
    }

    #[test]
    fn up_is_positive_on_both_sticks() {
        let mut keyboard = KeyboardInput::default();
        keyboard.handle(KeyEvent::press(Key::KEY_W));
        keyboard.handle(KeyEvent::press(Key::KEY_DOWN));
        let state = captured(&keyboard);
        assert_eq!(state.left.y, 100);
        assert_eq!(state.right.y, -100);
        assert_eq!(state.left.x, 0);
    }

    #[test]
    fn repeats_and_double_presses_do_not_count() {
        let mut keyboard = KeyboardInput::default();
        assert!(keyboard.handle(KeyEvent::press(Key::KEY_L)));
        assert!(!keyboard.handle(KeyEvent {
            key: Key::KEY_L,
            action: KeyAction::Repeat,
        }));
        assert!(!keyboard.handle(KeyEvent::press(Key::KEY_L)));
        assert!(captured(&keyboard).a);

        // a single release clears it
        assert!(keyboard.handle(KeyEvent::release(Key::KEY_L)));
        assert!(!captured(&keyboard).a);
    }

    #[test]
    fn unmapped_keys_leave_state_untouched() {
        let mut keyboard = KeyboardInput::default();
        assert!(!keyboard.handle(KeyEvent::press(Key::KEY_ESC)));
        assert_eq!(captured(&keyboard), ControllerState::default());
    }

    #[test]
    fn stick_press_keys_set_stick_click() {
        let mut keyboard = KeyboardInput::default();
        keyboard.handle(KeyEvent::press(Key::KEY_T));
        let state = captured(&keyboard);
        assert!(state.left.pressed);
        assert!(!state.right.pressed);
    }

    #[test]
    fn gamepad_axes_scale_and_invert_y() {
        let snapshot = PadSnapshot {
            axes: vec![1.0, -1.0, -0.5, 0.25],
            buttons: vec![false; 17],
        };
        let mut state = ControllerState::default();
        GamepadInput::new(PadId(0)).capture(&snapshot, &mut state);
        assert_eq!((state.left.x, state.left.y), (100, 100));
        assert_eq!((state.right.x, state.right.y), (-50, -25));
    }

    #[test]
    fn gamepad_axes_stay_within_bounds() {
        for step in -10..=10 {
            let raw = step as f32 / 10.0;
            let snapshot = PadSnapshot {
                axes: vec![raw, raw, raw, raw],
                buttons: Vec::new(),
            };
            let mut state = ControllerState::default();
            GamepadInput::new(PadId(0)).capture(&snapshot, &mut state);
            assert!((-100..=100).contains(&state.left.x));
            assert!((-100..=100).contains(&state.left.y));
            if raw != 0.0 {
                assert_eq!(state.left.y.signum(), -(raw.signum() as i8));
            }
        }
    }

    #[test]
    fn gamepad_buttons_follow_standard_indices() {
        let mut buttons = vec![false; 17];
        buttons[1] = true; // A
        buttons[6] = true; // ZL
        buttons[16] = true; // Home
        let snapshot = PadSnapshot {
            axes: vec![0.0; 4],
            buttons,
        };
        let mut state = ControllerState::default();
        state.joycon_left_sr = true;
        GamepadInput::new(PadId(0)).capture(&snapshot, &mut state);
        assert_eq!(state.held(), vec![Button::Zl, Button::Home, Button::A]);
    }

    #[test]
    fn short_button_arrays_degrade_to_released() {
        let snapshot = PadSnapshot {
            axes: vec![0.0; 4],
            buttons: vec![true; 16],
        };
        let mut state = ControllerState::default();
        GamepadInput::new(PadId(0)).capture(&snapshot, &mut state);
        assert!(state.dpad_right);
        assert!(!state.home);
        assert!(!state.capture);
    }

    #[test]
    fn switching_to_gamepad_disables_key_hooks() {
        let mut adapter = InputAdapter::default();
        adapter.handle_key(KeyEvent::press(Key::KEY_L));
        assert!(adapter.switch_to(InputSource::Gamepad(PadId(1))));
        assert!(!adapter.handle_key(KeyEvent::press(Key::KEY_K)));

        // held keyboard state does not survive the round trip
        adapter.switch_to(InputSource::Keyboard);
        let pads = FakePads::default();
        let mut state = ControllerState::default();
        adapter.capture(&pads, &mut state).unwrap();
        assert!(!state.a);
        assert!(!state.b);
    }

    #[test]
    fn disconnect_of_bound_pad_falls_back_to_keyboard() {
        let mut adapter = InputAdapter::default();
        adapter.switch_to(InputSource::Gamepad(PadId(4)));
        assert!(!adapter.release_pad(PadId(5)));
        assert_eq!(adapter.source(), InputSource::Gamepad(PadId(4)));
        assert!(adapter.release_pad(PadId(4)));
        assert_eq!(adapter.source(), InputSource::Keyboard);
    }

    #[test]
    fn capture_from_missing_pad_is_an_error() {
        let mut adapter = InputAdapter::default();
        adapter.switch_to(InputSource::Gamepad(PadId(9)));
        let pads = FakePads::default();
        let mut state = ControllerState::default();
        assert!(matches!(
            adapter.capture(&pads, &mut state),
            Err(GamepadError::NotConnected(PadId(9)))
        ));
    }
}

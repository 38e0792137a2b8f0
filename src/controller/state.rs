//! Canonical controller state and its last-transmitted snapshot.
//!
//! Field names on the wire follow the remote service's packet keys, so the
//! struct serializes straight into an `input` payload.

use serde::{Deserialize, Serialize};

/// Analog stick magnitude bound; values live in `-STICK_MAX..=STICK_MAX`.
pub const STICK_MAX: i8 = 100;

/// One analog stick: click plus signed X/Y magnitudes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StickState {
    #[serde(rename = "PRESSED")]
    pub pressed: bool,
    #[serde(rename = "X_VALUE")]
    pub x: i8,
    #[serde(rename = "Y_VALUE")]
    pub y: i8,
}

impl StickState {
    /// Sets both axes, clamping into the canonical range.
    pub fn set_axes(&mut self, x: i32, y: i32) {
        self.x = clamp_axis(x);
        self.y = clamp_axis(y);
    }
}

fn clamp_axis(value: i32) -> i8 {
    value.clamp(-(STICK_MAX as i32), STICK_MAX as i32) as i8
}

/// Scales a native `[-1, 1]` axis reading into the canonical range.
///
/// Out-of-range readings saturate at the bounds; NaN collapses to center.
pub fn scale_axis(raw: f32) -> i8 {
    let scaled = (raw.clamp(-1.0, 1.0) * STICK_MAX as f32).round();
    scaled as i8
}

/// Every named boolean control of the emulated controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Button {
    DpadUp,
    DpadLeft,
    DpadRight,
    DpadDown,
    L,
    Zl,
    R,
    Zr,
    JoyconLeftSr,
    JoyconLeftSl,
    JoyconRightSr,
    JoyconRightSl,
    Plus,
    Minus,
    Home,
    Capture,
    Y,
    X,
    B,
    A,
    LeftStickPress,
    RightStickPress,
}

impl Button {
    pub const ALL: [Button; 22] = [
        Button::DpadUp,
        Button::DpadLeft,
        Button::DpadRight,
        Button::DpadDown,
        Button::L,
        Button::Zl,
        Button::R,
        Button::Zr,
        Button::JoyconLeftSr,
        Button::JoyconLeftSl,
        Button::JoyconRightSr,
        Button::JoyconRightSl,
        Button::Plus,
        Button::Minus,
        Button::Home,
        Button::Capture,
        Button::Y,
        Button::X,
        Button::B,
        Button::A,
        Button::LeftStickPress,
        Button::RightStickPress,
    ];
}

/// Full normalized controller state at one instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControllerState {
    #[serde(rename = "L_STICK")]
    pub left: StickState,
    #[serde(rename = "R_STICK")]
    pub right: StickState,
    #[serde(rename = "DPAD_UP")]
    pub dpad_up: bool,
    #[serde(rename = "DPAD_LEFT")]
    pub dpad_left: bool,
    #[serde(rename = "DPAD_RIGHT")]
    pub dpad_right: bool,
    #[serde(rename = "DPAD_DOWN")]
    pub dpad_down: bool,
    #[serde(rename = "L")]
    pub l: bool,
    #[serde(rename = "ZL")]
    pub zl: bool,
    #[serde(rename = "R")]
    pub r: bool,
    #[serde(rename = "ZR")]
    pub zr: bool,
    #[serde(rename = "JCL_SR")]
    pub joycon_left_sr: bool,
    #[serde(rename = "JCL_SL")]
    pub joycon_left_sl: bool,
    #[serde(rename = "JCR_SR")]
    pub joycon_right_sr: bool,
    #[serde(rename = "JCR_SL")]
    pub joycon_right_sl: bool,
    #[serde(rename = "PLUS")]
    pub plus: bool,
    #[serde(rename = "MINUS")]
    pub minus: bool,
    #[serde(rename = "HOME")]
    pub home: bool,
    #[serde(rename = "CAPTURE")]
    pub capture: bool,
    #[serde(rename = "Y")]
    pub y: bool,
    #[serde(rename = "X")]
    pub x: bool,
    #[serde(rename = "B")]
    pub b: bool,
    #[serde(rename = "A")]
    pub a: bool,
}

impl ControllerState {
    fn slot(&mut self, button: Button) -> &mut bool {
        match button {
            Button::DpadUp => &mut self.dpad_up,
            Button::DpadLeft => &mut self.dpad_left,
            Button::DpadRight => &mut self.dpad_right,
            Button::DpadDown => &mut self.dpad_down,
            Button::L => &mut self.l,
            Button::Zl => &mut self.zl,
            Button::R => &mut self.r,
            Button::Zr => &mut self.zr,
            Button::JoyconLeftSr => &mut self.joycon_left_sr,
            Button::JoyconLeftSl => &mut self.joycon_left_sl,
            Button::JoyconRightSr => &mut self.joycon_right_sr,
            Button::JoyconRightSl => &mut self.joycon_right_sl,
            Button::Plus => &mut self.plus,
            Button::Minus => &mut self.minus,
            Button::Home => &mut self.home,
            Button::Capture => &mut self.capture,
            Button::Y => &mut self.y,
            Button::X => &mut self.x,
            Button::B => &mut self.b,
            Button::A => &mut self.a,
            Button::LeftStickPress => &mut self.left.pressed,
            Button::RightStickPress => &mut self.right.pressed,
        }
    }

    pub fn set_button(&mut self, button: Button, pressed: bool) {
        *self.slot(button) = pressed;
    }

    pub fn button(&self, button: Button) -> bool {
        match button {
            Button::DpadUp => self.dpad_up,
            Button::DpadLeft => self.dpad_left,
            Button::DpadRight => self.dpad_right,
            Button::DpadDown => self.dpad_down,
            Button::L => self.l,
            Button::Zl => self.zl,
            Button::R => self.r,
            Button::Zr => self.zr,
            Button::JoyconLeftSr => self.joycon_left_sr,
            Button::JoyconLeftSl => self.joycon_left_sl,
            Button::JoyconRightSr => self.joycon_right_sr,
            Button::JoyconRightSl => self.joycon_right_sl,
            Button::Plus => self.plus,
            Button::Minus => self.minus,
            Button::Home => self.home,
            Button::Capture => self.capture,
            Button::Y => self.y,
            Button::X => self.x,
            Button::B => self.b,
            Button::A => self.a,
            Button::LeftStickPress => self.left.pressed,
            Button::RightStickPress => self.right.pressed,
        }
    }

    /// Buttons currently held, in `Button::ALL` order.
    pub fn held(&self) -> Vec<Button> {
        Button::ALL
            .iter()
            .copied()
            .filter(|button| self.button(*button))
            .collect()
    }
}

/// Live record plus the snapshot that was last put on the wire.
///
/// Only the dispatch policy commits, and only after a successful emit.
#[derive(Clone, Debug, Default)]
pub struct StateModel {
    current: ControllerState,
    previous: ControllerState,
}

impl StateModel {
    pub fn current(&self) -> &ControllerState {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut ControllerState {
        &mut self.current
    }

    pub fn previous(&self) -> &ControllerState {
        &self.previous
    }

    /// Structural comparison against the last transmitted snapshot.
    pub fn is_dirty(&self) -> bool {
        self.current != self.previous
    }

    pub(crate) fn commit_snapshot(&mut self) {
        self.previous = self.current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_is_all_released_and_centered() {
        let state = ControllerState::default();
        assert!(state.held().is_empty());
        assert_eq!(state.left, StickState::default());
        assert_eq!(state.right.x, 0);
    }

    #[test]
    fn stick_press_buttons_write_into_sticks() {
        let mut state = ControllerState::default();
        state.set_button(Button::LeftStickPress, true);
        assert!(state.left.pressed);
        assert!(!state.right.pressed);
        assert_eq!(state.held(), vec![Button::LeftStickPress]);
    }

    #[test]
    fn each_button_reads_back_only_itself() {
        for button in Button::ALL {
            let mut state = ControllerState::default();
            state.set_button(button, true);
            assert!(state.button(button), "{button:?}");
            assert_eq!(state.held(), vec![button]);
        }
    }

    #[test]
    fn axis_scaling_saturates_at_bounds() {
        assert_eq!(scale_axis(1.0), 100);
        assert_eq!(scale_axis(-1.0), -100);
        assert_eq!(scale_axis(1.7), 100);
        assert_eq!(scale_axis(-3.0), -100);
        assert_eq!(scale_axis(0.254), 25);
        assert_eq!(scale_axis(f32::NAN), 0);
    }

    #[test]
    fn set_axes_clamps() {
        let mut stick = StickState::default();
        stick.set_axes(250, -250);
        assert_eq!((stick.x, stick.y), (100, -100));
    }

    #[test]
    fn model_tracks_dirty_until_commit() {
        let mut model = StateModel::default();
        assert!(!model.is_dirty());

        model.current_mut().a = true;
        assert!(model.is_dirty());
        assert!(!model.previous().a);

        model.commit_snapshot();
        assert!(!model.is_dirty());
        assert!(model.previous().a);

        // the snapshot is a copy, not an alias
        model.current_mut().a = false;
        assert!(model.previous().a);
        assert!(model.is_dirty());
    }

    #[test]
    fn serializes_with_remote_packet_keys() {
        let mut state = ControllerState::default();
        state.a = true;
        state.left.x = -100;
        let json = serde_json::to_value(state).unwrap();
        assert_eq!(json["A"], true);
        assert_eq!(json["L_STICK"]["X_VALUE"], -100);
        assert_eq!(json["R_STICK"]["PRESSED"], false);
        assert_eq!(json["JCL_SR"], false);
    }
}

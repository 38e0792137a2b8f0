//! Controller subsystem for input capture
//!
//! Normalizes keyboard and gamepad input into one canonical controller state:
//!
//! 1. [`keyboard`] - evdev key edges fed into the session
//! 2. [`gamepad`] - poll-only gamepad backend (gilrs)
//! 3. [`keymap`] - static key code to control table
//! 4. [`source`] - the active input variant writing into the state
//! 5. [`state`] - canonical state and last transmitted snapshot
//!
//! # Architecture
//!
//! ```text
//! Keyboard ──► KeyEvent ──► KeyboardInput ─┐
//!                                          ├──► ControllerState ──► Dispatch
//! Gamepad ──► PadSnapshot ──► GamepadInput ┘     (exactly one source active)
//! ```

pub mod gamepad;
pub mod keyboard;
pub mod keymap;
pub mod source;
pub mod state;

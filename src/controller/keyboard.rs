//! Keyboard edge events from an evdev device.
//!
//! The feed only forwards key edges; which ones matter is decided by the
//! keyboard input variant downstream.
//!
//! Unless the device is grabbed, the console reads from the same keyboard.
//! Tab opens a console line and Enter submits it; edges in between are
//! typing and never reach the controller.

use crate::config::KeyboardConfig;
use evdev::{Device, InputEventKind, Key};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyAction {
    Press,
    Release,
    Repeat,
}

impl KeyAction {
    /// Maps an evdev key event value (0 up, 1 down, 2 autorepeat).
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(KeyAction::Release),
            1 => Some(KeyAction::Press),
            2 => Some(KeyAction::Repeat),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub action: KeyAction,
}

impl KeyEvent {
    pub fn press(key: Key) -> Self {
        Self {
            key,
            action: KeyAction::Press,
        }
    }

    pub fn release(key: Key) -> Self {
        Self {
            key,
            action: KeyAction::Release,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KeyboardError {
    #[error("Failed to open keyboard device: {0}")]
    OpenError(#[from] std::io::Error),

    #[error("No keyboard device found")]
    NoKeyboard,

    #[error("Failed to grab keyboard device: {0}")]
    GrabError(std::io::Error),
}

/// Key that starts a console line.
pub const CONSOLE_KEY: Key = Key::KEY_TAB;

/// Separates console typing from controller input.
#[derive(Debug, Default)]
pub struct TypingGate {
    typing: bool,
    // keys pressed through the gate and not yet released
    down: HashSet<Key>,
}

impl TypingGate {
    pub fn is_typing(&self) -> bool {
        self.typing
    }

    /// Returns the edges to forward for one raw event.
    ///
    /// Opening a console line releases every key that was down, so nothing
    /// stays held while the operator types.
    pub fn admit(&mut self, event: KeyEvent) -> Vec<KeyEvent> {
        let pressed = event.action == KeyAction::Press;
        if self.typing {
            if pressed && matches!(event.key, Key::KEY_ENTER | Key::KEY_KPENTER) {
                debug!("Console line submitted, key input resumed");
                self.typing = false;
            }
            return Vec::new();
        }
        if pressed && event.key == CONSOLE_KEY {
            debug!("Console line opened, key input paused");
            self.typing = true;
            return self.down.drain().map(KeyEvent::release).collect();
        }

        match event.action {
            KeyAction::Press => {
                self.down.insert(event.key);
            }
            KeyAction::Release => {
                self.down.remove(&event.key);
            }
            KeyAction::Repeat => {}
        }
        vec![event]
    }
}

fn find_keyboard() -> Option<(PathBuf, Device)> {
    evdev::enumerate().find(|(_, device)| {
        device
            .supported_keys()
            .is_some_and(|keys| keys.contains(Key::KEY_A) && keys.contains(Key::KEY_L))
    })
}

/// Opens a keyboard and forwards its key edges into `sender`.
///
/// Uses the configured device when given, otherwise the first device with
/// letter keys. A grabbed device is ours alone and skips the typing gate.
pub fn spawn_key_feed(
    config: &KeyboardConfig,
    sender: mpsc::Sender<KeyEvent>,
) -> Result<JoinHandle<()>, KeyboardError> {
    let (path, mut device) = match &config.device {
        Some(path) => {
            let device = Device::open(path)?;
            (path.clone(), device)
        }
        None => find_keyboard().ok_or(KeyboardError::NoKeyboard)?,
    };
    info!(
        "Reading keys from {} ({})",
        path.display(),
        device.name().unwrap_or("unnamed device")
    );

    let grabbed = config.grab;
    if grabbed {
        device.grab().map_err(KeyboardError::GrabError)?;
        warn!("Keyboard {} grabbed, type console commands elsewhere", path.display());
    } else {
        info!("Press Tab before typing a console command");
    }

    let mut stream = device.into_event_stream()?;
    let handle = tokio::spawn(async move {
        let mut gate = TypingGate::default();
        loop {
            match stream.next_event().await {
                Ok(event) => {
                    let InputEventKind::Key(key) = event.kind() else {
                        continue;
                    };
                    let Some(action) = KeyAction::from_value(event.value()) else {
                        debug!("Ignoring key value {} for {:?}", event.value(), key);
                        continue;
                    };
                    let event = KeyEvent { key, action };
                    let edges = if grabbed {
                        vec![event]
                    } else {
                        gate.admit(event)
                    };
                    for edge in edges {
                        if sender.send(edge).await.is_err() {
                            warn!("Key event receiver dropped, stopping keyboard feed");
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!("Keyboard feed terminated: {}", e);
                    break;
                }
            }
        }
    });

    Ok(handle)
}

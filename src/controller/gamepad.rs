use gilrs::{Axis, Button as PadButton, Event, EventType, Gilrs};
use std::fmt;
use tracing::{debug, error, info, warn};

/// Identifier of a physical gamepad as reported by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PadId(pub usize);

impl fmt::Display for PadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PadInfo {
    pub id: PadId,
    pub name: String,
}

// Hot-plug notification drained from the backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PadEvent {
    Connected(PadInfo),
    Disconnected(PadId),
}

/// One poll of a pad in the standard layout.
///
/// Axes are `[left x, left y, right x, right y]` in `[-1, 1]` with up reported
/// as negative. Buttons follow the standard index order; a pad reports only
/// as many as it has.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PadSnapshot {
    pub axes: Vec<f32>,
    pub buttons: Vec<bool>,
}

impl PadSnapshot {
    pub fn axis(&self, index: usize) -> f32 {
        self.axes.get(index).copied().unwrap_or(0.0)
    }

    /// Indices past the reported button count read as released.
    pub fn pressed(&self, index: usize) -> bool {
        self.buttons.get(index).copied().unwrap_or(false)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GamepadError {
    #[error("Failed to initialize gamepad backend: {0}")]
    InitializationError(String),

    #[error("Gamepad {0} is not connected")]
    NotConnected(PadId),
}

/// Poll-only access to physical gamepads.
pub trait GamepadBackend {
    /// Drains pending backend events, refreshing cached pad state, and
    /// returns the hot-plug notifications among them.
    fn pump(&mut self) -> Vec<PadEvent>;

    fn snapshot(&self, pad: PadId) -> Result<PadSnapshot, GamepadError>;

    fn pads(&self) -> Vec<PadInfo>;

    fn is_connected(&self, pad: PadId) -> bool {
        self.pads().iter().any(|info| info.id == pad)
    }
}

// Standard layout sticks; the Y sign is flipped so up reads negative
const STANDARD_AXES: [(Axis, f32); 4] = [
    (Axis::LeftStickX, 1.0),
    (Axis::LeftStickY, -1.0),
    (Axis::RightStickX, 1.0),
    (Axis::RightStickY, -1.0),
];

const STANDARD_BUTTONS: [PadButton; 17] = [
    PadButton::South,
    PadButton::East,
    PadButton::West,
    PadButton::North,
    PadButton::LeftTrigger,
    PadButton::RightTrigger,
    PadButton::LeftTrigger2,
    PadButton::RightTrigger2,
    PadButton::Select,
    PadButton::Start,
    PadButton::LeftThumb,
    PadButton::RightThumb,
    PadButton::DPadUp,
    PadButton::DPadDown,
    PadButton::DPadLeft,
    PadButton::DPadRight,
    PadButton::Mode,
];

pub struct GilrsBackend {
    gilrs: Gilrs,
}

impl GilrsBackend {
    pub fn new() -> Result<Self, GamepadError> {
        info!("Initializing gilrs controller interface");
        let gilrs = match Gilrs::new() {
            Ok(g) => {
                info!("Successfully initialized gilrs");
                g
            }
            Err(e) => {
                error!("Failed to initialize gilrs: {}", e);
                return Err(GamepadError::InitializationError(e.to_string()));
            }
        };

        let backend = Self { gilrs };
        let pads = backend.pads();
        if pads.is_empty() {
            warn!("No gamepad connected, keyboard is the only input source");
        } else {
            info!("Found {} gamepads:", pads.len());
            for pad in &pads {
                info!("  [{}] {}", pad.id, pad.name);
            }
        }
        Ok(backend)
    }
}

impl GamepadBackend for GilrsBackend {
    fn pump(&mut self) -> Vec<PadEvent> {
        let mut events = Vec::new();
        while let Some(Event { id, event, .. }) = self.gilrs.next_event() {
            match event {
                EventType::Connected => {
                    let name = self.gilrs.gamepad(id).name().to_string();
                    info!("Gamepad connected: [{}] {}", usize::from(id), name);
                    events.push(PadEvent::Connected(PadInfo {
                        id: PadId(usize::from(id)),
                        name,
                    }));
                }
                EventType::Disconnected => {
                    warn!("Gamepad disconnected: [{}]", usize::from(id));
                    events.push(PadEvent::Disconnected(PadId(usize::from(id))));
                }
                _ => {}
            }
        }
        if !events.is_empty() {
            debug!("Drained {} hot-plug events", events.len());
        }
        events
    }

    fn snapshot(&self, pad: PadId) -> Result<PadSnapshot, GamepadError> {
        let (_, gamepad) = self
            .gilrs
            .gamepads()
            .find(|(id, _)| usize::from(*id) == pad.0)
            .ok_or(GamepadError::NotConnected(pad))?;

        let axes = STANDARD_AXES
            .iter()
            .map(|(axis, sign)| gamepad.value(*axis) * sign)
            .collect();
        let buttons = STANDARD_BUTTONS
            .iter()
            .map(|button| gamepad.is_pressed(*button))
            .collect();

        Ok(PadSnapshot { axes, buttons })
    }

    fn pads(&self) -> Vec<PadInfo> {
        self.gilrs
            .gamepads()
            .map(|(id, gamepad)| PadInfo {
                id: PadId(usize::from(id)),
                name: gamepad.name().to_string(),
            })
            .collect()
    }
}

/// Stand-in when no gamepad backend could be brought up.
pub struct NoGamepads;

impl GamepadBackend for NoGamepads {
    fn pump(&mut self) -> Vec<PadEvent> {
        Vec::new()
    }

    fn snapshot(&self, pad: PadId) -> Result<PadSnapshot, GamepadError> {
        Err(GamepadError::NotConnected(pad))
    }

    fn pads(&self) -> Vec<PadInfo> {
        Vec::new()
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    #[derive(Default)]
    struct Rack {
        pads: BTreeMap<PadId, (String, PadSnapshot)>,
        events: Vec<PadEvent>,
    }

    /// Scripted backend; clones share one rack so tests can keep a handle.
    #[derive(Clone, Default)]
    pub struct FakePads(Rc<RefCell<Rack>>);

    impl FakePads {
        pub fn plug(&self, id: usize, name: &str, snapshot: PadSnapshot) {
            let mut rack = self.0.borrow_mut();
            rack.pads.insert(PadId(id), (name.to_string(), snapshot));
            rack.events.push(PadEvent::Connected(PadInfo {
                id: PadId(id),
                name: name.to_string(),
            }));
        }

        pub fn unplug(&self, id: usize) {
            let mut rack = self.0.borrow_mut();
            rack.pads.remove(&PadId(id));
            rack.events.push(PadEvent::Disconnected(PadId(id)));
        }

        /// Drops the pad without queuing its disconnect event yet.
        pub fn vanish(&self, id: usize) {
            self.0.borrow_mut().pads.remove(&PadId(id));
        }

        pub fn set(&self, id: usize, snapshot: PadSnapshot) {
            if let Some(entry) = self.0.borrow_mut().pads.get_mut(&PadId(id)) {
                entry.1 = snapshot;
            }
        }
    }

    impl GamepadBackend for FakePads {
        fn pump(&mut self) -> Vec<PadEvent> {
            std::mem::take(&mut self.0.borrow_mut().events)
        }

        fn snapshot(&self, pad: PadId) -> Result<PadSnapshot, GamepadError> {
            self.0
                .borrow()
                .pads
                .get(&pad)
                .map(|(_, snapshot)| snapshot.clone())
                .ok_or(GamepadError::NotConnected(pad))
        }

        fn pads(&self) -> Vec<PadInfo> {
            self.0
                .borrow()
                .pads
                .iter()
                .map(|(id, (name, _))| PadInfo {
                    id: *id,
                    name: name.clone(),
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakePads;
    use super::*;

    #[test]
    fn snapshot_reads_missing_indices_as_neutral() {
        let snapshot = PadSnapshot {
            axes: vec![0.5],
            buttons: vec![true, false],
        };
        assert_eq!(snapshot.axis(0), 0.5);
        assert_eq!(snapshot.axis(3), 0.0);
        assert!(snapshot.pressed(0));
        assert!(!snapshot.pressed(1));
        assert!(!snapshot.pressed(17));
    }

    #[test]
    fn standard_layout_covers_seventeen_buttons() {
        // capture has no gilrs counterpart and degrades to released
        assert_eq!(STANDARD_BUTTONS.len(), 17);
        assert_eq!(STANDARD_BUTTONS[16], PadButton::Mode);
    }

    #[test]
    fn fake_backend_reports_hotplug_once() {
        let mut pads = FakePads::default();
        pads.plug(2, "Pro Controller", PadSnapshot::default());
        assert!(pads.is_connected(PadId(2)));

        let events = pads.pump();
        assert_eq!(events.len(), 1);
        assert!(pads.pump().is_empty());

        pads.unplug(2);
        assert_eq!(pads.pump(), vec![PadEvent::Disconnected(PadId(2))]);
        assert!(matches!(
            pads.snapshot(PadId(2)),
            Err(GamepadError::NotConnected(PadId(2)))
        ));
    }
}

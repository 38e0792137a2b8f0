//! Remote controller lifecycle tracking
//!
//! The tracker mirrors the emulation service's view of one controller session.
//! It never infers anything from timeouts: every change comes from an inbound
//! `state` report, except the reset performed when a new session is requested.
//!
//! # State Machine
//!
//! ```text
//! Initializing ──► Connecting ──► Connected ◄──► Reconnecting
//!                      │              │               │
//!                      └──────────────┴──► Crashed ◄──┘
//! ```
//!
//! `Connected` is the only state that authorizes starting the scheduler.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error, info, warn};

/// Opaque handle the service assigns to one emulated controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Initializing,
    Connecting,
    Reconnecting,
    Connected,
    Crashed,
}

impl LifecycleState {
    /// Transitions the service may report from `self`.
    fn allows(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Initializing, Connecting)
                | (Connecting, Connected)
                | (Connecting, Reconnecting)
                | (Connecting, Crashed)
                | (Reconnecting, Connected)
                | (Reconnecting, Crashed)
                | (Connected, Reconnecting)
                | (Connected, Crashed)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Initializing => "initializing",
            LifecycleState::Connecting => "connecting",
            LifecycleState::Reconnecting => "reconnecting",
            LifecycleState::Connected => "connected",
            LifecycleState::Crashed => "crashed",
        };
        write!(f, "{}", name)
    }
}

/// `errors` field of a snapshot: `false` while healthy, a message otherwise.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RemoteErrors {
    Flag(bool),
    Message(String),
}

impl Default for RemoteErrors {
    fn default() -> Self {
        RemoteErrors::Flag(false)
    }
}

impl RemoteErrors {
    pub fn message(&self) -> Option<&str> {
        match self {
            RemoteErrors::Message(message) => Some(message),
            RemoteErrors::Flag(_) => None,
        }
    }
}

/// One session's entry in a `state` report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleSnapshot {
    pub state: LifecycleState,
    #[serde(default)]
    pub finished_macros: Vec<String>,
    #[serde(default)]
    pub errors: RemoteErrors,
}

impl LifecycleSnapshot {
    pub fn new(state: LifecycleState) -> Self {
        Self {
            state,
            finished_macros: Vec::new(),
            errors: RemoteErrors::default(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
}

#[derive(Debug, Default)]
pub struct LifecycleTracker {
    state: LifecycleState,
}

impl LifecycleTracker {
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LifecycleState::Connected
    }

    /// Client-side restart of the cycle for a freshly requested session.
    pub fn reset(&mut self) {
        if self.state != LifecycleState::Initializing {
            info!("Lifecycle reset: {} -> initializing", self.state);
        }
        self.state = LifecycleState::Initializing;
    }

    /// Applies a reported state.
    ///
    /// Returns `Ok(true)` when the state changed and `Ok(false)` for a repeat
    /// of the current state. Forbidden transitions leave the state untouched.
    pub fn apply(&mut self, next: LifecycleState) -> Result<bool, LifecycleError> {
        if next == self.state {
            debug!("Lifecycle unchanged: {}", next);
            return Ok(false);
        }
        if !self.state.allows(next) {
            return Err(LifecycleError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        match next {
            LifecycleState::Crashed => error!("Remote controller crashed (was {})", self.state),
            LifecycleState::Reconnecting => warn!("Remote controller reconnecting"),
            _ => info!("Lifecycle transition: {} -> {}", self.state, next),
        }
        self.state = next;
        Ok(true)
    }

    /// Like [`apply`](Self::apply) but logs and swallows rejected transitions.
    pub fn observe(&mut self, next: LifecycleState) -> bool {
        match self.apply(next) {
            Ok(changed) => changed,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }
}

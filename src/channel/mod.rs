//! Named-message channel to the emulation service
//!
//! Outbound messages are fire-and-forget: [`Emitter::emit`] never waits for an
//! acknowledgement. Inbound messages arrive on an mpsc queue fed by the
//! transport's own task.
//!
//! ```text
//! channel/
//! ├── mod.rs     - message types, Emitter seam, Channel
//! ├── mqtt.rs    - rumqttc transport
//! └── memory.rs  - in-process pair for tests
//! ```

pub mod mqtt;

#[cfg(test)]
pub mod memory;

use crate::controller::state::ControllerState;
use crate::lifecycle::{LifecycleSnapshot, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to encode {name} payload: {source}")]
    EncodeError {
        name: &'static str,
        source: serde_json::Error,
    },

    #[error("Failed to decode {name} payload: {reason}")]
    DecodeError { name: String, reason: String },

    #[error("Unknown inbound message: {0}")]
    UnknownMessage(String),

    #[error("Failed to send message: {0}")]
    SendError(String),

    #[error("Failed to connect transport: {0}")]
    ConnectionError(String),
}

/// Ties a `created` reply to the `request-create` that asked for it.
///
/// Every client listens on the same `created` name, so a reply without a
/// matching token belongs to someone else.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestToken(pub String);

impl RequestToken {
    pub fn new(client_id: &str, sequence: u32) -> Self {
        Self(format!("{}-{}", client_id, sequence))
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum OutboundMessage {
    RequestCreate(RequestToken),
    RequestState,
    Input {
        session: SessionId,
        state: ControllerState,
    },
    Macro {
        session: SessionId,
        script: String,
    },
    RequestShutdown(SessionId),
}

impl OutboundMessage {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundMessage::RequestCreate(_) => "request-create",
            OutboundMessage::RequestState => "request-state",
            OutboundMessage::Input { .. } => "input",
            OutboundMessage::Macro { .. } => "macro",
            OutboundMessage::RequestShutdown(_) => "request-shutdown",
        }
    }

    /// JSON payload; `request-state` carries an empty body.
    pub fn payload(&self) -> Result<Vec<u8>, ChannelError> {
        let encoded = match self {
            OutboundMessage::RequestState => return Ok(Vec::new()),
            OutboundMessage::RequestCreate(token) => serde_json::to_vec(token),
            OutboundMessage::Input { session, state } => serde_json::to_vec(&(session, state)),
            OutboundMessage::Macro { session, script } => serde_json::to_vec(&(session, script)),
            OutboundMessage::RequestShutdown(session) => serde_json::to_vec(session),
        };
        encoded.map_err(|source| ChannelError::EncodeError {
            name: self.name(),
            source,
        })
    }
}

pub type SessionStates = BTreeMap<SessionId, LifecycleSnapshot>;

#[derive(Clone, Debug, PartialEq)]
pub enum InboundMessage {
    Created {
        request: RequestToken,
        session: SessionId,
    },
    State(SessionStates),
    Error(String),
}

impl InboundMessage {
    pub fn decode(name: &str, payload: &[u8]) -> Result<Self, ChannelError> {
        let decode_error = |e: serde_json::Error| ChannelError::DecodeError {
            name: name.to_string(),
            reason: e.to_string(),
        };

        match name {
            "created" => serde_json::from_slice::<(RequestToken, SessionId)>(payload)
                .map(|(request, session)| InboundMessage::Created { request, session })
                .map_err(decode_error),
            "state" => serde_json::from_slice(payload)
                .map(InboundMessage::State)
                .map_err(decode_error),
            // errors are meant for humans; accept bare text as well as JSON strings
            "error" => Ok(InboundMessage::Error(
                serde_json::from_slice::<String>(payload)
                    .unwrap_or_else(|_| String::from_utf8_lossy(payload).into_owned()),
            )),
            other => Err(ChannelError::UnknownMessage(other.to_string())),
        }
    }
}

/// Outbound half of a transport.
pub trait Emitter {
    fn emit(&self, message: OutboundMessage) -> Result<(), ChannelError>;
}

/// A connected transport: an emitter plus the inbound queue it feeds.
pub struct Channel {
    emitter: Box<dyn Emitter>,
    inbound: mpsc::Receiver<InboundMessage>,
}

impl Channel {
    pub fn new(emitter: Box<dyn Emitter>, inbound: mpsc::Receiver<InboundMessage>) -> Self {
        Self { emitter, inbound }
    }

    /// Next inbound message; `None` once the transport is gone.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.inbound.recv().await
    }
}

impl Emitter for Channel {
    fn emit(&self, message: OutboundMessage) -> Result<(), ChannelError> {
        self.emitter.emit(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleState;

    #[test]
    fn input_payload_is_id_state_pair() {
        let mut state = ControllerState::default();
        state.a = true;
        let message = OutboundMessage::Input {
            session: SessionId(3),
            state,
        };
        let value: serde_json::Value = serde_json::from_slice(&message.payload().unwrap()).unwrap();
        assert_eq!(value[0], 3);
        assert_eq!(value[1]["A"], true);
        assert_eq!(value[1]["L_STICK"]["X_VALUE"], 0);
    }

    #[test]
    fn create_request_carries_its_token() {
        let token = RequestToken::new("padcast-desk", 2);
        assert_eq!(
            OutboundMessage::RequestCreate(token.clone()).payload().unwrap(),
            br#""padcast-desk-2""#.to_vec()
        );
        assert_eq!(
            InboundMessage::decode("created", br#"["padcast-desk-2",4]"#).unwrap(),
            InboundMessage::Created {
                request: token,
                session: SessionId(4),
            }
        );
    }

    #[test]
    fn bodiless_requests_have_empty_payloads() {
        assert!(OutboundMessage::RequestState.payload().unwrap().is_empty());
        assert_eq!(OutboundMessage::RequestState.name(), "request-state");
        assert_eq!(
            OutboundMessage::RequestShutdown(SessionId(7)).payload().unwrap(),
            b"7".to_vec()
        );
    }

    #[test]
    fn state_report_decodes_numeric_keys() {
        let payload = br#"{"3":{"state":"connected","finished_macros":[],"errors":false},"5":{"state":"crashed","errors":"lost"}}"#;
        let InboundMessage::State(states) = InboundMessage::decode("state", payload).unwrap() else {
            panic!("expected a state report");
        };
        assert_eq!(states[&SessionId(3)].state, LifecycleState::Connected);
        assert_eq!(states[&SessionId(5)].errors.message(), Some("lost"));
    }

    #[test]
    fn error_payload_falls_back_to_raw_text() {
        assert_eq!(
            InboundMessage::decode("error", br#""No adapters""#).unwrap(),
            InboundMessage::Error("No adapters".into())
        );
        assert_eq!(
            InboundMessage::decode("error", b"plain text").unwrap(),
            InboundMessage::Error("plain text".into())
        );
    }

    #[test]
    fn malformed_and_unknown_messages_are_rejected() {
        assert!(matches!(
            InboundMessage::decode("created", b"\"three\""),
            Err(ChannelError::DecodeError { .. })
        ));
        // a bare id cannot be attributed to any request
        assert!(matches!(
            InboundMessage::decode("created", b"3"),
            Err(ChannelError::DecodeError { .. })
        ));
        assert!(matches!(
            InboundMessage::decode("bogus", b"{}"),
            Err(ChannelError::UnknownMessage(_))
        ));
    }
}

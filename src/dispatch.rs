//! Send-on-change dispatch of the canonical state.
//!
//! The service holds the last value it received, so a tick whose state equals
//! the last transmitted snapshot emits nothing.

use crate::channel::{Emitter, OutboundMessage};
use crate::controller::state::StateModel;
use crate::lifecycle::SessionId;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct DispatchPolicy {
    sent: u64,
    skipped: u64,
    failed: u64,
}

impl DispatchPolicy {
    /// Emits `(session, current)` when it differs from the last sent snapshot.
    ///
    /// The snapshot is only committed after the emit succeeded, so a failed
    /// send is retried on the next tick. Returns whether a packet went out.
    pub fn maybe_dispatch(
        &mut self,
        model: &mut StateModel,
        session: SessionId,
        emitter: &dyn Emitter,
    ) -> bool {
        if !model.is_dirty() {
            self.skipped += 1;
            return false;
        }

        let message = OutboundMessage::Input {
            session,
            state: *model.current(),
        };
        match emitter.emit(message) {
            Ok(()) => {
                model.commit_snapshot();
                self.sent += 1;
                debug!("Sent input packet to {}", session);
                true
            }
            Err(e) => {
                self.failed += 1;
                warn!("Failed to dispatch input packet: {}", e);
                false
            }
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelError;
    use crate::controller::state::ControllerState;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct Recorder {
        sent: RefCell<Vec<OutboundMessage>>,
        broken: Cell<bool>,
    }

    impl Emitter for Recorder {
        fn emit(&self, message: OutboundMessage) -> Result<(), ChannelError> {
            if self.broken.get() {
                return Err(ChannelError::SendError("link down".into()));
            }
            self.sent.borrow_mut().push(message);
            Ok(())
        }
    }

    #[test]
    fn identical_states_are_sent_once() {
        let recorder = Recorder::default();
        let mut policy = DispatchPolicy::default();
        let mut model = StateModel::default();

        model.current_mut().b = true;
        let sent: Vec<bool> = (0..50)
            .map(|_| policy.maybe_dispatch(&mut model, SessionId(1), &recorder))
            .collect();
        assert!(sent[0]);
        assert!(sent[1..].iter().all(|sent| !sent));
        assert_eq!(recorder.sent.borrow().len(), 1);
        assert_eq!(policy.skipped(), 49);
    }

    #[test]
    fn baseline_state_is_not_sent() {
        let recorder = Recorder::default();
        let mut policy = DispatchPolicy::default();
        let mut model = StateModel::default();
        assert!(!policy.maybe_dispatch(&mut model, SessionId(1), &recorder));
        assert!(recorder.sent.borrow().is_empty());
    }

    #[test]
    fn equal_contents_written_anew_count_as_unchanged() {
        let recorder = Recorder::default();
        let mut policy = DispatchPolicy::default();
        let mut model = StateModel::default();
        model.current_mut().left.x = 100;
        policy.maybe_dispatch(&mut model, SessionId(1), &recorder);

        let mut rebuilt = ControllerState::default();
        rebuilt.left.x = 100;
        *model.current_mut() = rebuilt;
        assert!(!policy.maybe_dispatch(&mut model, SessionId(1), &recorder));
    }

    #[test]
    fn every_change_is_sent_with_the_session() {
        let recorder = Recorder::default();
        let mut policy = DispatchPolicy::default();
        let mut model = StateModel::default();

        model.current_mut().a = true;
        policy.maybe_dispatch(&mut model, SessionId(3), &recorder);
        model.current_mut().a = false;
        policy.maybe_dispatch(&mut model, SessionId(3), &recorder);

        let sent = recorder.sent.borrow();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent[1],
            OutboundMessage::Input {
                session: SessionId(3),
                state: ControllerState::default(),
            }
        );
    }

    #[test]
    fn failed_emit_keeps_state_dirty() {
        let recorder = Recorder::default();
        let mut policy = DispatchPolicy::default();
        let mut model = StateModel::default();
        model.current_mut().x = true;

        recorder.broken.set(true);
        assert!(!policy.maybe_dispatch(&mut model, SessionId(1), &recorder));
        assert!(model.is_dirty());
        assert_eq!(policy.failed(), 1);

        recorder.broken.set(false);
        assert!(policy.maybe_dispatch(&mut model, SessionId(1), &recorder));
        assert!(!model.is_dirty());
    }
}

//! Controller session with statum typestate phases
//!
//! One session context owns every piece of mutable state: the canonical
//! model, the active input source, the lifecycle tracker and the scheduler.
//! All of it is driven from a single event loop, so ticks, input handlers
//! and status polls never run concurrently.
//!
//! # Phases
//!
//! ```text
//! Requesting ──► Awaiting ──► Streaming ──► Closed
//!     │              │                        │
//!     └──────────────┴──────► Closed ─────────┘
//!                               │
//!                               └──► Requesting (recreate)
//! ```
//!
//! - **Requesting**: `request-create` sent, waiting for the `created` reply
//!   that carries its token
//! - **Awaiting**: session assigned, waiting for the tracker to report
//!   `Connected`, then holding briefly so the status is visible
//! - **Streaming**: scheduler running, capture and dispatch every tick
//! - **Closed**: terminal unless the close reason asks for a new session

use crate::channel::{
    Channel, ChannelError, Emitter, InboundMessage, OutboundMessage, RequestToken, SessionStates,
};
use crate::config::PollingConfig;
use crate::console::{Command, Indicator, StatusBoard};
use crate::controller::gamepad::{GamepadBackend, PadEvent, PadId};
use crate::controller::keyboard::KeyEvent;
use crate::controller::source::{InputAdapter, InputSource};
use crate::controller::state::StateModel;
use crate::dispatch::DispatchPolicy;
use crate::lifecycle::{LifecycleTracker, SessionId};
use crate::scheduler::{Scheduler, TickMode, TickStats};
use statum::{machine, state};
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No remote session assigned")]
    NoSession,

    #[error("Gamepad {0} is not connected")]
    PadUnavailable(PadId),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Why a session left its open phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    Quit,
    Shutdown,
    Recreate,
    ChannelClosed,
}

#[state]
#[derive(Debug, Clone)]
pub enum SessionPhase {
    Requesting,
    Awaiting,
    Streaming,
    Closed(CloseReason),
}

/// Event sources of one session.
pub struct SessionIo {
    channel: Channel,
    pads: Box<dyn GamepadBackend>,
    keys: mpsc::Receiver<KeyEvent>,
    keys_open: bool,
    commands: mpsc::Receiver<Command>,
    commands_open: bool,
    shutdown: CancellationToken,
    status_poll: Interval,
    session_refresh: Interval,
}

enum Wake {
    Cancelled,
    Command(Option<Command>),
    Inbound(Option<InboundMessage>),
    Key(Option<KeyEvent>),
    Tick,
    StatusPoll,
    SessionRefresh,
}

async fn tick_at(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl SessionIo {
    pub fn new(
        channel: Channel,
        pads: Box<dyn GamepadBackend>,
        keys: mpsc::Receiver<KeyEvent>,
        commands: mpsc::Receiver<Command>,
        shutdown: CancellationToken,
        polling: &PollingConfig,
    ) -> Self {
        let mut status_poll = tokio::time::interval(polling.status_poll());
        status_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut session_refresh = tokio::time::interval(polling.session_refresh());
        session_refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            channel,
            pads,
            keys,
            keys_open: true,
            commands,
            commands_open: true,
            shutdown,
            status_poll,
            session_refresh,
        }
    }

    /// Waits for whatever happens first. `deadline` is the phase's own timer
    /// (next tick or hold end); polls only fire while `polling` is set.
    async fn next_wake(&mut self, deadline: Option<Instant>, polling: bool) -> Wake {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Wake::Cancelled,
            command = self.commands.recv(), if self.commands_open => Wake::Command(command),
            message = self.channel.recv() => Wake::Inbound(message),
            key = self.keys.recv(), if self.keys_open => Wake::Key(key),
            _ = tick_at(deadline) => Wake::Tick,
            _ = self.status_poll.tick(), if polling => Wake::StatusPoll,
            _ = self.session_refresh.tick(), if polling => Wake::SessionRefresh,
        }
    }
}

#[machine]
pub struct ControllerSession<S: SessionPhase> {
    io: SessionIo,
    client_id: String,
    requests: u32,
    pending: Option<RequestToken>,
    polling: PollingConfig,
    tracker: LifecycleTracker,
    model: StateModel,
    adapter: InputAdapter,
    dispatch: DispatchPolicy,
    scheduler: Scheduler,
    status: StatusBoard,
    session: Option<SessionId>,
    states: SessionStates,
    stats: TickStats,
}

impl<S: SessionPhase> ControllerSession<S> {
    fn emit(&self, message: OutboundMessage) -> Result<(), SessionError> {
        Ok(self.io.channel.emit(message)?)
    }

    fn active_session(&self) -> Result<SessionId, SessionError> {
        self.session.ok_or(SessionError::NoSession)
    }

    /// Handles every wake except `Tick`, which each phase owns.
    fn handle_wake(&mut self, wake: Wake) -> Option<CloseReason> {
        match wake {
            Wake::Cancelled => {
                info!("Shutdown requested");
                Some(CloseReason::Quit)
            }
            Wake::Command(Some(command)) => self.apply_command(command),
            Wake::Command(None) => {
                warn!("Console closed, no further commands");
                self.io.commands_open = false;
                None
            }
            Wake::Inbound(Some(message)) => {
                self.handle_inbound(message);
                None
            }
            Wake::Inbound(None) => {
                error!("Transport closed");
                Some(CloseReason::ChannelClosed)
            }
            Wake::Key(Some(event)) => {
                if self.adapter.handle_key(event) {
                    debug!("Key {:?} {:?}", event.key, event.action);
                }
                None
            }
            Wake::Key(None) => {
                warn!("Keyboard feed closed, keyboard input unavailable");
                self.io.keys_open = false;
                None
            }
            Wake::StatusPoll => {
                self.poll_status();
                None
            }
            Wake::SessionRefresh => {
                self.status.list_sessions(self.session, &self.states);
                None
            }
            Wake::Tick => None,
        }
    }

    fn apply_command(&mut self, command: Command) -> Option<CloseReason> {
        let result = match command {
            Command::UseKeyboard => {
                self.adapter.switch_to(InputSource::Keyboard);
                Ok(None)
            }
            Command::UseGamepad(pad) => {
                if self.io.pads.is_connected(pad) {
                    self.adapter.switch_to(InputSource::Gamepad(pad));
                    Ok(None)
                } else {
                    Err(SessionError::PadUnavailable(pad))
                }
            }
            Command::Rate(mode) => {
                self.scheduler.set_mode(mode);
                Ok(None)
            }
            Command::Macro(script) => self.active_session().and_then(|session| {
                info!("Forwarding macro to {}", session);
                self.emit(OutboundMessage::Macro {
                    session,
                    script: script.to_uppercase(),
                })
                .map(|_| None)
            }),
            Command::End(id) if Some(id) == self.session => self.request_shutdown(),
            Command::End(id) => {
                info!("Ending session {}", id);
                self.emit(OutboundMessage::RequestShutdown(id)).map(|_| None)
            }
            Command::Shutdown => self.request_shutdown(),
            Command::Recreate => {
                // only shut down what the service still knows about
                if let Some(session) = self.session.filter(|id| self.states.contains_key(id)) {
                    if let Err(e) = self.emit(OutboundMessage::RequestShutdown(session)) {
                        warn!("Failed to shut down {} before recreate: {}", session, e);
                    }
                }
                info!("Recreating controller session");
                Ok(Some(CloseReason::Recreate))
            }
            Command::Quit => Ok(Some(CloseReason::Quit)),
        };

        result.unwrap_or_else(|e| {
            warn!("Command failed: {}", e);
            None
        })
    }

    fn request_shutdown(&mut self) -> Result<Option<CloseReason>, SessionError> {
        let session = self.active_session()?;
        info!("Shutting down {}", session);
        self.emit(OutboundMessage::RequestShutdown(session))?;
        Ok(Some(CloseReason::Shutdown))
    }

    fn handle_inbound(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::Created { request, session }
                if self.pending.as_ref() == Some(&request) =>
            {
                info!("Service created controller session {}", session);
                self.pending = None;
                self.session = Some(session);
            }
            InboundMessage::Created { request, session } => {
                debug!("Ignoring session {} created for request {}", session, request)
            }
            InboundMessage::State(states) => {
                self.states = states;
                let Some(session) = self.session else {
                    return;
                };
                if let Some(snapshot) = self.states.get(&session) {
                    self.tracker.observe(snapshot.state);
                    self.status.note_snapshot(snapshot);
                }
                self.status.show(Indicator::project(
                    Some(session),
                    self.tracker.state(),
                    &self.states,
                ));
            }
            InboundMessage::Error(message) => self.status.push_error(message, Instant::now()),
        }
    }

    fn poll_status(&mut self) {
        if let Err(e) = self.emit(OutboundMessage::RequestState) {
            warn!("Failed to request session states: {}", e);
        }
        self.status.expire(Instant::now());
        self.service_pads();
    }

    /// Drains hot-plug events; losing the bound pad falls back to keyboard.
    fn service_pads(&mut self) {
        for event in self.io.pads.pump() {
            match event {
                PadEvent::Connected(pad) => {
                    info!("Gamepad available: `source gamepad {}` ({})", pad.id, pad.name)
                }
                PadEvent::Disconnected(id) => {
                    if self.adapter.release_pad(id) {
                        warn!("Bound gamepad {} lost, using keyboard", id);
                    }
                }
            }
        }
    }

    fn prepare_close(&mut self, reason: CloseReason) {
        self.scheduler.stop();
        self.pending = None;
        if reason == CloseReason::Quit {
            if let Some(session) = self.session {
                if let Err(e) = self.emit(OutboundMessage::RequestShutdown(session)) {
                    warn!("Failed to shut down {} on exit: {}", session, e);
                }
            }
        }
        if reason != CloseReason::ChannelClosed {
            self.session = None;
        }
        info!("Session closed: {:?}", reason);
    }
}

impl ControllerSession<Requesting> {
    pub fn create(
        io: SessionIo,
        client_id: String,
        polling: PollingConfig,
        mode: TickMode,
    ) -> Self {
        info!("Creating controller session ({})", mode);
        let scheduler = Scheduler::new(mode, io.shutdown.child_token());
        Self::new(
            io,
            client_id,
            0,
            None,
            polling,
            LifecycleTracker::default(),
            StateModel::default(),
            InputAdapter::default(),
            DispatchPolicy::default(),
            scheduler,
            StatusBoard::default(),
            None,
            SessionStates::new(),
            TickStats::default(),
        )
    }

    /// Asks the service for a new controller and waits for its id.
    pub async fn request(
        mut self,
    ) -> Result<ControllerSession<Awaiting>, ControllerSession<Closed>> {
        self.tracker.reset();
        self.status.reset_session();
        self.session = None;
        self.requests += 1;
        let token = RequestToken::new(&self.client_id, self.requests);
        self.pending = Some(token.clone());
        debug!("Requesting a controller ({})", token);
        if let Err(e) = self.emit(OutboundMessage::RequestCreate(token)) {
            error!("Failed to request a controller: {}", e);
        }

        loop {
            let wake = self.io.next_wake(None, true).await;
            if let Some(reason) = self.handle_wake(wake) {
                return Err(self.close(reason));
            }
            if self.session.is_some() {
                return Ok(self.transition());
            }
        }
    }

    fn close(mut self, reason: CloseReason) -> ControllerSession<Closed> {
        self.prepare_close(reason);
        self.transition_with(reason)
    }
}

impl ControllerSession<Awaiting> {
    /// Waits for `Connected`, then holds so the status is seen before input
    /// starts. A crash keeps waiting for the operator.
    pub async fn await_connected(
        mut self,
    ) -> Result<ControllerSession<Streaming>, ControllerSession<Closed>> {
        let mut hold_until: Option<Instant> = None;
        loop {
            if hold_until.is_none() && self.tracker.is_connected() {
                debug!(
                    "Holding {} ms before streaming",
                    self.polling.connected_hold().as_millis()
                );
                hold_until = Some(Instant::now() + self.polling.connected_hold());
            }

            match self.io.next_wake(hold_until, true).await {
                Wake::Tick => return Ok(self.transition()),
                wake => {
                    if let Some(reason) = self.handle_wake(wake) {
                        return Err(self.close(reason));
                    }
                }
            }
        }
    }

    fn close(mut self, reason: CloseReason) -> ControllerSession<Closed> {
        self.prepare_close(reason);
        self.transition_with(reason)
    }
}

impl ControllerSession<Streaming> {
    /// Runs the capture and dispatch loop until the session closes.
    ///
    /// Leaving `Connected` does not stop the loop; the service discards
    /// input it cannot deliver.
    pub async fn run(mut self) -> ControllerSession<Closed> {
        self.scheduler.start(Instant::now());
        loop {
            match self.io.next_wake(self.scheduler.next_tick(), true).await {
                Wake::Tick => {
                    if !self.scheduler.begin_tick() {
                        continue;
                    }
                    let started = Instant::now();
                    let sent = self.tick();
                    let now = Instant::now();
                    self.stats.record(now - started, sent);
                    self.scheduler.finish_tick(now);
                }
                wake => {
                    if let Some(reason) = self.handle_wake(wake) {
                        return self.close(reason);
                    }
                }
            }
        }
    }

    /// Capture, dispatch, project. Never fails past this boundary.
    fn tick(&mut self) -> bool {
        self.service_pads();

        if let Err(e) = self
            .adapter
            .capture(self.io.pads.as_ref(), self.model.current_mut())
        {
            warn!("Input capture failed: {}", e);
            if let InputSource::Gamepad(pad) = self.adapter.source() {
                self.adapter.release_pad(pad);
            }
            return false;
        }

        let Some(session) = self.session else {
            return false;
        };
        let sent = self
            .dispatch
            .maybe_dispatch(&mut self.model, session, &self.io.channel);
        if sent {
            debug!("Held: {:?}", self.model.current().held());
        }
        sent
    }

    fn close(mut self, reason: CloseReason) -> ControllerSession<Closed> {
        info!(
            "Dispatch totals: {} sent, {} unchanged, {} failed",
            self.dispatch.sent(),
            self.dispatch.skipped(),
            self.dispatch.failed()
        );
        self.prepare_close(reason);
        self.transition_with(reason)
    }
}

impl ControllerSession<Closed> {
    pub fn reason(&self) -> CloseReason {
        self.get_state_data().copied().unwrap_or(CloseReason::Quit)
    }

    /// Decides what follows a closed session: a fresh one or nothing.
    ///
    /// After a shutdown the operator may still `recreate`; input sources and
    /// rate can be changed meanwhile.
    pub async fn next_step(mut self) -> Option<ControllerSession<Requesting>> {
        match self.reason() {
            CloseReason::Recreate => {
                let delay = self.polling.recreate_delay();
                info!("New session in {} ms", delay.as_millis());
                let cancelled = tokio::select! {
                    _ = self.io.shutdown.cancelled() => true,
                    _ = sleep(delay) => false,
                };
                if cancelled {
                    None
                } else {
                    Some(self.reopen())
                }
            }
            CloseReason::Shutdown => {
                info!("Session shut down; `recreate` for a new one, `quit` to exit");
                loop {
                    let wake = self.io.next_wake(None, false).await;
                    match self.handle_wake(wake) {
                        Some(CloseReason::Recreate) => return Some(self.reopen()),
                        Some(CloseReason::Shutdown) | None => {}
                        Some(CloseReason::Quit) | Some(CloseReason::ChannelClosed) => return None,
                    }
                }
            }
            CloseReason::Quit | CloseReason::ChannelClosed => None,
        }
    }

    fn reopen(mut self) -> ControllerSession<Requesting> {
        self.model = StateModel::default();
        self.dispatch = DispatchPolicy::default();
        self.scheduler = Scheduler::new(self.scheduler.mode(), self.io.shutdown.child_token());
        self.tracker.reset();
        self.transition()
    }
}

/// Drives sessions through their phases until one closes for good.
pub async fn run_sessions(mut session: ControllerSession<Requesting>) -> CloseReason {
    loop {
        let closed = match session.request().await {
            Ok(awaiting) => match awaiting.await_connected().await {
                Ok(streaming) => streaming.run().await,
                Err(closed) => closed,
            },
            Err(closed) => closed,
        };

        let reason = closed.reason();
        match closed.next_step().await {
            Some(next) => session = next,
            None => return reason,
        }
    }
}

//! Operator console: line commands in, status projection out.
//!
//! Commands are read from stdin by a spawned task and delivered to the
//! session over an mpsc channel. The [`StatusBoard`] is the passive
//! projection of session state; it only decides what to log and when.

use crate::channel::SessionStates;
use crate::controller::gamepad::PadId;
use crate::lifecycle::{LifecycleSnapshot, LifecycleState, SessionId};
use crate::scheduler::{TickMode, MAX_HZ, MIN_HZ};
use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fmt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long an error notice stays on the status board.
pub const NOTICE_TTL: Duration = Duration::from_secs(10);

const HELP: &str = "press Tab, then type: source keyboard | source gamepad <id> | rate refresh | \
                    rate <hz> | macro <script> | end <session> | shutdown | recreate | quit";

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    UseKeyboard,
    UseGamepad(PadId),
    Rate(TickMode),
    Macro(String),
    End(SessionId),
    Shutdown,
    Recreate,
    Quit,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("Invalid {what}: {value}")]
    InvalidArgument { what: &'static str, value: String },
}

/// Parses one console line. `refresh_hz` is the display rate used by
/// `rate refresh`.
pub fn parse_command(line: &str, refresh_hz: f64) -> Result<Command, CommandError> {
    let line = line.trim();
    let (word, rest) = line
        .split_once(char::is_whitespace)
        .map(|(word, rest)| (word, rest.trim()))
        .unwrap_or((line, ""));

    match word.to_lowercase().as_str() {
        "source" => match rest.split_whitespace().collect::<Vec<_>>().as_slice() {
            ["keyboard"] => Ok(Command::UseKeyboard),
            ["gamepad", id] => id
                .parse()
                .map(|id| Command::UseGamepad(PadId(id)))
                .map_err(|_| CommandError::InvalidArgument {
                    what: "gamepad id",
                    value: id.to_string(),
                }),
            ["gamepad"] => Err(CommandError::MissingArgument("gamepad id")),
            _ => Err(CommandError::MissingArgument("keyboard | gamepad <id>")),
        },
        "rate" => match rest {
            "" => Err(CommandError::MissingArgument("refresh | <hz>")),
            "refresh" => Ok(Command::Rate(TickMode::Refresh { hz: refresh_hz })),
            hz => match hz.parse::<f64>() {
                Ok(hz) if (MIN_HZ..=MAX_HZ).contains(&hz) => {
                    Ok(Command::Rate(TickMode::Fixed { hz }))
                }
                _ => Err(CommandError::InvalidArgument {
                    what: "rate",
                    value: hz.to_string(),
                }),
            },
        },
        "macro" if rest.is_empty() => Err(CommandError::MissingArgument("macro script")),
        // multi-line scripts are typed with literal \n separators
        "macro" => Ok(Command::Macro(rest.replace("\\n", "\n"))),
        "end" => rest
            .parse()
            .map(|id| Command::End(SessionId(id)))
            .map_err(|_| CommandError::InvalidArgument {
                what: "session id",
                value: rest.to_string(),
            }),
        "shutdown" => Ok(Command::Shutdown),
        "recreate" | "restart" => Ok(Command::Recreate),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

/// Reads commands from stdin until EOF or until the session stops listening.
pub fn spawn_console(sender: mpsc::Sender<Command>, refresh_hz: f64) -> JoinHandle<()> {
    info!("{}", HELP);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) if line.trim() == "help" => info!("{}", HELP),
                Ok(Some(line)) => match parse_command(&line, refresh_hz) {
                    Ok(command) => {
                        debug!("Console command: {:?}", command);
                        if sender.send(command).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("{}; {}", e, HELP),
                },
                Ok(None) => {
                    info!("Console input closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to read console input: {}", e);
                    break;
                }
            }
        }
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Light {
    Green,
    Yellow,
    Red,
}

/// Operator-facing status of our remote controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Indicator {
    Lifecycle(LifecycleState),
    /// The service no longer lists our session.
    NoInput,
}

impl Indicator {
    /// A reported crash shows even when the tracker refused the transition
    /// (e.g. a crash while still initializing).
    pub fn project(
        session: Option<SessionId>,
        tracker_state: LifecycleState,
        states: &SessionStates,
    ) -> Self {
        match session.and_then(|id| states.get(&id)) {
            Some(snapshot) if snapshot.state == LifecycleState::Crashed => {
                Indicator::Lifecycle(LifecycleState::Crashed)
            }
            Some(_) => Indicator::Lifecycle(tracker_state),
            None => Indicator::NoInput,
        }
    }

    pub fn light(&self) -> Light {
        match self {
            Indicator::Lifecycle(LifecycleState::Connected) => Light::Green,
            Indicator::Lifecycle(LifecycleState::Crashed) | Indicator::NoInput => Light::Red,
            Indicator::Lifecycle(_) => Light::Yellow,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Indicator::Lifecycle(LifecycleState::Initializing) => "INITIALIZING",
            Indicator::Lifecycle(LifecycleState::Connecting) => "CONNECTING",
            Indicator::Lifecycle(LifecycleState::Reconnecting) => "RECONNECTING",
            Indicator::Lifecycle(LifecycleState::Connected) => "CONNECTED",
            Indicator::Lifecycle(LifecycleState::Crashed) => "CRASHED",
            Indicator::NoInput => "NO INPUT",
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.light(), self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorNotice {
    pub message: String,
    pub received: DateTime<Local>,
}

impl fmt::Display for ErrorNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ERROR {}", self.received.format("%H:%M:%S"), self.message)
    }
}

#[derive(Debug, Default)]
pub struct StatusBoard {
    indicator: Option<Indicator>,
    other_sessions: Vec<SessionId>,
    notices: VecDeque<(Instant, ErrorNotice)>,
    remote_error: Option<String>,
    finished_macros: usize,
}

impl StatusBoard {
    pub fn indicator(&self) -> Option<Indicator> {
        self.indicator
    }

    pub fn other_sessions(&self) -> &[SessionId] {
        &self.other_sessions
    }

    pub fn notices(&self) -> impl Iterator<Item = &ErrorNotice> {
        self.notices.iter().map(|(_, notice)| notice)
    }

    /// Updates the indicator, logging only when it changes.
    pub fn show(&mut self, indicator: Indicator) {
        if self.indicator == Some(indicator) {
            return;
        }
        match indicator.light() {
            Light::Green => info!("Status: {}", indicator),
            Light::Yellow => warn!("Status: {}", indicator),
            Light::Red => error!("Status: {}", indicator),
        }
        self.indicator = Some(indicator);
    }

    /// Lists active sessions other than `own`; the listing is hidden when
    /// there are none.
    pub fn list_sessions(&mut self, own: Option<SessionId>, states: &SessionStates) {
        let others: Vec<SessionId> = states
            .keys()
            .copied()
            .filter(|id| Some(*id) != own)
            .collect();
        if others == self.other_sessions {
            return;
        }
        if others.is_empty() {
            info!("No other active sessions");
        } else {
            let listing: Vec<String> = others
                .iter()
                .map(|id| format!("{} ({})", id, states[id].state))
                .collect();
            info!("Other active sessions: {} (`end <id>` to stop one)", listing.join(", "));
        }
        self.other_sessions = others;
    }

    pub fn push_error(&mut self, message: String, now: Instant) {
        let notice = ErrorNotice {
            message,
            received: Local::now(),
        };
        error!("{}", notice);
        self.notices.push_back((now + NOTICE_TTL, notice));
    }

    pub fn expire(&mut self, now: Instant) {
        while let Some((expires, _)) = self.notices.front() {
            if *expires > now {
                break;
            }
            if let Some((_, notice)) = self.notices.pop_front() {
                debug!("Error notice expired: {}", notice.message);
            }
        }
    }

    /// Surfaces new remote errors and finished macros from our snapshot.
    pub fn note_snapshot(&mut self, snapshot: &LifecycleSnapshot) {
        let message = snapshot.errors.message().map(str::to_string);
        if message != self.remote_error {
            if let Some(message) = &message {
                error!("Remote controller error: {}", message);
            }
            self.remote_error = message;
        }

        if snapshot.finished_macros.len() > self.finished_macros {
            for id in &snapshot.finished_macros[self.finished_macros..] {
                info!("Macro finished: {}", id);
            }
        }
        self.finished_macros = snapshot.finished_macros.len();
    }

    /// Forgets per-session state when a new session starts.
    pub fn reset_session(&mut self) {
        self.indicator = None;
        self.remote_error = None;
        self.finished_macros = 0;
    }
}

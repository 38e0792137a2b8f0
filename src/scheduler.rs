//! Drift-corrected tick scheduling
//!
//! The scheduler never sleeps itself. It hands out the deadline of the next
//! tick and the session's event loop waits for it alongside everything else,
//! so tick bodies never overlap and no clock is read inside this module.
//!
//! # Modes
//!
//! - **Refresh**: ticks sit on a fixed frame grid. A tick that overruns skips
//!   to the next frame boundary instead of firing late.
//! - **Fixed**: ticks aim at `anchor + n * period`. The wait is shortened by
//!   however late the current tick ran, so timer lag and tick execution time
//!   do not accumulate into drift. A tick that overran a whole period fires
//!   immediately and the grid restarts from there.

use chrono::{DateTime, Local};
use std::fmt;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_HZ: f64 = 60.0;

/// Slowest and fastest rates a tick mode accepts.
pub const MIN_HZ: f64 = 0.1;
pub const MAX_HZ: f64 = 1000.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TickMode {
    /// Display-refresh cadence at the given refresh rate.
    Refresh { hz: f64 },
    /// Fixed target frequency.
    Fixed { hz: f64 },
}

impl TickMode {
    pub fn hz(&self) -> f64 {
        match self {
            TickMode::Refresh { hz } | TickMode::Fixed { hz } => *hz,
        }
    }

    /// Nominal interval between ticks. Unusable rates fall back to 60 Hz,
    /// rates outside `MIN_HZ..=MAX_HZ` are clamped into it.
    pub fn period(&self) -> Duration {
        let hz = self.hz();
        if !(hz.is_finite() && hz > 0.0) {
            warn!("Unusable tick rate {} Hz, using {} Hz", hz, DEFAULT_HZ);
            return Duration::from_secs_f64(1.0 / DEFAULT_HZ);
        }
        let clamped = hz.clamp(MIN_HZ, MAX_HZ);
        if clamped != hz {
            warn!("Tick rate {} Hz out of range, using {} Hz", hz, clamped);
        }
        Duration::from_secs_f64(1.0 / clamped)
    }
}

impl fmt::Display for TickMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickMode::Refresh { hz } => write!(f, "display refresh ({} Hz)", hz),
            TickMode::Fixed { hz } => write!(f, "fixed {} Hz", hz),
        }
    }
}

// Deadline arithmetic never panics; an unrepresentable instant saturates to `now`.
fn after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay).unwrap_or_else(|| {
        warn!("Tick deadline out of range, firing now");
        now
    })
}

/// Pure next-delay computation for both modes.
#[derive(Debug)]
pub struct DriftTimer {
    mode: TickMode,
    period: Duration,
    // ideal start of the tick that is currently running
    anchor: Option<Instant>,
}

impl DriftTimer {
    pub fn new(mode: TickMode) -> Self {
        Self {
            mode,
            period: mode.period(),
            anchor: None,
        }
    }

    pub fn mode(&self) -> TickMode {
        self.mode
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Switches mode. An already computed deadline is kept; the new period
    /// applies from the next computed delay on.
    pub fn set_mode(&mut self, mode: TickMode) {
        self.mode = mode;
        self.period = mode.period();
        self.anchor = None;
    }

    /// Delay from `now` until the next tick. Call once at the end of each
    /// tick body.
    pub fn next_delay(&mut self, now: Instant) -> Duration {
        let Some(anchor) = self.anchor else {
            self.anchor = Some(after(now, self.period));
            return self.period;
        };

        match self.mode {
            TickMode::Fixed { .. } => {
                // late = how far this tick ran past its ideal start
                let late = now.saturating_duration_since(anchor);
                if late < self.period {
                    self.anchor = Some(after(anchor, self.period));
                    self.period - late
                } else {
                    debug!(
                        "Tick overran by {:.2} ms, resynchronizing",
                        late.as_secs_f64() * 1000.0
                    );
                    self.anchor = Some(now);
                    Duration::ZERO
                }
            }
            TickMode::Refresh { .. } => {
                let period = self.period.as_nanos().max(1);
                let into_frame = now.saturating_duration_since(anchor).as_nanos() % period;
                let wait = Duration::from_nanos((period - into_frame) as u64);
                self.anchor = Some(after(now, wait));
                wait
            }
        }
    }
}

/// Cancellable owner of the next tick deadline.
pub struct Scheduler {
    timer: DriftTimer,
    cancel: CancellationToken,
    next_tick: Option<Instant>,
}

impl Scheduler {
    pub fn new(mode: TickMode, cancel: CancellationToken) -> Self {
        Self {
            timer: DriftTimer::new(mode),
            cancel,
            next_tick: None,
        }
    }

    /// Arms the first tick to fire at `now`.
    pub fn start(&mut self, now: Instant) {
        if self.cancel.is_cancelled() {
            warn!("Refusing to start a cancelled scheduler");
            return;
        }
        info!("Scheduler started: {}", self.timer.mode());
        self.next_tick = Some(now);
    }

    /// Cancels the loop; a pending deadline will not run its body.
    pub fn stop(&mut self) {
        if !self.cancel.is_cancelled() {
            info!("Scheduler stopped");
        }
        self.cancel.cancel();
        self.next_tick = None;
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.next_tick.is_some()
    }

    pub fn next_tick(&self) -> Option<Instant> {
        self.next_tick
    }

    pub fn mode(&self) -> TickMode {
        self.timer.mode()
    }

    pub fn set_mode(&mut self, mode: TickMode) {
        info!("Tick mode changed: {} -> {}", self.timer.mode(), mode);
        self.timer.set_mode(mode);
    }

    /// Top-of-tick check. Consumes the pending deadline and reports whether
    /// the body may run.
    pub fn begin_tick(&mut self) -> bool {
        self.next_tick.take().is_some() && !self.cancel.is_cancelled()
    }

    /// Schedules the following tick, unless cancelled in the meantime.
    pub fn finish_tick(&mut self, now: Instant) {
        if self.cancel.is_cancelled() {
            return;
        }
        let delay = self.timer.next_delay(now);
        self.next_tick = Some(after(now, delay));
    }
}

/// Periodic tick statistics, logged every 30 seconds.
pub struct TickStats {
    ticks: u64,
    sent: u64,
    busy: Duration,
    last_report: DateTime<Local>,
    interval: chrono::Duration,
}

impl Default for TickStats {
    fn default() -> Self {
        Self {
            ticks: 0,
            sent: 0,
            busy: Duration::ZERO,
            last_report: Local::now(),
            interval: chrono::Duration::seconds(30),
        }
    }
}

impl TickStats {
    pub fn record(&mut self, busy: Duration, sent: bool) {
        self.ticks += 1;
        self.busy += busy;
        if sent {
            self.sent += 1;
        }

        let now = Local::now();
        if now - self.last_report > self.interval {
            let elapsed_seconds = (now - self.last_report).num_seconds().max(1);
            info!(
                "Scheduler stats: {} ticks, {} packets in {} seconds",
                self.ticks, self.sent, elapsed_seconds
            );
            info!(
                "Average: {:.2} ticks/sec, {:.3} ms/tick, {:.1}% ticks sent",
                self.ticks as f64 / elapsed_seconds as f64,
                self.busy.as_secs_f64() * 1000.0 / self.ticks as f64,
                100.0 * self.sent as f64 / self.ticks as f64
            );
            self.ticks = 0;
            self.sent = 0;
            self.busy = Duration::ZERO;
            self.last_report = now;
        }
    }
}

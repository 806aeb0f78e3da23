//! Sans-IO connection state machine.
//!
//! The machine owns every connection decision (when to open, when to back
//! off, when to give up a handle) and performs no I/O itself. The actor in
//! [`client`](crate::client) feeds it [`Input`]s and executes the
//! [`Command`]s it returns.
//!
//! Each transport handle is identified by a generation number. Giving up a
//! handle clears the live generation, so late events from it (a close that
//! was already in flight, a message racing the teardown) no longer match and
//! are ignored. This is what keeps a close on an old handle from scheduling
//! a reconnect for its replacement.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dispatch::ConnectionNotice;
use crate::lease::{ConnectionLeases, Lease};
use crate::policy::{Backoff, FlapGuard, RateLimit};

/// Lifecycle of the managed connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No handle; a retry may be pending.
    Idle,
    /// A handle is being opened.
    Connecting,
    /// The handle is open.
    Open,
    /// The server started closing the handle.
    Closing,
    /// Unmounted. Terminal.
    Closed,
}

/// Connection state as reported to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyState {
    /// An attempt is in flight.
    Connecting,
    /// Envelopes can flow.
    Open,
    /// Anything else.
    Closed,
}

impl From<ConnectionState> for ReadyState {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connecting => Self::Connecting,
            ConnectionState::Open => Self::Open,
            ConnectionState::Idle | ConnectionState::Closing | ConnectionState::Closed => {
                Self::Closed
            }
        }
    }
}

/// Where a connect attempt came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptOrigin {
    /// `connect()` or mount. Dropped when rate limited.
    Explicit,
    /// A backoff or deferral timer.
    Timer,
    /// The application came back to the foreground.
    Foreground,
    /// `reconnect()`.
    Manual,
}

/// Events fed to the machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    /// The owning context mounted.
    Mount,
    /// Explicit connect request.
    Connect,
    /// Manual reconnect: reset backoff, replace any handle.
    Reconnect,
    /// The application was foregrounded.
    Foregrounded,
    /// The pending timer fired.
    TimerFired {
        /// Token from the matching [`Command::ScheduleTimer`].
        token: u64,
    },
    /// The transport finished opening.
    Opened {
        /// Generation of the handle.
        generation: u64,
    },
    /// The transport could not be opened.
    OpenFailed {
        /// Generation of the attempt.
        generation: u64,
        /// Failure text, for logging.
        reason: String,
    },
    /// A frame arrived.
    MessageReceived {
        /// Generation of the handle.
        generation: u64,
        /// Raw frame payload.
        data: Vec<u8>,
    },
    /// The handle reported an error. Does not close it.
    ErrorOccurred {
        /// Generation of the handle.
        generation: u64,
        /// Error text, for logging.
        reason: String,
    },
    /// The server began closing the handle.
    Closing {
        /// Generation of the handle.
        generation: u64,
    },
    /// The handle closed.
    Closed {
        /// Generation of the handle.
        generation: u64,
        /// Close code, when the peer sent one.
        code: Option<u16>,
    },
    /// The owning context unmounted.
    Unmount,
}

/// Side effects requested by the machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Open a new transport handle.
    Open {
        /// Generation to tag the handle's events with.
        generation: u64,
    },
    /// Keep the handle that just opened.
    Attach {
        /// Generation of the handle.
        generation: u64,
    },
    /// Stop listening to a handle and close it.
    CloseHandle {
        /// Generation of the handle.
        generation: u64,
    },
    /// Arm the single timer, replacing any pending one.
    ScheduleTimer {
        /// Token echoed back in [`Input::TimerFired`].
        token: u64,
        /// Delay from now.
        delay: Duration,
    },
    /// Disarm the pending timer.
    CancelTimer,
    /// Hand a frame to the dispatcher.
    Deliver(Vec<u8>),
    /// Publish a connection notice.
    Notify(ConnectionNotice),
}

/// Tunables for [`ConnectionMachine`].
#[derive(Clone, Debug)]
pub struct MachineConfig {
    /// Retry after an unexpected close.
    pub auto_reconnect: bool,
    /// Minimum spacing between attempts.
    pub rate_limit: Duration,
    /// First backoff delay.
    pub backoff_base: Duration,
    /// Backoff cap.
    pub backoff_max: Duration,
    /// A notice is published once consecutive failures exceed this.
    pub failure_notice_threshold: u32,
    /// Flap-cap window.
    pub flap_window: Duration,
    /// Attempts allowed per flap window.
    pub flap_max_attempts: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            rate_limit: Duration::from_millis(3_000),
            backoff_base: Duration::from_millis(1_000),
            backoff_max: Duration::from_millis(30_000),
            failure_notice_threshold: 2,
            flap_window: Duration::from_millis(60_000),
            flap_max_attempts: 10,
        }
    }
}

/// Connection manager state. See the module docs.
#[derive(Debug)]
pub struct ConnectionMachine {
    config: MachineConfig,
    state: ConnectionState,
    leases: ConnectionLeases,
    lease: Option<Lease>,
    generation: u64,
    live: Option<u64>,
    timer_seq: u64,
    pending_timer: Option<u64>,
    backoff: Backoff,
    rate_limit: RateLimit,
    flap: FlapGuard,
    consecutive_failures: u32,
    notice_sent: bool,
}

impl ConnectionMachine {
    /// New idle machine competing for `leases`.
    pub fn new(config: MachineConfig, leases: ConnectionLeases) -> Self {
        Self {
            backoff: Backoff::new(config.backoff_base, config.backoff_max),
            rate_limit: RateLimit::new(config.rate_limit),
            flap: FlapGuard::new(config.flap_window, config.flap_max_attempts),
            config,
            state: ConnectionState::Idle,
            leases,
            lease: None,
            generation: 0,
            live: None,
            timer_seq: 0,
            pending_timer: None,
            consecutive_failures: 0,
            notice_sent: false,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current state as reported to callers.
    pub fn ready_state(&self) -> ReadyState {
        self.state.into()
    }

    /// Whether this instance owns the runtime's connection.
    pub fn holds_lease(&self) -> bool {
        self.lease.is_some()
    }

    /// Generation of the live handle, if any.
    pub fn live_generation(&self) -> Option<u64> {
        self.live
    }

    /// Failed attempts since the last successful open.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether a timer is armed.
    pub fn timer_pending(&self) -> bool {
        self.pending_timer.is_some()
    }

    /// Apply one input and return the side effects to perform, in order.
    pub fn handle(&mut self, now: Instant, input: Input) -> Vec<Command> {
        let mut out = Vec::new();
        if self.state == ConnectionState::Closed {
            debug!(?input, "input after unmount ignored");
            return out;
        }
        match input {
            Input::Mount => {
                self.lease = self.leases.try_acquire();
                if self.lease.is_none() {
                    debug!("connection owned by another instance");
                }
                self.attempt(now, AttemptOrigin::Explicit, &mut out);
            }
            Input::Connect => self.attempt(now, AttemptOrigin::Explicit, &mut out),
            Input::Reconnect => {
                info!("manual reconnect");
                self.backoff.reset();
                self.cancel_timer(&mut out);
                self.drop_handle(&mut out);
                self.attempt(now, AttemptOrigin::Manual, &mut out);
            }
            Input::Foregrounded => {
                if matches!(
                    self.state,
                    ConnectionState::Open | ConnectionState::Connecting
                ) {
                    return out;
                }
                debug!("foregrounded while disconnected, reconnecting");
                self.cancel_timer(&mut out);
                self.drop_handle(&mut out);
                self.attempt(now, AttemptOrigin::Foreground, &mut out);
            }
            Input::TimerFired { token } => {
                if self.pending_timer != Some(token) {
                    return out;
                }
                self.pending_timer = None;
                self.attempt(now, AttemptOrigin::Timer, &mut out);
            }
            Input::Opened { generation } => {
                if !self.is_live(generation) || self.state != ConnectionState::Connecting {
                    out.push(Command::CloseHandle { generation });
                    return out;
                }
                info!(generation, "connection open");
                self.state = ConnectionState::Open;
                self.backoff.reset();
                self.consecutive_failures = 0;
                self.notice_sent = false;
                out.push(Command::Attach { generation });
                out.push(Command::Notify(ConnectionNotice::Connected));
            }
            Input::OpenFailed { generation, reason } => {
                if !self.is_live(generation) {
                    return out;
                }
                warn!(generation, %reason, "connection attempt failed");
                self.live = None;
                self.state = ConnectionState::Idle;
                self.record_failure(&mut out);
                self.schedule_retry(&mut out);
            }
            Input::MessageReceived { generation, data } => {
                if self.is_live(generation) && self.state == ConnectionState::Open {
                    out.push(Command::Deliver(data));
                }
            }
            Input::ErrorOccurred { generation, reason } => {
                if self.is_live(generation) {
                    warn!(generation, %reason, "connection error");
                }
            }
            Input::Closing { generation } => {
                if self.is_live(generation) && self.state == ConnectionState::Open {
                    self.state = ConnectionState::Closing;
                }
            }
            Input::Closed { generation, code } => {
                if !self.is_live(generation) {
                    return out;
                }
                let was_connecting = self.state == ConnectionState::Connecting;
                info!(generation, ?code, "connection closed");
                self.live = None;
                self.state = ConnectionState::Idle;
                out.push(Command::CloseHandle { generation });
                if was_connecting {
                    self.record_failure(&mut out);
                }
                self.schedule_retry(&mut out);
            }
            Input::Unmount => {
                self.cancel_timer(&mut out);
                self.drop_handle(&mut out);
                self.lease = None;
                self.state = ConnectionState::Closed;
                debug!("connection manager unmounted");
            }
        }
        out
    }

    fn is_live(&self, generation: u64) -> bool {
        self.live == Some(generation)
    }

    fn attempt(&mut self, now: Instant, origin: AttemptOrigin, out: &mut Vec<Command>) {
        if self.live.is_some() {
            debug!(?origin, "already connected or connecting");
            return;
        }
        if self.lease.is_none() {
            self.lease = self.leases.try_acquire();
            if self.lease.is_none() {
                debug!(?origin, "no connection lease, skipping connect");
                return;
            }
        }
        if let Some(remaining) = self.rate_limit.remaining(now) {
            if origin == AttemptOrigin::Explicit {
                debug!(remaining_ms = remaining.as_millis(), "connect rate limited, dropped");
            } else {
                debug!(?origin, delay_ms = remaining.as_millis(), "connect rate limited, deferred");
                self.schedule_timer(remaining, out);
            }
            return;
        }
        if let Some(wait) = self.flap.wait(now) {
            warn!(delay_ms = wait.as_millis(), "too many connection attempts, deferring");
            self.schedule_timer(wait, out);
            return;
        }

        self.rate_limit.record(now);
        self.flap.record(now);
        self.cancel_timer(out);
        self.generation += 1;
        self.live = Some(self.generation);
        self.state = ConnectionState::Connecting;
        debug!(?origin, generation = self.generation, "opening connection");
        out.push(Command::Open {
            generation: self.generation,
        });
    }

    fn record_failure(&mut self, out: &mut Vec<Command>) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures > self.config.failure_notice_threshold && !self.notice_sent {
            self.notice_sent = true;
            out.push(Command::Notify(ConnectionNotice::Unavailable {
                consecutive_failures: self.consecutive_failures,
            }));
        }
    }

    fn schedule_retry(&mut self, out: &mut Vec<Command>) {
        if !self.config.auto_reconnect {
            debug!("auto-reconnect disabled");
            return;
        }
        let delay = self.backoff.next_delay();
        info!(
            attempt = self.backoff.attempts(),
            delay_ms = delay.as_millis(),
            "scheduling reconnect"
        );
        self.schedule_timer(delay, out);
    }

    fn schedule_timer(&mut self, delay: Duration, out: &mut Vec<Command>) {
        self.timer_seq += 1;
        self.pending_timer = Some(self.timer_seq);
        out.push(Command::ScheduleTimer {
            token: self.timer_seq,
            delay,
        });
    }

    fn cancel_timer(&mut self, out: &mut Vec<Command>) {
        if self.pending_timer.take().is_some() {
            out.push(Command::CancelTimer);
        }
    }

    fn drop_handle(&mut self, out: &mut Vec<Command>) {
        if let Some(generation) = self.live.take() {
            out.push(Command::CloseHandle { generation });
        }
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Idle;
        }
    }
}

// Connection state machine and reconnect schedule.
//
// Both are pure: the connection task feeds them what happened and acts on
// what they return, which keeps the reconnect policy testable without a
// socket.

use std::time::Duration;

use thiserror::Error;

/// Tunables for the realtime channel.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt. Default: 1s.
    pub initial_delay: Duration,
    /// Upper bound on the reconnect delay. Default: 300s.
    pub max_delay: Duration,
    /// Consecutive failed sessions before giving up. Default: 50.
    pub max_failures: u32,
    /// Interval between heartbeat pings while connected. Default: 30s.
    pub ping_interval: Duration,
    /// How long to wait for a pong before dropping the socket. Default: 10s.
    pub pong_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(300_000),
            max_failures: 50,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

// ── State machine ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RealtimeState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting {
        attempt: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `connect()` was called.
    Connect,
    /// The socket handshake completed.
    Opened,
    /// The session ended (or never opened); a retry is scheduled.
    Closed { attempt: u32 },
    /// The reconnect delay elapsed.
    Retry,
    /// Too many consecutive failures.
    GiveUp,
    /// `disconnect()` was called.
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal realtime transition {transition:?} from {from:?}")]
pub struct IllegalTransition {
    pub from: RealtimeState,
    pub transition: Transition,
}

impl RealtimeState {
    /// Apply `transition`, or reject it if the table has no such edge.
    pub fn on(self, transition: Transition) -> Result<Self, IllegalTransition> {
        use RealtimeState::{Connected, Connecting, Disconnected, Reconnecting};

        let next = match (self, transition) {
            (_, Transition::Disconnect) => Disconnected,
            (Disconnected, Transition::Connect) => Connecting,
            (Connecting, Transition::Opened) => Connected,
            (Connecting | Connected, Transition::Closed { attempt }) => Reconnecting { attempt },
            (Reconnecting { .. }, Transition::Retry) => Connecting,
            (Connecting | Connected | Reconnecting { .. }, Transition::GiveUp) => Disconnected,
            (from, transition) => return Err(IllegalTransition { from, transition }),
        };
        Ok(next)
    }

    pub fn is_active(self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

// ── Reconnect schedule ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Wait `delay`, then try again. `attempt` counts from 1.
    Retry { delay: Duration, attempt: u32 },
    /// Stop reconnecting.
    GiveUp { failures: u32 },
}

/// Doubling delay with a cap, plus a consecutive-failure breaker.
#[derive(Debug, Clone)]
pub struct ReconnectSchedule {
    initial: Duration,
    max: Duration,
    max_failures: u32,
    delay: Duration,
    failures: u32,
}

impl ReconnectSchedule {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            initial: config.initial_delay,
            max: config.max_delay,
            max_failures: config.max_failures,
            delay: config.initial_delay,
            failures: 0,
        }
    }

    /// A session opened: reset delay and failure count.
    pub fn on_open(&mut self) {
        self.delay = self.initial;
        self.failures = 0;
    }

    /// A session ended. Returns the next step and advances the schedule.
    pub fn on_close(&mut self) -> Backoff {
        if self.failures >= self.max_failures {
            return Backoff::GiveUp {
                failures: self.failures,
            };
        }
        let delay = self.delay;
        self.delay = self.delay.saturating_mul(2).min(self.max);
        self.failures += 1;
        Backoff::Retry {
            delay,
            attempt: self.failures,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

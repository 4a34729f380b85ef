//! Keepalive state machine for authenticated connections.
//!
//! ```text
//! Alive   --tick--> (emit ping, pending)  --> Pending
//! Pending --pong-->                       --> Alive
//! Pending --tick--> (close "Ping timeout")
//! ```
//!
//! Ticks fire at a randomized interval in [`PING_LOW`]..[`PING_HIGH`] to
//! avoid ping-storm synchronization across connections; the jitter is the
//! caller's job (the state machine is pure).

use std::time::Duration;

/// Lower bound of the keepalive tick interval.
pub const PING_LOW: Duration = Duration::from_secs(45);

/// Upper bound of the keepalive tick interval.
pub const PING_HIGH: Duration = Duration::from_secs(60);

/// Time an unauthenticated connection may idle before being closed.
pub const SIGNON_TIMEOUT: Duration = Duration::from_secs(60);

/// Close reason when two ticks pass without a pong.
pub const PING_TIMEOUT_REASON: &str = "Ping timeout";

/// Liveness of an authenticated connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Liveness {
    /// A pong has been seen since the last ping.
    #[default]
    Alive,
    /// A ping is outstanding.
    Pending,
}

/// What the connection must do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveAction {
    /// Emit a ping and reschedule.
    Ping,
    /// Close the connection with [`PING_TIMEOUT_REASON`].
    Close,
}

/// Per-connection keepalive state.
#[derive(Debug, Default)]
pub struct Keepalive {
    state: Liveness,
}

impl Keepalive {
    /// A fresh machine in [`Liveness::Alive`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> Liveness {
        self.state
    }

    /// Process a tick.
    pub fn tick(&mut self) -> KeepaliveAction {
        match self.state {
            Liveness::Alive => {
                self.state = Liveness::Pending;
                KeepaliveAction::Ping
            },
            Liveness::Pending => KeepaliveAction::Close,
        }
    }

    /// Process a received pong.
    pub fn pong(&mut self) {
        self.state = Liveness::Alive;
    }
}

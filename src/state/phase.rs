//! Session lifecycle state machine.
//!
//! Tracks which phase the local session is in and validates transitions.
//!
//! # State Diagram
//!
//! ```text
//!                 host
//!   ┌──────┐ ───────────────▶ ┌─────────┐
//!   │ Idle │                  │ Hosting │
//!   └──┬───┘ ◀─────────────── └─────────┘
//!      │  ▲      disconnect
//!      │  │
//!      │  │ disconnect / settle
//! join │  └──────────────┬──────────────┬─────────────┐
//!      ▼                 │              │             │
//! ┌────────────┐  connected  ┌───────────┐            │
//! │ Connecting │────────────▶│ Connected │            │
//! └─────┬──────┘             └───────────┘            │
//!       │ transport failed        ┌────────┐          │
//!       ├────────────────────────▶│ Failed │──────────┤
//!       │ deadline expired        └────────┘          │
//!       │                         ┌──────────┐        │
//!       └────────────────────────▶│ TimedOut │────────┘
//!                                 └──────────┘
//! ```
//!
//! `Failed` and `TimedOut` are transient: the controller settles them back to
//! `Idle` within the same call that entered them.

use std::fmt;

use serde::Serialize;

/// Which side of the session this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionRole {
    /// No session attached
    Unattached,
    /// Authoritative host; owns spawn points and the participant registry
    Authority,
    /// Joining or joined client
    Participant,
}

/// Lifecycle phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SessionPhase {
    #[default]
    Idle,
    Hosting,
    Connecting,
    Connected,
    Failed,
    TimedOut,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Hosting => "hosting",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    /// Role implied by the phase.
    pub fn role(&self) -> SessionRole {
        match self {
            Self::Hosting => SessionRole::Authority,
            Self::Connecting | Self::Connected => SessionRole::Participant,
            Self::Idle | Self::Failed | Self::TimedOut => SessionRole::Unattached,
        }
    }

    /// Check if a transport handle is expected to be open.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Hosting | Self::Connecting | Self::Connected)
    }

    /// Check if the phase must be settled back to `Idle`.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State transition events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Host,
    Join,
    TransportConnected,
    TransportFailed,
    DeadlineExpired,
    Settle,
    Disconnect,
}

/// Error when a lifecycle transition is invalid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition from {from} via {event:?}: {reason}")]
pub struct InvalidTransition {
    pub from: SessionPhase,
    pub event: LifecycleEvent,
    pub reason: &'static str,
}

/// Phase holder that only moves along valid edges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseMachine {
    phase: SessionPhase,
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn role(&self) -> SessionRole {
        self.phase.role()
    }

    /// Apply an event, returning the new machine or an error.
    pub fn apply(&self, event: LifecycleEvent) -> Result<Self, InvalidTransition> {
        Ok(Self {
            phase: self.transition(event)?,
        })
    }

    /// Apply an event in place, returning error if invalid.
    pub fn apply_mut(&mut self, event: LifecycleEvent) -> Result<(), InvalidTransition> {
        let next = self.transition(event)?;
        tracing::debug!(from = %self.phase, to = %next, ?event, "session phase transition");
        self.phase = next;
        Ok(())
    }

    fn transition(&self, event: LifecycleEvent) -> Result<SessionPhase, InvalidTransition> {
        use LifecycleEvent::*;
        use SessionPhase::*;

        let invalid = |reason: &'static str| InvalidTransition {
            from: self.phase,
            event,
            reason,
        };

        match (self.phase, event) {
            (Idle, Host) => Ok(Hosting),
            (_, Host) => Err(invalid("Session already active")),

            (Idle, Join) => Ok(Connecting),
            (_, Join) => Err(invalid("Session already active")),

            (Connecting, TransportConnected) => Ok(Connected),
            (_, TransportConnected) => Err(invalid("No pending connection")),

            (Connecting, TransportFailed) => Ok(Failed),
            (_, TransportFailed) => Err(invalid("No pending connection")),

            (Connecting, DeadlineExpired) => Ok(TimedOut),
            (_, DeadlineExpired) => Err(invalid("No pending connection")),

            (Failed | TimedOut, Settle) => Ok(Idle),
            (_, Settle) => Err(invalid("Nothing to settle")),

            (Idle, Disconnect) => Err(invalid("Already idle")),
            (_, Disconnect) => Ok(Idle),
        }
    }
}

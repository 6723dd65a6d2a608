//! Lifecycle notifications for presentation layers.
//!
//! Subscribers register a callback and get a `SubscriptionId` back; the
//! controller drops every subscriber when it shuts down. Emitting with nobody
//! subscribed does nothing.

use std::fmt;

/// Why a join attempt ended without a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    /// No answer from the transport before the deadline
    #[error("connection timed out")]
    Timeout,

    /// The transport reported the attempt as failed
    #[error("remote connection failed")]
    RemoteFailure,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RemoteFailure => "remote_failure",
        }
    }
}

/// Observable lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectedToAuthority {
        address: String,
        port: u16,
    },
    ConnectionFailed {
        reason: FailureReason,
        address: String,
        port: u16,
    },
}

impl SessionEvent {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. })
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::ConnectedToAuthority { address, port } => serde_json::json!({
                "type": "connected_to_authority",
                "address": address,
                "port": port
            }),
            Self::ConnectionFailed {
                reason,
                address,
                port,
            } => serde_json::json!({
                "type": "connection_failed",
                "reason": reason.as_str(),
                "address": address,
                "port": port
            }),
        }
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectedToAuthority { address, port } => {
                write!(f, "connected to {}:{}", address, port)
            }
            Self::ConnectionFailed {
                reason,
                address,
                port,
            } => write!(f, "connection to {}:{} failed: {}", address, port, reason),
        }
    }
}

/// Handle returned by `SessionEvents::subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn FnMut(&SessionEvent)>;

/// Subscriber list for lifecycle events.
#[derive(Default)]
pub struct SessionEvents {
    subscribers: Vec<(SubscriptionId, Callback)>,
    next_id: u64,
}

impl SessionEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: FnMut(&SessionEvent) + 'static,
    {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    /// Deliver an event to every subscriber, in subscription order.
    pub fn emit(&mut self, event: &SessionEvent) {
        tracing::debug!(%event, subscribers = self.subscribers.len(), "emitting session event");
        for (_, callback) in &mut self.subscribers {
            callback(event);
        }
    }

    /// Drop every subscriber.
    pub fn clear(&mut self) {
        self.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl fmt::Debug for SessionEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEvents")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// The different things a chat user can do that reach the bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    /// The user joined a channel the bot is in.
    Joined,
    /// The user was seen active somewhere.
    Sighted,
    PrivateMessage { text: String },
    PrivateAction { action: String },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Joined => "Joined",
            EventKind::Sighted => "Sighted",
            EventKind::PrivateMessage { .. } => "PrivateMessage",
            EventKind::PrivateAction { .. } => "PrivateAction",
        }
    }

    /// Interactive events expect a reply and go through admission.
    pub fn is_interactive(&self) -> bool {
        match self {
            EventKind::PrivateMessage { .. } | EventKind::PrivateAction { .. } => true,
            EventKind::Joined | EventKind::Sighted => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub event_id: u64,
    pub nick: String,
    /// Milliseconds since the epoch at which the event was received.
    pub timestamp: i64,
    pub kind: EventKind,
}

impl ChatEvent {
    pub fn new(event_id: u64, nick: impl Into<String>, timestamp: i64, kind: EventKind) -> Self {
        Self {
            event_id,
            nick: nick.into(),
            timestamp,
            kind,
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.kind.is_interactive()
    }
}

/// An event as it arrives from the outside, before it has been assigned an id.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundEvent {
    pub nick: String,
    pub kind: EventKind,
}

/// Hands out strictly increasing event ids.
#[derive(Debug)]
pub struct EventIdGenerator {
    next: AtomicU64,
}

impl EventIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    pub fn assign(&self, inbound: InboundEvent, timestamp: i64) -> ChatEvent {
        ChatEvent::new(self.next_id(), inbound.nick, timestamp, inbound.kind)
    }
}

impl Default for EventIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// What a rejected or processed event produces for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content")]
pub enum Response {
    Text(String),
    None,
}

impl Response {
    pub fn text(message: impl Into<String>) -> Self {
        Response::Text(message.into())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Response::None)
    }
}

// Shared helpers for our tests.
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::clock::Clock;
use crate::event::{ChatEvent, EventKind};

/// A clock that only moves when told to.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn at(millis: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(millis)),
        }
    }

    pub fn set_secs(&self, secs: i64) {
        self.now.store(secs * 1000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

pub fn message(event_id: u64, nick: &str, text: &str) -> ChatEvent {
    ChatEvent::new(
        event_id,
        nick,
        0,
        EventKind::PrivateMessage {
            text: text.to_string(),
        },
    )
}

pub fn joined(event_id: u64, nick: &str) -> ChatEvent {
    ChatEvent::new(event_id, nick, 0, EventKind::Joined)
}

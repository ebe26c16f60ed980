//! Live activity feed. Nobody listening is fine.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[cfg_attr(test, mockall::automock)]
pub trait LiveActivity: Send + Sync {
    fn propagate_received_message(&self, nick: &str, event_id: u64);
    fn propagate_sent_message(&self, nick: &str, event_id: u64, ping: Option<i32>);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum LiveActivityMessage {
    #[serde(rename = "RECEIVED")]
    Received {
        #[serde(rename = "eventId")]
        event_id: u64,
        #[serde(rename = "ircUserName")]
        irc_user_name: String,
    },
    #[serde(rename = "SENT")]
    Sent {
        #[serde(rename = "eventId")]
        event_id: u64,
        #[serde(rename = "ircUserName")]
        irc_user_name: String,
        ping: Option<i32>,
    },
}

#[derive(Clone)]
pub struct BroadcastLiveActivity {
    sender: broadcast::Sender<String>,
}

impl BroadcastLiveActivity {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receives the JSON encoded messages.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    fn publish(&self, message: LiveActivityMessage) {
        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                log::error!("Failed to encode live activity {:?}: {}", message, e);
                return;
            }
        };
        if self.sender.send(json).is_err() {
            log::trace!("No live activity subscribers");
        }
    }
}

impl LiveActivity for BroadcastLiveActivity {
    fn propagate_received_message(&self, nick: &str, event_id: u64) {
        self.publish(LiveActivityMessage::Received {
            event_id,
            irc_user_name: nick.to_string(),
        });
    }

    fn propagate_sent_message(&self, nick: &str, event_id: u64, ping: Option<i32>) {
        self.publish(LiveActivityMessage::Sent {
            event_id,
            irc_user_name: nick.to_string(),
            ping,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_received_message_is_broadcast_as_json() {
        let live = BroadcastLiveActivity::new(8);
        let mut first = live.subscribe();
        let mut second = live.subscribe();

        live.propagate_received_message("alice", 42);

        let expected = r#"{"@type":"RECEIVED","eventId":42,"ircUserName":"alice"}"#;
        assert_eq!(first.recv().await.unwrap(), expected);
        assert_eq!(second.recv().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_sent_message_round_trips() {
        let live = BroadcastLiveActivity::new(8);
        let mut receiver = live.subscribe();
        live.propagate_sent_message("bob", 7, Some(120));
        let decoded: LiveActivityMessage =
            serde_json::from_str(&receiver.recv().await.unwrap()).unwrap();
        assert_eq!(
            decoded,
            LiveActivityMessage::Sent {
                event_id: 7,
                irc_user_name: "bob".to_string(),
                ping: Some(120),
            }
        );
    }

    #[test]
    fn test_publishing_without_subscribers_is_fine() {
        let live = BroadcastLiveActivity::new(8);
        live.propagate_received_message("nobody", 1);
    }
}

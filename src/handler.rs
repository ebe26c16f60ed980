use async_trait::async_trait;

use crate::error::HandlerError;
use crate::event::{ChatEvent, EventKind, Response};
use crate::worker::enter_current;

/// Executes whatever an event asks for. Runs inside a worker, after admission.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &ChatEvent) -> Result<Response, HandlerError>;
}

/// Acknowledges events without producing a reply. Used when no command
/// backend is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcknowledgeHandler;

#[async_trait]
impl EventHandler for AcknowledgeHandler {
    async fn handle(&self, event: &ChatEvent) -> Result<Response, HandlerError> {
        let _frame = enter_current(module_path!(), "acknowledge");
        match &event.kind {
            EventKind::PrivateMessage { text } => {
                log::info!("Message {} from {}: {}", event.event_id, event.nick, text)
            }
            EventKind::PrivateAction { action } => {
                log::info!("Action {} from {}: {}", event.event_id, event.nick, action)
            }
            EventKind::Joined => log::info!("{} joined", event.nick),
            EventKind::Sighted => log::debug!("{} sighted", event.nick),
        }
        Ok(Response::None)
    }
}

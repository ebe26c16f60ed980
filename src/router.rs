use std::sync::Arc;

use crate::clock::Clock;
use crate::concurrency::AdmissionGate;
use crate::diagnostics::{DiagnosticsPolicy, QueueSizes};
use crate::error::RouterError;
use crate::event::{ChatEvent, EventKind, Response};
use crate::live::LiveActivity;
use crate::queue::{EventQueue, ResponseQueue};

#[derive(Debug, Clone, PartialEq)]
pub enum Routing {
    /// Put on the event queue for processing.
    Forwarded,
    /// Turned away; this is what was published for it.
    Answered(Response),
}

/// First stop for every incoming chat event. Joins and sightings pass
/// straight through; messages and actions must be admitted first.
pub struct EventRouter {
    gate: AdmissionGate,
    policy: DiagnosticsPolicy,
    events: Arc<dyn EventQueue>,
    responses: Arc<dyn ResponseQueue>,
    live_activity: Arc<dyn LiveActivity>,
    clock: Arc<dyn Clock>,
}

impl EventRouter {
    pub fn new(
        gate: AdmissionGate,
        policy: DiagnosticsPolicy,
        events: Arc<dyn EventQueue>,
        responses: Arc<dyn ResponseQueue>,
        live_activity: Arc<dyn LiveActivity>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gate,
            policy,
            events,
            responses,
            live_activity,
            clock,
        }
    }

    pub async fn on_event(&self, event: ChatEvent) -> Result<Routing, RouterError> {
        match &event.kind {
            EventKind::PrivateMessage { text } => {
                self.live_activity
                    .propagate_received_message(&event.nick, event.event_id);
                log::debug!("received: {}", text);
            }
            EventKind::PrivateAction { action } => {
                self.live_activity
                    .propagate_received_message(&event.nick, event.event_id);
                log::debug!("action: {}", action);
            }
            EventKind::Joined | EventKind::Sighted => {}
        }

        let permit = if event.is_interactive() {
            match self.gate.enter(&event.nick, event.event_id) {
                Some(permit) => Some(permit),
                None => return self.answer_in_use(event).await,
            }
        } else {
            None
        };

        let event_id = event.event_id;
        // On failure the permit is dropped here, so the user is not locked out.
        self.events
            .on_event(event)
            .await
            .map_err(|source| RouterError::Forward { event_id, source })?;
        if let Some(permit) = permit {
            permit.hand_off();
        }
        Ok(Routing::Forwarded)
    }

    async fn answer_in_use(&self, event: ChatEvent) -> Result<Routing, RouterError> {
        let response = self.handle_in_use(&event);
        self.responses
            .on_response(response.clone(), &event)
            .await
            .map_err(|source| RouterError::Publish {
                event_id: event.event_id,
                source,
            })?;
        Ok(Routing::Answered(response))
    }

    fn handle_in_use(&self, event: &ChatEvent) -> Response {
        match self.gate.get(&event.nick) {
            Some(record) => {
                let queues = QueueSizes {
                    events: self.events.size(),
                    responses: self.responses.size(),
                };
                self.policy
                    .evaluate(event, &record, self.clock.now_millis(), queues)
            }
            // The running request finished in the meantime.
            None => Response::None,
        }
    }
}

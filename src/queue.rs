//! Event and response queues, bounded by the prefetch limit.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use crate::error::QueueError;
use crate::event::{ChatEvent, Response};

const EVENT_QUEUE: &str = "event";
const RESPONSE_QUEUE: &str = "response";

/// Downstream processing of admitted and non-interactive events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventQueue: Send + Sync {
    async fn on_event(&self, event: ChatEvent) -> Result<(), QueueError>;
    /// Number of events waiting to be picked up.
    fn size(&self) -> usize;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResponseQueue: Send + Sync {
    async fn on_response(&self, response: Response, event: &ChatEvent) -> Result<(), QueueError>;
    fn size(&self) -> usize;
}

/// A response together with the event it answers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingResponse {
    pub response: Response,
    pub event: ChatEvent,
}

/// Fires once when the service starts shutting down.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn wait(&mut self) {
        let fired = self.rx.wait_for(|triggered| *triggered).await.is_ok();
        if !fired {
            // The trigger is gone without firing, so it never will.
            std::future::pending::<()>().await;
        }
    }
}

async fn send_interruptibly<T>(
    sender: &mpsc::Sender<T>,
    value: T,
    shutdown: &Shutdown,
    queue: &'static str,
) -> Result<(), QueueError> {
    let value = match sender.try_send(value) {
        Ok(()) => return Ok(()),
        Err(TrySendError::Closed(_)) => return Err(QueueError::Closed(queue)),
        Err(TrySendError::Full(value)) => value,
    };
    // Only a send that has to wait for capacity can be interrupted.
    let mut shutdown = shutdown.clone();
    tokio::select! {
        biased;
        _ = shutdown.wait() => Err(QueueError::Interrupted(queue)),
        sent = sender.send(value) => sent.map_err(|_| QueueError::Closed(queue)),
    }
}

fn waiting<T>(sender: &mpsc::Sender<T>) -> usize {
    sender.max_capacity() - sender.capacity()
}

#[derive(Clone)]
pub struct ChannelEventQueue {
    sender: mpsc::Sender<ChatEvent>,
    shutdown: Shutdown,
}

impl ChannelEventQueue {
    pub fn new(prefetch: usize, shutdown: Shutdown) -> (Self, mpsc::Receiver<ChatEvent>) {
        let (sender, receiver) = mpsc::channel(prefetch);
        (Self { sender, shutdown }, receiver)
    }
}

#[async_trait]
impl EventQueue for ChannelEventQueue {
    async fn on_event(&self, event: ChatEvent) -> Result<(), QueueError> {
        log::debug!("Queueing event {} from {}", event.event_id, event.nick);
        send_interruptibly(&self.sender, event, &self.shutdown, EVENT_QUEUE).await
    }

    fn size(&self) -> usize {
        waiting(&self.sender)
    }
}

#[derive(Clone)]
pub struct ChannelResponseQueue {
    sender: mpsc::Sender<OutgoingResponse>,
    shutdown: Shutdown,
}

impl ChannelResponseQueue {
    pub fn new(prefetch: usize, shutdown: Shutdown) -> (Self, mpsc::Receiver<OutgoingResponse>) {
        let (sender, receiver) = mpsc::channel(prefetch);
        (Self { sender, shutdown }, receiver)
    }
}

#[async_trait]
impl ResponseQueue for ChannelResponseQueue {
    async fn on_response(&self, response: Response, event: &ChatEvent) -> Result<(), QueueError> {
        if response.is_none() {
            log::debug!("Nothing to send for event {}", event.event_id);
            return Ok(());
        }
        let outgoing = OutgoingResponse {
            response,
            event: event.clone(),
        };
        send_interruptibly(&self.sender, outgoing, &self.shutdown, RESPONSE_QUEUE).await
    }

    fn size(&self) -> usize {
        waiting(&self.sender)
    }
}

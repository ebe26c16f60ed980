use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::concurrency::{AdmissionGate, AdmissionPermit};
use crate::event::ChatEvent;
use crate::handler::EventHandler;
use crate::queue::ResponseQueue;
use crate::worker::WorkerHandle;

/// Workers draining the event queue. Each event is handled in its own task so
/// a panicking handler releases its user and the worker carries on.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        count: usize,
        receiver: mpsc::Receiver<ChatEvent>,
        gate: AdmissionGate,
        handler: Arc<dyn EventHandler>,
        responses: Arc<dyn ResponseQueue>,
    ) -> Self {
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..count)
            .map(|index| {
                let worker = Worker {
                    index,
                    receiver: receiver.clone(),
                    gate: gate.clone(),
                    handler: handler.clone(),
                    responses: responses.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        log::info!("Started {} workers", count);
        Self { workers }
    }

    /// Waits for all workers. They stop once the event queue is closed and
    /// drained.
    pub async fn join(self) {
        for worker in self.workers {
            if let Err(e) = worker.await {
                log::error!("Worker ended abnormally: {}", e);
            }
        }
    }
}

#[derive(Clone)]
struct Worker {
    index: usize,
    receiver: Arc<Mutex<mpsc::Receiver<ChatEvent>>>,
    gate: AdmissionGate,
    handler: Arc<dyn EventHandler>,
    responses: Arc<dyn ResponseQueue>,
}

impl Worker {
    async fn run(self) {
        loop {
            let next = self.receiver.lock().await.recv().await;
            let Some(event) = next else {
                log::info!("Worker {} stopping, event queue closed", self.index);
                return;
            };
            let event_id = event.event_id;
            let this = self.clone();
            if let Err(e) = tokio::spawn(async move { this.process(event).await }).await {
                log::error!("Processing event {} failed: {}", event_id, e);
            }
        }
    }

    async fn process(&self, event: ChatEvent) {
        let handle = WorkerHandle::new(format!("worker-{}/event-{}", self.index, event.event_id));
        handle.scope(self.process_in_scope(&handle, &event)).await;
        handle.finish();
    }

    async fn process_in_scope(&self, handle: &WorkerHandle, event: &ChatEvent) {
        let _frame = handle.enter(module_path!(), format!("processing event {}", event.event_id));
        let _permit = if event.is_interactive() {
            if !self
                .gate
                .attach_worker(&event.nick, event.event_id, handle.clone())
            {
                log::warn!(
                    "Event {} from {} is not the running episode",
                    event.event_id,
                    event.nick
                );
            }
            Some(AdmissionPermit::adopt(&self.gate, &event.nick, event.event_id))
        } else {
            None
        };

        match self.handler.handle(event).await {
            Ok(response) => {
                if let Err(e) = self.responses.on_response(response, event).await {
                    log::error!("Failed to publish response to event {}: {}", event.event_id, e);
                }
            }
            Err(e) => log::error!(
                "Failed to handle event {} from {}: {}",
                event.event_id,
                event.nick,
                e
            ),
        }
    }
}

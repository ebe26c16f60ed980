use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

// Use our library crate
use chatgate::clock::{Clock, SystemClock};
use chatgate::config::Config;
use chatgate::event::{EventIdGenerator, InboundEvent};
use chatgate::handler::AcknowledgeHandler;
use chatgate::live::{BroadcastLiveActivity, LiveActivity};
use chatgate::pool::WorkerPool;
use chatgate::queue::{
    ChannelEventQueue, ChannelResponseQueue, OutgoingResponse, ResponseQueue, shutdown_channel,
};
use chatgate::{AdmissionGate, DiagnosticsPolicy, EventRouter};

const USAGE: &str = indoc::indoc! { r#"
    chatgate: per-user admission in front of a chat bot.

    Reads one JSON event per line from stdin, for example
        {"nick":"alice","kind":{"type":"PrivateMessage","text":"!recommend"}}
    and writes the responses it produces to stdout, one JSON object per line.

    Configuration is read from the environment (and a .env file):
        CHATGATE_PREFETCH                 queue capacity (100)
        CHATGATE_WORKERS                  downstream workers (4)
        CHATGATE_WARN_AFTER_SECS          "please wait" threshold (5)
        CHATGATE_ESCALATE_AFTER_ATTEMPTS  attempts before escalating (3)
        CHATGATE_LIVE_ACTIVITY_CAPACITY   live feed buffer (1024)
"# };

async fn route_line(router: &EventRouter, ids: &EventIdGenerator, clock: &dyn Clock, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let inbound: InboundEvent = match serde_json::from_str(line) {
        Ok(inbound) => inbound,
        Err(e) => {
            log::warn!("Ignoring malformed event {:?}: {}", line, e);
            return;
        }
    };
    let event = ids.assign(inbound, clock.now_millis());
    let event_id = event.event_id;
    match router.on_event(event).await {
        Ok(routing) => log::debug!("Event {}: {:?}", event_id, routing),
        Err(e) => log::error!("{}", e),
    }
}

async fn write_responses(
    mut receiver: tokio::sync::mpsc::Receiver<OutgoingResponse>,
    live_activity: Arc<BroadcastLiveActivity>,
) {
    let mut stdout = tokio::io::stdout();
    while let Some(outgoing) = receiver.recv().await {
        let mut line = match serde_json::to_string(&outgoing) {
            Ok(line) => line,
            Err(e) => {
                log::error!("Failed to encode response to event {}: {}", outgoing.event.event_id, e);
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = stdout.write_all(line.as_bytes()).await {
            log::error!("Failed to write response: {}", e);
            return;
        }
        if let Err(e) = stdout.flush().await {
            log::error!("Failed to flush responses: {}", e);
            return;
        }
        live_activity.propagate_sent_message(&outgoing.event.nick, outgoing.event.event_id, None);
    }
}

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    if std::env::args().any(|arg| arg == "--help" || arg == "-h") {
        print!("{}", USAGE);
        return;
    }

    let version = env!("CARGO_PACKAGE_VERSION");
    log::info!("Starting chatgate version {}", version);

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(2);
        }
    };
    log::info!("{:?}", config);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (trigger, mut shutdown) = shutdown_channel();
    let gate = AdmissionGate::new(clock.clone());

    let (events, event_receiver) = ChannelEventQueue::new(config.prefetch, shutdown.clone());
    let (responses, response_receiver) =
        ChannelResponseQueue::new(config.prefetch, shutdown.clone());
    let responses: Arc<dyn ResponseQueue> = Arc::new(responses);
    let live_activity = Arc::new(BroadcastLiveActivity::new(config.live_activity_capacity));

    let mut feed = live_activity.subscribe();
    tokio::spawn(async move {
        loop {
            match feed.recv().await {
                Ok(message) => log::trace!("live activity: {}", message),
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Live activity feed skipped {} messages", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let writer = tokio::spawn(write_responses(response_receiver, live_activity.clone()));
    let pool = WorkerPool::spawn(
        config.workers,
        event_receiver,
        gate.clone(),
        Arc::new(AcknowledgeHandler),
        responses.clone(),
    );
    let router = EventRouter::new(
        gate.clone(),
        DiagnosticsPolicy::new(gate.clone(), config.diagnostics.clone()),
        Arc::new(events),
        responses,
        live_activity,
        clock.clone(),
    );

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, shutting down");
            trigger.trigger();
        }
    });

    let ids = EventIdGenerator::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => route_line(&router, &ids, clock.as_ref(), &line).await,
                Ok(None) => break,
                Err(e) => {
                    log::error!("Failed to read events: {}", e);
                    break;
                }
            },
        }
    }

    if shutdown.is_triggered() {
        log::info!("Draining queued events before exit");
    } else {
        log::info!("End of input, draining queued events");
    }
    // Closing the event queue lets the workers drain it and stop.
    drop(router);
    pool.join().await;
    if let Err(e) = writer.await {
        log::error!("Response writer ended abnormally: {}", e);
    }
    log::info!("Stopped with {} requests still in flight", gate.len());
}

use crate::concurrency::{AdmissionGate, AdmissionRecord};
use crate::config::DiagnosticsConfig;
use crate::event::{ChatEvent, Response};
use crate::worker::Frame;

pub const PLEASE_WAIT: &str = "Just a second...";
pub const ESCALATION: &str = "[http://i.imgur.com/Ykfua8r.png ...]";

/// Only frames pushed from our own modules end up in the logs.
const OWN_MODULES: &str = env!("CARGO_CRATE_NAME");

/// Queue depths at the time of the decision, logged for episodes that have
/// not been picked up by a worker yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueSizes {
    pub events: usize,
    pub responses: usize,
}

#[derive(Clone)]
pub struct DiagnosticsPolicy {
    gate: AdmissionGate,
    config: DiagnosticsConfig,
}

impl DiagnosticsPolicy {
    pub fn new(gate: AdmissionGate, config: DiagnosticsConfig) -> Self {
        Self { gate, config }
    }

    /// Decides the response for `event`, rejected while `record` was running.
    ///
    /// At most one notice is ever sent per episode: both notices require
    /// winning the `warning_sent` flag on the live record.
    pub fn evaluate(
        &self,
        event: &ChatEvent,
        record: &AdmissionRecord,
        now: i64,
        queues: QueueSizes,
    ) -> Response {
        let purpose = format!("Concurrent {}", event.kind.name());
        let processing = (now - record.entered_at()) as f64 / 1000.0;
        let worker = record.worker();

        if processing > self.config.warn_after.as_secs_f64() {
            match worker {
                Some(worker) => match worker.stack_sample_within(OWN_MODULES) {
                    Ok(frames) => log::warn!(
                        "{} - request has been processing for {}. Worker {} stack:\n{}",
                        purpose,
                        processing,
                        worker.name(),
                        format_frames(&frames)
                    ),
                    Err(e) => log::warn!(
                        "{} - request has been processing for {} ({})",
                        purpose,
                        processing,
                        e
                    ),
                },
                None => log::warn!(
                    "{} - request has been processing for {}. Currently in queue. Event queue size: {} Response queue size: {}",
                    purpose,
                    processing,
                    queues.events,
                    queues.responses
                ),
            }
            if !record.warning_sent() && worker.is_some() && self.set_warning_sent(record) {
                return Response::text(PLEASE_WAIT);
            }
        } else {
            log::debug!("{}", purpose);
        }

        // Only when a worker has it: a queued request cannot be stuck yet.
        if record.attempts_since_entered() >= self.config.escalate_after_attempts
            && !record.warning_sent()
            && worker.is_some()
            && self.set_warning_sent(record)
        {
            return Response::text(ESCALATION);
        }

        Response::None
    }

    fn set_warning_sent(&self, record: &AdmissionRecord) -> bool {
        self.gate.mark_warning_sent(record.nick(), record.event_id())
    }
}

fn format_frames(frames: &[Frame]) -> String {
    if frames.is_empty() {
        return "\t(no frames)".to_string();
    }
    frames
        .iter()
        .map(|frame| format!("\t{}", frame))
        .collect::<Vec<_>>()
        .join("\n")
}

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum QueueError {
    #[error("the {0} queue has been closed")]
    Closed(&'static str),
    #[error("interrupted while waiting for capacity on the {0} queue")]
    Interrupted(&'static str),
}

#[derive(Error, Debug, PartialEq)]
pub enum RouterError {
    #[error("Failed to forward event {event_id}: {source}")]
    Forward { event_id: u64, source: QueueError },
    #[error("Failed to publish response for event {event_id}: {source}")]
    Publish { event_id: u64, source: QueueError },
}

/// Reasons a worker's stack sample could not be taken.
#[derive(Error, Debug, PartialEq)]
pub enum DiagnosticError {
    #[error("worker {0} has already finished")]
    WorkerFinished(String),
    #[error("stack of worker {0} is not available right now")]
    Unavailable(String),
}

#[derive(Error, Debug, PartialEq)]
pub enum HandlerError {
    #[error("Command failed: {0}")]
    CommandFailed(String),
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

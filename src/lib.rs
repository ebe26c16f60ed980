pub mod clock;
pub mod concurrency;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod handler;
pub mod live;
pub mod pool;
pub mod queue;
pub mod router;
pub mod worker;

pub use concurrency::{AdmissionGate, AdmissionPermit, AdmissionRecord};
pub use diagnostics::DiagnosticsPolicy;
pub use event::{ChatEvent, EventKind, Response};
pub use router::{EventRouter, Routing};

#[cfg(test)]
pub mod test_utils;

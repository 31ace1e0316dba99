//! Engine error taxonomy
//!
//! None of these are fatal to a run. Every refusal, including total refusal,
//! is a normal outcome delivered through the final callback; the variants
//! here describe events the engine declines to act on.

use thiserror::Error;

use crate::event::{RequestCode, RunId};

/// Error type for engine operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The run an event belongs to is gone (host torn down, or run finished)
    #[error("No live request run for event {code:?} (run {run})")]
    StaleContext { run: RunId, code: RequestCode },

    /// The live task is not waiting for this kind of event
    #[error("Unexpected {received} event {code:?}; task is {expected}")]
    UnexpectedEvent {
        code: RequestCode,
        expected: &'static str,
        received: &'static str,
    },

    /// A retry was asked for with nothing left to request
    #[error("Retry requested with an empty capability set")]
    EmptyRetrySet,

    /// A new run was started while another one is still in flight
    #[error("Request run {0} is still in flight")]
    RunInFlight(RunId),
}

impl EngineError {
    /// Whether the error means the event should simply be dropped
    pub fn is_droppable(&self) -> bool {
        matches!(self, Self::StaleContext { .. } | Self::UnexpectedEvent { .. })
    }
}

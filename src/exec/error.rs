// src/exec/error.rs

//! Errors raised while dispatching or observing a unit of work, and their
//! mapping onto [`OutcomeCode`]s.

use thiserror::Error;

use crate::engine::OutcomeCode;
use crate::exec::ecs::PlacementFailure;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image {image} not found")]
    ImageNotFound { image: String },

    #[error("container engine error: {0}")]
    Engine(String),

    #[error("task placement failed: {0}")]
    Placement(PlacementFailure),

    #[error("orchestrator rejected the request: {0}")]
    InvalidParameter(String),

    #[error("orchestrator error: {0}")]
    Orchestrator(String),

    #[error("orchestrator started no task and reported no failure")]
    NothingStarted,

    #[error("event stream closed before {unit} terminated")]
    StreamClosed { unit: String },
}

impl ExecError {
    /// Most specific outcome classification for this error, with the cause
    /// string that is reported back to the message source.
    pub fn classify(&self) -> (OutcomeCode, String) {
        match self {
            ExecError::Placement(failure) => (failure.code(), failure.cause()),
            ExecError::InvalidParameter(msg) => (
                OutcomeCode::ParameterInvalid,
                format!("the orchestrator rejected the task parameters: {msg}"),
            ),
            other => (OutcomeCode::Unknown, other.to_string()),
        }
    }
}

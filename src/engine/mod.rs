// src/engine/mod.rs

//! Execution-and-supervision engine.
//!
//! This module ties together:
//! - the work item handed over by a message source
//! - the classified [`Outcome`] of a run
//! - the pure run core that turns run events into commands
//! - the async supervisor that races execution, deadline and heartbeat
//!   ticks, and reports the result back to the source
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`supervisor`].

use std::fmt;

use crate::exec::{ExecError, Exit};

/// One unit of input received from a message source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: String,
    pub body: String,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
        }
    }
}

/// Events flowing into the run core.
pub enum RunEvent {
    /// The backend confirmed the unit is alive.
    UnitStarted { host: Option<String> },
    /// A heartbeat tick fired and the unit was probed.
    HeartbeatTick { alive: bool },
    /// Dispatch + observation finished, successfully or not.
    ExecutionFinished(Result<Exit, ExecError>),
    /// The run deadline elapsed first.
    DeadlineElapsed,
}

impl fmt::Debug for RunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunEvent::UnitStarted { host } => {
                f.debug_struct("UnitStarted").field("host", host).finish()
            }
            RunEvent::HeartbeatTick { alive } => {
                f.debug_struct("HeartbeatTick").field("alive", alive).finish()
            }
            RunEvent::ExecutionFinished(Ok(exit)) => {
                f.debug_tuple("ExecutionFinished").field(exit).finish()
            }
            RunEvent::ExecutionFinished(Err(err)) => f
                .debug_tuple("ExecutionFinished")
                .field(&err.to_string())
                .finish(),
            RunEvent::DeadlineElapsed => f.write_str("DeadlineElapsed"),
        }
    }
}

pub mod core;
pub mod outcome;
pub mod supervisor;

pub use self::core::{RunCommand, RunCore, RunStep};
pub use outcome::{AlreadyResolved, Outcome, OutcomeCode};
pub use supervisor::{RunSettings, Supervisor};

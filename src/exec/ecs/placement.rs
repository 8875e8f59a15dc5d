// src/exec/ecs/placement.rs

//! Classification of the `failures` the orchestrator returns when it could
//! not place a task on the requested container instance.

use std::fmt;

use crate::engine::OutcomeCode;

/// Why the orchestrator refused to place the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementFailure {
    InsufficientCpu,
    InsufficientMemory,
    /// Any other `RESOURCE:<name>` shortage (ports, GPUs, ...).
    ResourceShortage(String),
    AgentDisconnected,
    AttributeMismatch,
    /// A reason we do not recognise, kept verbatim.
    Unrecognized(String),
}

impl PlacementFailure {
    /// Classify the orchestrator's failure reason (`RESOURCE:MEMORY`,
    /// `AGENT`, `ATTRIBUTE`, ...). Matching is by keyword anywhere in the
    /// reason, ignoring case.
    pub fn from_reason(reason: &str) -> Self {
        let reason = reason.trim();
        let upper = reason.to_ascii_uppercase();
        if upper.contains("MEMORY") {
            PlacementFailure::InsufficientMemory
        } else if upper.contains("CPU") {
            PlacementFailure::InsufficientCpu
        } else if upper.contains("RESOURCE") {
            let resource = reason
                .split_once(':')
                .map(|(_, name)| name.trim())
                .filter(|name| !name.is_empty())
                .unwrap_or(reason);
            PlacementFailure::ResourceShortage(resource.to_string())
        } else if upper.contains("AGENT") {
            PlacementFailure::AgentDisconnected
        } else if upper.contains("ATTRIBUTE") {
            PlacementFailure::AttributeMismatch
        } else {
            PlacementFailure::Unrecognized(reason.to_string())
        }
    }

    pub fn code(&self) -> OutcomeCode {
        match self {
            PlacementFailure::InsufficientCpu
            | PlacementFailure::InsufficientMemory
            | PlacementFailure::ResourceShortage(_) => OutcomeCode::ResourceUnavailable,
            PlacementFailure::AgentDisconnected => OutcomeCode::AgentDisconnected,
            PlacementFailure::AttributeMismatch => OutcomeCode::AttributeMismatch,
            PlacementFailure::Unrecognized(_) => OutcomeCode::Unknown,
        }
    }

    /// Human-readable cause reported with the outcome.
    pub fn cause(&self) -> String {
        match self {
            PlacementFailure::InsufficientCpu => {
                "the container instance has insufficient CPU for the task".to_string()
            }
            PlacementFailure::InsufficientMemory => {
                "the container instance has insufficient memory for the task".to_string()
            }
            PlacementFailure::ResourceShortage(resource) => {
                format!("the container instance is short of resource {resource}")
            }
            PlacementFailure::AgentDisconnected => {
                "the container agent on the instance is disconnected".to_string()
            }
            PlacementFailure::AttributeMismatch => {
                "the container instance lacks an attribute the task requires".to_string()
            }
            PlacementFailure::Unrecognized(reason) => {
                format!("task placement failed: {reason}")
            }
        }
    }
}

impl fmt::Display for PlacementFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cause())
    }
}

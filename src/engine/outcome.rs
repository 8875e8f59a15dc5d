// src/engine/outcome.rs

//! Classified terminal result of a single run.
//!
//! An [`Outcome`] is created by the supervisor before dispatch, gets its
//! `host` filled in as soon as the backend reports where the unit is
//! running, and is resolved exactly once. A second resolution is rejected
//! with [`AlreadyResolved`] instead of overwriting the first.

use std::fmt;

use thiserror::Error;

/// Classification code of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeCode {
    Success,
    Timeout,
    NonzeroExit,
    ResourceUnavailable,
    AgentDisconnected,
    AttributeMismatch,
    ParameterInvalid,
    Unknown,
}

impl OutcomeCode {
    /// Stable label used when reporting the outcome to a message source.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeCode::Success => "SUCCESS",
            OutcomeCode::Timeout => "TIMEOUT",
            OutcomeCode::NonzeroExit => "NONZERO_EXIT",
            OutcomeCode::ResourceUnavailable => "RESOURCE_UNAVAILABLE",
            OutcomeCode::AgentDisconnected => "AGENT_DISCONNECTED",
            OutcomeCode::AttributeMismatch => "ATTRIBUTE_MISMATCH",
            OutcomeCode::ParameterInvalid => "PARAMETER_INVALID",
            OutcomeCode::Unknown => "UNKNOWN",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeCode::Success)
    }
}

impl fmt::Display for OutcomeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when something tries to resolve an outcome twice.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("outcome already resolved as {existing} (attempted {attempted})")]
pub struct AlreadyResolved {
    pub existing: OutcomeCode,
    pub attempted: OutcomeCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Resolution {
    code: OutcomeCode,
    cause: String,
    error_label: String,
    exit_code: Option<i64>,
}

/// The outcome of one run. Unresolved until [`Outcome::resolve`] succeeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    resolution: Option<Resolution>,
    host: Option<String>,
}

impl Outcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record where the unit of work is physically running.
    ///
    /// Host is informational and may be updated until the outcome resolves;
    /// afterwards the call is ignored.
    pub fn set_host(&mut self, host: impl Into<String>) {
        if self.resolution.is_none() {
            self.host = Some(host.into());
        }
    }

    /// Resolve the outcome. The error label defaults to the code's name.
    pub fn resolve(
        &mut self,
        code: OutcomeCode,
        cause: impl Into<String>,
    ) -> Result<(), AlreadyResolved> {
        self.resolve_labelled(code, cause, code.as_str(), None)
    }

    /// Resolve the outcome with an explicit error label and exit status.
    pub fn resolve_labelled(
        &mut self,
        code: OutcomeCode,
        cause: impl Into<String>,
        error_label: impl Into<String>,
        exit_code: Option<i64>,
    ) -> Result<(), AlreadyResolved> {
        if let Some(existing) = &self.resolution {
            return Err(AlreadyResolved {
                existing: existing.code,
                attempted: code,
            });
        }
        self.resolution = Some(Resolution {
            code,
            cause: cause.into(),
            error_label: error_label.into(),
            exit_code,
        });
        Ok(())
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    pub fn code(&self) -> Option<OutcomeCode> {
        self.resolution.as_ref().map(|r| r.code)
    }

    pub fn cause(&self) -> &str {
        self.resolution.as_ref().map(|r| r.cause.as_str()).unwrap_or("")
    }

    /// Error name reported to sources that distinguish error from cause.
    pub fn error_label(&self) -> &str {
        self.resolution
            .as_ref()
            .map(|r| r.error_label.as_str())
            .unwrap_or("")
    }

    pub fn exit_code(&self) -> Option<i64> {
        self.resolution.as_ref().and_then(|r| r.exit_code)
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resolution {
            None => f.write_str("unresolved")?,
            Some(r) => write!(f, "{}: {}", r.code, r.cause)?,
        }
        if let Some(host) = &self.host {
            write!(f, " (host {host})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_resolution_is_rejected() {
        let mut outcome = Outcome::new();
        outcome.resolve(OutcomeCode::Success, "").unwrap();

        let err = outcome
            .resolve(OutcomeCode::NonzeroExit, "exit status 1")
            .unwrap_err();
        assert_eq!(err.existing, OutcomeCode::Success);
        assert_eq!(err.attempted, OutcomeCode::NonzeroExit);
        assert_eq!(outcome.code(), Some(OutcomeCode::Success));
    }

    #[test]
    fn host_is_frozen_after_resolution() {
        let mut outcome = Outcome::new();
        outcome.set_host("ip-10-0-0-1");
        outcome.resolve(OutcomeCode::Timeout, "deadline").unwrap();
        outcome.set_host("elsewhere");
        assert_eq!(outcome.host(), Some("ip-10-0-0-1"));
    }

    #[test]
    fn default_label_is_code_name() {
        let mut outcome = Outcome::new();
        outcome
            .resolve(OutcomeCode::ResourceUnavailable, "no memory")
            .unwrap();
        assert_eq!(outcome.error_label(), "RESOURCE_UNAVAILABLE");
        assert_eq!(outcome.to_string(), "RESOURCE_UNAVAILABLE: no memory");
    }
}

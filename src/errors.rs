// src/errors.rs

//! Crate-wide startup errors.
//!
//! Anything here aborts the agent before (or instead of) a run. Errors that
//! happen while running a work item are [`crate::exec::ExecError`]s and end
//! up in the outcome reported to the message source.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TasqueError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Message source initialisation failed: {0}")]
    SourceInit(String),

    #[error("Metadata service unavailable after {waited:?}: {last_error}")]
    MetadataUnavailable { waited: Duration, last_error: String },

    #[error("Container engine connection failed: {0}")]
    EngineConnect(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TasqueError>;

// src/source/mod.rs

//! Message sources.
//!
//! A [`MessageSource`] supplies one work item per run and receives the
//! terminal (`success` / `failure`) and progress (`heartbeat`) callbacks.
//!
//! - [`env`] hands out the payload literal from the configuration.
//! - [`sqs`] long-polls an SQS queue.
//! - [`sfn`] polls a Step Functions activity.
//! - [`spool`] writes the received payload to disk before dispatch.

use crate::engine::{Outcome, WorkItem};
use crate::errors::Result;
use crate::exec::BoxFuture;

pub mod env;
pub mod sfn;
pub mod spool;
pub mod sqs;

pub use env::EnvSource;
pub use sfn::SfnSource;
pub use sqs::SqsSource;

/// Shared SDK configuration pinned to `region`; credentials come from the
/// default provider chain.
pub(crate) async fn aws_config_for(region: &str) -> aws_config::SdkConfig {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()))
        .load()
        .await
}

/// Whether an AWS error code means the caller lacks the IAM permission.
///
/// The connectivity checks in `initialize` use calls a narrowly scoped
/// worker role may not be granted; those denials are logged, not fatal.
pub(crate) fn is_access_denied(code: Option<&str>) -> bool {
    matches!(code, Some(code) if code.starts_with("AccessDenied"))
}

/// Trait abstracting where work comes from and where results go.
///
/// `receive` returning `None` means "nothing to do right now"; it is not an
/// error and ends the run without touching the backend. Callback failures
/// are returned so the supervisor can log them; they never change the
/// outcome.
pub trait MessageSource: Send {
    /// Short label used in log records.
    fn label(&self) -> &str;

    /// Establish connectivity. Failure is fatal to the agent.
    fn initialize(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Fetch one work item.
    fn receive(&mut self) -> BoxFuture<'_, Option<WorkItem>>;

    /// Acknowledge successful completion of the received item.
    fn success(&mut self) -> BoxFuture<'_, anyhow::Result<()>>;

    /// Report a terminal failure of the received item.
    fn failure<'a>(&'a mut self, outcome: &'a Outcome) -> BoxFuture<'a, anyhow::Result<()>>;

    /// Signal that the received item is still making progress.
    fn heartbeat(&mut self) -> BoxFuture<'_, anyhow::Result<()>>;
}

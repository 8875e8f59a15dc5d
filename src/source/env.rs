// src/source/env.rs

//! Source for running one payload given on the command line or in the
//! environment. There is nobody to report back to, so the callbacks only
//! log.

use tracing::info;

use crate::engine::{Outcome, WorkItem};
use crate::errors::Result;
use crate::exec::BoxFuture;
use crate::source::MessageSource;

/// Id of the single work item this source hands out.
pub const LOCAL_ID: &str = "local";

#[derive(Debug, Clone)]
pub struct EnvSource {
    payload: String,
}

impl EnvSource {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

impl MessageSource for EnvSource {
    fn label(&self) -> &str {
        "env"
    }

    fn initialize(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn receive(&mut self) -> BoxFuture<'_, Option<WorkItem>> {
        Box::pin(async move { Some(WorkItem::new(LOCAL_ID, self.payload.clone())) })
    }

    fn success(&mut self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async {
            info!(task_id = LOCAL_ID, "work item succeeded");
            Ok(())
        })
    }

    fn failure<'a>(&'a mut self, outcome: &'a Outcome) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            info!(
                task_id = LOCAL_ID,
                error = outcome.error_label(),
                cause = outcome.cause(),
                "work item failed"
            );
            Ok(())
        })
    }

    fn heartbeat(&mut self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

// src/source/sfn.rs

//! Step Functions activity source.

use anyhow::Context;
use aws_sdk_sfn::Client;
use aws_sdk_sfn::error::{DisplayErrorContext, ProvideErrorMetadata};
use tracing::{debug, info, warn};

use crate::engine::{Outcome, WorkItem};
use crate::errors::{Result, TasqueError};
use crate::exec::BoxFuture;
use crate::source::{MessageSource, aws_config_for, is_access_denied};

/// Work item ids are the leading part of the (very long) task token.
pub const TOKEN_ID_LEN: usize = 32;

/// Upper bounds the service puts on failure fields.
const MAX_ERROR_LEN: usize = 256;
const MAX_CAUSE_LEN: usize = 32_768;

pub fn token_id(token: &str) -> &str {
    match token.char_indices().nth(TOKEN_ID_LEN) {
        Some((idx, _)) => &token[..idx],
        None => token,
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[derive(Debug)]
pub struct SfnSource {
    activity_arn: String,
    region: String,
    worker_name: String,
    client: Option<Client>,
    task_token: Option<String>,
    /// Echoed back as the task output on success.
    body: String,
}

impl SfnSource {
    pub fn new(
        activity_arn: impl Into<String>,
        region: impl Into<String>,
        worker_name: impl Into<String>,
    ) -> Self {
        Self {
            activity_arn: activity_arn.into(),
            region: region.into(),
            worker_name: worker_name.into(),
            client: None,
            task_token: None,
            body: String::new(),
        }
    }

    fn client_and_token(&self) -> anyhow::Result<(&Client, &str)> {
        let client = self
            .client
            .as_ref()
            .context("activity source used before initialisation")?;
        let token = self
            .task_token
            .as_deref()
            .context("no activity task has been received")?;
        Ok((client, token))
    }
}

impl MessageSource for SfnSource {
    fn label(&self) -> &str {
        &self.activity_arn
    }

    fn initialize(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            info!(activity = %self.activity_arn, region = %self.region, "connecting to Step Functions");
            let shared = aws_config_for(&self.region).await;
            let client = Client::new(&shared);

            match client
                .describe_activity()
                .activity_arn(&self.activity_arn)
                .send()
                .await
            {
                Ok(_) => {}
                Err(err) if is_access_denied(err.code()) => {
                    warn!(
                        activity = %self.activity_arn,
                        error = %DisplayErrorContext(&err),
                        "not allowed to describe the activity; skipping connectivity check"
                    );
                }
                Err(err) => {
                    return Err(TasqueError::SourceInit(format!(
                        "{}: {}",
                        self.activity_arn,
                        DisplayErrorContext(&err)
                    )));
                }
            }

            self.client = Some(client);
            Ok(())
        })
    }

    fn receive(&mut self) -> BoxFuture<'_, Option<WorkItem>> {
        Box::pin(async move {
            let Some(client) = self.client.clone() else {
                warn!("activity source used before initialisation");
                return None;
            };

            // An empty token means the long poll ended without work.
            loop {
                info!(activity = %self.activity_arn, worker = %self.worker_name, "waiting for activity task");
                let output = match client
                    .get_activity_task()
                    .activity_arn(&self.activity_arn)
                    .worker_name(&self.worker_name)
                    .send()
                    .await
                {
                    Ok(output) => output,
                    Err(err) => {
                        warn!(activity = %self.activity_arn, error = %DisplayErrorContext(&err), "get activity task failed");
                        return None;
                    }
                };

                match output.task_token() {
                    Some(token) if !token.is_empty() => {
                        let body = output.input().unwrap_or_default().to_string();
                        let item = WorkItem::new(token_id(token), body.clone());
                        self.task_token = Some(token.to_string());
                        self.body = body;
                        return Some(item);
                    }
                    _ => debug!(activity = %self.activity_arn, "no activity task yet"),
                }
            }
        })
    }

    fn success(&mut self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            let (client, token) = self.client_and_token()?;
            client
                .send_task_success()
                .task_token(token)
                .output(&self.body)
                .send()
                .await
                .map_err(|err| anyhow::anyhow!("{}", DisplayErrorContext(&err)))
                .context("sending task success")?;
            info!(task_id = token_id(token), "task success sent");
            Ok(())
        })
    }

    fn failure<'a>(&'a mut self, outcome: &'a Outcome) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let (client, token) = self.client_and_token()?;
            client
                .send_task_failure()
                .task_token(token)
                .error(truncate(outcome.error_label(), MAX_ERROR_LEN))
                .cause(truncate(outcome.cause(), MAX_CAUSE_LEN))
                .send()
                .await
                .map_err(|err| anyhow::anyhow!("{}", DisplayErrorContext(&err)))
                .context("sending task failure")?;
            info!(
                task_id = token_id(token),
                error = outcome.error_label(),
                "task failure sent"
            );
            Ok(())
        })
    }

    fn heartbeat(&mut self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            let (client, token) = self.client_and_token()?;
            client
                .send_task_heartbeat()
                .task_token(token)
                .send()
                .await
                .map_err(|err| anyhow::anyhow!("{}", DisplayErrorContext(&err)))
                .context("sending task heartbeat")?;
            Ok(())
        })
    }
}

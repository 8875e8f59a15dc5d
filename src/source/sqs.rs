// src/source/sqs.rs

//! SQS queue source.
//!
//! One message per run, long-polled. Success deletes the message; failure
//! leaves it on the queue so it becomes visible again and is redelivered.
//! Heartbeats push the visibility timeout out while the unit runs.

use std::time::Duration;

use anyhow::Context;
use aws_sdk_sqs::Client;
use aws_sdk_sqs::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_sqs::types::QueueAttributeName;
use tracing::{info, warn};

use crate::engine::{Outcome, WorkItem};
use crate::errors::{Result, TasqueError};
use crate::exec::BoxFuture;
use crate::source::{MessageSource, aws_config_for, is_access_denied};

/// Long-poll wait of a single receive.
pub const RECEIVE_WAIT_SECS: i32 = 20;

/// SQS caps visibility timeouts at 12 hours.
const MAX_VISIBILITY_SECS: u64 = 12 * 60 * 60;

/// Visibility timeout requested on every heartbeat: two intervals, so one
/// late heartbeat does not release the message.
pub fn visibility_extension(heartbeat: Duration) -> i32 {
    let secs = heartbeat.as_secs().max(1).saturating_mul(2);
    secs.min(MAX_VISIBILITY_SECS) as i32
}

#[derive(Debug)]
struct Received {
    message_id: String,
    receipt_handle: String,
}

#[derive(Debug)]
pub struct SqsSource {
    queue_url: String,
    region: String,
    heartbeat: Duration,
    client: Option<Client>,
    received: Option<Received>,
}

impl SqsSource {
    pub fn new(queue_url: impl Into<String>, region: impl Into<String>, heartbeat: Duration) -> Self {
        Self {
            queue_url: queue_url.into(),
            region: region.into(),
            heartbeat,
            client: None,
            received: None,
        }
    }

    fn client(&self) -> anyhow::Result<&Client> {
        self.client
            .as_ref()
            .context("SQS source used before initialisation")
    }

    fn receipt_handle(&self) -> anyhow::Result<&str> {
        self.received
            .as_ref()
            .map(|r| r.receipt_handle.as_str())
            .context("no message has been received")
    }
}

impl MessageSource for SqsSource {
    fn label(&self) -> &str {
        &self.queue_url
    }

    fn initialize(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            info!(queue = %self.queue_url, region = %self.region, "connecting to SQS");
            let shared = aws_config_for(&self.region).await;
            let client = Client::new(&shared);

            match client
                .get_queue_attributes()
                .queue_url(&self.queue_url)
                .attribute_names(QueueAttributeName::VisibilityTimeout)
                .send()
                .await
            {
                Ok(_) => {}
                Err(err) if is_access_denied(err.code()) => {
                    warn!(
                        queue = %self.queue_url,
                        error = %DisplayErrorContext(&err),
                        "not allowed to read queue attributes; skipping connectivity check"
                    );
                }
                Err(err) => {
                    return Err(TasqueError::SourceInit(format!(
                        "{}: {}",
                        self.queue_url,
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
            let client = match self.client() {
                Ok(client) => client,
                Err(err) => {
                    warn!(error = %err, "cannot receive");
                    return None;
                }
            };

            info!(queue = %self.queue_url, wait_secs = RECEIVE_WAIT_SECS, "waiting for a message");
            let output = match client
                .receive_message()
                .queue_url(&self.queue_url)
                .max_number_of_messages(1)
                .wait_time_seconds(RECEIVE_WAIT_SECS)
                .send()
                .await
            {
                Ok(output) => output,
                Err(err) => {
                    warn!(queue = %self.queue_url, error = %DisplayErrorContext(&err), "receive failed");
                    return None;
                }
            };

            let Some(message) = output.messages().first() else {
                info!(queue = %self.queue_url, "no messages retrieved from queue");
                return None;
            };
            let (Some(message_id), Some(receipt_handle)) =
                (message.message_id(), message.receipt_handle())
            else {
                warn!(queue = %self.queue_url, "message without id or receipt handle");
                return None;
            };

            let item = WorkItem::new(message_id, message.body().unwrap_or_default());
            self.received = Some(Received {
                message_id: message_id.to_string(),
                receipt_handle: receipt_handle.to_string(),
            });
            Some(item)
        })
    }

    fn success(&mut self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            let client = self.client()?;
            let receipt_handle = self.receipt_handle()?;
            client
                .delete_message()
                .queue_url(&self.queue_url)
                .receipt_handle(receipt_handle)
                .send()
                .await
                .map_err(|err| anyhow::anyhow!("{}", DisplayErrorContext(&err)))
                .context("deleting message")?;
            if let Some(received) = &self.received {
                info!(task_id = %received.message_id, "message deleted");
            }
            Ok(())
        })
    }

    fn failure<'a>(&'a mut self, outcome: &'a Outcome) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let task_id = self
                .received
                .as_ref()
                .map(|r| r.message_id.as_str())
                .unwrap_or("-");
            info!(
                task_id = %task_id,
                error = outcome.error_label(),
                cause = outcome.cause(),
                "leaving message on the queue for redelivery"
            );
            Ok(())
        })
    }

    fn heartbeat(&mut self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            let client = self.client()?;
            let receipt_handle = self.receipt_handle()?;
            client
                .change_message_visibility()
                .queue_url(&self.queue_url)
                .receipt_handle(receipt_handle)
                .visibility_timeout(visibility_extension(self.heartbeat))
                .send()
                .await
                .map_err(|err| anyhow::anyhow!("{}", DisplayErrorContext(&err)))
                .context("extending message visibility")?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_is_twice_the_heartbeat() {
        assert_eq!(visibility_extension(Duration::from_secs(30)), 60);
        assert_eq!(visibility_extension(Duration::from_millis(200)), 2);
        assert_eq!(
            visibility_extension(Duration::from_secs(24 * 60 * 60)),
            12 * 60 * 60
        );
    }

    #[tokio::test]
    async fn callbacks_before_receive_fail_cleanly() {
        let mut source = SqsSource::new(
            "https://sqs.eu-west-1.amazonaws.com/123456789012/jobs",
            "eu-west-1",
            Duration::from_secs(30),
        );
        assert!(source.success().await.is_err());
        assert!(source.heartbeat().await.is_err());
        assert!(source.receive().await.is_none());
    }
}

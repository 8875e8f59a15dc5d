// src/exec/ecs/launcher.rs

//! The two orchestrator calls the ECS backend makes.

use aws_sdk_ecs::Client;
use aws_sdk_ecs::error::DisplayErrorContext;
use aws_sdk_ecs::types::{ContainerOverride, KeyValuePair, TaskOverride};
use tracing::debug;

use crate::exec::{BoxFuture, ExecError};

/// Value of `startedBy` on every task this agent starts.
pub const STARTED_BY: &str = "tasque";

/// A task to place on one specific container instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub cluster: String,
    pub container_instance_arn: String,
    pub task_definition: String,
    /// Container whose environment is overridden.
    pub container_name: String,
    pub environment: Vec<(String, String)>,
}

/// What the orchestrator answered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchResponse {
    pub task_arns: Vec<String>,
    /// Placement failure reasons (`RESOURCE:MEMORY`, `AGENT`, ...).
    pub failures: Vec<String>,
}

pub trait TaskLauncher: Send + Sync {
    /// Rejected requests come back as [`ExecError::InvalidParameter`].
    fn start_task<'a>(
        &'a self,
        request: &'a LaunchRequest,
    ) -> BoxFuture<'a, Result<LaunchResponse, ExecError>>;

    fn stop_task<'a>(
        &'a self,
        cluster: &'a str,
        task_arn: &'a str,
        reason: &'a str,
    ) -> BoxFuture<'a, Result<(), ExecError>>;
}

/// [`TaskLauncher`] backed by the AWS SDK.
#[derive(Debug, Clone)]
pub struct SdkTaskLauncher {
    client: Client,
}

impl SdkTaskLauncher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn from_env() -> Self {
        let shared = aws_config::load_from_env().await;
        Self::new(Client::new(&shared))
    }
}

impl TaskLauncher for SdkTaskLauncher {
    fn start_task<'a>(
        &'a self,
        request: &'a LaunchRequest,
    ) -> BoxFuture<'a, Result<LaunchResponse, ExecError>> {
        Box::pin(async move {
            let environment = request
                .environment
                .iter()
                .map(|(name, value)| KeyValuePair::builder().name(name).value(value).build())
                .collect::<Vec<_>>();
            let overrides = TaskOverride::builder()
                .container_overrides(
                    ContainerOverride::builder()
                        .name(&request.container_name)
                        .set_environment(Some(environment))
                        .build(),
                )
                .build();

            let output = self
                .client
                .start_task()
                .cluster(&request.cluster)
                .container_instances(&request.container_instance_arn)
                .task_definition(&request.task_definition)
                .overrides(overrides)
                .started_by(STARTED_BY)
                .send()
                .await
                .map_err(|err| {
                    let message = DisplayErrorContext(&err).to_string();
                    let service = err.into_service_error();
                    if service.is_invalid_parameter_exception() || service.is_client_exception() {
                        ExecError::InvalidParameter(message)
                    } else {
                        ExecError::Orchestrator(message)
                    }
                })?;

            debug!(
                tasks = output.tasks().len(),
                failures = output.failures().len(),
                "start task answered"
            );
            Ok(LaunchResponse {
                task_arns: output
                    .tasks()
                    .iter()
                    .filter_map(|task| task.task_arn().map(str::to_string))
                    .collect(),
                failures: output
                    .failures()
                    .iter()
                    .map(|failure| failure.reason().unwrap_or_default().to_string())
                    .collect(),
            })
        })
    }

    fn stop_task<'a>(
        &'a self,
        cluster: &'a str,
        task_arn: &'a str,
        reason: &'a str,
    ) -> BoxFuture<'a, Result<(), ExecError>> {
        Box::pin(async move {
            self.client
                .stop_task()
                .cluster(cluster)
                .task(task_arn)
                .reason(reason)
                .send()
                .await
                .map_err(|err| ExecError::Orchestrator(DisplayErrorContext(&err).to_string()))?;
            Ok(())
        })
    }
}

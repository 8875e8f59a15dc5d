// src/exec/ecs/mod.rs

//! Managed-orchestration backend.
//!
//! The task is started on *this* container instance (membership discovered
//! once at startup, see [`metadata`]) and then followed on the local
//! container engine: the orchestrator labels each container with the task
//! ARN, and the `die` event of the labelled container carries the exit
//! status.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::EcsConfig;
use crate::engine::WorkItem;
use crate::exec::docker::{
    ContainerEngine, ContainerProbe, ContainerSignal, EngineEvent, EventSubscription,
};
use crate::exec::{
    BoxFuture, ExecError, ExecutionBackend, Exit, RunningUnit, TASK_ID_KEY, UnitEvent, UnitEvents,
};

pub mod launcher;
pub mod metadata;
pub mod placement;

pub use launcher::{LaunchRequest, LaunchResponse, SdkTaskLauncher, TaskLauncher};
pub use metadata::{
    ClusterMembership, HttpMetadataProvider, MetadataProvider, discover_membership,
};
pub use placement::PlacementFailure;

/// Container label the orchestrator agent sets to the owning task's ARN.
pub const TASK_ARN_LABEL: &str = "com.amazonaws.ecs.task-arn";
/// Container label holding the container name from the task definition.
pub const CONTAINER_NAME_LABEL: &str = "com.amazonaws.ecs.container-name";

/// Signal of `event` if it concerns the overridden container of task
/// `task_arn`. Events without a container-name label are accepted as long
/// as the task ARN matches.
pub fn signal_for_task(
    event: &EngineEvent,
    task_arn: &str,
    container_name: &str,
) -> Option<ContainerSignal> {
    if event.attribute(TASK_ARN_LABEL) != Some(task_arn) {
        return None;
    }
    match event.attribute(CONTAINER_NAME_LABEL) {
        Some(name) if name != container_name => None,
        _ => ContainerSignal::from_event(event),
    }
}

pub struct EcsBackend {
    launcher: Arc<dyn TaskLauncher>,
    engine: Arc<dyn ContainerEngine>,
    config: EcsConfig,
    membership: ClusterMembership,
    subscription: Option<EventSubscription>,
    task_arn: Option<String>,
}

impl EcsBackend {
    pub fn new(
        launcher: Arc<dyn TaskLauncher>,
        engine: Arc<dyn ContainerEngine>,
        config: EcsConfig,
        membership: ClusterMembership,
    ) -> Self {
        Self {
            launcher,
            engine,
            config,
            membership,
            subscription: None,
            task_arn: None,
        }
    }

    fn launch_request(&self, item: &WorkItem) -> LaunchRequest {
        LaunchRequest {
            cluster: self.membership.cluster.clone(),
            container_instance_arn: self.membership.container_instance_arn.clone(),
            task_definition: self.config.task_definition.clone(),
            container_name: self.config.container_name.clone(),
            environment: vec![
                (self.config.payload_key.clone(), item.body.clone()),
                (TASK_ID_KEY.to_string(), item.id.clone()),
            ],
        }
    }
}

impl ExecutionBackend for EcsBackend {
    fn label(&self) -> &str {
        &self.config.task_definition
    }

    fn dispatch<'a>(
        &'a mut self,
        item: &'a WorkItem,
    ) -> BoxFuture<'a, Result<RunningUnit, ExecError>> {
        Box::pin(async move {
            let subscription = self.engine.subscribe().await?;

            let request = self.launch_request(item);
            info!(
                task_id = %item.id,
                cluster = %request.cluster,
                task_definition = %request.task_definition,
                "starting orchestrator task"
            );
            let response = self.launcher.start_task(&request).await?;

            if let Some(reason) = response.failures.first() {
                let failure = PlacementFailure::from_reason(reason);
                warn!(task_id = %item.id, reason = %reason, "task placement failed");
                return Err(ExecError::Placement(failure));
            }
            let Some(task_arn) = response.task_arns.into_iter().next() else {
                return Err(ExecError::NothingStarted);
            };

            info!(task_id = %item.id, task_arn = %task_arn, "orchestrator task started");
            self.task_arn = Some(task_arn.clone());
            self.subscription = Some(subscription);
            Ok(RunningUnit::Task { arn: task_arn })
        })
    }

    fn observe<'a>(
        &'a mut self,
        unit: &'a RunningUnit,
        item: &'a WorkItem,
        events: UnitEvents,
    ) -> BoxFuture<'a, Result<Exit, ExecError>> {
        Box::pin(async move {
            let RunningUnit::Task { arn } = unit else {
                return Err(ExecError::Orchestrator(format!("{unit} is not a task")));
            };
            let mut subscription = self
                .subscription
                .take()
                .ok_or_else(|| ExecError::StreamClosed {
                    unit: unit.to_string(),
                })?;

            while let Some(event) = subscription.next().await {
                match signal_for_task(&event, arn, &self.config.container_name) {
                    Some(ContainerSignal::Started) => {
                        info!(task_id = %item.id, container = %event.actor_id, "task container started");
                        let started = UnitEvent::Started {
                            host: Some(self.membership.container_instance_arn.clone()),
                            probe: Box::new(ContainerProbe {
                                engine: Arc::clone(&self.engine),
                                container_id: event.actor_id.clone(),
                            }),
                        };
                        if events.send(started).await.is_err() {
                            debug!(task_id = %item.id, "supervisor no longer listening for unit events");
                        }
                    }
                    Some(ContainerSignal::Died { exit_code }) => {
                        info!(task_id = %item.id, task_arn = %arn, exit_code, "task container died");
                        return Ok(Exit { code: exit_code });
                    }
                    None => {}
                }
            }

            Err(ExecError::StreamClosed {
                unit: unit.to_string(),
            })
        })
    }

    fn terminate(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.subscription = None;
            let Some(task_arn) = self.task_arn.take() else {
                return;
            };
            match self
                .launcher
                .stop_task(&self.membership.cluster, &task_arn, "deadline elapsed")
                .await
            {
                Ok(()) => info!(task_arn = %task_arn, "stopped orchestrator task"),
                Err(err) => warn!(task_arn = %task_arn, error = %err, "failed to stop orchestrator task"),
            }
        })
    }
}

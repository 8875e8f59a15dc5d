// src/exec/docker/mod.rs

//! Local container backend.
//!
//! One container per run, named after the configured container name. Any
//! leftover container of that name is torn down first, the image is pulled
//! when needed, and the event stream is subscribed *before* the container
//! starts so a fast `die` cannot be missed. The exit status comes from the
//! `die` event of the created container id.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::DockerConfig;
use crate::engine::WorkItem;
use crate::exec::{
    BoxFuture, ExecError, ExecutionBackend, Exit, LivenessProbe, OutputSink, OutputStream,
    RunningUnit, TASK_ID_KEY, TracingSink, UnitEvent, UnitEvents,
};

pub mod engine;

pub use engine::{
    BollardEngine, ContainerEngine, ContainerSpec, EngineEvent, EventSubscription,
    stop_kill_remove,
};

/// How long attaching to the container output may take before the run
/// continues without output.
pub const ATTACH_WINDOW: Duration = Duration::from_secs(10);

/// How long to wait for buffered output after the container died.
const OUTPUT_DRAIN: Duration = Duration::from_secs(2);

/// Lifecycle signal carried by an engine event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerSignal {
    Started,
    Died { exit_code: i64 },
}

impl ContainerSignal {
    /// `start` and `die` events; everything else is noise. A `die` without a
    /// readable `exitCode` attribute counts as `-1`.
    pub fn from_event(event: &EngineEvent) -> Option<Self> {
        match event.action.as_str() {
            "start" => Some(ContainerSignal::Started),
            "die" => {
                let exit_code = event
                    .attribute("exitCode")
                    .and_then(|code| code.trim().parse().ok())
                    .unwrap_or(-1);
                Some(ContainerSignal::Died { exit_code })
            }
            _ => None,
        }
    }
}

/// Signal of `event` if it concerns the container with id `container_id`.
pub fn signal_for_container(event: &EngineEvent, container_id: &str) -> Option<ContainerSignal> {
    if event.actor_id != container_id {
        return None;
    }
    ContainerSignal::from_event(event)
}

/// Liveness through container inspection.
pub(crate) struct ContainerProbe {
    pub(crate) engine: Arc<dyn ContainerEngine>,
    pub(crate) container_id: String,
}

impl LivenessProbe for ContainerProbe {
    fn is_running(&self) -> BoxFuture<'_, Result<bool, ExecError>> {
        self.engine.is_running(&self.container_id)
    }
}

/// Forward attached output lines to the sink until the container closes
/// its output.
pub(crate) fn forward_output(
    mut lines: mpsc::Receiver<String>,
    sink: Arc<dyn OutputSink>,
    task_id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = lines.recv().await {
            sink.line(&task_id, OutputStream::Container, &line);
        }
    })
}

pub struct DockerBackend {
    engine: Arc<dyn ContainerEngine>,
    config: DockerConfig,
    host: Option<String>,
    sink: Arc<dyn OutputSink>,
    subscription: Option<EventSubscription>,
    container_id: Option<String>,
    output: Option<JoinHandle<()>>,
}

impl DockerBackend {
    pub fn new(engine: Arc<dyn ContainerEngine>, config: DockerConfig) -> Self {
        Self {
            engine,
            config,
            host: None,
            sink: Arc::new(TracingSink),
            subscription: None,
            container_id: None,
            output: None,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    fn container_spec(&self, item: &WorkItem) -> ContainerSpec {
        let definition = &self.config.task_definition;
        let mut env = vec![
            format!("{}={}", self.config.payload_key, item.body),
            format!("{}={}", TASK_ID_KEY, item.id),
        ];
        env.extend(definition.env.iter().cloned());

        ContainerSpec {
            image: definition.image_name.clone(),
            env,
            mac_address: definition
                .mac_address
                .clone()
                .filter(|mac| !mac.is_empty()),
            attach_output: true,
        }
    }

    async fn pull(&self) -> Result<(), ExecError> {
        let (repository, tag) = self.config.task_definition.repository_and_tag();
        self.engine
            .pull_image(repository, tag, self.config.auth.as_ref())
            .await
    }

    async fn ensure_image(&self) -> Result<(), ExecError> {
        let image = &self.config.task_definition.image_name;
        if self.config.always_pull {
            debug!(image = %image, "always-pull set");
            return self.pull().await;
        }
        if self.engine.image_exists(image).await? {
            debug!(image = %image, "image present locally");
            return Ok(());
        }
        self.pull().await
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, ExecError> {
        let name = &self.config.container_name;
        match self.engine.create_container(name, spec).await {
            Err(ExecError::ImageNotFound { image }) => {
                warn!(image = %image, "image vanished before create; pulling and retrying once");
                self.pull().await?;
                self.engine.create_container(name, spec).await
            }
            other => other,
        }
    }

    async fn attach(&mut self, container_id: &str, task_id: &str) {
        match timeout(ATTACH_WINDOW, self.engine.attach_output(container_id)).await {
            Ok(Ok(lines)) => {
                debug!(container = %container_id, "attached to container output");
                self.output = Some(forward_output(
                    lines,
                    Arc::clone(&self.sink),
                    task_id.to_string(),
                ));
            }
            Ok(Err(err)) => {
                warn!(container = %container_id, error = %err, "could not attach to container output");
            }
            Err(_) => {
                warn!(
                    container = %container_id,
                    window_secs = ATTACH_WINDOW.as_secs(),
                    "timed out attaching to container output"
                );
            }
        }
    }

    async fn drain_output(&mut self) {
        if let Some(output) = self.output.take() {
            if timeout(OUTPUT_DRAIN, output).await.is_err() {
                debug!("container output still open after die");
            }
        }
    }
}

impl ExecutionBackend for DockerBackend {
    fn label(&self) -> &str {
        &self.config.container_name
    }

    fn dispatch<'a>(
        &'a mut self,
        item: &'a WorkItem,
    ) -> BoxFuture<'a, Result<RunningUnit, ExecError>> {
        Box::pin(async move {
            let name = self.config.container_name.clone();
            info!(task_id = %item.id, container = %name, "cleaning up leftover container");
            stop_kill_remove(self.engine.as_ref(), &name).await;

            self.ensure_image().await?;

            // Subscribed before create/start; dropped (and thereby
            // unsubscribed) on every early return below.
            let subscription = self.engine.subscribe().await?;

            let spec = self.container_spec(item);
            info!(task_id = %item.id, image = %spec.image, container = %name, "creating container");
            let container_id = self.create(&spec).await?;
            self.container_id = Some(container_id.clone());

            self.attach(&container_id, &item.id).await;

            self.engine.start_container(&container_id).await?;
            info!(task_id = %item.id, container = %container_id, "container started");

            self.subscription = Some(subscription);
            Ok(RunningUnit::Container { id: container_id })
        })
    }

    fn observe<'a>(
        &'a mut self,
        unit: &'a RunningUnit,
        item: &'a WorkItem,
        events: UnitEvents,
    ) -> BoxFuture<'a, Result<Exit, ExecError>> {
        Box::pin(async move {
            let RunningUnit::Container { id } = unit else {
                return Err(ExecError::Engine(format!("{unit} is not a container")));
            };
            let mut subscription = self
                .subscription
                .take()
                .ok_or_else(|| ExecError::StreamClosed {
                    unit: unit.to_string(),
                })?;

            while let Some(event) = subscription.next().await {
                match signal_for_container(&event, id) {
                    Some(ContainerSignal::Started) => {
                        let started = UnitEvent::Started {
                            host: self.host.clone(),
                            probe: Box::new(ContainerProbe {
                                engine: Arc::clone(&self.engine),
                                container_id: id.clone(),
                            }),
                        };
                        if events.send(started).await.is_err() {
                            debug!(task_id = %item.id, "supervisor no longer listening for unit events");
                        }
                    }
                    Some(ContainerSignal::Died { exit_code }) => {
                        info!(task_id = %item.id, container = %id, exit_code, "container died");
                        drop(subscription);
                        self.drain_output().await;
                        return Ok(Exit { code: exit_code });
                    }
                    None => {
                        debug!(action = %event.action, actor = %event.actor_id, "ignoring engine event");
                    }
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
            if let Some(output) = self.output.take() {
                output.abort();
            }
            if let Some(id) = self.container_id.take() {
                stop_kill_remove(self.engine.as_ref(), &id).await;
            }
        })
    }
}

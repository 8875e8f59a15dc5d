// src/exec/docker/engine.rs

//! Container engine abstraction.
//!
//! Both container-based backends only need a handful of engine calls plus
//! the event stream. [`ContainerEngine`] covers exactly those, so tests can
//! script events and count subscriptions without a daemon.
//! [`BollardEngine`] is the production implementation.

use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, LogOutput, RemoveContainerOptions,
    StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::system::EventsOptions;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::RegistryAuth;
use crate::errors::TasqueError;
use crate::exec::{BoxFuture, ExecError};

/// One message from the engine's event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineEvent {
    /// `start`, `die`, `destroy`, ...
    pub action: String,
    /// Id of the object the event is about (container id).
    pub actor_id: String,
    pub attributes: HashMap<String, String>,
}

impl EngineEvent {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// What to create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    /// `KEY=VALUE` entries.
    pub env: Vec<String>,
    pub mac_address: Option<String>,
    pub attach_output: bool,
}

/// A live event-stream subscription.
///
/// Dropping it unsubscribes, so every exit path of the code holding it
/// (return, `?`, or being dropped by a deadline) releases the stream.
pub struct EventSubscription {
    events: mpsc::Receiver<EngineEvent>,
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl EventSubscription {
    pub fn new(
        events: mpsc::Receiver<EngineEvent>,
        unsubscribe: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            events,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Next event, or `None` once the stream ended.
    pub async fn next(&mut self) -> Option<EngineEvent> {
        self.events.recv().await
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSubscription").finish_non_exhaustive()
    }
}

/// The engine calls the container backends rely on.
pub trait ContainerEngine: Send + Sync {
    /// Subscribe to container events. Every event from the moment of the
    /// call onward is delivered, even if the engine only sees the request
    /// once the subscription is first polled.
    fn subscribe(&self) -> BoxFuture<'_, Result<EventSubscription, ExecError>>;

    fn image_exists<'a>(&'a self, image: &'a str) -> BoxFuture<'a, Result<bool, ExecError>>;

    fn pull_image<'a>(
        &'a self,
        repository: &'a str,
        tag: &'a str,
        auth: Option<&'a RegistryAuth>,
    ) -> BoxFuture<'a, Result<(), ExecError>>;

    /// Create a container and return its id. A missing image is reported as
    /// [`ExecError::ImageNotFound`].
    fn create_container<'a>(
        &'a self,
        name: &'a str,
        spec: &'a ContainerSpec,
    ) -> BoxFuture<'a, Result<String, ExecError>>;

    /// Attach to combined stdout/stderr. Resolves once attached; lines are
    /// delivered on the returned channel until the container exits.
    fn attach_output<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<mpsc::Receiver<String>, ExecError>>;

    fn start_container<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), ExecError>>;

    fn stop_container<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), ExecError>>;

    fn kill_container<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), ExecError>>;

    fn remove_container<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), ExecError>>;

    fn is_running<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool, ExecError>>;
}

/// Stop, kill and force-remove `id`, logging but never failing.
///
/// Used before creating a container of the same name and after a deadline,
/// so "no such container" is the common, harmless case.
pub async fn stop_kill_remove(engine: &dyn ContainerEngine, id: &str) {
    match engine.stop_container(id).await {
        Ok(()) => info!(container = %id, "stopped container"),
        Err(err) => debug!(container = %id, error = %err, "stop container"),
    }
    match engine.kill_container(id).await {
        Ok(()) => info!(container = %id, "killed container"),
        Err(err) => debug!(container = %id, error = %err, "kill container"),
    }
    match engine.remove_container(id).await {
        Ok(()) => info!(container = %id, "removed container"),
        Err(err) => debug!(container = %id, error = %err, "remove container"),
    }
}

/// [`ContainerEngine`] backed by the Docker Engine API.
#[derive(Debug, Clone)]
pub struct BollardEngine {
    docker: Docker,
}

const ENGINE_TIMEOUT_SECS: u64 = 120;

impl BollardEngine {
    /// Connect to `endpoint` (`unix://...`, `tcp://...` or `http://...`).
    pub fn connect(endpoint: &str) -> Result<Self, TasqueError> {
        info!(endpoint = %endpoint, "connecting to container engine");
        let docker = if let Some(path) = endpoint.strip_prefix("unix://") {
            Docker::connect_with_socket(path, ENGINE_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
        } else if let Some(addr) = endpoint.strip_prefix("tcp://") {
            Docker::connect_with_http(
                &format!("http://{addr}"),
                ENGINE_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            )
        } else if endpoint.starts_with("http://") {
            Docker::connect_with_http(endpoint, ENGINE_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
        } else {
            Docker::connect_with_local_defaults()
        }
        .map_err(|e| TasqueError::EngineConnect(format!("{endpoint}: {e}")))?;

        Ok(Self { docker })
    }
}

fn engine_error(err: bollard::errors::Error) -> ExecError {
    ExecError::Engine(err.to_string())
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Split raw output chunks into lines; a trailing partial line is kept
/// until the next chunk or the end of the stream.
#[derive(Debug, Default)]
struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let rest = self.pending.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.pending, rest);
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    fn finish(self) -> Option<String> {
        (!self.pending.is_empty()).then(|| String::from_utf8_lossy(&self.pending).into_owned())
    }
}

/// `since` filter for the events request, in whole unix seconds. The engine
/// replays anything it saw from that second on.
fn events_since(now: SystemTime) -> Option<String> {
    now.duration_since(UNIX_EPOCH)
        .ok()
        .map(|elapsed| elapsed.as_secs().to_string())
}

impl ContainerEngine for BollardEngine {
    fn subscribe(&self) -> BoxFuture<'_, Result<EventSubscription, ExecError>> {
        Box::pin(async move {
            let mut filters = HashMap::new();
            filters.insert("type".to_string(), vec!["container".to_string()]);
            let mut stream = self.docker.events(Some(EventsOptions::<String> {
                since: events_since(SystemTime::now()),
                filters,
                ..Default::default()
            }));

            let (tx, rx) = mpsc::channel(64);
            let forwarder = tokio::spawn(async move {
                while let Some(message) = stream.next().await {
                    let message = match message {
                        Ok(message) => message,
                        Err(err) => {
                            warn!(error = %err, "container event stream failed");
                            break;
                        }
                    };
                    let (actor_id, attributes) = match message.actor {
                        Some(actor) => (
                            actor.id.unwrap_or_default(),
                            actor.attributes.unwrap_or_default(),
                        ),
                        None => (String::new(), HashMap::new()),
                    };
                    let event = EngineEvent {
                        action: message.action.unwrap_or_default(),
                        actor_id,
                        attributes,
                    };
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                debug!("container event forwarder finished");
            });

            let abort = forwarder.abort_handle();
            Ok(EventSubscription::new(rx, move || {
                debug!("unsubscribing from container events");
                abort.abort();
            }))
        })
    }

    fn image_exists<'a>(&'a self, image: &'a str) -> BoxFuture<'a, Result<bool, ExecError>> {
        Box::pin(async move {
            match self.docker.inspect_image(image).await {
                Ok(_) => Ok(true),
                Err(err) if is_not_found(&err) => Ok(false),
                Err(err) => Err(engine_error(err)),
            }
        })
    }

    fn pull_image<'a>(
        &'a self,
        repository: &'a str,
        tag: &'a str,
        auth: Option<&'a RegistryAuth>,
    ) -> BoxFuture<'a, Result<(), ExecError>> {
        Box::pin(async move {
            info!(image = %repository, tag = %tag, "pulling image");
            let credentials = auth.map(|auth| DockerCredentials {
                username: Some(auth.username.clone()),
                password: Some(auth.password.clone()),
                email: auth.email.clone(),
                serveraddress: Some(auth.server_address.clone()),
                ..Default::default()
            });
            let mut stream = self.docker.create_image(
                Some(CreateImageOptions {
                    from_image: repository.to_string(),
                    tag: tag.to_string(),
                    ..Default::default()
                }),
                None,
                credentials,
            );
            while let Some(progress) = stream.next().await {
                let info = progress.map_err(|err| {
                    if is_not_found(&err) {
                        ExecError::ImageNotFound {
                            image: format!("{repository}:{tag}"),
                        }
                    } else {
                        engine_error(err)
                    }
                })?;
                if let Some(status) = info.status {
                    debug!(image = %repository, "pull status: {}", status);
                }
            }
            info!(image = %repository, tag = %tag, "image pulled");
            Ok(())
        })
    }

    fn create_container<'a>(
        &'a self,
        name: &'a str,
        spec: &'a ContainerSpec,
    ) -> BoxFuture<'a, Result<String, ExecError>> {
        Box::pin(async move {
            let config = Config {
                image: Some(spec.image.clone()),
                env: Some(spec.env.clone()),
                attach_stdout: Some(spec.attach_output),
                attach_stderr: Some(spec.attach_output),
                mac_address: spec.mac_address.clone(),
                ..Default::default()
            };
            let options = CreateContainerOptions {
                name: name.to_string(),
                ..Default::default()
            };
            match self.docker.create_container(Some(options), config).await {
                Ok(response) => Ok(response.id),
                Err(err) if is_not_found(&err) => Err(ExecError::ImageNotFound {
                    image: spec.image.clone(),
                }),
                Err(err) => Err(engine_error(err)),
            }
        })
    }

    fn attach_output<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<mpsc::Receiver<String>, ExecError>> {
        Box::pin(async move {
            let attached = self
                .docker
                .attach_container(
                    id,
                    Some(AttachContainerOptions::<String> {
                        stdout: Some(true),
                        stderr: Some(true),
                        stream: Some(true),
                        logs: Some(true),
                        ..Default::default()
                    }),
                )
                .await
                .map_err(engine_error)?;

            let mut output = attached.output;
            let (tx, rx) = mpsc::channel(256);
            let container = id.to_string();
            tokio::spawn(async move {
                let mut splitter = LineSplitter::default();
                while let Some(chunk) = output.next().await {
                    let bytes = match chunk {
                        Ok(LogOutput::StdOut { message })
                        | Ok(LogOutput::StdErr { message })
                        | Ok(LogOutput::Console { message }) => message,
                        Ok(LogOutput::StdIn { .. }) => continue,
                        Err(err) => {
                            warn!(container = %container, error = %err, "error reading container output");
                            break;
                        }
                    };
                    for line in splitter.push(&bytes) {
                        if tx.send(line).await.is_err() {
                            return;
                        }
                    }
                }
                if let Some(rest) = splitter.finish() {
                    let _ = tx.send(rest).await;
                }
                debug!(container = %container, "container closed its output");
            });
            Ok(rx)
        })
    }

    fn start_container<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), ExecError>> {
        Box::pin(async move {
            self.docker
                .start_container::<String>(id, None)
                .await
                .map_err(engine_error)
        })
    }

    fn stop_container<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), ExecError>> {
        Box::pin(async move {
            self.docker
                .stop_container(id, Some(StopContainerOptions { t: 0 }))
                .await
                .map_err(engine_error)
        })
    }

    fn kill_container<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), ExecError>> {
        Box::pin(async move {
            self.docker
                .kill_container::<String>(id, None)
                .await
                .map_err(engine_error)
        })
    }

    fn remove_container<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), ExecError>> {
        Box::pin(async move {
            self.docker
                .remove_container(
                    id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await
                .map_err(engine_error)
        })
    }

    fn is_running<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool, ExecError>> {
        Box::pin(async move {
            let details = self
                .docker
                .inspect_container(id, None)
                .await
                .map_err(engine_error)?;
            Ok(details
                .state
                .and_then(|state| state.running)
                .unwrap_or(false))
        })
    }
}

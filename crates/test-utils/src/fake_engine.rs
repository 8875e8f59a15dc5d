use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use tasque::config::RegistryAuth;
use tasque::exec::BoxFuture;
use tasque::exec::ExecError;
use tasque::exec::docker::{ContainerEngine, ContainerSpec, EngineEvent, EventSubscription};

type StartScript = Box<dyn Fn(&str) -> Vec<EngineEvent> + Send + Sync>;

#[derive(Default)]
struct EngineState {
    subscribers: Vec<mpsc::Sender<EngineEvent>>,
    images: HashSet<String>,
    pulls: Vec<String>,
    /// Container id -> name.
    containers: HashMap<String, String>,
    created: Vec<(String, ContainerSpec)>,
    running: HashSet<String>,
    teardown: Vec<String>,
    output: Vec<String>,
    next_id: usize,
    image_vanishes_once: bool,
}

/// In-memory container engine.
///
/// Events are broadcast to every live subscription. Starting a container
/// emits whatever the start script returns for the new container id, so
/// tests can script `start` / `die` sequences.
#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<Mutex<EngineState>>,
    on_start: Arc<Mutex<Option<StartScript>>>,
    subscribed: Arc<AtomicUsize>,
    unsubscribed: Arc<AtomicUsize>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(self, image: &str) -> Self {
        self.state.lock().unwrap().images.insert(image.to_string());
        self
    }

    /// Output lines delivered by `attach_output`.
    pub fn with_output(self, lines: &[&str]) -> Self {
        self.state.lock().unwrap().output = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Make the first `create_container` report a missing image.
    pub fn with_image_vanishing_once(self) -> Self {
        self.state.lock().unwrap().image_vanishes_once = true;
        self
    }

    pub fn on_start(self, script: impl Fn(&str) -> Vec<EngineEvent> + Send + Sync + 'static) -> Self {
        *self.on_start.lock().unwrap() = Some(Box::new(script));
        self
    }

    /// Broadcast `event` to every live subscription.
    pub fn emit(&self, event: EngineEvent) {
        let mut state = self.state.lock().unwrap();
        state.subscribers.retain(|tx| !tx.is_closed());
        for tx in &state.subscribers {
            let _ = tx.try_send(event.clone());
        }
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribed.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribed.load(Ordering::SeqCst)
    }

    pub fn pulls(&self) -> Vec<String> {
        self.state.lock().unwrap().pulls.clone()
    }

    pub fn created(&self) -> Vec<(String, ContainerSpec)> {
        self.state.lock().unwrap().created.clone()
    }

    /// `stop` / `kill` / `remove` calls as `"<verb> <id-or-name>"`.
    pub fn teardown_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().teardown.clone()
    }

    pub fn set_running(&self, id: &str, running: bool) {
        let mut state = self.state.lock().unwrap();
        if running {
            state.running.insert(id.to_string());
        } else {
            state.running.remove(id);
        }
    }

    fn teardown(&self, verb: &str, id: &str) -> Result<(), ExecError> {
        let mut state = self.state.lock().unwrap();
        state.teardown.push(format!("{verb} {id}"));
        let known = state.containers.contains_key(id) || state.containers.values().any(|n| n == id);
        if !known {
            return Err(ExecError::Engine(format!("No such container: {id}")));
        }
        if verb != "remove" {
            state.running.remove(id);
        } else {
            state.containers.retain(|cid, name| cid != id && name != id);
        }
        Ok(())
    }
}

pub fn start_event(id: &str) -> EngineEvent {
    EngineEvent {
        action: "start".into(),
        actor_id: id.into(),
        attributes: HashMap::new(),
    }
}

pub fn die_event(id: &str, exit_code: i64) -> EngineEvent {
    EngineEvent {
        action: "die".into(),
        actor_id: id.into(),
        attributes: HashMap::from([("exitCode".to_string(), exit_code.to_string())]),
    }
}

/// `event` carrying the orchestrator labels of `task_arn` / `container_name`.
pub fn labelled(mut event: EngineEvent, task_arn: &str, container_name: &str) -> EngineEvent {
    event.attributes.insert(
        tasque::exec::ecs::TASK_ARN_LABEL.to_string(),
        task_arn.to_string(),
    );
    event.attributes.insert(
        tasque::exec::ecs::CONTAINER_NAME_LABEL.to_string(),
        container_name.to_string(),
    );
    event
}

impl ContainerEngine for FakeEngine {
    fn subscribe(&self) -> BoxFuture<'_, Result<EventSubscription, ExecError>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::channel(64);
            self.state.lock().unwrap().subscribers.push(tx);
            self.subscribed.fetch_add(1, Ordering::SeqCst);
            let unsubscribed = Arc::clone(&self.unsubscribed);
            Ok(EventSubscription::new(rx, move || {
                unsubscribed.fetch_add(1, Ordering::SeqCst);
            }))
        })
    }

    fn image_exists<'a>(&'a self, image: &'a str) -> BoxFuture<'a, Result<bool, ExecError>> {
        Box::pin(async move { Ok(self.state.lock().unwrap().images.contains(image)) })
    }

    fn pull_image<'a>(
        &'a self,
        repository: &'a str,
        tag: &'a str,
        _auth: Option<&'a RegistryAuth>,
    ) -> BoxFuture<'a, Result<(), ExecError>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let image = format!("{repository}:{tag}");
            state.pulls.push(image.clone());
            state.images.insert(image);
            if tag == "latest" {
                state.images.insert(repository.to_string());
            }
            Ok(())
        })
    }

    fn create_container<'a>(
        &'a self,
        name: &'a str,
        spec: &'a ContainerSpec,
    ) -> BoxFuture<'a, Result<String, ExecError>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if state.image_vanishes_once {
                state.image_vanishes_once = false;
                return Err(ExecError::ImageNotFound {
                    image: spec.image.clone(),
                });
            }
            if !state.images.contains(&spec.image) {
                return Err(ExecError::ImageNotFound {
                    image: spec.image.clone(),
                });
            }
            state.next_id += 1;
            let id = format!("container-{}", state.next_id);
            state.containers.insert(id.clone(), name.to_string());
            state.created.push((name.to_string(), spec.clone()));
            Ok(id)
        })
    }

    fn attach_output<'a>(
        &'a self,
        _id: &'a str,
    ) -> BoxFuture<'a, Result<mpsc::Receiver<String>, ExecError>> {
        Box::pin(async move {
            let lines = self.state.lock().unwrap().output.clone();
            let (tx, rx) = mpsc::channel(lines.len().max(1));
            for line in lines {
                let _ = tx.try_send(line);
            }
            Ok(rx)
        })
    }

    fn start_container<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), ExecError>> {
        Box::pin(async move {
            self.state.lock().unwrap().running.insert(id.to_string());
            let events = match self.on_start.lock().unwrap().as_ref() {
                Some(script) => script(id),
                None => Vec::new(),
            };
            for event in events {
                self.emit(event);
            }
            Ok(())
        })
    }

    fn stop_container<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), ExecError>> {
        Box::pin(async move { self.teardown("stop", id) })
    }

    fn kill_container<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), ExecError>> {
        Box::pin(async move { self.teardown("kill", id) })
    }

    fn remove_container<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), ExecError>> {
        Box::pin(async move { self.teardown("remove", id) })
    }

    fn is_running<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool, ExecError>> {
        Box::pin(async move { Ok(self.state.lock().unwrap().running.contains(id)) })
    }
}

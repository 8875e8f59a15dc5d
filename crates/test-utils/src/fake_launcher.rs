use std::sync::{Arc, Mutex};

use tasque::exec::docker::EngineEvent;
use tasque::exec::ecs::{LaunchRequest, LaunchResponse, TaskLauncher};
use tasque::exec::{BoxFuture, ExecError};

use crate::FakeEngine;

type LaunchScript = Box<dyn Fn(&str) -> Vec<EngineEvent> + Send + Sync>;

enum Answer {
    Response(LaunchResponse),
    Rejected(String),
}

/// Scripted orchestrator.
///
/// When an engine and an event script are attached, a successful start
/// emits the scripted events (for the new task ARN) on that engine, the
/// way the orchestrator agent would start the task's containers.
pub struct FakeLauncher {
    answer: Answer,
    engine: Option<(FakeEngine, LaunchScript)>,
    requests: Arc<Mutex<Vec<LaunchRequest>>>,
    stopped: Arc<Mutex<Vec<String>>>,
}

impl FakeLauncher {
    fn with_answer(answer: Answer) -> Self {
        Self {
            answer,
            engine: None,
            requests: Arc::new(Mutex::new(Vec::new())),
            stopped: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn starting(task_arn: &str) -> Self {
        Self::with_answer(Answer::Response(LaunchResponse {
            task_arns: vec![task_arn.to_string()],
            failures: Vec::new(),
        }))
    }

    pub fn failing(reason: &str) -> Self {
        Self::with_answer(Answer::Response(LaunchResponse {
            task_arns: Vec::new(),
            failures: vec![reason.to_string()],
        }))
    }

    /// Neither a task nor a failure.
    pub fn starting_nothing() -> Self {
        Self::with_answer(Answer::Response(LaunchResponse::default()))
    }

    pub fn rejecting(message: &str) -> Self {
        Self::with_answer(Answer::Rejected(message.to_string()))
    }

    pub fn emitting(
        mut self,
        engine: FakeEngine,
        script: impl Fn(&str) -> Vec<EngineEvent> + Send + Sync + 'static,
    ) -> Self {
        self.engine = Some((engine, Box::new(script)));
        self
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<LaunchRequest>>> {
        Arc::clone(&self.requests)
    }

    pub fn stopped(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.stopped)
    }
}

impl TaskLauncher for FakeLauncher {
    fn start_task<'a>(
        &'a self,
        request: &'a LaunchRequest,
    ) -> BoxFuture<'a, Result<LaunchResponse, ExecError>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request.clone());
            let response = match &self.answer {
                Answer::Rejected(message) => {
                    return Err(ExecError::InvalidParameter(message.clone()));
                }
                Answer::Response(response) => response.clone(),
            };
            if let (Some((engine, script)), Some(arn)) =
                (&self.engine, response.task_arns.first())
            {
                for event in script(arn) {
                    engine.emit(event);
                }
            }
            Ok(response)
        })
    }

    fn stop_task<'a>(
        &'a self,
        _cluster: &'a str,
        task_arn: &'a str,
        _reason: &'a str,
    ) -> BoxFuture<'a, Result<(), ExecError>> {
        Box::pin(async move {
            self.stopped.lock().unwrap().push(task_arn.to_string());
            Ok(())
        })
    }
}

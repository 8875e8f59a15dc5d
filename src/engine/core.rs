// src/engine/core.rs

//! Pure run core state machine.
//!
//! This module contains a synchronous, deterministic "run core" that
//! consumes [`RunEvent`]s and produces:
//! - an updated [`Outcome`]
//! - a list of commands describing what the IO shell should do next
//!
//! The async shell (`engine::supervisor::Supervisor`) is responsible for:
//! - racing execution, deadline, unit events and heartbeat ticks
//! - calling the message source and the backend
//!
//! The first terminal event (execution finished or deadline elapsed)
//! resolves the outcome. Every event after that is discarded.

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ExitAliases;
use crate::engine::{Outcome, OutcomeCode, RunEvent};
use crate::exec::{ExecError, Exit};

/// Command produced by the core, to be executed by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunCommand {
    /// Begin periodic heartbeat ticks.
    StartHeartbeat,
    /// Stop ticking; no final heartbeat is sent.
    StopHeartbeat,
    /// Call the source's heartbeat callback.
    SendHeartbeat,
    /// Tear down the still-running unit (deadline path).
    TerminateUnit,
    ReportSuccess,
    ReportFailure(Outcome),
}

/// Decision returned by the core after handling a single `RunEvent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStep {
    pub commands: Vec<RunCommand>,
    /// Whether the supervisor should keep waiting for events.
    pub keep_running: bool,
}

impl RunStep {
    fn running(commands: Vec<RunCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }

    fn finished(commands: Vec<RunCommand>) -> Self {
        Self {
            commands,
            keep_running: false,
        }
    }
}

/// Pure per-run state.
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct RunCore {
    task_id: String,
    label: String,
    timeout: Duration,
    exit_aliases: ExitAliases,
    outcome: Outcome,
    heartbeating: bool,
}

impl RunCore {
    pub fn new(
        task_id: impl Into<String>,
        label: impl Into<String>,
        timeout: Duration,
        exit_aliases: ExitAliases,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            label: label.into(),
            timeout,
            exit_aliases,
            outcome: Outcome::new(),
            heartbeating: false,
        }
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn is_heartbeating(&self) -> bool {
        self.heartbeating
    }

    /// Handle a single run event, updating the outcome and returning the
    /// resulting commands for the supervisor.
    pub fn step(&mut self, event: RunEvent) -> RunStep {
        if self.outcome.is_resolved() {
            debug!(
                task_id = %self.task_id,
                ?event,
                "run already resolved; discarding late event"
            );
            return RunStep::finished(Vec::new());
        }

        match event {
            RunEvent::UnitStarted { host } => self.handle_started(host),
            RunEvent::HeartbeatTick { alive } => self.handle_tick(alive),
            RunEvent::ExecutionFinished(Ok(exit)) => self.handle_exit(exit),
            RunEvent::ExecutionFinished(Err(err)) => self.handle_error(err),
            RunEvent::DeadlineElapsed => self.handle_deadline(),
        }
    }

    fn handle_started(&mut self, host: Option<String>) -> RunStep {
        if let Some(host) = host {
            self.outcome.set_host(host);
        }
        if self.heartbeating {
            return RunStep::running(Vec::new());
        }
        self.heartbeating = true;
        RunStep::running(vec![RunCommand::StartHeartbeat])
    }

    fn handle_tick(&mut self, alive: bool) -> RunStep {
        if !self.heartbeating {
            return RunStep::running(Vec::new());
        }
        if alive {
            RunStep::running(vec![RunCommand::SendHeartbeat])
        } else {
            self.heartbeating = false;
            RunStep::running(vec![RunCommand::StopHeartbeat])
        }
    }

    fn handle_exit(&mut self, exit: Exit) -> RunStep {
        if exit.success() {
            return self.finish(OutcomeCode::Success, String::new(), None, Some(exit.code));
        }

        let label = self.exit_aliases.get(exit.code).map(str::to_string);
        let cause = format!("{} exited with status {}", self.label, exit.code);
        self.finish(OutcomeCode::NonzeroExit, cause, label, Some(exit.code))
    }

    fn handle_error(&mut self, err: ExecError) -> RunStep {
        let (code, cause) = err.classify();
        self.finish(code, cause, None, None)
    }

    fn handle_deadline(&mut self) -> RunStep {
        let cause = format!(
            "{} timed out after {:.1} seconds",
            self.label,
            self.timeout.as_secs_f64()
        );
        self.finish(OutcomeCode::Timeout, cause, None, None)
    }

    fn finish(
        &mut self,
        code: OutcomeCode,
        cause: String,
        label: Option<String>,
        exit_code: Option<i64>,
    ) -> RunStep {
        let label = label.unwrap_or_else(|| code.as_str().to_string());
        if let Err(err) = self.outcome.resolve_labelled(code, cause, label, exit_code) {
            warn!(task_id = %self.task_id, error = %err, "refusing to overwrite outcome");
            return RunStep::finished(Vec::new());
        }

        let mut commands = Vec::new();
        if self.heartbeating {
            self.heartbeating = false;
            commands.push(RunCommand::StopHeartbeat);
        }
        if code == OutcomeCode::Timeout {
            commands.push(RunCommand::TerminateUnit);
        }
        if code.is_success() {
            commands.push(RunCommand::ReportSuccess);
        } else {
            commands.push(RunCommand::ReportFailure(self.outcome.clone()));
        }
        RunStep::finished(commands)
    }
}

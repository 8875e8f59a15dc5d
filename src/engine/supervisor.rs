// src/engine/supervisor.rs

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep, interval_at, sleep};
use tracing::{debug, info, warn};

use crate::config::ExitAliases;
use crate::engine::{RunCommand, RunCore, RunEvent, WorkItem};
use crate::errors::Result;
use crate::exec::{ExecError, ExecutionBackend, Exit, LivenessProbe, UnitEvent};
use crate::source::MessageSource;
use crate::source::spool::persist_payload;

/// Per-run knobs of the supervisor.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Deadline for dispatch + observation together.
    pub timeout: Duration,
    pub heartbeat_interval: Duration,
    pub exit_aliases: ExitAliases,
    /// Where the payload is written before dispatch; `None` disables it.
    pub payload_file: Option<PathBuf>,
}

impl RunSettings {
    pub fn new(timeout: Duration, heartbeat_interval: Duration) -> Self {
        Self {
            timeout,
            heartbeat_interval,
            exit_aliases: ExitAliases::default(),
            payload_file: None,
        }
    }
}

/// Drives one message source and one execution backend through a single
/// run: initialize → receive → dispatch/observe under a deadline → report.
///
/// This is the IO shell around [`RunCore`], which decides what every event
/// means. The supervisor only reads events from the racing activities and
/// executes the commands the core returns.
#[derive(Debug, Clone)]
pub struct Supervisor {
    settings: RunSettings,
}

/// Heartbeat ticker state, present only while the unit is known alive.
struct Heartbeat {
    period: Duration,
    ticker: Option<Interval>,
    probe: Option<Box<dyn LivenessProbe>>,
}

impl Heartbeat {
    fn new(period: Duration) -> Self {
        Self {
            period,
            ticker: None,
            probe: None,
        }
    }

    fn start(&mut self) {
        // First heartbeat one full period after the unit started.
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
    }

    fn stop(&mut self) {
        self.ticker = None;
        self.probe = None;
    }

    /// `Some(alive)` when the probe answered, `None` when it could not.
    async fn probe(&self, task_id: &str) -> Option<bool> {
        let probe = self.probe.as_ref()?;
        match probe.is_running().await {
            Ok(alive) => Some(alive),
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "liveness probe failed; skipping heartbeat");
                None
            }
        }
    }
}

/// Resolves on the next tick, or never when no ticker is running.
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl Supervisor {
    pub fn new(settings: RunSettings) -> Self {
        Self { settings }
    }

    /// Run exactly one work item from `source` on `backend`.
    ///
    /// Only startup failures (source initialisation) are returned. The
    /// outcome of the run itself is delivered to the source.
    pub async fn run(
        &self,
        source: &mut dyn MessageSource,
        backend: &mut dyn ExecutionBackend,
    ) -> Result<()> {
        info!(source = source.label(), backend = backend.label(), "initialising message source");
        source.initialize().await?;

        let Some(item) = source.receive().await else {
            info!(source = source.label(), "no work item available; nothing to do");
            return Ok(());
        };
        info!(task_id = %item.id, bytes = item.body.len(), "work item received");

        if let Some(path) = &self.settings.payload_file {
            if let Err(err) = persist_payload(path, &item).await {
                warn!(task_id = %item.id, error = %err, "failed to persist payload");
            }
        }

        let mut core = RunCore::new(
            item.id.clone(),
            backend.label().to_string(),
            self.settings.timeout,
            self.settings.exit_aliases.clone(),
        );

        let terminal = self.supervise(&mut core, source, backend, &item).await;

        // The execution activity is gone by now, so the backend is free
        // for teardown.
        for command in terminal {
            match command {
                RunCommand::TerminateUnit => {
                    info!(task_id = %item.id, "terminating unit after deadline");
                    backend.terminate().await;
                }
                RunCommand::ReportSuccess => {
                    if let Err(err) = source.success().await {
                        warn!(task_id = %item.id, error = %err, "failed to report success");
                    }
                }
                RunCommand::ReportFailure(outcome) => {
                    if let Err(err) = source.failure(&outcome).await {
                        warn!(task_id = %item.id, error = %err, "failed to report failure");
                    }
                }
                RunCommand::StartHeartbeat
                | RunCommand::StopHeartbeat
                | RunCommand::SendHeartbeat => {}
            }
        }

        let outcome = core.outcome();
        info!(
            task_id = %item.id,
            code = %outcome.code().map(|c| c.as_str()).unwrap_or("UNRESOLVED"),
            cause = %outcome.cause(),
            host = outcome.host().unwrap_or("-"),
            "run finished"
        );
        Ok(())
    }

    /// Race the execution activity against the deadline until the core
    /// resolves the outcome. Returns the terminal commands.
    async fn supervise(
        &self,
        core: &mut RunCore,
        source: &mut dyn MessageSource,
        backend: &mut dyn ExecutionBackend,
        item: &WorkItem,
    ) -> Vec<RunCommand> {
        let (unit_tx, mut unit_rx) = mpsc::channel::<UnitEvent>(8);
        let mut heartbeat = Heartbeat::new(self.settings.heartbeat_interval);

        let execution = async {
            let unit = backend.dispatch(item).await?;
            info!(task_id = %item.id, %unit, "work item dispatched");
            backend.observe(&unit, item, unit_tx).await
        };
        tokio::pin!(execution);

        let deadline = sleep(self.settings.timeout);
        tokio::pin!(deadline);

        // Terminal event that interrupted a heartbeat call.
        let mut pending: Option<RunEvent> = None;

        loop {
            let event = match pending.take() {
                Some(event) => event,
                None => tokio::select! {
                    result = &mut execution => RunEvent::ExecutionFinished(result),
                    _ = &mut deadline => RunEvent::DeadlineElapsed,
                    Some(unit_event) = unit_rx.recv() => match unit_event {
                        UnitEvent::Started { host, probe } => {
                            info!(task_id = %item.id, host = host.as_deref().unwrap_or("-"), "unit started");
                            heartbeat.probe = Some(probe);
                            RunEvent::UnitStarted { host }
                        }
                    },
                    _ = next_tick(&mut heartbeat.ticker) => {
                        let probe = heartbeat.probe(&item.id);
                        match race_terminal(probe, execution.as_mut(), deadline.as_mut()).await {
                            Raced::Done(Some(alive)) => RunEvent::HeartbeatTick { alive },
                            Raced::Done(None) => continue,
                            Raced::Interrupted(event) => event,
                        }
                    }
                },
            };

            if matches!(event, RunEvent::DeadlineElapsed) {
                warn!(
                    task_id = %item.id,
                    timeout_secs = self.settings.timeout.as_secs_f64(),
                    "deadline elapsed before the unit finished"
                );
            }

            let step = core.step(event);
            if !step.keep_running {
                return step.commands;
            }

            for command in step.commands {
                match command {
                    RunCommand::StartHeartbeat => {
                        debug!(task_id = %item.id, period = ?heartbeat.period, "starting heartbeat");
                        heartbeat.start();
                    }
                    RunCommand::StopHeartbeat => {
                        debug!(task_id = %item.id, "unit no longer running; stopping heartbeat");
                        heartbeat.stop();
                    }
                    RunCommand::SendHeartbeat => {
                        debug!(task_id = %item.id, "heartbeat");
                        let call = source.heartbeat();
                        match race_terminal(call, execution.as_mut(), deadline.as_mut()).await {
                            Raced::Done(Ok(())) => {}
                            Raced::Done(Err(err)) => {
                                warn!(task_id = %item.id, error = %err, "failed to send heartbeat");
                            }
                            Raced::Interrupted(event) => {
                                debug!(task_id = %item.id, "heartbeat call abandoned");
                                pending = Some(event);
                                break;
                            }
                        }
                    }
                    other => {
                        warn!(task_id = %item.id, command = ?other, "terminal command from a running step; ignoring");
                    }
                }
            }
        }
    }
}

/// Result of awaiting a side call while the run is still racing.
enum Raced<T> {
    Done(T),
    /// The execution or the deadline finished first; the call was dropped.
    Interrupted(RunEvent),
}

/// Await `call` without starving the execution activity or the deadline.
async fn race_terminal<T, F>(
    call: impl Future<Output = T>,
    execution: Pin<&mut F>,
    deadline: Pin<&mut Sleep>,
) -> Raced<T>
where
    F: Future<Output = std::result::Result<Exit, ExecError>>,
{
    tokio::select! {
        biased;
        result = execution => Raced::Interrupted(RunEvent::ExecutionFinished(result)),
        _ = deadline => Raced::Interrupted(RunEvent::DeadlineElapsed),
        value = call => Raced::Done(value),
    }
}

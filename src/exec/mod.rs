// src/exec/mod.rs

//! Execution layer.
//!
//! The supervisor talks to an [`ExecutionBackend`] instead of a concrete
//! process, container or orchestrator client. Each backend turns a
//! [`WorkItem`] into a [`RunningUnit`] and then observes it until it exits.
//!
//! - [`process`] runs a local binary with `tokio::process::Command`.
//! - [`docker`] runs a container on a local engine and watches its event
//!   stream for the `die` event.
//! - [`ecs`] asks the orchestrator to place a task on this instance and
//!   watches the local engine for the task's container.
//! - [`error`] holds [`ExecError`] and its outcome classification.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tracing::info;

use crate::engine::WorkItem;

pub mod docker;
pub mod ecs;
pub mod error;
pub mod process;

pub use docker::DockerBackend;
pub use ecs::EcsBackend;
pub use error::ExecError;
pub use process::ProcessBackend;

/// Environment variable carrying the payload unless configured otherwise.
pub const DEFAULT_PAYLOAD_KEY: &str = "TASK_PAYLOAD";
/// Environment variable carrying the work item id.
pub const TASK_ID_KEY: &str = "TASK_ID";

/// Boxed, sendable future used at the trait seams of this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Backend-specific handle of the thing currently executing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunningUnit {
    Process { pid: u32 },
    Container { id: String },
    Task { arn: String },
}

impl fmt::Display for RunningUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunningUnit::Process { pid } => write!(f, "process {pid}"),
            RunningUnit::Container { id } => write!(f, "container {id}"),
            RunningUnit::Task { arn } => write!(f, "task {arn}"),
        }
    }
}

/// Exit status reported by a backend once its unit terminated.
///
/// Units killed by a signal (or whose status cannot be read) report `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exit {
    pub code: i64,
}

impl Exit {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Answers "is the unit still running?" for heartbeat ticks.
pub trait LivenessProbe: Send + Sync {
    fn is_running(&self) -> BoxFuture<'_, Result<bool, ExecError>>;
}

/// Events a backend reports while observing a unit.
pub enum UnitEvent {
    /// The unit is confirmed alive. Heartbeats may start.
    Started {
        host: Option<String>,
        probe: Box<dyn LivenessProbe>,
    },
}

impl fmt::Debug for UnitEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitEvent::Started { host, .. } => f
                .debug_struct("Started")
                .field("host", host)
                .finish_non_exhaustive(),
        }
    }
}

pub type UnitEvents = mpsc::Sender<UnitEvent>;

/// Trait abstracting how a work item is run.
///
/// The supervisor drives exactly one `dispatch` + `observe` pair per run and
/// may drop the `observe` future at any point (deadline). Implementations
/// must release per-run resources on drop and on every return path.
pub trait ExecutionBackend: Send {
    /// Short label used in log records (binary, container or task name).
    fn label(&self) -> &str;

    /// Launch the work item. No unit exists when this returns an error.
    fn dispatch<'a>(
        &'a mut self,
        item: &'a WorkItem,
    ) -> BoxFuture<'a, Result<RunningUnit, ExecError>>;

    /// Block until the unit terminates.
    fn observe<'a>(
        &'a mut self,
        unit: &'a RunningUnit,
        item: &'a WorkItem,
        events: UnitEvents,
    ) -> BoxFuture<'a, Result<Exit, ExecError>>;

    /// Best-effort teardown of the current unit after a deadline.
    ///
    /// Failures are logged by the implementation, never returned.
    fn terminate(&mut self) -> BoxFuture<'_, ()>;
}

/// Which stream an output line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
    /// Combined output attached from a container.
    Container,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
            OutputStream::Container => "container",
        }
    }
}

/// Receives every output line of a running unit.
pub trait OutputSink: Send + Sync {
    fn line(&self, task_id: &str, stream: OutputStream, line: &str);
}

/// Production sink: one `tracing` record per line, tagged with the task id.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn line(&self, task_id: &str, stream: OutputStream, line: &str) {
        info!(task_id = %task_id, stream = stream.as_str(), "{}", line);
    }
}

// src/exec/process.rs

//! Local process backend.
//!
//! The work item body is passed to the child twice: in its environment
//! (payload key + `TASK_ID`) and on stdin. Stdout and stderr are streamed
//! line by line into the [`OutputSink`], tagged with the task id.

use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::engine::WorkItem;
use crate::exec::{
    BoxFuture, DEFAULT_PAYLOAD_KEY, ExecError, ExecutionBackend, Exit, LivenessProbe,
    OutputSink, OutputStream, RunningUnit, TASK_ID_KEY, TracingSink, UnitEvent, UnitEvents,
};

pub struct ProcessBackend {
    binary: String,
    args: Vec<String>,
    payload_key: String,
    host: Option<String>,
    sink: Arc<dyn OutputSink>,
    /// Spawned by `dispatch`, taken over by `observe`.
    child: Option<Child>,
}

impl ProcessBackend {
    pub fn new(binary: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            args,
            payload_key: DEFAULT_PAYLOAD_KEY.to_string(),
            host: None,
            sink: Arc::new(TracingSink),
            child: None,
        }
    }

    pub fn with_payload_key(mut self, key: impl Into<String>) -> Self {
        self.payload_key = key.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    fn spawn(&self, item: &WorkItem) -> Result<Child, ExecError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.args)
            .env(&self.payload_key, &item.body)
            .env(TASK_ID_KEY, &item.id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd.spawn().map_err(|source| ExecError::Launch {
            program: self.binary.clone(),
            source,
        })
    }
}

impl ExecutionBackend for ProcessBackend {
    fn label(&self) -> &str {
        &self.binary
    }

    fn dispatch<'a>(
        &'a mut self,
        item: &'a WorkItem,
    ) -> BoxFuture<'a, Result<RunningUnit, ExecError>> {
        Box::pin(async move {
            info!(
                task_id = %item.id,
                binary = %self.binary,
                args = ?self.args,
                "starting process"
            );
            let child = self.spawn(item)?;
            let pid = child.id().unwrap_or_default();
            self.child = Some(child);
            Ok(RunningUnit::Process { pid })
        })
    }

    fn observe<'a>(
        &'a mut self,
        unit: &'a RunningUnit,
        item: &'a WorkItem,
        events: UnitEvents,
    ) -> BoxFuture<'a, Result<Exit, ExecError>> {
        Box::pin(async move {
            let mut child = self.child.take().ok_or_else(|| {
                ExecError::Io(std::io::Error::other(format!(
                    "{unit} was not dispatched by this backend"
                )))
            })?;

            let stdin = child.stdin.take();
            let stdout = child.stdout.take();
            let stderr = child.stderr.take();

            let (alive_tx, alive_rx) = watch::channel(true);
            let started = UnitEvent::Started {
                host: self.host.clone(),
                probe: Box::new(ProcessProbe { alive: alive_rx }),
            };
            if events.send(started).await.is_err() {
                debug!(task_id = %item.id, "supervisor no longer listening for unit events");
            }

            let sink = self.sink.as_ref();
            let wait = async {
                let status = child.wait().await;
                let _ = alive_tx.send(false);
                status
            };

            // Input, both output pipes and the exit all have to finish.
            let ((), (), (), status) = tokio::join!(
                write_input(stdin, &item.body, &item.id),
                copy_lines(stdout, OutputStream::Stdout, &item.id, sink),
                copy_lines(stderr, OutputStream::Stderr, &item.id, sink),
                wait,
            );

            let status = status?;
            let code = status.code().map(i64::from).unwrap_or(-1);
            info!(
                task_id = %item.id,
                %unit,
                exit_code = code,
                success = status.success(),
                "process exited"
            );
            Ok(Exit { code })
        })
    }

    fn terminate(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            // A child still held here was never observed; one that was
            // observed is killed when the observe future is dropped.
            if let Some(mut child) = self.child.take() {
                if let Err(err) = child.kill().await {
                    warn!(binary = %self.binary, error = %err, "failed to kill process");
                }
            }
        })
    }
}

/// Liveness of a local child, flipped to `false` once it has been reaped.
struct ProcessProbe {
    alive: watch::Receiver<bool>,
}

impl LivenessProbe for ProcessProbe {
    fn is_running(&self) -> BoxFuture<'_, Result<bool, ExecError>> {
        let alive = *self.alive.borrow();
        Box::pin(async move { Ok(alive) })
    }
}

async fn write_input(stdin: Option<ChildStdin>, body: &str, task_id: &str) {
    let Some(mut stdin) = stdin else {
        return;
    };
    if let Err(err) = stdin.write_all(body.as_bytes()).await {
        // Children that never read stdin close it early; that is fine.
        debug!(task_id = %task_id, error = %err, "could not write payload to stdin");
        return;
    }
    if let Err(err) = stdin.shutdown().await {
        debug!(task_id = %task_id, error = %err, "could not close stdin");
    }
}

async fn copy_lines<R>(reader: Option<R>, stream: OutputStream, task_id: &str, sink: &dyn OutputSink)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => sink.line(task_id, stream, &line),
            Ok(None) => break,
            Err(err) => {
                warn!(
                    task_id = %task_id,
                    stream = stream.as_str(),
                    error = %err,
                    "error reading process output"
                );
                break;
            }
        }
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tasque::engine::WorkItem;
use tasque::exec::{
    BoxFuture, ExecError, ExecutionBackend, Exit, LivenessProbe, RunningUnit, UnitEvent,
    UnitEvents,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Dispatch(String),
    Observe,
    Terminate,
}

/// A scripted execution backend:
/// - `dispatch` fails with the scripted error, if any
/// - `observe` reports `Started` (when a host is set), sleeps, then exits
///   with the scripted code; `None` never exits.
pub struct FakeBackend {
    exit_code: Option<i64>,
    run_for: Duration,
    host: Option<String>,
    dispatch_error: Option<ExecError>,
    probe_delay: Duration,
    alive: Arc<AtomicBool>,
    calls: Arc<Mutex<Vec<BackendCall>>>,
}

impl FakeBackend {
    pub fn exiting(code: i64) -> Self {
        Self {
            exit_code: Some(code),
            run_for: Duration::ZERO,
            host: None,
            dispatch_error: None,
            probe_delay: Duration::ZERO,
            alive: Arc::new(AtomicBool::new(true)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn never_exiting() -> Self {
        Self {
            exit_code: None,
            ..Self::exiting(0)
        }
    }

    pub fn failing_dispatch(err: ExecError) -> Self {
        Self {
            dispatch_error: Some(err),
            ..Self::exiting(0)
        }
    }

    pub fn after(mut self, run_for: Duration) -> Self {
        self.run_for = run_for;
        self
    }

    /// Report `Started` on `host` before running.
    pub fn started_on(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Make every liveness probe take `delay` before answering.
    pub fn probe_taking(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    /// Flip to `false` to make the liveness probe report the unit gone.
    pub fn alive_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> bool {
        self.calls().contains(&BackendCall::Terminate)
    }
}

struct FakeProbe {
    alive: Arc<AtomicBool>,
    delay: Duration,
}

impl LivenessProbe for FakeProbe {
    fn is_running(&self) -> BoxFuture<'_, Result<bool, ExecError>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(self.alive.load(Ordering::SeqCst))
        })
    }
}

impl ExecutionBackend for FakeBackend {
    fn label(&self) -> &str {
        "fake-unit"
    }

    fn dispatch<'a>(
        &'a mut self,
        item: &'a WorkItem,
    ) -> BoxFuture<'a, Result<RunningUnit, ExecError>> {
        Box::pin(async move {
            self.calls
                .lock()
                .unwrap()
                .push(BackendCall::Dispatch(item.id.clone()));
            match self.dispatch_error.take() {
                Some(err) => Err(err),
                None => Ok(RunningUnit::Process { pid: 4242 }),
            }
        })
    }

    fn observe<'a>(
        &'a mut self,
        _unit: &'a RunningUnit,
        _item: &'a WorkItem,
        events: UnitEvents,
    ) -> BoxFuture<'a, Result<Exit, ExecError>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(BackendCall::Observe);
            if let Some(host) = self.host.clone() {
                let _ = events
                    .send(UnitEvent::Started {
                        host: Some(host),
                        probe: Box::new(FakeProbe {
                            alive: Arc::clone(&self.alive),
                            delay: self.probe_delay,
                        }),
                    })
                    .await;
            }
            let Some(code) = self.exit_code else {
                std::future::pending::<()>().await;
                unreachable!("pending never resolves");
            };
            tokio::time::sleep(self.run_for).await;
            self.alive.store(false, Ordering::SeqCst);
            Ok(Exit { code })
        })
    }

    fn terminate(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(BackendCall::Terminate);
            self.alive.store(false, Ordering::SeqCst);
        })
    }
}

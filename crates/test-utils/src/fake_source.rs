use std::sync::{Arc, Mutex};
use std::time::Duration;

use tasque::engine::{Outcome, WorkItem};
use tasque::errors::{Result, TasqueError};
use tasque::exec::BoxFuture;
use tasque::source::MessageSource;

/// One callback the supervisor made on the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCall {
    Initialize,
    Receive,
    Success,
    Failure(Outcome),
    Heartbeat,
}

/// Shared view of the calls a [`FakeSource`] received.
#[derive(Debug, Clone, Default)]
pub struct SourceLog(Arc<Mutex<Vec<SourceCall>>>);

impl SourceLog {
    fn push(&self, call: SourceCall) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<SourceCall> {
        self.0.lock().unwrap().clone()
    }

    pub fn successes(&self) -> usize {
        self.count(|c| matches!(c, SourceCall::Success))
    }

    pub fn heartbeats(&self) -> usize {
        self.count(|c| matches!(c, SourceCall::Heartbeat))
    }

    pub fn failures(&self) -> Vec<Outcome> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SourceCall::Failure(outcome) => Some(outcome),
                _ => None,
            })
            .collect()
    }

    /// Success and failure callbacks together.
    pub fn terminal_reports(&self) -> usize {
        self.count(|c| matches!(c, SourceCall::Success | SourceCall::Failure(_)))
    }

    fn count(&self, pred: impl Fn(&SourceCall) -> bool) -> usize {
        self.0.lock().unwrap().iter().filter(|c| pred(c)).count()
    }
}

/// A message source that:
/// - hands out at most one scripted work item
/// - records every callback in a [`SourceLog`].
pub struct FakeSource {
    item: Option<WorkItem>,
    fail_initialize: bool,
    heartbeat_delay: Duration,
    log: SourceLog,
}

impl FakeSource {
    pub fn with_item(id: &str, body: &str) -> Self {
        Self {
            item: Some(WorkItem::new(id, body)),
            fail_initialize: false,
            heartbeat_delay: Duration::ZERO,
            log: SourceLog::default(),
        }
    }

    /// A source whose queue is empty.
    pub fn empty() -> Self {
        Self {
            item: None,
            fail_initialize: false,
            heartbeat_delay: Duration::ZERO,
            log: SourceLog::default(),
        }
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    /// Make every heartbeat call take `delay` before returning.
    pub fn heartbeat_taking(mut self, delay: Duration) -> Self {
        self.heartbeat_delay = delay;
        self
    }

    pub fn log(&self) -> SourceLog {
        self.log.clone()
    }
}

impl MessageSource for FakeSource {
    fn label(&self) -> &str {
        "fake"
    }

    fn initialize(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.log.push(SourceCall::Initialize);
            if self.fail_initialize {
                return Err(TasqueError::SourceInit("fake source unreachable".into()));
            }
            Ok(())
        })
    }

    fn receive(&mut self) -> BoxFuture<'_, Option<WorkItem>> {
        Box::pin(async move {
            self.log.push(SourceCall::Receive);
            self.item.take()
        })
    }

    fn success(&mut self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.log.push(SourceCall::Success);
            Ok(())
        })
    }

    fn failure<'a>(&'a mut self, outcome: &'a Outcome) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.log.push(SourceCall::Failure(outcome.clone()));
            Ok(())
        })
    }

    fn heartbeat(&mut self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            self.log.push(SourceCall::Heartbeat);
            tokio::time::sleep(self.heartbeat_delay).await;
            Ok(())
        })
    }
}

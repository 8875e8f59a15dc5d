// tests/supervisor.rs

mod common;
use crate::common::{init_tracing, supervisor};

use std::error::Error;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::Instant;

use tasque::config::ExitAliases;
use tasque::engine::{OutcomeCode, RunSettings, Supervisor};
use tasque::errors::TasqueError;
use tasque::exec::ExecError;
use tasque::exec::ecs::PlacementFailure;
use tasque_test_utils::{BackendCall, FakeBackend, FakeSource, SourceCall};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test(start_paused = true)]
async fn zero_exit_reports_success_exactly_once() -> TestResult {
    init_tracing();
    let mut source = FakeSource::with_item("t1", "{}");
    let log = source.log();
    let mut backend = FakeBackend::exiting(0).after(Duration::from_secs(2));

    supervisor(Duration::from_secs(30), Duration::from_secs(10))
        .run(&mut source, &mut backend)
        .await?;

    assert_eq!(log.successes(), 1);
    assert_eq!(log.terminal_reports(), 1);
    assert!(!backend.terminated());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn deadline_reports_timeout_and_tears_down() -> TestResult {
    init_tracing();
    let mut source = FakeSource::with_item("t1", "{}");
    let log = source.log();
    let mut backend = FakeBackend::never_exiting().started_on("worker-1");

    supervisor(Duration::from_secs(1), Duration::from_secs(10))
        .run(&mut source, &mut backend)
        .await?;

    assert_eq!(log.successes(), 0);
    let failures = log.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].code(), Some(OutcomeCode::Timeout));
    assert!(failures[0].cause().contains("timed out"));
    assert_eq!(failures[0].host(), Some("worker-1"));
    assert!(backend.terminated());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn heartbeats_every_interval_while_running() -> TestResult {
    init_tracing();
    let mut source = FakeSource::with_item("t1", "{}");
    let log = source.log();
    let mut backend = FakeBackend::exiting(0)
        .after(Duration::from_secs(35))
        .started_on("worker-1");

    supervisor(Duration::from_secs(60), Duration::from_secs(10))
        .run(&mut source, &mut backend)
        .await?;

    // Ticks at 10s, 20s and 30s; the unit exits at 35s.
    assert_eq!(log.heartbeats(), 3);
    assert_eq!(log.calls().last(), Some(&SourceCall::Success));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn heartbeats_stop_once_the_probe_reports_the_unit_gone() -> TestResult {
    init_tracing();
    let mut source = FakeSource::with_item("t1", "{}");
    let log = source.log();
    let mut backend = FakeBackend::exiting(0)
        .after(Duration::from_secs(50))
        .started_on("worker-1");

    let alive = backend.alive_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(15)).await;
        alive.store(false, Ordering::SeqCst);
    });

    supervisor(Duration::from_secs(60), Duration::from_secs(10))
        .run(&mut source, &mut backend)
        .await?;

    // Alive at 10s, gone at 20s: one heartbeat, none after.
    assert_eq!(log.heartbeats(), 1);
    assert_eq!(log.successes(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn slow_liveness_check_does_not_delay_the_deadline() -> TestResult {
    init_tracing();
    let mut source = FakeSource::with_item("t1", "{}");
    let log = source.log();
    let mut backend = FakeBackend::never_exiting()
        .started_on("worker-1")
        .probe_taking(Duration::from_secs(120));

    let started = Instant::now();
    supervisor(Duration::from_secs(5), Duration::from_secs(1))
        .run(&mut source, &mut backend)
        .await?;

    assert!(started.elapsed() < Duration::from_secs(6), "took {:?}", started.elapsed());
    assert_eq!(log.failures()[0].code(), Some(OutcomeCode::Timeout));
    assert_eq!(log.heartbeats(), 0);
    assert!(backend.terminated());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn slow_heartbeat_call_does_not_hide_the_exit() -> TestResult {
    init_tracing();
    let mut source = FakeSource::with_item("t1", "{}").heartbeat_taking(Duration::from_secs(120));
    let log = source.log();
    let mut backend = FakeBackend::exiting(0)
        .after(Duration::from_secs(3))
        .started_on("worker-1");

    let started = Instant::now();
    supervisor(Duration::from_secs(60), Duration::from_secs(1))
        .run(&mut source, &mut backend)
        .await?;

    // The first heartbeat (at 1s) is still in flight when the unit exits.
    assert!(started.elapsed() < Duration::from_secs(4), "took {:?}", started.elapsed());
    assert_eq!(log.heartbeats(), 1);
    assert_eq!(log.successes(), 1);
    assert_eq!(log.terminal_reports(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn no_heartbeat_without_a_started_unit() -> TestResult {
    init_tracing();
    let mut source = FakeSource::with_item("t1", "{}");
    let log = source.log();
    let mut backend = FakeBackend::exiting(0).after(Duration::from_secs(45));

    supervisor(Duration::from_secs(60), Duration::from_secs(10))
        .run(&mut source, &mut backend)
        .await?;

    assert_eq!(log.heartbeats(), 0);
    Ok(())
}

#[tokio::test]
async fn nonzero_exit_uses_the_exit_alias_as_error_label() -> TestResult {
    init_tracing();
    let mut source = FakeSource::with_item("t1", "{}");
    let log = source.log();
    let mut backend = FakeBackend::exiting(3);

    let mut settings = RunSettings::new(Duration::from_secs(5), Duration::from_secs(1));
    settings.exit_aliases = ExitAliases::from_vars([("EXIT3", "InputMalformed")]);
    Supervisor::new(settings)
        .run(&mut source, &mut backend)
        .await?;

    let failures = log.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].code(), Some(OutcomeCode::NonzeroExit));
    assert_eq!(failures[0].error_label(), "InputMalformed");
    assert_eq!(failures[0].exit_code(), Some(3));
    Ok(())
}

#[tokio::test]
async fn dispatch_failure_keeps_its_classification() -> TestResult {
    init_tracing();
    let mut source = FakeSource::with_item("t1", "{}");
    let log = source.log();
    let mut backend = FakeBackend::failing_dispatch(ExecError::Placement(
        PlacementFailure::from_reason("RESOURCE:MEMORY"),
    ));

    supervisor(Duration::from_secs(5), Duration::from_secs(1))
        .run(&mut source, &mut backend)
        .await?;

    let failures = log.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].code(), Some(OutcomeCode::ResourceUnavailable));
    assert!(failures[0].cause().contains("memory"));
    assert_eq!(backend.calls(), vec![BackendCall::Dispatch("t1".into())]);
    Ok(())
}

#[tokio::test]
async fn empty_source_never_touches_the_backend() -> TestResult {
    init_tracing();
    let mut source = FakeSource::empty();
    let log = source.log();
    let mut backend = FakeBackend::exiting(0);

    supervisor(Duration::from_secs(5), Duration::from_secs(1))
        .run(&mut source, &mut backend)
        .await?;

    assert_eq!(log.calls(), vec![SourceCall::Initialize, SourceCall::Receive]);
    assert!(backend.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn initialisation_failure_is_fatal() {
    init_tracing();
    let mut source = FakeSource::with_item("t1", "{}").failing_initialize();
    let log = source.log();
    let mut backend = FakeBackend::exiting(0);

    let err = supervisor(Duration::from_secs(5), Duration::from_secs(1))
        .run(&mut source, &mut backend)
        .await
        .unwrap_err();

    assert!(matches!(err, TasqueError::SourceInit(_)));
    assert_eq!(log.calls(), vec![SourceCall::Initialize]);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn payload_is_spooled_before_dispatch() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("payload.json");

    let mut source = FakeSource::with_item("t1", "{\"frames\": [1, 2, 3]}");
    let mut backend = FakeBackend::exiting(0);

    let mut settings = RunSettings::new(Duration::from_secs(5), Duration::from_secs(1));
    settings.payload_file = Some(path.clone());
    Supervisor::new(settings)
        .run(&mut source, &mut backend)
        .await?;

    assert_eq!(std::fs::read_to_string(&path)?, "{\"frames\": [1, 2, 3]}");
    Ok(())
}

#[tokio::test]
async fn unwritable_spool_does_not_stop_the_run() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    // A regular file where a directory is expected.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "")?;

    let mut source = FakeSource::with_item("t1", "{}");
    let log = source.log();
    let mut backend = FakeBackend::exiting(0);

    let mut settings = RunSettings::new(Duration::from_secs(5), Duration::from_secs(1));
    settings.payload_file = Some(blocker.join("payload.json"));
    Supervisor::new(settings)
        .run(&mut source, &mut backend)
        .await?;

    assert_eq!(log.successes(), 1);
    Ok(())
}

// tests/ecs_backend.rs

mod common;
use crate::common::{INSTANCE_ARN, ecs_config, init_tracing, membership, supervisor};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tasque::engine::OutcomeCode;
use tasque::exec::EcsBackend;
use tasque::exec::docker::ContainerEngine;
use tasque::exec::ecs::TaskLauncher;
use tasque_test_utils::fake_engine::{die_event, labelled, start_event};
use tasque_test_utils::{FakeEngine, FakeLauncher, FakeSource, SourceCall};

type TestResult = Result<(), Box<dyn Error>>;

const TASK_ARN: &str = "arn:aws:ecs:eu-west-1:123456789012:task/prod/0c1d2e3f";

fn backend(launcher: FakeLauncher, engine: &FakeEngine) -> EcsBackend {
    let launcher: Arc<dyn TaskLauncher> = Arc::new(launcher);
    let engine: Arc<dyn ContainerEngine> = Arc::new(engine.clone());
    EcsBackend::new(launcher, engine, ecs_config(), membership())
}

#[tokio::test(start_paused = true)]
async fn labelled_die_zero_reports_success_with_instance_host() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new();
    let launcher = FakeLauncher::starting(TASK_ARN).emitting(engine.clone(), |arn| {
        vec![
            labelled(start_event("c-1"), arn, "worker"),
            labelled(die_event("c-1", 0), arn, "worker"),
        ]
    });
    let requests = launcher.requests();
    let mut backend = backend(launcher, &engine);
    let mut source = FakeSource::with_item("t1", "{\"scene\": 4}");
    let log = source.log();

    supervisor(Duration::from_secs(30), Duration::from_secs(10))
        .run(&mut source, &mut backend)
        .await?;

    assert_eq!(log.successes(), 1);
    assert_eq!(engine.subscribe_count(), 1);
    assert_eq!(engine.unsubscribe_count(), 1);

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].cluster, "prod");
    assert_eq!(requests[0].container_instance_arn, INSTANCE_ARN);
    assert_eq!(requests[0].container_name, "worker");
    assert_eq!(
        requests[0].environment,
        vec![
            ("TASK_PAYLOAD".to_string(), "{\"scene\": 4}".to_string()),
            ("TASK_ID".to_string(), "t1".to_string()),
        ]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn nonzero_exit_of_the_task_container_is_a_failure() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new();
    let launcher = FakeLauncher::starting(TASK_ARN).emitting(engine.clone(), |arn| {
        vec![
            labelled(die_event("sidecar", 0), arn, "log-router"),
            labelled(start_event("c-1"), arn, "worker"),
            labelled(die_event("c-1", 137), arn, "worker"),
        ]
    });
    let mut backend = backend(launcher, &engine);
    let mut source = FakeSource::with_item("t1", "{}");
    let log = source.log();

    supervisor(Duration::from_secs(30), Duration::from_secs(10))
        .run(&mut source, &mut backend)
        .await?;

    let failures = log.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].code(), Some(OutcomeCode::NonzeroExit));
    assert_eq!(failures[0].exit_code(), Some(137));
    assert_eq!(failures[0].host(), Some(INSTANCE_ARN));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn heartbeats_follow_the_task_container() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new();
    engine.set_running("c-1", true);
    let launcher = FakeLauncher::starting(TASK_ARN)
        .emitting(engine.clone(), |arn| vec![labelled(start_event("c-1"), arn, "worker")]);
    let mut backend = backend(launcher, &engine);
    let mut source = FakeSource::with_item("t1", "{}");
    let log = source.log();

    let script = engine.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(25)).await;
        script.set_running("c-1", false);
        tokio::time::sleep(Duration::from_secs(25)).await;
        script.emit(labelled(die_event("c-1", 0), TASK_ARN, "worker"));
    });

    supervisor(Duration::from_secs(60), Duration::from_secs(10))
        .run(&mut source, &mut backend)
        .await?;

    // Running at 10s and 20s, gone at 30s; the die event arrives at 50s.
    assert_eq!(log.heartbeats(), 2);
    assert_eq!(log.successes(), 1);
    assert_eq!(log.calls().last(), Some(&SourceCall::Success));
    assert_eq!(engine.subscribe_count(), engine.unsubscribe_count());
    Ok(())
}

#[tokio::test]
async fn memory_placement_failure_is_resource_unavailable() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new();
    let launcher = FakeLauncher::failing("RESOURCE:MEMORY");
    let stopped = launcher.stopped();
    let mut backend = backend(launcher, &engine);
    let mut source = FakeSource::with_item("t1", "{}");
    let log = source.log();

    supervisor(Duration::from_secs(30), Duration::from_secs(10))
        .run(&mut source, &mut backend)
        .await?;

    let failures = log.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].code(), Some(OutcomeCode::ResourceUnavailable));
    assert!(failures[0].cause().contains("memory"));
    // No unit was created, so there is nothing to stop.
    assert!(stopped.lock().unwrap().is_empty());
    assert_eq!(engine.subscribe_count(), engine.unsubscribe_count());
    Ok(())
}

#[tokio::test]
async fn placement_reasons_map_to_outcome_codes() -> TestResult {
    init_tracing();
    for (reason, code) in [
        ("AGENT", OutcomeCode::AgentDisconnected),
        ("ATTRIBUTE", OutcomeCode::AttributeMismatch),
        ("Insufficient MEMORY on instance", OutcomeCode::ResourceUnavailable),
        ("RESOURCE:CPU", OutcomeCode::ResourceUnavailable),
        ("SOMETHING_NEW", OutcomeCode::Unknown),
    ] {
        let engine = FakeEngine::new();
        let mut backend = backend(FakeLauncher::failing(reason), &engine);
        let mut source = FakeSource::with_item("t1", "{}");
        let log = source.log();

        supervisor(Duration::from_secs(30), Duration::from_secs(10))
            .run(&mut source, &mut backend)
            .await?;

        assert_eq!(log.failures()[0].code(), Some(code), "reason {reason}");
    }
    Ok(())
}

#[tokio::test]
async fn rejected_parameters_are_parameter_invalid() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new();
    let mut backend = backend(FakeLauncher::rejecting("container name not in task definition"), &engine);
    let mut source = FakeSource::with_item("t1", "{}");
    let log = source.log();

    supervisor(Duration::from_secs(30), Duration::from_secs(10))
        .run(&mut source, &mut backend)
        .await?;

    assert_eq!(log.failures()[0].code(), Some(OutcomeCode::ParameterInvalid));
    assert_eq!(engine.subscribe_count(), engine.unsubscribe_count());
    Ok(())
}

#[tokio::test]
async fn empty_start_answer_is_unknown() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new();
    let mut backend = backend(FakeLauncher::starting_nothing(), &engine);
    let mut source = FakeSource::with_item("t1", "{}");
    let log = source.log();

    supervisor(Duration::from_secs(30), Duration::from_secs(10))
        .run(&mut source, &mut backend)
        .await?;

    assert_eq!(log.failures()[0].code(), Some(OutcomeCode::Unknown));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn deadline_stops_the_task() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new();
    let launcher = FakeLauncher::starting(TASK_ARN);
    let stopped = launcher.stopped();
    let mut backend = backend(launcher, &engine);
    let mut source = FakeSource::with_item("t1", "{}");
    let log = source.log();

    supervisor(Duration::from_secs(5), Duration::from_secs(1))
        .run(&mut source, &mut backend)
        .await?;

    assert_eq!(log.failures()[0].code(), Some(OutcomeCode::Timeout));
    assert_eq!(*stopped.lock().unwrap(), vec![TASK_ARN.to_string()]);
    assert_eq!(engine.subscribe_count(), 1);
    assert_eq!(engine.unsubscribe_count(), 1);
    Ok(())
}

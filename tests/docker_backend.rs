// tests/docker_backend.rs

mod common;
use crate::common::{CONTAINER, IMAGE, docker_config, init_tracing, supervisor};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tasque::engine::{OutcomeCode, WorkItem};
use tasque::exec::docker::ContainerEngine;
use tasque::exec::{DockerBackend, ExecutionBackend, OutputStream};
use tasque_test_utils::fake_engine::{die_event, start_event};
use tasque_test_utils::{FakeEngine, FakeSource, RecordingSink};

type TestResult = Result<(), Box<dyn Error>>;

fn backend(engine: &FakeEngine) -> DockerBackend {
    let engine: Arc<dyn ContainerEngine> = Arc::new(engine.clone());
    DockerBackend::new(engine, docker_config()).with_host("worker-1")
}

#[tokio::test(start_paused = true)]
async fn matching_die_zero_reports_success() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new()
        .with_image(IMAGE)
        .on_start(|id| vec![start_event(id), die_event(id, 0)]);
    let mut backend = backend(&engine);
    let mut source = FakeSource::with_item("t1", "{\"n\": 1}");
    let log = source.log();

    supervisor(Duration::from_secs(30), Duration::from_secs(10))
        .run(&mut source, &mut backend)
        .await?;

    assert_eq!(log.successes(), 1);
    assert_eq!(log.terminal_reports(), 1);
    assert_eq!(engine.subscribe_count(), 1);
    assert_eq!(engine.unsubscribe_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn die_events_of_other_containers_are_ignored() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new()
        .with_image(IMAGE)
        .on_start(|id| vec![die_event("someone-else", 1), start_event(id), die_event(id, 0)]);
    let mut backend = backend(&engine);
    let mut source = FakeSource::with_item("t1", "{}");
    let log = source.log();

    supervisor(Duration::from_secs(30), Duration::from_secs(10))
        .run(&mut source, &mut backend)
        .await?;

    assert_eq!(log.successes(), 1);
    assert!(log.failures().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn second_die_for_the_same_container_is_ignored() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new()
        .with_image(IMAGE)
        .on_start(|id| vec![start_event(id), die_event(id, 0), die_event(id, 9)]);
    let mut backend = backend(&engine);
    let mut source = FakeSource::with_item("t1", "{}");
    let log = source.log();

    supervisor(Duration::from_secs(30), Duration::from_secs(10))
        .run(&mut source, &mut backend)
        .await?;

    assert_eq!(log.successes(), 1);
    assert!(log.failures().is_empty());
    assert_eq!(log.terminal_reports(), 1);
    assert_eq!(engine.subscribe_count(), engine.unsubscribe_count());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn nonzero_die_reports_failure() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new()
        .with_image(IMAGE)
        .on_start(|id| vec![start_event(id), die_event(id, 2)]);
    let mut backend = backend(&engine);
    let mut source = FakeSource::with_item("t1", "{}");
    let log = source.log();

    supervisor(Duration::from_secs(30), Duration::from_secs(10))
        .run(&mut source, &mut backend)
        .await?;

    let failures = log.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].code(), Some(OutcomeCode::NonzeroExit));
    assert_eq!(failures[0].exit_code(), Some(2));
    assert_eq!(failures[0].host(), Some("worker-1"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn deadline_tears_the_container_down_and_unsubscribes() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new()
        .with_image(IMAGE)
        .on_start(|id| vec![start_event(id)]);
    let mut backend = backend(&engine);
    let mut source = FakeSource::with_item("t1", "{}");
    let log = source.log();

    supervisor(Duration::from_secs(5), Duration::from_secs(1))
        .run(&mut source, &mut backend)
        .await?;

    let failures = log.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].code(), Some(OutcomeCode::Timeout));
    assert_eq!(log.successes(), 0);
    // The container was running, so heartbeats went out before the deadline.
    assert!(log.heartbeats() >= 3);

    assert_eq!(engine.subscribe_count(), engine.unsubscribe_count());
    let teardown = engine.teardown_calls();
    for verb in ["stop", "kill", "remove"] {
        assert!(
            teardown.contains(&format!("{verb} container-1")),
            "missing {verb} in {teardown:?}"
        );
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn leftover_cleanup_of_a_missing_container_is_harmless() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new()
        .with_image(IMAGE)
        .on_start(|id| vec![die_event(id, 0)]);
    let mut backend = backend(&engine);
    let mut source = FakeSource::with_item("t1", "{}");
    let log = source.log();

    supervisor(Duration::from_secs(30), Duration::from_secs(10))
        .run(&mut source, &mut backend)
        .await?;

    assert_eq!(log.successes(), 1);
    assert_eq!(
        engine.teardown_calls()[..3],
        [
            format!("stop {CONTAINER}"),
            format!("kill {CONTAINER}"),
            format!("remove {CONTAINER}"),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn container_gets_payload_task_id_and_definition_env() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new().with_image(IMAGE);
    let mut backend = backend(&engine);
    let item = WorkItem::new("t1", "hello");

    backend.dispatch(&item).await?;

    let created = engine.created();
    assert_eq!(created.len(), 1);
    let (name, spec) = &created[0];
    assert_eq!(name, CONTAINER);
    assert_eq!(spec.image, IMAGE);
    assert_eq!(
        spec.env,
        vec![
            "TASK_PAYLOAD=hello".to_string(),
            "TASK_ID=t1".to_string(),
            "MODE=batch".to_string(),
        ]
    );
    backend.terminate().await;
    assert_eq!(engine.subscribe_count(), engine.unsubscribe_count());
    Ok(())
}

#[tokio::test]
async fn absent_image_is_pulled_before_create() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new();
    let mut backend = backend(&engine);

    backend.dispatch(&WorkItem::new("t1", "{}")).await?;

    assert_eq!(engine.pulls(), vec![IMAGE.to_string()]);
    assert_eq!(engine.created().len(), 1);
    Ok(())
}

#[tokio::test]
async fn image_missing_at_create_is_pulled_and_retried_once() -> TestResult {
    init_tracing();
    let engine = FakeEngine::new().with_image(IMAGE).with_image_vanishing_once();
    let mut backend = backend(&engine);

    backend.dispatch(&WorkItem::new("t1", "{}")).await?;

    assert_eq!(engine.pulls(), vec![IMAGE.to_string()]);
    assert_eq!(engine.created().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn container_output_is_streamed_to_the_sink() -> TestResult {
    init_tracing();
    let sink = Arc::new(RecordingSink::new());
    let engine = FakeEngine::new()
        .with_image(IMAGE)
        .with_output(&["rendering frame 1", "rendering frame 2"])
        .on_start(|id| vec![die_event(id, 0)]);
    let mut backend = backend(&engine).with_sink(sink.clone());
    let mut source = FakeSource::with_item("t1", "{}");

    supervisor(Duration::from_secs(30), Duration::from_secs(10))
        .run(&mut source, &mut backend)
        .await?;

    assert_eq!(
        sink.text(OutputStream::Container),
        vec!["rendering frame 1".to_string(), "rendering frame 2".to_string()]
    );
    assert!(sink.lines().iter().all(|(task_id, _, _)| task_id == "t1"));
    Ok(())
}

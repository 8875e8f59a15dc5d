// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod source;
pub mod types;

use std::sync::Arc;

use tracing::info;

use crate::cli::CliArgs;
use crate::config::{AgentConfig, BackendConfig, SourceConfig};
use crate::engine::{RunSettings, Supervisor};
use crate::errors::{Result, TasqueError};
use crate::exec::docker::{BollardEngine, ContainerEngine};
use crate::exec::ecs::metadata::{DISCOVERY_CEILING, DISCOVERY_INTERVAL};
use crate::exec::ecs::{HttpMetadataProvider, SdkTaskLauncher, discover_membership};
use crate::exec::{DockerBackend, EcsBackend, ExecutionBackend, ProcessBackend};
use crate::source::{EnvSource, MessageSource, SfnSource, SqsSource};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - configuration (CLI flags + environment)
/// - the message source
/// - the execution backend (connecting to the engine / orchestrator)
/// - the supervisor, which runs exactly one work item
pub async fn run(args: CliArgs) -> Result<()> {
    let config = config::load(args)?;
    info!(
        source = ?config.source,
        timeout = ?config.task_timeout,
        heartbeat = ?config.heartbeat_interval,
        "tasque starting"
    );

    let mut source = build_source(&config);
    let mut backend = build_backend(&config).await?;

    let mut settings = RunSettings::new(config.task_timeout, config.heartbeat_interval);
    settings.exit_aliases = config.exit_aliases.clone();
    settings.payload_file = Some(config.payload_file.clone());

    Supervisor::new(settings)
        .run(source.as_mut(), backend.as_mut())
        .await
}

fn build_source(config: &AgentConfig) -> Box<dyn MessageSource> {
    match &config.source {
        SourceConfig::Env { payload } => Box::new(EnvSource::new(payload.clone())),
        SourceConfig::Sqs { queue_url, region } => Box::new(SqsSource::new(
            queue_url.clone(),
            region.clone(),
            config.heartbeat_interval,
        )),
        SourceConfig::Sfn {
            activity_arn,
            region,
        } => Box::new(SfnSource::new(
            activity_arn.clone(),
            region.clone(),
            config.host_name.clone(),
        )),
    }
}

async fn build_backend(config: &AgentConfig) -> Result<Box<dyn ExecutionBackend>> {
    match &config.backend {
        BackendConfig::Local {
            binary,
            args,
            payload_key,
        } => Ok(Box::new(
            ProcessBackend::new(binary.clone(), args.clone())
                .with_payload_key(payload_key.clone())
                .with_host(config.host_name.clone()),
        )),
        BackendConfig::Docker(docker) => {
            let engine: Arc<dyn ContainerEngine> =
                Arc::new(BollardEngine::connect(&docker.endpoint)?);
            Ok(Box::new(
                DockerBackend::new(engine, docker.clone()).with_host(config.host_name.clone()),
            ))
        }
        BackendConfig::Ecs(ecs) => {
            let engine: Arc<dyn ContainerEngine> =
                Arc::new(BollardEngine::connect(&ecs.endpoint)?);
            let provider = HttpMetadataProvider::new(ecs.metadata_url.clone())
                .map_err(TasqueError::Other)?;
            let membership =
                discover_membership(&provider, DISCOVERY_CEILING, DISCOVERY_INTERVAL).await?;
            let launcher = Arc::new(SdkTaskLauncher::from_env().await);
            Ok(Box::new(EcsBackend::new(
                launcher,
                engine,
                ecs.clone(),
                membership,
            )))
        }
    }
}

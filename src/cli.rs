// src/cli.rs

//! CLI argument parsing using `clap`.
//!
//! Every flag can also be supplied through the environment, which is how the
//! agent is normally configured inside a container or instance user-data.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::types::{ExecuteMethod, parse_duration};

/// Command-line arguments for `tasque`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "tasque",
    version,
    about = "Pass messages to executables and Docker containers from AWS SQS or Step Functions.",
    long_about = None
)]
pub struct CliArgs {
    /// Execution environment: local, docker, or ecs [default: local].
    ///
    /// `DEPLOY_METHOD` is honoured when neither the flag nor
    /// `EXECUTE_METHOD` is set.
    #[arg(
        short = 'm',
        long,
        alias = "deploy-method",
        env = "EXECUTE_METHOD",
        value_enum
    )]
    pub execute_method: Option<ExecuteMethod>,

    /// Name for the new container (docker) or the container to override (ecs).
    #[arg(
        short = 'n',
        long,
        env = "CONTAINER_NAME",
        default_value = "tasque_executable"
    )]
    pub container_name: String,

    /// Endpoint of the container engine API.
    #[arg(
        short = 'e',
        long,
        env = "DOCKER_ENDPOINT",
        default_value = "unix:///var/run/docker.sock"
    )]
    pub docker_endpoint: String,

    /// ECS task definition ARN, or a JSON container definition for docker.
    #[arg(short = 'f', long, env = "TASK_DEFINITION")]
    pub task_definition: Option<String>,

    /// Step Functions activity ARN or SQS queue URL to receive messages on.
    ///
    /// Falls back to `TASK_QUEUE_URL`, then `TASK_ACTIVITY_ARN`.
    #[arg(
        short = 'q',
        long,
        visible_alias = "sqs-queue-url",
        alias = "sfn-activity-arn",
        env = "RECEIVE_PATH"
    )]
    pub receive_path: Option<String>,

    /// Heartbeat interval while the unit is running (e.g. 10s, 40m, 1h, 3d).
    #[arg(
        short = 'b',
        long = "heartbeat",
        alias = "sfn-heartbeat",
        env = "TASK_HEARTBEAT",
        value_parser = parse_duration,
        default_value = "30s"
    )]
    pub heartbeat: Duration,

    /// Payload passed to the executable when no queue is configured.
    ///
    /// Falls back to `PAYLOAD`.
    #[arg(short = 'p', long, env = "TASK_PAYLOAD")]
    pub payload: Option<String>,

    /// Environment variable that carries the payload inside the executable.
    #[arg(long, env = "TASK_PAYLOAD_KEY", default_value = "TASK_PAYLOAD")]
    pub payload_key: String,

    /// Maximum time the executable may run (e.g. 10s, 40m, 1h, 3d).
    #[arg(
        short = 't',
        long,
        env = "TASK_TIMEOUT",
        value_parser = parse_duration,
        default_value = "30s"
    )]
    pub task_timeout: Duration,

    /// Registry authentication JSON: {"auth": "<base64 user:pass>", "server": ...}.
    #[arg(long, env = "DOCKER_AUTH_DATA", hide_env_values = true)]
    pub docker_auth: Option<String>,

    /// Pull the image before every run, even if it is present locally.
    #[arg(long, env = "DOCKER_ALWAYS_PULL")]
    pub always_pull: bool,

    /// Name of this host, reported as the worker name and outcome host.
    ///
    /// Defaults to the system host name.
    #[arg(long, env = "HOSTNAME")]
    pub host_name: Option<String>,

    /// File the received payload is written to before dispatch.
    #[arg(long, env = "TASK_PAYLOAD_FILE", default_value = "payload.json")]
    pub payload_file: PathBuf,

    /// ECS agent introspection endpoint used to discover cluster membership.
    #[arg(
        long,
        env = "ECS_METADATA_URL",
        default_value = "http://localhost:51678/v1/metadata"
    )]
    pub ecs_metadata_url: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASQUE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Binary and arguments to run in `local` mode.
    #[arg(trailing_var_arg = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

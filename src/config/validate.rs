// src/config/validate.rs

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use serde::Deserialize;

use crate::cli::CliArgs;
use crate::config::model::{
    AgentConfig, BackendConfig, DockerConfig, DockerTaskDefinition, EcsConfig, ExitAliases,
    RegistryAuth, SourceConfig,
};
use crate::errors::{Result, TasqueError};
use crate::types::ExecuteMethod;

const SFN_ACTIVITY_ARN_FORMAT: &str = r"^arn:aws:states:([^:]+):[^:]+:activity:[^:]+$";
const SQS_URL_FORMAT: &str = r"^https://sqs\.([a-zA-Z0-9-]+)\.amazonaws\.com/[^/]+/.+$";
const DEFAULT_HOST_NAME: &str = "localhost";

impl TryFrom<CliArgs> for AgentConfig {
    type Error = TasqueError;

    fn try_from(args: CliArgs) -> std::result::Result<Self, Self::Error> {
        validate_durations(&args)?;
        let source = source_from_args(&args)?;
        let backend = backend_from_args(&args)?;

        Ok(AgentConfig {
            source,
            backend,
            task_timeout: args.task_timeout,
            heartbeat_interval: args.heartbeat,
            host_name: args
                .host_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_HOST_NAME.to_string()),
            payload_file: args.payload_file,
            exit_aliases: ExitAliases::default(),
        })
    }
}

fn validate_durations(args: &CliArgs) -> Result<()> {
    if args.task_timeout == Duration::ZERO {
        return Err(TasqueError::ConfigError(
            "--task-timeout must be greater than zero".to_string(),
        ));
    }
    if args.heartbeat == Duration::ZERO {
        return Err(TasqueError::ConfigError(
            "--heartbeat must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Pick the message source from the receive path: an activity ARN selects
/// Step Functions, a queue URL selects SQS, anything else (including no
/// path) falls back to the payload literal.
fn source_from_args(args: &CliArgs) -> Result<SourceConfig> {
    let path = args.receive_path.as_deref().unwrap_or("").trim();

    let sfn = Regex::new(SFN_ACTIVITY_ARN_FORMAT).map_err(anyhow::Error::from)?;
    if let Some(caps) = sfn.captures(path) {
        return Ok(SourceConfig::Sfn {
            activity_arn: path.to_string(),
            region: caps[1].to_string(),
        });
    }

    let sqs = Regex::new(SQS_URL_FORMAT).map_err(anyhow::Error::from)?;
    if let Some(caps) = sqs.captures(path) {
        return Ok(SourceConfig::Sqs {
            queue_url: path.to_string(),
            region: caps[1].to_string(),
        });
    }

    if !path.is_empty() {
        return Err(TasqueError::ConfigError(format!(
            "--receive-path '{path}' is neither a Step Functions activity ARN nor an SQS queue URL"
        )));
    }

    Ok(SourceConfig::Env {
        payload: args.payload.clone().unwrap_or_default(),
    })
}

fn backend_from_args(args: &CliArgs) -> Result<BackendConfig> {
    match args.execute_method.unwrap_or_default() {
        ExecuteMethod::Local => {
            let (binary, rest) = args.command.split_first().ok_or_else(|| {
                TasqueError::ConfigError(
                    "local execution requires a binary to run (pass it after the flags)"
                        .to_string(),
                )
            })?;
            Ok(BackendConfig::Local {
                binary: binary.clone(),
                args: rest.to_vec(),
                payload_key: args.payload_key.clone(),
            })
        }
        ExecuteMethod::Docker => {
            let raw = required_task_definition(args)?;
            let task_definition: DockerTaskDefinition =
                serde_json::from_str(raw).map_err(|e| {
                    TasqueError::ConfigError(format!(
                        "--task-definition is not a valid docker container definition: {e}"
                    ))
                })?;
            if task_definition.image_name.trim().is_empty() {
                return Err(TasqueError::ConfigError(
                    "docker task definition must set ImageName".to_string(),
                ));
            }
            let auth = args
                .docker_auth
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .map(parse_registry_auth)
                .transpose()?;
            Ok(BackendConfig::Docker(DockerConfig {
                container_name: args.container_name.clone(),
                endpoint: args.docker_endpoint.clone(),
                task_definition,
                auth,
                always_pull: args.always_pull,
                payload_key: args.payload_key.clone(),
            }))
        }
        ExecuteMethod::Ecs => {
            let task_definition = required_task_definition(args)?.to_string();
            Ok(BackendConfig::Ecs(EcsConfig {
                container_name: args.container_name.clone(),
                endpoint: args.docker_endpoint.clone(),
                task_definition,
                payload_key: args.payload_key.clone(),
                metadata_url: args.ecs_metadata_url.clone(),
            }))
        }
    }
}

fn required_task_definition(args: &CliArgs) -> Result<&str> {
    args.task_definition
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            TasqueError::ConfigError(format!(
                "--task-definition is required for {} execution",
                args.execute_method.unwrap_or_default()
            ))
        })
}

#[derive(Debug, Deserialize)]
struct RawAuthData {
    auth: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    server: String,
}

/// Decode `{"auth": base64("user:pass"), "email": ..., "server": ...}`.
pub fn parse_registry_auth(blob: &str) -> Result<RegistryAuth> {
    let raw: RawAuthData = serde_json::from_str(blob).map_err(|e| {
        TasqueError::ConfigError(format!("docker auth data is not valid JSON: {e}"))
    })?;
    let decoded = STANDARD.decode(raw.auth.trim()).map_err(|e| {
        TasqueError::ConfigError(format!("docker auth token is not valid base64: {e}"))
    })?;
    let decoded = String::from_utf8(decoded).map_err(|e| {
        TasqueError::ConfigError(format!("docker auth token is not UTF-8: {e}"))
    })?;
    let (username, password) = decoded.split_once(':').ok_or_else(|| {
        TasqueError::ConfigError("docker auth token must decode to user:password".to_string())
    })?;

    Ok(RegistryAuth {
        username: username.to_string(),
        password: password.to_string(),
        server_address: raw.server,
        email: raw.email.filter(|e| !e.is_empty()),
    })
}

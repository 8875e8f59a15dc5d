// src/config/loader.rs

use clap::ValueEnum;

use crate::cli::CliArgs;
use crate::config::model::{AgentConfig, ExitAliases};
use crate::errors::{Result, TasqueError};
use crate::types::ExecuteMethod;

/// Older names for the execute method, receive path and payload. Consulted
/// only when the flag and its primary variable are both unset.
pub const DEPLOY_METHOD_ENV: &str = "DEPLOY_METHOD";
pub const QUEUE_URL_ENV: &str = "TASK_QUEUE_URL";
pub const ACTIVITY_ARN_ENV: &str = "TASK_ACTIVITY_ARN";
pub const PAYLOAD_ENV: &str = "PAYLOAD";

const HOSTNAME_FILES: [&str; 2] = ["/proc/sys/kernel/hostname", "/etc/hostname"];

/// Build the agent configuration from parsed arguments and the process
/// environment.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Fills unset values from the fallback variables and the system host name.
/// - Validates the arguments (see `validate.rs`).
/// - Picks the message source and execution backend.
/// - Collects `EXIT<n>` error labels from the environment.
pub fn load(args: CliArgs) -> Result<AgentConfig> {
    let mut args = with_env_fallbacks(args, |key| std::env::var(key).ok())?;
    if args.host_name.is_none() {
        args.host_name = system_hostname();
    }
    load_with_aliases(args, ExitAliases::from_env())
}

/// Same as [`load`], with explicit exit aliases instead of the process
/// environment.
pub fn load_with_aliases(args: CliArgs, exit_aliases: ExitAliases) -> Result<AgentConfig> {
    let mut config = AgentConfig::try_from(args)?;
    config.exit_aliases = exit_aliases;
    Ok(config)
}

/// Fill values clap left unset from the fallback variables, read through
/// `lookup`. Empty values count as unset.
pub fn with_env_fallbacks(
    mut args: CliArgs,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<CliArgs> {
    let var = |key: &str| {
        lookup(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    if args.execute_method.is_none() {
        if let Some(raw) = var(DEPLOY_METHOD_ENV) {
            let method = <ExecuteMethod as ValueEnum>::from_str(&raw, true).map_err(|e| {
                TasqueError::ConfigError(format!("{DEPLOY_METHOD_ENV}='{raw}': {e}"))
            })?;
            args.execute_method = Some(method);
        }
    }
    if args.receive_path.is_none() {
        args.receive_path = var(QUEUE_URL_ENV).or_else(|| var(ACTIVITY_ARN_ENV));
    }
    if args.payload.is_none() {
        args.payload = var(PAYLOAD_ENV);
    }
    Ok(args)
}

/// Host name as the kernel reports it.
pub fn system_hostname() -> Option<String> {
    HOSTNAME_FILES
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use clap::Parser;

    use super::*;
    use crate::config::SourceConfig;

    fn bare_args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["tasque"];
        argv.extend_from_slice(extra);
        let mut args = CliArgs::try_parse_from(argv).unwrap();
        // Isolate from whatever the test process inherited.
        args.execute_method = None;
        args.receive_path = None;
        args.payload = None;
        args
    }

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn deploy_method_selects_the_backend() {
        let args = with_env_fallbacks(bare_args(&[]), env(&[("DEPLOY_METHOD", "Docker")])).unwrap();
        assert_eq!(args.execute_method, Some(ExecuteMethod::Docker));
    }

    #[test]
    fn explicit_method_wins_over_deploy_method() {
        let mut args = bare_args(&[]);
        args.execute_method = Some(ExecuteMethod::Ecs);
        let args = with_env_fallbacks(args, env(&[("DEPLOY_METHOD", "docker")])).unwrap();
        assert_eq!(args.execute_method, Some(ExecuteMethod::Ecs));
    }

    #[test]
    fn unknown_deploy_method_is_a_config_error() {
        let err = with_env_fallbacks(bare_args(&[]), env(&[("DEPLOY_METHOD", "lambda")]))
            .unwrap_err();
        match err {
            TasqueError::ConfigError(msg) => assert!(msg.contains("lambda")),
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }

    #[test]
    fn queue_url_variable_selects_sqs() {
        let url = "https://sqs.eu-west-1.amazonaws.com/123456789012/jobs";
        let args = with_env_fallbacks(
            bare_args(&["/bin/true"]),
            env(&[("TASK_QUEUE_URL", url)]),
        )
        .unwrap();
        let cfg = load_with_aliases(args, ExitAliases::default()).unwrap();
        assert_eq!(
            cfg.source,
            SourceConfig::Sqs {
                queue_url: url.to_string(),
                region: "eu-west-1".to_string(),
            }
        );
    }

    #[test]
    fn activity_arn_variable_selects_sfn() {
        let arn = "arn:aws:states:us-west-2:123456789012:activity:render";
        let args = with_env_fallbacks(
            bare_args(&["/bin/true"]),
            env(&[("TASK_ACTIVITY_ARN", arn)]),
        )
        .unwrap();
        let cfg = load_with_aliases(args, ExitAliases::default()).unwrap();
        assert!(matches!(
            cfg.source,
            SourceConfig::Sfn { ref activity_arn, .. } if activity_arn == arn
        ));
    }

    #[test]
    fn queue_url_takes_precedence_over_activity_arn() {
        let args = with_env_fallbacks(
            bare_args(&[]),
            env(&[("TASK_QUEUE_URL", "q"), ("TASK_ACTIVITY_ARN", "a")]),
        )
        .unwrap();
        assert_eq!(args.receive_path.as_deref(), Some("q"));
    }

    #[test]
    fn payload_variable_fills_the_literal() {
        let args = with_env_fallbacks(bare_args(&["/bin/cat"]), env(&[("PAYLOAD", "{\"n\":2}")]))
            .unwrap();
        let cfg = load_with_aliases(args, ExitAliases::default()).unwrap();
        assert_eq!(
            cfg.source,
            SourceConfig::Env {
                payload: "{\"n\":2}".to_string()
            }
        );
    }

    #[test]
    fn blank_fallbacks_are_ignored() {
        let args = with_env_fallbacks(
            bare_args(&[]),
            env(&[("DEPLOY_METHOD", "  "), ("TASK_QUEUE_URL", "")]),
        )
        .unwrap();
        assert_eq!(args.execute_method, None);
        assert_eq!(args.receive_path, None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn system_hostname_is_trimmed() {
        let name = system_hostname().unwrap();
        assert!(!name.is_empty());
        assert_eq!(name, name.trim());
    }
}

// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Fully validated agent configuration.
///
/// Built once at startup from [`crate::cli::CliArgs`] (see
/// [`crate::config::load`]) and passed by reference to whatever needs it.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub source: SourceConfig,
    pub backend: BackendConfig,
    pub task_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Reported as worker name and outcome host.
    pub host_name: String,
    /// Where the received payload is written before dispatch.
    pub payload_file: PathBuf,
    pub exit_aliases: ExitAliases,
}

/// Which message source supplies the work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    /// Payload literal from the command line / environment.
    Env { payload: String },
    /// SQS queue; region parsed from the queue URL.
    Sqs { queue_url: String, region: String },
    /// Step Functions activity; region parsed from the ARN.
    Sfn { activity_arn: String, region: String },
}

/// Which execution backend runs the work item.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Local {
        binary: String,
        args: Vec<String>,
        payload_key: String,
    },
    Docker(DockerConfig),
    Ecs(EcsConfig),
}

#[derive(Debug, Clone)]
pub struct DockerConfig {
    pub container_name: String,
    pub endpoint: String,
    pub task_definition: DockerTaskDefinition,
    pub auth: Option<RegistryAuth>,
    pub always_pull: bool,
    pub payload_key: String,
}

#[derive(Debug, Clone)]
pub struct EcsConfig {
    /// Container of the task definition whose environment is overridden.
    pub container_name: String,
    pub endpoint: String,
    pub task_definition: String,
    pub payload_key: String,
    pub metadata_url: String,
}

/// JSON container definition accepted by the docker backend:
///
/// ```json
/// {"ImageName": "busybox:1.36", "MacAddress": "", "Env": ["MODE=batch"]}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DockerTaskDefinition {
    pub image_name: String,

    #[serde(default)]
    pub mac_address: Option<String>,

    /// Extra `KEY=VALUE` entries for the container environment.
    #[serde(default)]
    pub env: Vec<String>,
}

impl DockerTaskDefinition {
    /// Split `image_name` into repository and tag (`latest` when absent).
    ///
    /// A colon that belongs to a registry port (`host:5000/img`) is not a tag
    /// separator.
    pub fn repository_and_tag(&self) -> (&str, &str) {
        let name = self.image_name.as_str();
        match name.rfind(':') {
            Some(idx) if !name[idx + 1..].contains('/') => (&name[..idx], &name[idx + 1..]),
            _ => (name, "latest"),
        }
    }
}

/// Decoded registry credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    pub server_address: String,
    pub email: Option<String>,
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("server_address", &self.server_address)
            .finish_non_exhaustive()
    }
}

/// Error labels for specific exit statuses, from `EXIT<n>=<Label>` variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitAliases(BTreeMap<i64, String>);

impl ExitAliases {
    /// Collect aliases from `(name, value)` pairs, ignoring anything that is
    /// not `EXIT<integer>` with a non-empty value.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (name, value) in vars {
            let Some(code) = name.as_ref().strip_prefix("EXIT") else {
                continue;
            };
            let Ok(code) = code.parse::<i64>() else {
                continue;
            };
            let value = value.into();
            if !value.is_empty() {
                map.insert(code, value);
            }
        }
        Self(map)
    }

    /// Aliases defined in the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn get(&self, code: i64) -> Option<&str> {
        self.0.get(&code).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_aliases_only_take_numeric_exit_vars() {
        let aliases = ExitAliases::from_vars([
            ("EXIT3", "InputMalformed"),
            ("EXIT12", ""),
            ("EXITX", "Nope"),
            ("PATH", "/bin"),
        ]);
        assert_eq!(aliases.get(3), Some("InputMalformed"));
        assert_eq!(aliases.get(12), None);
        assert_eq!(aliases.get(0), None);
    }

    #[test]
    fn image_tag_defaults_to_latest() {
        let def = |name: &str| DockerTaskDefinition {
            image_name: name.to_string(),
            ..Default::default()
        };
        assert_eq!(def("busybox").repository_and_tag(), ("busybox", "latest"));
        assert_eq!(def("busybox:1.36").repository_and_tag(), ("busybox", "1.36"));
        assert_eq!(
            def("registry:5000/team/job").repository_and_tag(),
            ("registry:5000/team/job", "latest")
        );
        assert_eq!(
            def("registry:5000/team/job:v2").repository_and_tag(),
            ("registry:5000/team/job", "v2")
        );
    }

    #[test]
    fn task_definition_uses_pascal_case_keys() {
        let def: DockerTaskDefinition = serde_json::from_str(
            r#"{"ImageName": "busybox:1.36", "Env": ["MODE=batch"]}"#,
        )
        .unwrap();
        assert_eq!(def.image_name, "busybox:1.36");
        assert_eq!(def.env, vec!["MODE=batch".to_string()]);
        assert_eq!(def.mac_address, None);
    }
}

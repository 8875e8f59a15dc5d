#![allow(dead_code)]

use std::time::Duration;

use tasque::config::{DockerConfig, DockerTaskDefinition, EcsConfig};
use tasque::engine::{RunSettings, Supervisor};
use tasque::exec::ecs::ClusterMembership;

pub use tasque_test_utils::init_tracing;

pub const CONTAINER: &str = "tasque_executable";
pub const IMAGE: &str = "busybox:1.36";
pub const INSTANCE_ARN: &str =
    "arn:aws:ecs:eu-west-1:123456789012:container-instance/prod/5f0e1a";

/// Supervisor with the given deadline and heartbeat interval.
pub fn supervisor(timeout: Duration, heartbeat: Duration) -> Supervisor {
    Supervisor::new(RunSettings::new(timeout, heartbeat))
}

pub fn docker_config() -> DockerConfig {
    DockerConfig {
        container_name: CONTAINER.to_string(),
        endpoint: "unix:///var/run/docker.sock".to_string(),
        task_definition: DockerTaskDefinition {
            image_name: IMAGE.to_string(),
            mac_address: None,
            env: vec!["MODE=batch".to_string()],
        },
        auth: None,
        always_pull: false,
        payload_key: "TASK_PAYLOAD".to_string(),
    }
}

pub fn ecs_config() -> EcsConfig {
    EcsConfig {
        container_name: "worker".to_string(),
        endpoint: "unix:///var/run/docker.sock".to_string(),
        task_definition: "arn:aws:ecs:eu-west-1:123456789012:task-definition/render:3".to_string(),
        payload_key: "TASK_PAYLOAD".to_string(),
        metadata_url: "http://localhost:51678/v1/metadata".to_string(),
    }
}

pub fn membership() -> ClusterMembership {
    ClusterMembership {
        cluster: "prod".to_string(),
        container_instance_arn: INSTANCE_ARN.to_string(),
        version: None,
    }
}

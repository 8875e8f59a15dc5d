// src/exec/ecs/metadata.rs

//! Cluster membership discovery through the container agent's
//! introspection endpoint.

use std::time::Duration;

use anyhow::{Context, bail};
use reqwest::Client;
use serde::Deserialize;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

use crate::errors::TasqueError;
use crate::exec::BoxFuture;

/// Default introspection endpoint of the container agent.
pub const DEFAULT_METADATA_URL: &str = "http://localhost:51678/v1/metadata";

/// Total time spent retrying before giving up.
pub const DISCOVERY_CEILING: Duration = Duration::from_secs(30);
pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(1);

/// Where this instance sits in the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterMembership {
    pub cluster: String,
    pub container_instance_arn: String,
    #[serde(default)]
    pub version: Option<String>,
}

pub trait MetadataProvider: Send + Sync {
    fn fetch(&self) -> BoxFuture<'_, anyhow::Result<ClusterMembership>>;
}

/// [`MetadataProvider`] querying the agent over HTTP.
#[derive(Debug, Clone)]
pub struct HttpMetadataProvider {
    client: Client,
    url: String,
}

impl HttpMetadataProvider {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .context("building metadata HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl MetadataProvider for HttpMetadataProvider {
    fn fetch(&self) -> BoxFuture<'_, anyhow::Result<ClusterMembership>> {
        Box::pin(async move {
            let response = self
                .client
                .get(&self.url)
                .send()
                .await
                .with_context(|| format!("GET {}", self.url))?;

            let status = response.status();
            if !status.is_success() {
                bail!("GET {} returned {}", self.url, status);
            }

            response
                .json::<ClusterMembership>()
                .await
                .with_context(|| format!("decoding metadata from {}", self.url))
        })
    }
}

/// Poll `provider` every `interval` until it answers or `ceiling` elapsed.
pub async fn discover_membership(
    provider: &dyn MetadataProvider,
    ceiling: Duration,
    interval: Duration,
) -> Result<ClusterMembership, TasqueError> {
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        info!(attempt, "querying container agent metadata");
        let last_error = match provider.fetch().await {
            Ok(membership) => {
                info!(
                    cluster = %membership.cluster,
                    container_instance = %membership.container_instance_arn,
                    agent_version = membership.version.as_deref().unwrap_or("-"),
                    "cluster membership discovered"
                );
                return Ok(membership);
            }
            Err(err) => {
                warn!(attempt, error = %format!("{err:#}"), "metadata not available yet");
                format!("{err:#}")
            }
        };

        if started.elapsed() + interval > ceiling {
            return Err(TasqueError::MetadataUnavailable {
                waited: started.elapsed(),
                last_error,
            });
        }
        sleep(interval).await;
    }
}

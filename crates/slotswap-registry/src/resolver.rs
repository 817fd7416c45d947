//! Latest-build resolution against the registry.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use slotswap_core::BuildDescriptor;

use crate::error::{RegistryError, RegistryResult};

#[derive(Debug, Deserialize)]
struct BuildsResponse {
    builds: Vec<BuildEntry>,
}

#[derive(Debug, Deserialize)]
struct BuildEntry {
    build: u32,
    time: DateTime<Utc>,
    downloads: Downloads,
}

#[derive(Debug, Deserialize)]
struct Downloads {
    application: Download,
}

#[derive(Debug, Deserialize)]
struct Download {
    name: String,
}

/// Queries the registry for the newest build of a project version.
#[derive(Debug, Clone)]
pub struct BuildResolver {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl BuildResolver {
    pub fn new(client: reqwest::Client, base_url: &str, request_timeout: Duration) -> Self {
        Self {
            client,
            base_url: crate::trim_base(base_url),
            request_timeout,
        }
    }

    /// Resolve the latest build of `project` at `version`.
    ///
    /// The registry lists builds in ascending order, so the last entry
    /// wins. An empty list is `RegistryError::NoBuilds`.
    pub async fn resolve_latest_build(
        &self,
        project: &str,
        version: &str,
    ) -> RegistryResult<BuildDescriptor> {
        let url = format!(
            "{}/projects/{project}/versions/{version}/builds",
            self.base_url
        );
        debug!(%url, "querying registry");

        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|source| RegistryError::Request {
                project: project.to_string(),
                version: version.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Status {
                project: project.to_string(),
                version: version.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| RegistryError::Request {
                project: project.to_string(),
                version: version.to_string(),
                source,
            })?;
        let parsed: BuildsResponse =
            serde_json::from_slice(&body).map_err(|source| RegistryError::Decode {
                project: project.to_string(),
                version: version.to_string(),
                source,
            })?;

        let latest = latest_of(parsed.builds).ok_or_else(|| RegistryError::NoBuilds {
            project: project.to_string(),
            version: version.to_string(),
        })?;

        let descriptor = BuildDescriptor {
            project: project.to_string(),
            version: version.to_string(),
            build_number: latest.build,
            published_at: latest.time,
            artifact_file_name: latest.downloads.application.name,
        };
        info!(
            project,
            version,
            build = descriptor.build_number,
            published_at = %descriptor.published_at,
            file = %descriptor.artifact_file_name,
            "latest build resolved"
        );
        Ok(descriptor)
    }
}

/// Last entry of the registry's build list; no independent sort.
fn latest_of(builds: Vec<BuildEntry>) -> Option<BuildEntry> {
    builds.into_iter().last()
}

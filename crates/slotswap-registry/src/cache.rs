//! Local artifact cache keyed by artifact file name.
//!
//! Downloads are streamed into a temp file inside the builds directory and
//! renamed into place, so readers only ever see complete artifacts. Old
//! builds are never removed.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use slotswap_core::BuildDescriptor;

use crate::error::{DownloadError, DownloadResult};

/// What `ensure_local` had to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
    /// The artifact was already present; no network access happened.
    Hit(PathBuf),
    /// The artifact was fetched and written.
    Downloaded { path: PathBuf, bytes: u64 },
}

impl CacheOutcome {
    pub fn path(&self) -> &Path {
        match self {
            CacheOutcome::Hit(path) => path,
            CacheOutcome::Downloaded { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    client: reqwest::Client,
    base_url: String,
    builds_dir: PathBuf,
}

impl ArtifactCache {
    pub fn new(client: reqwest::Client, base_url: &str, builds_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            base_url: crate::trim_base(base_url),
            builds_dir: builds_dir.into(),
        }
    }

    pub fn builds_dir(&self) -> &Path {
        &self.builds_dir
    }

    /// Local path an artifact is cached at.
    pub fn artifact_path(&self, descriptor: &BuildDescriptor) -> PathBuf {
        self.builds_dir.join(&descriptor.artifact_file_name)
    }

    fn download_url(&self, d: &BuildDescriptor) -> String {
        format!(
            "{}/projects/{}/versions/{}/builds/{}/downloads/{}",
            self.base_url, d.project, d.version, d.build_number, d.artifact_file_name
        )
    }

    /// Make sure the descriptor's artifact exists locally.
    pub async fn ensure_local(&self, descriptor: &BuildDescriptor) -> DownloadResult<CacheOutcome> {
        let file = descriptor.artifact_file_name.clone();
        if !is_plain_file_name(&file) {
            return Err(DownloadError::InvalidFileName(file));
        }

        let path = self.artifact_path(descriptor);
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|source| DownloadError::Io {
                file: file.clone(),
                source,
            })?;
        if exists {
            info!(%file, build = descriptor.build_number, "build already cached");
            return Ok(CacheOutcome::Hit(path));
        }

        info!(%file, build = descriptor.build_number, "build not found locally, downloading");
        let url = self.download_url(descriptor);
        let mut response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| DownloadError::Request {
                file: file.clone(),
                source,
            })?;

        let status = response.status();
        if status.as_u16() >= 300 {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(%file, error = %e, "failed to read error response body");
                    format!("<unreadable body: {e}>")
                }
            };
            error!(%file, status = status.as_u16(), %body, "error while downloading build");
            return Err(DownloadError::Status {
                file,
                status: status.as_u16(),
                body,
            });
        }

        let io_err = |source| DownloadError::Io {
            file: file.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.builds_dir)
            .await
            .map_err(io_err)?;
        let tmp = tempfile::Builder::new()
            .prefix(".partial-")
            .tempfile_in(&self.builds_dir)
            .map_err(io_err)?;
        let (std_file, tmp_path) = tmp.into_parts();
        let mut out = tokio::fs::File::from_std(std_file);

        let mut bytes = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|source| DownloadError::Request {
                file: file.clone(),
                source,
            })?
        {
            out.write_all(&chunk).await.map_err(io_err)?;
            bytes += chunk.len() as u64;
        }
        out.flush().await.map_err(io_err)?;
        out.sync_all().await.map_err(io_err)?;
        drop(out);

        // Dropping `tmp_path` on any earlier error removes the partial file.
        tmp_path.persist(&path).map_err(|e| io_err(e.error))?;

        info!(%file, bytes, "build downloaded");
        Ok(CacheOutcome::Downloaded { path, bytes })
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn descriptor(name: &str) -> BuildDescriptor {
        BuildDescriptor {
            project: "paper".to_string(),
            version: "1.20.4".to_string(),
            build_number: 2,
            published_at: Utc::now(),
            artifact_file_name: name.to_string(),
        }
    }

    #[test]
    fn download_url_derives_from_descriptor() {
        let cache = ArtifactCache::new(reqwest::Client::new(), "http://registry/v2/", "/tmp/b");
        assert_eq!(
            cache.download_url(&descriptor("paper-2.jar")),
            "http://registry/v2/projects/paper/versions/1.20.4/builds/2/downloads/paper-2.jar"
        );
    }

    #[test]
    fn rejects_path_like_names() {
        assert!(is_plain_file_name("paper-2.jar"));
        assert!(!is_plain_file_name("../paper.jar"));
        assert!(!is_plain_file_name("a/b.jar"));
        assert!(!is_plain_file_name(""));
    }

    #[tokio::test]
    async fn existing_file_is_a_hit_without_network() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("paper-2.jar"), b"jar").unwrap();
        // Unroutable base: any network access would fail the test.
        let cache = ArtifactCache::new(reqwest::Client::new(), "http://127.0.0.1:9", dir.path());
        let outcome = cache.ensure_local(&descriptor("paper-2.jar")).await.unwrap();
        assert_eq!(outcome, CacheOutcome::Hit(dir.path().join("paper-2.jar")));
    }

    #[tokio::test]
    async fn invalid_name_is_rejected_before_io() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = ArtifactCache::new(reqwest::Client::new(), "http://127.0.0.1:9", dir.path());
        let err = cache.ensure_local(&descriptor("../x.jar")).await.unwrap_err();
        assert!(matches!(err, DownloadError::InvalidFileName(_)));
    }
}

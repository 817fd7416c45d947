//! Registry and download error types.

use thiserror::Error;

pub type RegistryResult<T> = Result<T, RegistryError>;

pub type DownloadResult<T> = Result<T, DownloadError>;

/// Failures while resolving build metadata.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("registry request for {project} {version} failed: {source}")]
    Request {
        project: String,
        version: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("registry returned status {status} for {project} {version}")]
    Status {
        project: String,
        version: String,
        status: u16,
    },

    #[error("registry response for {project} {version} could not be decoded: {source}")]
    Decode {
        project: String,
        version: String,
        #[source]
        source: serde_json::Error,
    },

    /// The version exists but has no builds. Never treated as "up to date".
    #[error("registry lists no builds for {project} {version}")]
    NoBuilds { project: String, version: String },
}

/// Failures while fetching an artifact into the local cache.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download of {file} failed: {source}")]
    Request {
        file: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("download of {file} returned status {status}: {body}")]
    Status {
        file: String,
        status: u16,
        body: String,
    },

    #[error("artifact name {0:?} is not a plain file name")]
    InvalidFileName(String),

    #[error("writing {file} failed: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

//! slotswap-registry — build resolution and local artifact caching.
//!
//! Talks to a PaperMC-style build registry:
//!
//! ```text
//! GET {base}/projects/{project}/versions/{version}/builds
//! GET {base}/projects/{project}/versions/{version}/builds/{build}/downloads/{name}
//! ```
//!
//! `BuildResolver` picks the latest build of a project/version and
//! `ArtifactCache` makes sure its binary exists under the builds directory,
//! downloading it at most once.

pub mod cache;
pub mod error;
pub mod resolver;

pub use cache::{ArtifactCache, CacheOutcome};
pub use error::{DownloadError, DownloadResult, RegistryError, RegistryResult};
pub use resolver::BuildResolver;

use std::time::Duration;

/// Build the shared HTTP client used for registry calls.
pub fn http_client(connect_timeout: Duration) -> RegistryResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .user_agent(concat!("slotswap/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(RegistryError::Client)
}

pub(crate) fn trim_base(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

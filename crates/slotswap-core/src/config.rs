//! slotswap.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::types::{SlotIdentity, VersionPolicy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapConfig {
    pub registry: RegistryConfig,
    pub server: ServerConfig,
    pub proxy: Option<ProxyConfig>,
    pub paths: PathsConfig,
    pub slots: SlotsConfig,
    pub runtime: RuntimeConfig,
    pub deploy: DeployConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.papermc.io/v2".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub project: String,
    /// Target game version. `MC_VERSION` overrides this.
    pub version: Option<String>,
    pub version_policy: VersionPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            project: "paper".to_string(),
            version: None,
            version_policy: VersionPolicy::Exact,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub project: String,
    pub version_policy: VersionPolicy,
    /// Runtime component name used for start/stop.
    pub component: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            project: "velocity".to_string(),
            version_policy: VersionPolicy::MajorMinor,
            component: "proxy".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub builds_dir: PathBuf,
    pub shared_plugins_dir: PathBuf,
    pub shared_configs_dir: PathBuf,
    /// Parent of the per-slot working directories.
    pub slots_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            builds_dir: PathBuf::from("/mcserver"),
            shared_plugins_dir: PathBuf::from("/mcserver/plugins"),
            shared_configs_dir: PathBuf::from("/mcserver/configs"),
            slots_root: PathBuf::from("/mcserver"),
        }
    }
}

impl PathsConfig {
    /// Working directory of a slot.
    pub fn slot_dir(&self, target: &SlotTarget) -> PathBuf {
        self.slots_root.join(&target.name)
    }

    pub fn slot_plugins_dir(&self, target: &SlotTarget) -> PathBuf {
        self.slot_dir(target).join("plugins")
    }
}

/// Where a slot runs and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotTarget {
    /// Runtime service name; also the slot directory name.
    pub name: String,
    /// Host used for readiness probes. Defaults to `name`.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_game_port")]
    pub port: u16,
}

impl SlotTarget {
    pub fn new(name: &str, port: u16) -> Self {
        Self {
            name: name.to_string(),
            host: None,
            port,
        }
    }

    pub fn probe_address(&self) -> String {
        let host = self.host.as_deref().unwrap_or(&self.name);
        format!("{host}:{}", self.port)
    }
}

fn default_game_port() -> u16 {
    25565
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotsConfig {
    pub a: SlotTarget,
    pub b: SlotTarget,
}

impl Default for SlotsConfig {
    fn default() -> Self {
        Self {
            a: SlotTarget::new("server1", default_game_port()),
            b: SlotTarget::new("server2", default_game_port()),
        }
    }
}

impl SlotsConfig {
    pub fn target(&self, slot: SlotIdentity) -> &SlotTarget {
        match slot {
            SlotIdentity::A => &self.a,
            SlotIdentity::B => &self.b,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub compose_file: PathBuf,
    /// Program used to invoke compose.
    pub docker_bin: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            compose_file: PathBuf::from("/docker-compose.server.yml"),
            docker_bin: "docker".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub ready_timeout_secs: u64,
    pub probe_interval_ms: u64,
    pub debounce_ms: u64,
    /// Glob matched against file names in the shared plugins directory.
    pub watch_pattern: String,
    /// Externally reachable address, logged after each cutover.
    pub public_address: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            ready_timeout_secs: 60,
            probe_interval_ms: 500,
            debounce_ms: 500,
            watch_pattern: "*.jar".to_string(),
            public_address: "localhost:25565".to_string(),
        }
    }
}

impl DeployConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl SwapConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: SwapConfig = toml::from_str(&content)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Replace the configured target version, e.g. from `MC_VERSION`.
    pub fn with_version_override(mut self, version: Option<String>) -> Self {
        if let Some(v) = version.filter(|v| !v.trim().is_empty()) {
            self.server.version = Some(v.trim().to_string());
        }
        self
    }

    /// The target game version; required before anything can be resolved.
    pub fn target_version(&self) -> anyhow::Result<&str> {
        match self.server.version.as_deref() {
            Some(v) => Ok(v),
            None => bail!("no target version configured: set [server].version or MC_VERSION"),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.target_version()?;
        if self.slots.a.name == self.slots.b.name {
            bail!("slots a and b must use different names (both are {:?})", self.slots.a.name);
        }
        if self.deploy.ready_timeout_secs == 0 {
            bail!("[deploy].ready_timeout_secs must be greater than zero");
        }
        if self.deploy.debounce_ms == 0 {
            bail!("[deploy].debounce_ms must be greater than zero");
        }
        glob::Pattern::new(&self.deploy.watch_pattern)
            .with_context(|| format!("invalid watch pattern {:?}", self.deploy.watch_pattern))?;
        Ok(())
    }
}

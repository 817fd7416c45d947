//! Boot sequence and the long-running redeploy loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use slotswap_core::{BuildDescriptor, SwapConfig};
use slotswap_registry::{ArtifactCache, BuildResolver};
use slotswap_rollout::{ComposeRuntime, Deployer, DeployerConfig, SlotRuntime};
use slotswap_trigger::{ChangeEvent, ChangeTrigger, PluginWatcher, WatchSubscription};

use crate::shutdown::{ShutdownCoordinator, Signals, wait_for_signals};

/// Resolved builds for this run.
pub struct ResolvedBuilds {
    pub server: BuildDescriptor,
    pub proxy: Option<BuildDescriptor>,
}

fn registry(config: &SwapConfig) -> anyhow::Result<(BuildResolver, ArtifactCache)> {
    let timeout = Duration::from_secs(config.registry.timeout_secs);
    let client = slotswap_registry::http_client(timeout)?;
    let resolver = BuildResolver::new(client.clone(), &config.registry.base_url, timeout);
    let cache = ArtifactCache::new(client, &config.registry.base_url, &config.paths.builds_dir);
    Ok((resolver, cache))
}

/// Resolve the latest server (and proxy) builds without downloading.
pub async fn resolve(config: &SwapConfig) -> anyhow::Result<ResolvedBuilds> {
    let (resolver, _) = registry(config)?;
    resolve_with(&resolver, config).await
}

async fn resolve_with(
    resolver: &BuildResolver,
    config: &SwapConfig,
) -> anyhow::Result<ResolvedBuilds> {
    let target = config.target_version()?;

    let server_version = config.server.version_policy.derive(target);
    let server = resolver
        .resolve_latest_build(&config.server.project, &server_version)
        .await
        .with_context(|| format!("resolving {} {server_version}", config.server.project))?;

    let proxy = match &config.proxy {
        Some(proxy) => {
            let version = proxy.version_policy.derive(target);
            let build = resolver
                .resolve_latest_build(&proxy.project, &version)
                .await
                .with_context(|| format!("resolving {} {version}", proxy.project))?;
            Some(build)
        }
        None => None,
    };

    Ok(ResolvedBuilds { server, proxy })
}

/// Run the daemon until a termination signal has been handled.
pub async fn run(config: SwapConfig) -> anyhow::Result<()> {
    config.validate()?;
    let signals = Signals::install().context("installing signal handlers")?;
    let runtime: Arc<dyn SlotRuntime> = Arc::new(ComposeRuntime::docker(
        &config.runtime.docker_bin,
        &config.runtime.compose_file,
    ));
    serve(&config, runtime, signals).await
}

async fn serve(
    config: &SwapConfig,
    runtime: Arc<dyn SlotRuntime>,
    mut signals: Signals,
) -> anyhow::Result<()> {
    let deployer = Arc::new(Deployer::new(
        runtime.clone(),
        DeployerConfig::from_swap_config(config),
    ));
    let (trigger_stop, trigger_stop_rx) = watch::channel(false);
    let coordinator = Arc::new(ShutdownCoordinator::new(
        deployer.clone(),
        runtime.clone(),
        config.proxy.as_ref().map(|p| p.component.clone()),
        trigger_stop,
    ));

    // ── Boot ───────────────────────────────────────────────────
    let booted = tokio::select! {
        res = boot(config, &deployer, runtime.as_ref()) => res,
        name = signals.recv() => {
            info!(signal = name, "signal received during boot");
            coordinator.shutdown().await;
            return Ok(());
        }
    };
    let server_build = match booted {
        Ok(build) => build,
        Err(e) => {
            error!(error = %e, "boot failed, stopping anything already started");
            coordinator.shutdown().await;
            return Err(e);
        }
    };
    coordinator.mark_booted();

    // ── Change trigger ─────────────────────────────────────────
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let subscription = match watch_plugins(config, events_tx) {
        Ok(subscription) => subscription,
        Err(e) => {
            coordinator.shutdown().await;
            return Err(e);
        }
    };
    coordinator.attach(subscription).await;

    let trigger = ChangeTrigger::new(config.deploy.debounce());
    let trigger_deployer = deployer.clone();
    let trigger_handle = tokio::spawn(async move {
        trigger
            .run(events_rx, trigger_stop_rx, move |paths| {
                let deployer = trigger_deployer.clone();
                let build = server_build.clone();
                async move { redeploy(&deployer, &build, paths).await }
            })
            .await
    });

    // ── Shutdown ───────────────────────────────────────────────
    wait_for_signals(coordinator, signals).await;

    let _ = trigger_handle.await;
    info!("slotswap daemon stopped");
    Ok(())
}

fn watch_plugins(
    config: &SwapConfig,
    events: mpsc::UnboundedSender<ChangeEvent>,
) -> anyhow::Result<WatchSubscription> {
    let dir = &config.paths.shared_plugins_dir;
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    Ok(PluginWatcher::subscribe(dir, &config.deploy.watch_pattern, events)?)
}

/// Resolve and cache builds, run the initial deployment and start the
/// proxy. Returns the server build that was deployed.
async fn boot(
    config: &SwapConfig,
    deployer: &Deployer,
    runtime: &dyn SlotRuntime,
) -> anyhow::Result<BuildDescriptor> {
    let target = config.target_version()?;
    info!(version = %target, project = %config.server.project, "checking for server updates");

    // ── Builds ─────────────────────────────────────────────────
    let (resolver, cache) = registry(config)?;
    let builds = resolve_with(&resolver, config).await?;
    for build in std::iter::once(&builds.server).chain(builds.proxy.as_ref()) {
        cache
            .ensure_local(build)
            .await
            .with_context(|| format!("caching {build}"))?;
    }

    // ── Initial deployment ─────────────────────────────────────
    let active = deployer
        .deploy()
        .await
        .into_result()
        .with_context(|| format!("initial deployment of {}", builds.server))?;
    info!(slot = %active, build = builds.server.build_number, "initial deployment complete");

    if let Some(proxy) = &config.proxy {
        info!(component = %proxy.component, "starting proxy");
        runtime
            .start(&proxy.component)
            .await
            .with_context(|| format!("starting proxy {}", proxy.component))?;
    }

    Ok(builds.server)
}

/// One triggered cycle. Failures are logged; the active slot keeps serving.
async fn redeploy(deployer: &Deployer, build: &BuildDescriptor, paths: Vec<PathBuf>) {
    info!(
        changed = paths.len(),
        project = %build.project,
        build = build.build_number,
        "redeploying"
    );
    match deployer.deploy().await.into_result() {
        Ok(slot) => info!(%slot, build = build.build_number, "redeploy complete"),
        Err(e) => error!(
            slot = %e.slot(),
            project = %build.project,
            build = build.build_number,
            error = %e,
            "redeploy failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use slotswap_core::VersionPolicy;
    use slotswap_core::config::{PathsConfig, ProxyConfig, SlotTarget};
    use slotswap_rollout::{Action, ExitKind, Invocation, RuntimeError, RuntimeResult};

    #[derive(Default)]
    struct Recorder {
        fail_proxy_start: bool,
        calls: StdMutex<Vec<(Action, String)>>,
    }

    impl Recorder {
        fn stops(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(a, _)| *a == Action::Stop)
                .map(|(_, c)| c.clone())
                .collect()
        }
    }

    #[async_trait]
    impl SlotRuntime for Recorder {
        async fn start(&self, component: &str) -> RuntimeResult<Invocation> {
            self.calls
                .lock()
                .unwrap()
                .push((Action::Start, component.to_string()));
            if self.fail_proxy_start && component == "proxy" {
                return Err(RuntimeError::Failed {
                    action: Action::Start,
                    component: component.to_string(),
                    exit: ExitKind::Code(1),
                    stderr: "no such service: proxy".to_string(),
                });
            }
            Ok(invocation(Action::Start, component))
        }

        async fn stop(&self, component: &str) -> RuntimeResult<Invocation> {
            self.calls
                .lock()
                .unwrap()
                .push((Action::Stop, component.to_string()));
            Ok(invocation(Action::Stop, component))
        }
    }

    fn invocation(action: Action, component: &str) -> Invocation {
        Invocation {
            action,
            component: component.to_string(),
            exit: ExitKind::Code(0),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    fn builds_body(project: &str) -> String {
        format!(
            r#"{{"builds": [{{"build": 7, "time": "2024-01-01T10:00:00Z",
                "downloads": {{"application": {{"name": "{project}-7.jar"}}}}}}]}}"#
        )
    }

    fn unused_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn local_slot(name: &str, port: u16) -> SlotTarget {
        SlotTarget {
            name: name.to_string(),
            host: Some("127.0.0.1".to_string()),
            port,
        }
    }

    /// Registry mocked, both artifacts already cached, slot A on `port_a`.
    async fn setup(root: &Path, port_a: u16) -> (mockito::ServerGuard, SwapConfig) {
        let mut registry = mockito::Server::new_async().await;
        for project in ["paper", "velocity"] {
            registry
                .mock("GET", format!("/projects/{project}/versions/1.20.4/builds").as_str())
                .with_status(200)
                .with_body(builds_body(project))
                .create_async()
                .await;
        }

        let builds_dir = root.join("builds");
        std::fs::create_dir_all(&builds_dir).unwrap();
        std::fs::write(builds_dir.join("paper-7.jar"), b"paper").unwrap();
        std::fs::write(builds_dir.join("velocity-7.jar"), b"velocity").unwrap();

        let mut config = SwapConfig::default().with_version_override(Some("1.20.4".to_string()));
        config.registry.base_url = registry.url();
        config.paths = PathsConfig {
            builds_dir,
            shared_plugins_dir: root.join("plugins"),
            shared_configs_dir: root.join("configs"),
            slots_root: root.to_path_buf(),
        };
        config.slots.a = local_slot("server1", port_a);
        config.slots.b = local_slot("server2", unused_port());
        config.proxy = Some(ProxyConfig {
            project: "velocity".to_string(),
            version_policy: VersionPolicy::Exact,
            component: "proxy".to_string(),
        });
        config.deploy.probe_interval_ms = 50;
        config.validate().unwrap();
        (registry, config)
    }

    #[tokio::test]
    async fn boots_then_stops_everything_on_signal() {
        let dir = tempfile::TempDir::new().unwrap();
        let slot_a = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (_registry, config) = setup(dir.path(), slot_a.local_addr().unwrap().port()).await;
        let runtime = Arc::new(Recorder::default());
        let (signal_tx, signals) = Signals::channel();

        let daemon = tokio::spawn({
            let runtime = runtime.clone();
            async move { serve(&config, runtime, signals).await }
        });
        // Wait until the proxy is up, i.e. boot finished.
        tokio::time::timeout(Duration::from_secs(10), async {
            while !runtime
                .calls
                .lock()
                .unwrap()
                .contains(&(Action::Start, "proxy".to_string()))
            {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        signal_tx.send("SIGTERM").unwrap();
        signal_tx.send("SIGTERM").unwrap();
        tokio::time::timeout(Duration::from_secs(10), daemon)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        // server2 is the previous slot stopped by cutover; then shutdown.
        assert_eq!(runtime.stops(), vec!["server2", "server1", "proxy"]);
        assert!(dir.path().join("server1/plugins").is_dir());
    }

    #[tokio::test]
    async fn proxy_start_failure_stops_promoted_slot() {
        let dir = tempfile::TempDir::new().unwrap();
        let slot_a = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (_registry, config) = setup(dir.path(), slot_a.local_addr().unwrap().port()).await;
        let runtime = Arc::new(Recorder {
            fail_proxy_start: true,
            ..Default::default()
        });
        let (_signal_tx, signals) = Signals::channel();

        let err = serve(&config, runtime.clone(), signals).await.unwrap_err();

        assert!(format!("{err:#}").contains("starting proxy"), "got {err:#}");
        assert_eq!(runtime.stops(), vec!["server2", "server1", "proxy"]);
    }

    #[tokio::test]
    async fn signal_during_readiness_wait_cancels_boot() {
        let dir = tempfile::TempDir::new().unwrap();
        // Slot A never opens its port; boot would wait the full minute.
        let (_registry, config) = setup(dir.path(), unused_port()).await;
        let runtime = Arc::new(Recorder::default());
        let (signal_tx, signals) = Signals::channel();

        let started = std::time::Instant::now();
        let daemon = tokio::spawn({
            let runtime = runtime.clone();
            async move { serve(&config, runtime, signals).await }
        });
        tokio::time::sleep(Duration::from_millis(300)).await;
        signal_tx.send("SIGINT").unwrap();

        tokio::time::timeout(Duration::from_secs(10), daemon)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        // Slot A was started but never promoted, so both slots are stopped.
        assert_eq!(runtime.stops(), vec!["server2", "server1", "proxy"]);
    }
}

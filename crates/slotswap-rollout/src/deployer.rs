//! Deployer — drives one blue-green cutover at a time.
//!
//! Each call to [`Deployer::deploy`] runs a full cycle against the standby
//! slot. Cycles are serialised by an async mutex around the slot state, so
//! overlapping callers queue instead of racing.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};

use slotswap_core::config::{PathsConfig, SlotsConfig};
use slotswap_core::{SlotIdentity, SwapConfig};
use slotswap_health::{ReadinessError, ReadinessProber};

use crate::runtime::{Invocation, RuntimeError, RuntimeResult, SlotRuntime};
use crate::slot::SlotState;
use crate::sync;

/// Current phase of the deployer.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DeployPhase {
    Idle,
    SyncingArtifacts,
    StartingTarget,
    AwaitingReady,
    StoppingPrevious,
    /// Last cycle failed; the previous slot is still active.
    Failed { reason: String },
}

pub type DeployResult<T> = Result<T, DeployError>;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("copying {what} into {slot} failed: {source}")]
    Sync {
        slot: SlotIdentity,
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("starting {slot} failed: {source}")]
    Start {
        slot: SlotIdentity,
        #[source]
        source: RuntimeError,
    },

    #[error("{slot} did not become ready: {source}")]
    NotReady {
        slot: SlotIdentity,
        #[source]
        source: ReadinessError,
    },
}

impl DeployError {
    pub fn slot(&self) -> SlotIdentity {
        match self {
            DeployError::Sync { slot, .. }
            | DeployError::Start { slot, .. }
            | DeployError::NotReady { slot, .. } => *slot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployOutcome {
    Success,
    Timeout,
    Error,
}

/// Record of one orchestration cycle. Not persisted.
#[derive(Debug)]
pub struct DeploymentAttempt {
    pub target: SlotIdentity,
    pub started_at: Instant,
    pub elapsed: Duration,
    pub result: DeployResult<()>,
}

impl DeploymentAttempt {
    pub fn outcome(&self) -> DeployOutcome {
        match &self.result {
            Ok(()) => DeployOutcome::Success,
            Err(DeployError::NotReady { .. }) => DeployOutcome::Timeout,
            Err(_) => DeployOutcome::Error,
        }
    }

    /// The newly active slot, or the error that ended the cycle.
    pub fn into_result(self) -> DeployResult<SlotIdentity> {
        self.result.map(|()| self.target)
    }
}

/// Static inputs of a cycle.
#[derive(Debug, Clone)]
pub struct DeployerConfig {
    pub slots: SlotsConfig,
    pub paths: PathsConfig,
    pub ready_timeout: Duration,
    pub probe_interval: Duration,
    /// Shared plugin files matching this glob are mirrored into the slot,
    /// including removals.
    pub plugin_pattern: String,
    /// Logged after each successful cutover.
    pub public_address: String,
}

impl DeployerConfig {
    pub fn from_swap_config(config: &SwapConfig) -> Self {
        Self {
            slots: config.slots.clone(),
            paths: config.paths.clone(),
            ready_timeout: config.deploy.ready_timeout(),
            probe_interval: config.deploy.probe_interval(),
            plugin_pattern: config.deploy.watch_pattern.clone(),
            public_address: config.deploy.public_address.clone(),
        }
    }
}

pub struct Deployer {
    runtime: Arc<dyn SlotRuntime>,
    config: DeployerConfig,
    prober: ReadinessProber,
    /// Single-flight guard: held for the whole cycle.
    state: Mutex<SlotState>,
    phase: watch::Sender<DeployPhase>,
}

impl Deployer {
    pub fn new(runtime: Arc<dyn SlotRuntime>, config: DeployerConfig) -> Self {
        Self::with_state(runtime, config, SlotState::default())
    }

    pub fn with_state(
        runtime: Arc<dyn SlotRuntime>,
        config: DeployerConfig,
        state: SlotState,
    ) -> Self {
        let prober = ReadinessProber::new(config.probe_interval);
        let (phase, _) = watch::channel(DeployPhase::Idle);
        Self {
            runtime,
            config,
            prober,
            state: Mutex::new(state),
            phase,
        }
    }

    /// Active slot.
    ///
    /// Waits for an in-flight cycle to finish, which can take up to the
    /// readiness timeout. Use [`Deployer::try_current_slot`] where that
    /// wait is not acceptable.
    pub async fn current_slot(&self) -> SlotIdentity {
        self.state.lock().await.current_slot()
    }

    /// Active slot, or `None` while a cycle is in flight.
    pub fn try_current_slot(&self) -> Option<SlotIdentity> {
        self.state.try_lock().ok().map(|state| state.current_slot())
    }

    pub fn phase(&self) -> DeployPhase {
        self.phase.borrow().clone()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<DeployPhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: DeployPhase) {
        self.phase.send_replace(phase);
    }

    /// Run one full cutover cycle onto the standby slot.
    pub async fn deploy(&self) -> DeploymentAttempt {
        let mut state = self.state.lock().await;
        let previous = state.current_slot();
        let target = state.previous_slot();
        let started_at = Instant::now();

        info!(
            %target,
            service = %self.config.slots.target(target).name,
            "starting deployment cycle"
        );
        let result = self.run_cycle(&mut state, target, previous).await;

        match &result {
            Ok(()) => self.set_phase(DeployPhase::Idle),
            Err(e) => {
                error!(
                    slot = %target,
                    active = %previous,
                    error = %e,
                    "deployment failed, previous slot keeps serving"
                );
                self.set_phase(DeployPhase::Failed {
                    reason: e.to_string(),
                });
            }
        }

        DeploymentAttempt {
            target,
            started_at,
            elapsed: started_at.elapsed(),
            result,
        }
    }

    async fn run_cycle(
        &self,
        state: &mut SlotState,
        target: SlotIdentity,
        previous: SlotIdentity,
    ) -> DeployResult<()> {
        let target_cfg = self.config.slots.target(target);
        let paths = &self.config.paths;

        self.set_phase(DeployPhase::SyncingArtifacts);
        let slot_plugins = paths.slot_plugins_dir(target_cfg);
        self.stage_plugins(&paths.shared_plugins_dir, &slot_plugins)
            .await
            .map_err(|source| DeployError::Sync {
                slot: target,
                what: "plugins",
                source,
            })?;
        sync::copy_dir(&paths.shared_configs_dir, &paths.slot_dir(target_cfg))
            .await
            .map_err(|source| DeployError::Sync {
                slot: target,
                what: "configs",
                source,
            })?;

        self.set_phase(DeployPhase::StartingTarget);
        info!(slot = %target, service = %target_cfg.name, "starting server");
        self.runtime
            .start(&target_cfg.name)
            .await
            .map_err(|source| DeployError::Start {
                slot: target,
                source,
            })?;

        self.set_phase(DeployPhase::AwaitingReady);
        self.prober
            .wait_for_ready(&target_cfg.probe_address(), self.config.ready_timeout)
            .await
            .map_err(|source| DeployError::NotReady {
                slot: target,
                source,
            })?;

        self.set_phase(DeployPhase::StoppingPrevious);
        let previous_cfg = self.config.slots.target(previous);
        info!(slot = %previous, service = %previous_cfg.name, "stopping previous server");
        if let Err(e) = self.runtime.stop(&previous_cfg.name).await {
            warn!(slot = %previous, error = %e, "stopping previous server failed");
        }

        let active = state.toggle();
        info!(
            slot = %active,
            service = %target_cfg.name,
            address = %self.config.public_address,
            "cutover complete, server reachable"
        );
        Ok(())
    }

    async fn stage_plugins(&self, src: &Path, dst: &Path) -> std::io::Result<()> {
        let pattern = glob::Pattern::new(&self.config.plugin_pattern)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        sync::copy_dir(src, dst).await?;
        let removed = sync::prune_removed(src, dst, &pattern).await?;
        if removed > 0 {
            info!(
                removed,
                dst = %dst.display(),
                "removed plugins no longer in the shared directory"
            );
        }
        Ok(())
    }

    /// Stop the active slot. Waits for an in-flight cycle first.
    pub async fn stop_active(&self) -> RuntimeResult<Invocation> {
        let state = self.state.lock().await;
        let active = state.current_slot();
        let target = self.config.slots.target(active);
        info!(slot = %active, service = %target.name, "stopping active server");
        self.runtime.stop(&target.name).await
    }

    /// Stop both slots, active first. For when a cycle was abandoned
    /// part-way and either slot may be running.
    pub async fn stop_all(&self) -> Vec<(SlotIdentity, RuntimeResult<Invocation>)> {
        let state = self.state.lock().await;
        let mut results = Vec::with_capacity(2);
        for slot in [state.current_slot(), state.previous_slot()] {
            let target = self.config.slots.target(slot);
            info!(%slot, service = %target.name, "stopping server");
            results.push((slot, self.runtime.stop(&target.name).await));
        }
        results
    }
}

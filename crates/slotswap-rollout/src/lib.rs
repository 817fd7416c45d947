//! slotswap-rollout — blue-green cutover between two slots.
//!
//! This crate owns the deployment state machine. A cycle brings up the
//! standby slot, waits for it to accept connections, stops the active
//! slot and only then promotes the standby:
//!
//! ```text
//! Deployer::deploy()
//!   ├── single-flight guard (Mutex<SlotState>)
//!   ├── SyncingArtifacts  copy shared plugins/ + configs/ into target
//!   ├── StartingTarget    SlotRuntime::start(target)
//!   ├── AwaitingReady     ReadinessProber::wait_for_ready(target)
//!   ├── StoppingPrevious  SlotRuntime::stop(previous)
//!   └── Idle              SlotState::toggle()
//!                         (or Failed: no toggle, previous keeps serving)
//! ```
//!
//! # Components
//!
//! - **`slot`** — which of the two slots is active
//! - **`runtime`** — start/stop capability and the compose implementation
//! - **`sync`** — recursive directory copy into slot directories
//! - **`deployer`** — the orchestration cycle

pub mod deployer;
pub mod runtime;
pub mod slot;
pub mod sync;

pub use deployer::{
    DeployError, DeployOutcome, DeployPhase, DeployResult, Deployer, DeployerConfig,
    DeploymentAttempt,
};
pub use runtime::{
    Action, ComposeRuntime, ExitKind, Invocation, RuntimeError, RuntimeResult, SlotRuntime,
};
pub use slot::SlotState;

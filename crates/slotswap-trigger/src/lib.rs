//! slotswap-trigger — turns plugin file changes into redeploys.
//!
//! ```text
//! PluginWatcher (notify, filtered by glob)
//!   └── mpsc<ChangeEvent>
//!         └── ChangeTrigger::run (trailing-edge debounce)
//!               └── on_settled(changed paths)   one call per burst
//! ```
//!
//! The trigger awaits each callback before reading the next event, so
//! cycles never overlap. Changes that arrive during a cycle are coalesced
//! into a single follow-up call.

pub mod debounce;
pub mod watcher;

pub use debounce::ChangeTrigger;
pub use watcher::{ChangeEvent, PluginWatcher, TriggerError, WatchSubscription};

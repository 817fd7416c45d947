//! Debounced change loop.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::watcher::ChangeEvent;

/// Collapses bursts of change events into single callback invocations.
#[derive(Debug, Clone)]
pub struct ChangeTrigger {
    window: Duration,
}

impl Default for ChangeTrigger {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl ChangeTrigger {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    /// Run until the event stream ends or `shutdown` flips.
    ///
    /// A burst settles once no event has arrived for `window`; then
    /// `on_settled` is awaited with the union of changed paths. Returns
    /// how many times it was invoked.
    ///
    /// Shutdown always wins over pending changes: an unsettled burst is
    /// dropped when `shutdown` flips or the event stream closes.
    pub async fn run<F, Fut>(
        &self,
        mut events: mpsc::UnboundedReceiver<ChangeEvent>,
        mut shutdown: watch::Receiver<bool>,
        mut on_settled: F,
    ) -> u64
    where
        F: FnMut(Vec<PathBuf>) -> Fut,
        Fut: Future<Output = ()>,
    {
        info!(window_ms = self.window.as_millis() as u64, "change trigger started");
        let mut cycles = 0;

        loop {
            let first = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                ev = events.recv() => match ev {
                    Some(ev) => ev,
                    None => break,
                },
            };

            let mut changed: BTreeSet<PathBuf> = first.paths.into_iter().collect();
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        debug!(pending = changed.len(), "dropping unsettled changes on shutdown");
                        return cycles;
                    }
                    ev = events.recv() => match ev {
                        Some(ev) => changed.extend(ev.paths),
                        None => {
                            debug!(
                                pending = changed.len(),
                                "event stream closed, dropping unsettled changes"
                            );
                            return cycles;
                        }
                    },
                    _ = tokio::time::sleep(self.window) => break,
                }
            }

            if *shutdown.borrow() {
                debug!(pending = changed.len(), "shutdown requested, skipping redeploy");
                break;
            }

            info!(files = changed.len(), "plugin changes detected, redeploying");
            on_settled(changed.into_iter().collect()).await;
            cycles += 1;
        }

        info!(cycles, "change trigger stopped");
        cycles
    }
}

//! Graceful shutdown on SIGINT/SIGTERM.
//!
//! Order: close the plugin watcher, stop the active slot, stop the proxy.
//! Every stop is awaited before the next one starts. Until boot has
//! finished it is unknown which slot runs, so both are stopped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use slotswap_rollout::{Deployer, SlotRuntime};
use slotswap_trigger::WatchSubscription;

/// Source of termination signals.
///
/// [`Signals::install`] listens for SIGTERM and SIGINT; installing them
/// replaces the default terminate action, so do it before anything is
/// started.
pub struct Signals {
    source: SignalSource,
}

enum SignalSource {
    Os { sigterm: Signal, sigint: Signal },
    #[cfg(test)]
    Channel(tokio::sync::mpsc::UnboundedReceiver<&'static str>),
}

impl Signals {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            source: SignalSource::Os {
                sigterm: signal(SignalKind::terminate())?,
                sigint: signal(SignalKind::interrupt())?,
            },
        })
    }

    /// Signals fed by hand.
    #[cfg(test)]
    pub fn channel() -> (tokio::sync::mpsc::UnboundedSender<&'static str>, Self) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let signals = Self {
            source: SignalSource::Channel(rx),
        };
        (tx, signals)
    }

    /// Wait for the next signal and return its name.
    pub async fn recv(&mut self) -> &'static str {
        match &mut self.source {
            SignalSource::Os { sigterm, sigint } => tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            },
            #[cfg(test)]
            SignalSource::Channel(rx) => match rx.recv().await {
                Some(name) => name,
                None => std::future::pending().await,
            },
        }
    }
}

pub struct ShutdownCoordinator {
    started: AtomicBool,
    booted: AtomicBool,
    deployer: Arc<Deployer>,
    runtime: Arc<dyn SlotRuntime>,
    proxy_component: Option<String>,
    subscription: Mutex<Option<WatchSubscription>>,
    trigger_stop: watch::Sender<bool>,
}

impl ShutdownCoordinator {
    pub fn new(
        deployer: Arc<Deployer>,
        runtime: Arc<dyn SlotRuntime>,
        proxy_component: Option<String>,
        trigger_stop: watch::Sender<bool>,
    ) -> Self {
        Self {
            started: AtomicBool::new(false),
            booted: AtomicBool::new(false),
            deployer,
            runtime,
            proxy_component,
            subscription: Mutex::new(None),
            trigger_stop,
        }
    }

    /// The initial deployment succeeded; from now on only the active slot
    /// is stopped.
    pub fn mark_booted(&self) {
        self.booted.store(true, Ordering::SeqCst);
    }

    /// Hand over the plugin watch so shutdown can close it.
    pub async fn attach(&self, subscription: WatchSubscription) {
        let mut slot = self.subscription.lock().await;
        *slot = Some(subscription);
        if self.started.load(Ordering::SeqCst) {
            if let Some(mut subscription) = slot.take() {
                subscription.close();
            }
        }
    }

    /// Run the shutdown sequence once. Later calls return `false`
    /// immediately.
    pub async fn shutdown(&self) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("shutdown already in progress, ignoring");
            return false;
        }
        info!("shutting down");

        if let Some(mut subscription) = self.subscription.lock().await.take() {
            subscription.close();
        }
        self.trigger_stop.send_replace(true);

        if self.booted.load(Ordering::SeqCst) {
            if let Err(e) = self.deployer.stop_active().await {
                warn!(error = %e, "stopping active server failed");
            }
        } else {
            for (slot, result) in self.deployer.stop_all().await {
                if let Err(e) = result {
                    warn!(%slot, error = %e, "stopping server failed");
                }
            }
        }

        if let Some(proxy) = &self.proxy_component {
            info!(component = %proxy, "stopping proxy");
            if let Err(e) = self.runtime.stop(proxy).await {
                warn!(error = %e, "stopping proxy failed");
            }
        }

        info!("shutdown complete");
        true
    }
}

/// Wait for the first SIGINT/SIGTERM and shut down. Signals that arrive
/// while the sequence runs are absorbed.
pub async fn wait_for_signals(coordinator: Arc<ShutdownCoordinator>, mut signals: Signals) {
    let name = signals.recv().await;
    info!(signal = name, "signal received");

    let sequence = coordinator.shutdown();
    tokio::pin!(sequence);
    loop {
        tokio::select! {
            _ = &mut sequence => break,
            name = signals.recv() => {
                debug!(signal = name, "repeated signal");
                coordinator.shutdown().await;
            }
        }
    }
}

//! Filesystem subscription on the shared plugins directory.

use std::path::{Path, PathBuf};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("invalid watch pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("failed to watch {dir:?}: {source}")]
    Watch {
        dir: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Files that changed in one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub paths: Vec<PathBuf>,
}

/// Subscribes to changes of files matching a glob in one directory.
pub struct PluginWatcher;

impl PluginWatcher {
    /// Start watching `dir`; matching changes are sent to `tx`.
    pub fn subscribe(
        dir: &Path,
        pattern: &str,
        tx: mpsc::UnboundedSender<ChangeEvent>,
    ) -> Result<WatchSubscription, TriggerError> {
        let glob = glob::Pattern::new(pattern).map_err(|source| TriggerError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;

        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if !is_content_change(&event.kind) {
                        return;
                    }
                    let paths: Vec<PathBuf> = event
                        .paths
                        .into_iter()
                        .filter(|p| matches_pattern(&glob, p))
                        .collect();
                    if !paths.is_empty() {
                        debug!(?paths, "plugin file event");
                        let _ = tx.send(ChangeEvent { paths });
                    }
                }
                Err(e) => warn!(error = %e, "plugin watcher error"),
            })
            .map_err(|source| TriggerError::Watch {
                dir: dir.to_path_buf(),
                source,
            })?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|source| TriggerError::Watch {
                dir: dir.to_path_buf(),
                source,
            })?;

        info!(dir = %dir.display(), %pattern, "watching plugins");
        Ok(WatchSubscription {
            watcher: Some(watcher),
            dir: dir.to_path_buf(),
        })
    }
}

/// Owns the OS watch handle. Dropping or closing it ends the event stream.
pub struct WatchSubscription {
    watcher: Option<RecommendedWatcher>,
    dir: PathBuf,
}

impl WatchSubscription {
    pub fn is_active(&self) -> bool {
        self.watcher.is_some()
    }

    /// Release the watch. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(e) = watcher.unwatch(&self.dir) {
                debug!(error = %e, "unwatch failed");
            }
            info!(dir = %self.dir.display(), "plugin watcher closed");
        }
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn matches_pattern(glob: &glob::Pattern, path: &Path) -> bool {
    path.file_name()
        .map(|name| glob.matches(&name.to_string_lossy()))
        .unwrap_or(false)
}

//! File-watch invalidation.
//!
//! Every file that took part in a build is watched individually. A change
//! invalidates the builder's entry for that file; a delete or rename also
//! drops the watch, since the inode is gone and the next build re-discovers
//! the path.

use crate::builder::{InvalidateTarget, ModuleBuilder};
use crate::error::Result;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// File change event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    /// File was created or its content/metadata changed
    Changed(PathBuf),
    /// File was removed
    Deleted(PathBuf),
    /// File was renamed away (or over)
    Renamed(PathBuf),
}

impl FileChange {
    /// Get the path affected by this change.
    pub fn path(&self) -> &Path {
        match self {
            FileChange::Changed(p) | FileChange::Deleted(p) | FileChange::Renamed(p) => p,
        }
    }

    fn is_removal(&self) -> bool {
        matches!(self, FileChange::Deleted(_) | FileChange::Renamed(_))
    }
}

/// Map a notify event onto per-path changes.
pub fn changes_from_event(event: &Event) -> Vec<FileChange> {
    event
        .paths
        .iter()
        .filter_map(|path| {
            let path = path.clone();
            match event.kind {
                EventKind::Create(_) => Some(FileChange::Changed(path)),
                EventKind::Modify(ModifyKind::Name(_)) => Some(FileChange::Renamed(path)),
                EventKind::Modify(_) => Some(FileChange::Changed(path)),
                EventKind::Remove(_) => Some(FileChange::Deleted(path)),
                _ => None,
            }
        })
        .collect()
}

/// Per-path trailing-edge debouncing of change events.
///
/// Every change takes a ticket for its path; only the newest ticket settles
/// once the window has passed, so a burst of writes ends in exactly one
/// invalidation after the last of them.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    next_ticket: u64,
    pending: HashMap<PathBuf, u64>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            next_ticket: 0,
            pending: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a change to `path`, superseding any pending one.
    pub fn schedule(&mut self, path: &Path) -> u64 {
        self.next_ticket += 1;
        self.pending.insert(path.to_path_buf(), self.next_ticket);
        self.next_ticket
    }

    /// Whether `ticket` is still the newest change for `path`; consumes it if so.
    pub fn settle(&mut self, path: &Path, ticket: u64) -> bool {
        if self.pending.get(path) == Some(&ticket) {
            self.pending.remove(path);
            true
        } else {
            false
        }
    }

    /// Drop the pending change for `path`.
    pub fn cancel(&mut self, path: &Path) {
        self.pending.remove(path);
    }
}

/// Watches built files and invalidates the builder when they change.
pub struct WatchInvalidator {
    builder: Arc<dyn ModuleBuilder>,
    watched: Mutex<HashSet<PathBuf>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    debouncer: Mutex<Debouncer>,
    debug: bool,
}

impl WatchInvalidator {
    /// Create the invalidator and start processing change events.
    ///
    /// Must be called from within a Tokio runtime. The processing task ends
    /// when the invalidator is dropped.
    ///
    /// # Errors
    ///
    /// Returns error if the platform watcher cannot be created
    pub fn new(
        builder: Arc<dyn ModuleBuilder>,
        debounce: Duration,
        debug: bool,
    ) -> Result<Arc<Self>> {
        let (tx, mut rx) = mpsc::channel(256);

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in changes_from_event(&event) {
                    // Runs on the notify thread, outside the runtime
                    let _ = tx.blocking_send(change);
                }
            }
            Err(e) => tracing::warn!("File watcher error: {}", e),
        })?;

        let invalidator = Arc::new(Self::with_watcher(builder, Some(watcher), debounce, debug));

        let weak = Arc::downgrade(&invalidator);
        tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                let Some(invalidator) = weak.upgrade() else {
                    break;
                };
                // Each change waits out its own window
                tokio::spawn(async move {
                    invalidator.handle_change(change).await;
                });
            }
        });

        Ok(invalidator)
    }

    fn with_watcher(
        builder: Arc<dyn ModuleBuilder>,
        watcher: Option<RecommendedWatcher>,
        debounce: Duration,
        debug: bool,
    ) -> Self {
        Self {
            builder,
            watched: Mutex::new(HashSet::new()),
            watcher: Mutex::new(watcher),
            debouncer: Mutex::new(Debouncer::new(debounce)),
            debug,
        }
    }

    /// Invalidator without a platform watcher; changes are fed by hand.
    #[cfg(test)]
    pub(crate) fn detached(builder: Arc<dyn ModuleBuilder>, debounce: Duration) -> Self {
        Self::with_watcher(builder, None, debounce, false)
    }

    /// Start watching `paths`; already-watched paths are skipped.
    ///
    /// Failures to watch a path are logged in debug mode only and leave the
    /// path unwatched, so a later build retries it.
    pub fn watch<I>(&self, paths: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        for path in paths {
            if !self.watched.lock().insert(path.clone()) {
                continue;
            }

            let result = match self.watcher.lock().as_mut() {
                Some(watcher) => watcher.watch(&path, RecursiveMode::NonRecursive),
                None => Ok(()),
            };

            match result {
                Ok(()) => tracing::trace!("Watching {}", path.display()),
                Err(e) => {
                    self.watched.lock().remove(&path);
                    if self.debug {
                        tracing::warn!("Failed to watch {}: {}", path.display(), e);
                    }
                }
            }
        }
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        self.watched.lock().contains(path)
    }

    pub fn watched_count(&self) -> usize {
        self.watched.lock().len()
    }

    /// React to one change; returns whether the builder was invalidated.
    ///
    /// A change waits for the debounce window and is dropped if a newer
    /// change to the same path arrived meanwhile. Deletes and renames act
    /// at once and cancel any pending change.
    pub async fn handle_change(&self, change: FileChange) -> bool {
        let path = change.path().to_path_buf();

        if change.is_removal() {
            self.debouncer.lock().cancel(&path);
            self.watched.lock().remove(&path);
            if let Some(watcher) = self.watcher.lock().as_mut() {
                // The watch usually died with the inode already
                let _ = watcher.unwatch(&path);
            }
        } else {
            let (ticket, window) = {
                let mut debouncer = self.debouncer.lock();
                (debouncer.schedule(&path), debouncer.window())
            };
            tokio::time::sleep(window).await;
            if !self.debouncer.lock().settle(&path, ticket) {
                return false;
            }
        }

        tracing::debug!("{:?}, invalidating {}", change, path.display());
        self.builder
            .invalidate(InvalidateTarget::Path(path))
            .await;
        true
    }
}

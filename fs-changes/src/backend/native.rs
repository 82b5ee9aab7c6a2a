//! Native notification backend.
//!
//! Every non-ignored directory gets its own non-recursive subscription, so
//! ignored subtrees are never registered with the OS. Directories that appear
//! while the watch runs are subscribed before their creation is reported.

use std::collections::HashSet;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TrySendError};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BackendKind, ChangeSource, walk};
use crate::error::{Result, WatcherError};
use crate::event::{ChangeBatch, ChangeEvent, ChangeKind};
use crate::matcher::IgnoreMatcher;

/// Raw notifications buffered between the platform watcher and the pump.
pub const RAW_EVENT_CAPACITY: usize = 1000;

/// Events collected during one drain of the notification queue.
#[derive(Debug, Default)]
struct PendingChanges {
    batch: ChangeBatch,
}

impl PendingChanges {
    fn record(&mut self, kind: ChangeKind, path: PathBuf) {
        self.batch.push(ChangeEvent::new(kind, path));
    }

    fn take_batch(&mut self) -> ChangeBatch {
        mem::take(&mut self.batch)
    }
}

/// Backend fed by the platform's notification service.
pub struct NativeBackend {
    watcher: RecommendedWatcher,
    events_rx: Receiver<notify::Result<notify::Event>>,
    overflowed: Arc<AtomicUsize>,
    root: PathBuf,
    matcher: IgnoreMatcher,
    follow_symlinks: bool,
    watch_set: HashSet<PathBuf>,
    pending: PendingChanges,
}

impl NativeBackend {
    /// Subscribe `root` and every non-ignored directory below it.
    ///
    /// Fails when the platform watcher cannot be created or `root` itself
    /// cannot be subscribed. Subdirectories that fail are skipped. The walk
    /// stops early once `cancel` fires.
    pub fn new(
        root: &Path,
        matcher: IgnoreMatcher,
        follow_symlinks: bool,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        Self::with_capacity(root, matcher, follow_symlinks, cancel, RAW_EVENT_CAPACITY)
    }

    /// Like [`NativeBackend::new`] with `capacity` raw notifications buffered.
    ///
    /// Notifications arriving while the buffer is full are dropped and
    /// reported on the next pump. The platform watcher is never blocked, since
    /// subscribing a directory waits on it.
    pub fn with_capacity(
        root: &Path,
        matcher: IgnoreMatcher,
        follow_symlinks: bool,
        cancel: &CancellationToken,
        capacity: usize,
    ) -> Result<Self> {
        let (events_tx, events_rx) = mpsc::sync_channel(capacity);
        let overflowed = Arc::new(AtomicUsize::new(0));
        let dropped = overflowed.clone();
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            // A disconnected receiver means the backend is gone.
            if let Err(TrySendError::Full(_)) = events_tx.try_send(res) {
                dropped.fetch_add(1, Ordering::Relaxed);
            }
        })?;

        let mut backend = Self {
            watcher,
            events_rx,
            overflowed,
            root: root.to_path_buf(),
            matcher,
            follow_symlinks,
            watch_set: HashSet::new(),
            pending: PendingChanges::default(),
        };

        subscribe(&mut backend.watcher, &mut backend.watch_set, root)?;
        backend.register_tree(root, Some(cancel));

        info!(
            "Subscribed {} directories under {}",
            backend.watch_set.len(),
            root.display()
        );
        Ok(backend)
    }

    /// Directories currently subscribed.
    pub fn watch_set(&self) -> &HashSet<PathBuf> {
        &self.watch_set
    }

    /// Whether `dir` is subscribed.
    pub fn is_watching(&self, dir: &Path) -> bool {
        self.watch_set.contains(dir)
    }

    /// Subscribe every non-ignored directory below `dir` and return every
    /// non-ignored entry found below it. `dir` itself is left to the caller.
    ///
    /// Directories already in the watch set are subscribed again: the entry
    /// may be left over from a directory that was removed and recreated.
    fn register_tree(&mut self, dir: &Path, cancel: Option<&CancellationToken>) -> Vec<PathBuf> {
        let mut found = Vec::new();

        for entry in walk(dir, &self.matcher, self.follow_symlinks) {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                debug!("Registration of {} interrupted", dir.display());
                break;
            }
            if entry.depth() == 0 {
                continue;
            }

            if entry.file_type().is_dir() {
                if let Err(e) = subscribe(&mut self.watcher, &mut self.watch_set, entry.path()) {
                    warn!("{e}");
                    continue;
                }
            }

            found.push(entry.into_path());
        }

        found
    }

    fn absolutize(&self, path: PathBuf) -> PathBuf {
        if path.is_absolute() {
            path
        } else {
            self.root.join(path)
        }
    }

    /// Fold one raw notification into the pending batch.
    fn handle_event(&mut self, event: notify::Event) {
        let Some(kind) = ChangeKind::from_notify(event.kind) else {
            return;
        };
        let paired_rename = matches!(
            event.kind,
            EventKind::Modify(ModifyKind::Name(RenameMode::Both))
        );

        for (idx, path) in event.paths.into_iter().enumerate() {
            let kind = if paired_rename && idx > 0 {
                ChangeKind::RenamedTo
            } else {
                kind
            };
            let path = self.absolutize(path);

            if self.matcher.is_ignored(&path) {
                continue;
            }

            if kind.may_introduce_path() && path.is_dir() {
                let found = match subscribe(&mut self.watcher, &mut self.watch_set, &path) {
                    Ok(()) => self.register_tree(&path, None),
                    Err(e) => {
                        warn!("{e}");
                        Vec::new()
                    }
                };
                self.pending.record(kind, path);
                for inner in found {
                    self.pending.record(ChangeKind::Created, inner);
                }
                continue;
            }

            self.pending.record(kind, path);
        }
    }

    fn receive(&mut self, res: notify::Result<notify::Event>) {
        match res {
            Ok(event) => self.handle_event(event),
            Err(e) => warn!("Watch error: {e}"),
        }
    }
}

impl ChangeSource for NativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn pump(&mut self, tick: Duration) -> Result<ChangeBatch> {
        match self.events_rx.recv_timeout(tick) {
            Ok(res) => self.receive(res),
            Err(RecvTimeoutError::Timeout) => return Ok(ChangeBatch::new()),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(WatcherError::Notify(notify::Error::generic(
                    "notification channel closed",
                )));
            }
        }

        while let Ok(res) = self.events_rx.try_recv() {
            self.receive(res);
        }

        let overflowed = self.overflowed.swap(0, Ordering::Relaxed);
        if overflowed > 0 {
            warn!("Dropped {overflowed} notifications while the queue was full");
        }

        Ok(self.pending.take_batch())
    }
}

fn subscribe(
    watcher: &mut RecommendedWatcher,
    watch_set: &mut HashSet<PathBuf>,
    dir: &Path,
) -> Result<()> {
    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|source| WatcherError::WatchRegistration {
            path: dir.to_path_buf(),
            source,
        })?;
    watch_set.insert(dir.to_path_buf());
    debug!("Watching {}", dir.display());
    Ok(())
}

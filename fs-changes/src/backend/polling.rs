//! Polling backend.
//!
//! Walks the tree on every tick and diffs the listing against the previous
//! one. Renames show up as a deletion plus a creation.

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{BackendKind, ChangeSource, walk};
use crate::error::Result;
use crate::event::{ChangeBatch, ChangeEvent, ChangeKind};
use crate::matcher::IgnoreMatcher;

/// Last known state of one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryState {
    /// Whether the path is a directory.
    pub is_dir: bool,

    /// Size in bytes.
    pub len: u64,

    /// Last modification time, if the platform reports one.
    pub modified: Option<SystemTime>,
}

impl EntryState {
    /// Capture the state from file metadata.
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            is_dir: metadata.is_dir(),
            len: metadata.len(),
            modified: metadata.modified().ok(),
        }
    }

    /// Whether the path changed between two scans.
    ///
    /// Directories only change by turning into something else; their own
    /// mtime moves whenever a child does.
    pub fn differs_from(&self, older: &EntryState) -> bool {
        if self.is_dir && older.is_dir {
            return false;
        }
        self != older
    }
}

/// One listing of the watched tree, keyed by absolute path.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: BTreeMap<PathBuf, EntryState>,
}

impl Snapshot {
    /// Walk `root` and record every non-ignored entry below it.
    ///
    /// The root itself is not part of the snapshot. Entries that vanish
    /// between listing and `stat` are left out.
    pub fn scan(
        root: &Path,
        matcher: &IgnoreMatcher,
        follow_symlinks: bool,
        cancel: &CancellationToken,
    ) -> Self {
        let mut entries = BTreeMap::new();

        for entry in walk(root, matcher, follow_symlinks) {
            if cancel.is_cancelled() {
                debug!("Scan of {} interrupted", root.display());
                break;
            }
            if entry.depth() == 0 {
                continue;
            }
            match entry.metadata() {
                Ok(metadata) => {
                    entries.insert(entry.into_path(), EntryState::from_metadata(&metadata));
                }
                Err(e) => debug!("Skipping {}: {e}", entry.path().display()),
            }
        }

        Self { entries }
    }

    /// Number of recorded paths.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the recorded state of a path.
    pub fn get(&self, path: &Path) -> Option<&EntryState> {
        self.entries.get(path)
    }

    /// Changes that turn `self` into `newer`.
    ///
    /// Deletions come first, then creations, then updates, each sorted by
    /// path.
    pub fn diff(&self, newer: &Snapshot) -> ChangeBatch {
        let mut batch = ChangeBatch::new();

        batch.extend(
            self.entries
                .keys()
                .filter(|path| !newer.entries.contains_key(*path))
                .map(|path| ChangeEvent::new(ChangeKind::Deleted, path)),
        );

        let mut updated = Vec::new();
        for (path, state) in &newer.entries {
            match self.entries.get(path) {
                None => batch.push(ChangeEvent::new(ChangeKind::Created, path)),
                Some(older) if state.differs_from(older) => {
                    updated.push(ChangeEvent::new(ChangeKind::Updated, path));
                }
                Some(_) => {}
            }
        }
        batch.extend(updated);

        batch
    }
}

/// Backend that synthesizes events by rescanning the tree.
pub struct PollingBackend {
    root: PathBuf,
    matcher: IgnoreMatcher,
    follow_symlinks: bool,
    snapshot: Snapshot,
    cancel: CancellationToken,
}

impl PollingBackend {
    /// Take the initial snapshot of `root`.
    pub fn new(
        root: &Path,
        matcher: IgnoreMatcher,
        follow_symlinks: bool,
        cancel: &CancellationToken,
    ) -> Self {
        let start = Instant::now();
        let snapshot = Snapshot::scan(root, &matcher, follow_symlinks, cancel);
        info!(
            "Indexed {} entries under {} in {:?}",
            snapshot.len(),
            root.display(),
            start.elapsed()
        );

        Self {
            root: root.to_path_buf(),
            matcher,
            follow_symlinks,
            snapshot,
            cancel: cancel.clone(),
        }
    }

    /// The snapshot the next scan is compared against.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Rescan now and return the differences since the previous scan.
    ///
    /// An interrupted scan leaves the previous snapshot in place and reports
    /// nothing.
    pub fn rescan(&mut self) -> ChangeBatch {
        let next = Snapshot::scan(&self.root, &self.matcher, self.follow_symlinks, &self.cancel);
        if self.cancel.is_cancelled() {
            return ChangeBatch::new();
        }

        let batch = self.snapshot.diff(&next);
        self.snapshot = next;
        batch
    }
}

impl ChangeSource for PollingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Polling
    }

    fn pump(&mut self, tick: Duration) -> Result<ChangeBatch> {
        std::thread::sleep(tick);
        if self.cancel.is_cancelled() {
            return Ok(ChangeBatch::new());
        }
        Ok(self.rescan())
    }
}

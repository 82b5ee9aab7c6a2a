//! Change sources a watch can run on.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::error::Result;
use crate::event::ChangeBatch;
use crate::matcher::IgnoreMatcher;

pub mod native;
pub mod polling;

pub use native::NativeBackend;
pub use polling::{EntryState, PollingBackend, Snapshot};

/// Which backend a running watch ended up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// OS change notifications.
    Native,

    /// Periodic scans.
    Polling,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => f.write_str("native"),
            Self::Polling => f.write_str("polling"),
        }
    }
}

/// A producer of change batches, driven one tick at a time.
pub trait ChangeSource: Send {
    /// The backend behind this source.
    fn kind(&self) -> BackendKind;

    /// Wait up to one tick and return what changed. The batch may be empty.
    ///
    /// An error ends the watch.
    fn pump(&mut self, tick: Duration) -> Result<ChangeBatch>;
}

/// Walk `root` without descending into ignored directories.
///
/// `root` itself is always yielded at depth 0. Entries that fail to read are
/// skipped.
pub(crate) fn walk(
    root: &Path,
    matcher: &IgnoreMatcher,
    follow_symlinks: bool,
) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(root)
        .follow_links(follow_symlinks)
        .into_iter()
        .filter_entry(move |entry| entry.depth() == 0 || !matcher.is_ignored(entry.path()))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Skipping unreadable entry: {e}");
                None
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_walk_skips_ignored_subtrees() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::write(root.join(".git/objects/x"), "blob").unwrap();
        fs::write(root.join("src/nested/lib.rs"), "").unwrap();

        let matcher = IgnoreMatcher::new(r"\.git").unwrap();
        let paths: Vec<PathBuf> = walk(root, &matcher, false)
            .map(|entry| entry.into_path())
            .collect();

        assert!(paths.contains(&root.to_path_buf()));
        assert!(paths.contains(&root.join("src/nested/lib.rs")));
        assert!(!paths.iter().any(|p| p.starts_with(root.join(".git"))));
    }

    #[test]
    fn test_backend_kind_display() {
        assert_eq!(BackendKind::Native.to_string(), "native");
        assert_eq!(BackendKind::Polling.to_string(), "polling");
    }
}

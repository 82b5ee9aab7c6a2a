//! # Filesystem Changes
//!
//! This crate watches a directory tree and reports what changed in it, one
//! batch per detection cycle, leaving out paths matched by an ignore pattern.
//!
//! ## Features
//!
//! - **Native Notifications**: inotify, FSEvents or ReadDirectoryChangesW
//!   through `notify`, one subscription per directory
//! - **Polling Fallback**: periodic rescans diffed against the previous one
//! - **Ignore Pattern**: a regular expression searched in absolute paths
//! - **Batching**: duplicate events inside a cycle are collapsed
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Directory Watcher                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  WatchConfig ──► DirectoryWatcher ──► ChangeStream             │
//! │       │                │                   ▲                    │
//! │       ▼                ▼                   │                    │
//! │  IgnoreMatcher   NativeBackend ──────► ChangeBatch             │
//! │                  PollingBackend ─────────┘                      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use codex_fs_changes::watch;
//!
//! let mut changes = watch("/srv/site", r"\.git")?;
//! while let Some(batch) = changes.recv().await {
//!     for event in &batch {
//!         println!("{event}");
//!     }
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod event;
pub mod matcher;
pub mod watcher;

pub use backend::{BackendKind, ChangeSource};
pub use config::{BackendPreference, WatchConfig};
pub use error::{Result, WatcherError};
pub use event::{ChangeBatch, ChangeEvent, ChangeKind};
pub use matcher::IgnoreMatcher;
pub use watcher::{ChangeStream, DirectoryWatcher, StopHandle, watch};

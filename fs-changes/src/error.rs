//! Error types for the change watcher.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur while setting up or running a watch.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// The ignore pattern is not a valid regular expression.
    #[error("invalid ignore pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The root path does not exist or cannot be read.
    #[error("path unavailable: {}: {source}", path.display())]
    PathUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The root path exists but is not a directory.
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// A directory could not be subscribed for native notifications.
    #[error("failed to watch {}: {source}", path.display())]
    WatchRegistration {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// The producer thread could not be started.
    #[error("failed to spawn watcher thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

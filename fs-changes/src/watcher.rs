//! Directory watcher front door and the stream it hands out.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, error, info, info_span, warn};

use crate::backend::{BackendKind, ChangeSource, NativeBackend, PollingBackend};
use crate::config::{BackendPreference, WatchConfig};
use crate::error::{Result, WatcherError};
use crate::event::ChangeBatch;
use crate::matcher::IgnoreMatcher;

/// Watch `root` for changes, skipping paths matched by `ignore`.
///
/// Uses native notifications when the platform provides them and polling
/// otherwise. Pattern and path problems are reported here, before anything
/// is watched.
pub fn watch(root: impl AsRef<Path>, ignore: &str) -> Result<ChangeStream> {
    let config = WatchConfig::new(root.as_ref()).with_ignore(ignore);
    DirectoryWatcher::new(config)?.start()
}

/// A validated watch that has not started yet.
#[derive(Debug)]
pub struct DirectoryWatcher {
    config: WatchConfig,
    root: PathBuf,
    matcher: IgnoreMatcher,
    span: Span,
    cancel: CancellationToken,
}

impl DirectoryWatcher {
    /// Compile the ignore pattern and check the root.
    pub fn new(config: WatchConfig) -> Result<Self> {
        config.validate()?;
        let matcher = IgnoreMatcher::new(&config.ignore)?;
        let root = resolve_root(&config.root)?;
        let span = info_span!("fs_changes", root = %root.display());

        Ok(Self {
            config,
            root,
            matcher,
            span,
            cancel: CancellationToken::new(),
        })
    }

    /// Log everything this watch does inside `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Canonical root being watched.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A handle that stops the watch, usable before and after `start`.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// Pick a backend, subscribe the tree and start producing batches.
    ///
    /// A stop requested while the tree is still being walked yields a stream
    /// that is already finished rather than an error.
    pub fn start(self) -> Result<ChangeStream> {
        let span = self.span.clone();
        let _entered = span.enter();

        info!("Watching \"{}\" for changes", self.root.display());

        let source = self.open_source()?;
        let backend = source.kind();

        if self.cancel.is_cancelled() {
            info!("Interrupted during setup, not watching");
            return Ok(ChangeStream::finished(backend, self.cancel));
        }

        let (batch_tx, batch_rx) = mpsc::channel(self.config.channel_capacity);
        let tick = self.config.tick();
        let cancel = self.cancel.clone();
        let thread_span = self.span.clone();

        let handle = thread::Builder::new()
            .name(format!("fs-changes-{backend}"))
            .spawn(move || {
                let _entered = thread_span.enter();
                pump_loop(source, tick, batch_tx, cancel);
            })
            .map_err(WatcherError::Spawn)?;

        debug!("Started {backend} watch with {tick:?} tick");

        Ok(ChangeStream {
            batch_rx,
            cancel: self.cancel,
            backend,
            _producer: Some(handle),
        })
    }

    fn open_source(&self) -> Result<Box<dyn ChangeSource>> {
        match self.config.backend {
            BackendPreference::Native => Ok(Box::new(self.native()?)),
            BackendPreference::Polling => Ok(Box::new(self.polling())),
            BackendPreference::Auto => match self.native() {
                Ok(native) => Ok(Box::new(native)),
                Err(e) => {
                    warn!("Native notifications unavailable ({e}), falling back to polling");
                    Ok(Box::new(self.polling()))
                }
            },
        }
    }

    fn native(&self) -> Result<NativeBackend> {
        NativeBackend::new(
            &self.root,
            self.matcher.clone(),
            self.config.follow_symlinks,
            &self.cancel,
        )
    }

    fn polling(&self) -> PollingBackend {
        PollingBackend::new(
            &self.root,
            self.matcher.clone(),
            self.config.follow_symlinks,
            &self.cancel,
        )
    }
}

fn resolve_root(path: &Path) -> Result<PathBuf> {
    let unavailable = |source| WatcherError::PathUnavailable {
        path: path.to_path_buf(),
        source,
    };

    let root = dunce::canonicalize(path).map_err(unavailable)?;
    let metadata = fs::metadata(&root).map_err(unavailable)?;
    if !metadata.is_dir() {
        return Err(WatcherError::NotADirectory(root));
    }
    fs::read_dir(&root).map_err(unavailable)?;

    Ok(root)
}

/// Producer side: runs on its own thread until cancelled or disconnected.
fn pump_loop(
    mut source: Box<dyn ChangeSource>,
    tick: Duration,
    batch_tx: mpsc::Sender<ChangeBatch>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let mut batch = match source.pump(tick) {
            Ok(batch) => batch,
            Err(e) => {
                error!("Watch stopped: {e}");
                return;
            }
        };

        if cancel.is_cancelled() {
            break;
        }

        batch.deduplicate();
        if batch.is_empty() {
            continue;
        }

        debug!("Detected {} changes", batch.len());
        if batch_tx.blocking_send(batch).is_err() {
            debug!("Consumer went away, stopping watch");
            return;
        }
    }

    info!("Caught interrupt, stopping watch");
}

/// Stops a running watch from anywhere.
#[derive(Debug, Clone)]
pub struct StopHandle {
    cancel: CancellationToken,
}

impl StopHandle {
    /// Request the watch to end. The stream finishes within one tick.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Batches of changes, in detection order.
///
/// Use [`ChangeStream::recv`] from async code; the [`Iterator`] impl blocks
/// and must not be driven from inside a runtime. Dropping the stream stops
/// the watch.
#[derive(Debug)]
pub struct ChangeStream {
    batch_rx: mpsc::Receiver<ChangeBatch>,
    cancel: CancellationToken,
    backend: BackendKind,
    _producer: Option<JoinHandle<()>>,
}

impl ChangeStream {
    fn finished(backend: BackendKind, cancel: CancellationToken) -> Self {
        let (_, batch_rx) = mpsc::channel(1);
        Self {
            batch_rx,
            cancel,
            backend,
            _producer: None,
        }
    }

    /// Wait for the next batch. `None` once the watch has stopped.
    pub async fn recv(&mut self) -> Option<ChangeBatch> {
        if self.cancel.is_cancelled() {
            return None;
        }

        let batch = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            batch = self.batch_rx.recv() => batch,
        };
        self.accept(batch)
    }

    /// Blocking variant of [`ChangeStream::recv`].
    pub fn blocking_recv(&mut self) -> Option<ChangeBatch> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let batch = self.batch_rx.blocking_recv();
        self.accept(batch)
    }

    /// Nothing is handed out once a stop has been requested.
    fn accept(&self, batch: Option<ChangeBatch>) -> Option<ChangeBatch> {
        batch.filter(|_| !self.cancel.is_cancelled())
    }

    /// Stop watching. Batches not yet received are discarded.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// A handle that can stop this stream from another task or thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// Backend the watch is running on.
    pub fn backend(&self) -> BackendKind {
        self.backend
    }
}

impl Iterator for ChangeStream {
    type Item = ChangeBatch;

    fn next(&mut self) -> Option<Self::Item> {
        self.blocking_recv()
    }
}

impl Drop for ChangeStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ChangeEvent, ChangeKind};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_invalid_pattern_fails_before_watching() {
        let temp_dir = TempDir::new().unwrap();
        let result = watch(temp_dir.path(), "[unclosed");
        assert!(matches!(result, Err(WatcherError::InvalidPattern { .. })));
    }

    #[test]
    fn test_missing_root_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let result = watch(temp_dir.path().join("nope"), "");
        assert!(matches!(result, Err(WatcherError::PathUnavailable { .. })));
    }

    #[test]
    fn test_file_root_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file.txt");
        fs::write(&file, "x").unwrap();

        let result = watch(&file, "");
        assert!(matches!(result, Err(WatcherError::NotADirectory(_))));
    }

    #[test]
    fn test_root_is_canonicalized() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("sub")).unwrap();

        let watcher =
            DirectoryWatcher::new(WatchConfig::new(temp_dir.path().join("sub/../sub"))).unwrap();
        assert_eq!(
            watcher.root(),
            dunce::canonicalize(temp_dir.path().join("sub")).unwrap()
        );
    }

    #[test]
    fn test_stop_during_setup_yields_finished_stream() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = DirectoryWatcher::new(
            WatchConfig::new(temp_dir.path()).with_backend(BackendPreference::Polling),
        )
        .unwrap();

        watcher.stop_handle().stop();
        let mut stream = watcher.start().unwrap();

        assert_eq!(stream.backend(), BackendKind::Polling);
        assert!(stream.next().is_none());
    }

    fn stream_with_queued_batch() -> (ChangeStream, mpsc::Sender<ChangeBatch>) {
        let (batch_tx, batch_rx) = mpsc::channel(4);
        let mut batch = ChangeBatch::new();
        batch.push(ChangeEvent::new(ChangeKind::Created, "/t/a.txt"));
        batch_tx.try_send(batch).unwrap();

        let stream = ChangeStream {
            batch_rx,
            cancel: CancellationToken::new(),
            backend: BackendKind::Polling,
            _producer: None,
        };
        (stream, batch_tx)
    }

    #[tokio::test]
    async fn test_no_batch_after_stop() {
        let (mut stream, _batch_tx) = stream_with_queued_batch();
        stream.stop();
        assert!(stream.recv().await.is_none());

        let (stream, _batch_tx) = stream_with_queued_batch();
        // Stop lands while the receive is already underway.
        assert!(stream.accept(Some(ChangeBatch::new())).is_some());
        stream.stop();
        assert!(stream.accept(Some(ChangeBatch::new())).is_none());
    }

    #[test]
    fn test_no_blocking_batch_after_stop() {
        let (mut stream, _batch_tx) = stream_with_queued_batch();
        assert_eq!(stream.blocking_recv().map(|batch| batch.len()), Some(1));

        let (mut stream, _batch_tx) = stream_with_queued_batch();
        stream.stop_handle().stop();
        assert!(stream.blocking_recv().is_none());
    }

    #[tokio::test]
    async fn test_stop_handle_ends_recv() {
        let temp_dir = TempDir::new().unwrap();
        let config = WatchConfig::new(temp_dir.path())
            .with_backend(BackendPreference::Polling)
            .with_tick(Duration::from_millis(20));
        let mut stream = DirectoryWatcher::new(config).unwrap().start().unwrap();

        let handle = stream.stop_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.stop();
        });

        let next = tokio::time::timeout(Duration::from_secs(5), stream.recv())
            .await
            .unwrap();
        assert!(next.is_none());
        assert!(stream.stop_handle().is_stopped());
    }
}

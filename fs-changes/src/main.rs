use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use codex_fs_changes::{BackendPreference, DirectoryWatcher, WatchConfig};
use tracing::info;

/// Print changes under a directory until interrupted.
#[derive(Debug, Parser)]
#[command(name = "codex-fs-changes", version)]
struct Cli {
    /// Directory to watch.
    root: PathBuf,

    /// Regular expression; matching paths are neither watched nor reported.
    #[arg(long, default_value = "")]
    ignore: String,

    /// Backend to use: auto, native or polling.
    #[arg(long, default_value = "auto")]
    backend: BackendPreference,

    /// Tick interval in milliseconds.
    #[arg(long, default_value_t = 500)]
    tick_ms: u64,

    /// Print events as JSON lines.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = WatchConfig {
        ignore: cli.ignore,
        backend: cli.backend,
        tick_ms: cli.tick_ms,
        ..WatchConfig::new(&cli.root)
    };

    let interrupt = async {
        // Without a handler there is nothing to wait for.
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    run(config, cli.json, interrupt).await
}

/// Watch until the stream ends or `shutdown` completes.
///
/// `shutdown` is armed before the tree is walked, so an interrupt during a
/// long initial registration still ends the run cleanly.
async fn run(
    config: WatchConfig,
    json: bool,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let root = config.root.clone();
    let watcher = DirectoryWatcher::new(config)
        .with_context(|| format!("cannot watch {}", root.display()))?;

    let stop = watcher.stop_handle();
    tokio::spawn(async move {
        shutdown.await;
        stop.stop();
    });

    let mut changes = tokio::task::spawn_blocking(move || watcher.start()).await??;
    info!("Using {} backend", changes.backend());

    while let Some(batch) = changes.recv().await {
        for event in &batch {
            if json {
                println!("{}", serde_json::to_string(event)?);
            } else {
                println!("{event}");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_interrupt_before_setup_exits_cleanly() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("a/b/c")).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            run(WatchConfig::new(temp_dir.path()), false, async {}),
        )
        .await
        .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_missing_root_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let result = run(
            WatchConfig::new(temp_dir.path().join("nope")),
            false,
            std::future::pending(),
        )
        .await;
        assert!(result.unwrap_err().to_string().contains("cannot watch"));
    }
}

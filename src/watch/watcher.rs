// src/watch/watcher.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::fs::FileSystem;
use crate::watch::hash::ContentTracker;

/// Handle for the model file watcher.
///
/// This exists mainly so the underlying `RecommendedWatcher` is kept alive for
/// as long as needed. Dropping this handle will stop file watching.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
    path: PathBuf,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("path", &self.path)
            .finish()
    }
}

/// Watch `model_path` and call `on_change` whenever its content changes.
///
/// The parent directory is watched (non-recursively) so that editors which
/// save by writing a temporary file and renaming it are still noticed. Events
/// for other files are ignored, as are writes that leave the content hash
/// unchanged.
pub fn spawn_model_watcher<F>(
    model_path: impl Into<PathBuf>,
    fs: Arc<dyn FileSystem>,
    on_change: F,
) -> Result<WatcherHandle>
where
    F: Fn() + Send + 'static,
{
    let model_path = model_path.into();
    // Canonicalize once so event paths compare equal.
    let model_path = model_path
        .canonicalize()
        .unwrap_or_else(|_| model_path.clone());
    let dir = model_path
        .parent()
        .map(Path::to_path_buf)
        .context("model path has no parent directory")?;

    // Channel from the blocking notify callback into the async world.
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<Event>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Err(err) = event_tx.send(event) {
                    // We can't log via tracing here easily, so fallback to stderr.
                    eprintln!("enginesched: failed to forward notify event: {err}");
                }
            }
            Err(err) => {
                eprintln!("enginesched: file watch error: {err}");
            }
        },
        Config::default(),
    )?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("watching {:?}", dir))?;

    info!("model watcher started on {:?}", model_path);

    let mut tracker = ContentTracker::new();
    // Seed with the current content so the first save that changes nothing
    // is not reported.
    if let Err(e) = tracker.observe(&model_path, fs.as_ref()) {
        warn!(error = %format!("{e:#}"), "could not read model file yet");
    }

    let watched = model_path.clone();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if !is_relevant(&event, &watched) {
                continue;
            }
            debug!(?event, "model file event");

            match tracker.observe(&watched, fs.as_ref()) {
                Ok(true) => on_change(),
                Ok(false) => {}
                // Mid-rename or deleted; the next event will tell.
                Err(e) => debug!(error = %format!("{e:#}"), "model file unreadable"),
            }
        }
        debug!("watcher event loop finished");
    });

    Ok(WatcherHandle {
        _inner: watcher,
        path: model_path,
    })
}

fn is_relevant(event: &Event, model_path: &Path) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
    ) && event.paths.iter().any(|p| p == model_path)
}

//! File-watching build pipeline.
//!
//! Files matched by the watch rules are emitted as-is. A sibling
//! `<file>.map` is attached as the source map; map files are never emitted
//! on their own.
//!
//! On start the whole project is scanned and every matched file is emitted
//! as an initial notification, followed by the build-started signal. After
//! that, file system events are batched until a short quiet period and the
//! affected files are re-emitted. A batch is closed after at most
//! [`MAX_BATCH_WINDOW`] even while events keep arriving.
//!
//! Scanning and reading run on the blocking pool.

use crate::error::CliError;
use crate::resolver::GlobResolver;
use burnsync_engine::{BuildPipeline, ChangeNotification, ChangeSubscriber};
use bytes::Bytes;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const QUIET_PERIOD: Duration = Duration::from_millis(100);

/// Longest time a change batch stays open.
pub const MAX_BATCH_WINDOW: Duration = Duration::from_secs(1);

const MAP_SUFFIX: &str = ".map";

/// Handle through which the engine asks for a full reload.
#[derive(Debug, Clone)]
pub struct FsPipeline {
    reloads: mpsc::UnboundedSender<()>,
}

/// Receiving side of [`FsPipeline`] reload requests.
#[derive(Debug)]
pub struct ReloadRequests(mpsc::UnboundedReceiver<()>);

impl FsPipeline {
    /// Creates the pipeline handle and its reload channel.
    pub fn new() -> (Self, ReloadRequests) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { reloads: tx }, ReloadRequests(rx))
    }
}

impl BuildPipeline for FsPipeline {
    fn trigger_full_reload(&self) {
        if self.reloads.send(()).is_err() {
            debug!("full reload dropped: pipeline stopped");
        }
    }
}

/// Scans `root` and returns the project-relative paths matched by `resolver`,
/// sorted.
///
/// Hidden directories and `node_modules` are not descended into. The root
/// itself is always walked, whatever its name.
pub fn scan(root: &Path, resolver: &GlobResolver) -> Vec<String> {
    let mut found: Vec<String> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || !entry.file_type().is_dir() || !is_hidden(entry.path())
        })
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "failed to read directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| relative(root, entry.path()))
        .filter(|rel| emits(rel, resolver))
        .collect();
    found.sort();
    found
}

/// Reads a matched file and its sibling source map.
pub fn load(root: &Path, rel: &str, initial: bool) -> std::io::Result<ChangeNotification> {
    let path = root.join(rel);
    let content = Bytes::from(std::fs::read(&path)?);
    let mut notification = if initial {
        ChangeNotification::initial(rel, content)
    } else {
        ChangeNotification::new(rel, content)
    };

    let mut map_path = path.into_os_string();
    map_path.push(MAP_SUFFIX);
    if let Ok(map) = std::fs::read(PathBuf::from(map_path)) {
        notification = notification.with_source_map(map);
    }
    Ok(notification)
}

fn emits(rel: &str, resolver: &GlobResolver) -> bool {
    !rel.ends_with(MAP_SUFFIX) && resolver.matches(rel)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.') || name == "node_modules")
}

fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}

/// Maps a changed path to the file that should be re-emitted, if any.
fn affected(root: &Path, path: &Path, resolver: &GlobResolver) -> Option<String> {
    let rel = relative(root, path)?;
    let rel = match rel.strip_suffix(MAP_SUFFIX) {
        Some(owner) => owner.to_string(),
        None => rel,
    };
    resolver.matches(&rel).then_some(rel)
}

fn is_content_change(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Modify(ModifyKind::Name(_))
    )
}

#[derive(Clone)]
struct Pipeline {
    root: PathBuf,
    resolver: GlobResolver,
    subscriber: Arc<dyn ChangeSubscriber>,
}

impl Pipeline {
    fn emit(&self, rel: &str, initial: bool) {
        match load(&self.root, rel, initial) {
            Ok(notification) => self.subscriber.on_change(notification),
            Err(e) => debug!(path = rel, error = %e, "skipping unreadable file"),
        }
    }

    fn emit_all(&self, initial: bool) -> usize {
        let files = scan(&self.root, &self.resolver);
        for rel in &files {
            self.emit(rel, initial);
        }
        files.len()
    }

    /// Runs `work` on the blocking pool. `None` if the task panicked.
    async fn blocking<T, F>(&self, work: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&Pipeline) -> T + Send + 'static,
    {
        let pipeline = self.clone();
        match tokio::task::spawn_blocking(move || work(&pipeline)).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, "pipeline task failed");
                None
            }
        }
    }
}

/// Collects `first` and what follows it until nothing arrives for `quiet`,
/// or until `window` has passed since the call.
async fn debounce<T>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    first: T,
    quiet: Duration,
    window: Duration,
) -> Vec<T> {
    let deadline = Instant::now() + window;
    let mut batch = vec![first];
    loop {
        let wait = deadline.saturating_duration_since(Instant::now()).min(quiet);
        if wait.is_zero() {
            break;
        }
        match tokio::time::timeout(wait, rx.recv()).await {
            Ok(Some(item)) => batch.push(item),
            Ok(None) | Err(_) => break,
        }
    }
    batch
}

/// Starts watching `root` and runs the startup scan.
///
/// The returned task owns the watcher; aborting it stops the pipeline.
pub fn spawn(
    root: &Path,
    resolver: GlobResolver,
    reloads: ReloadRequests,
    subscriber: Arc<dyn ChangeSubscriber>,
) -> Result<JoinHandle<()>, CliError> {
    let root = std::fs::canonicalize(root)?;
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let _ = event_tx.send(res);
        })?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    info!(root = %root.display(), "watching project");

    let pipeline = Pipeline {
        root,
        resolver,
        subscriber,
    };
    let ReloadRequests(mut reload_rx) = reloads;

    Ok(tokio::spawn(async move {
        let _watcher = watcher;

        let files = pipeline.blocking(|p| p.emit_all(true)).await.unwrap_or(0);
        info!(files, "initial scan finished");
        pipeline.subscriber.on_build_started();

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    let Some(event) = event else { break };
                    let events = debounce(&mut event_rx, event, QUIET_PERIOD, MAX_BATCH_WINDOW).await;
                    let mut batch = BTreeSet::new();
                    for event in events {
                        collect(&pipeline, event, &mut batch);
                    }
                    if batch.is_empty() {
                        continue;
                    }
                    let files = batch.len();
                    pipeline
                        .blocking(move |p| {
                            for rel in &batch {
                                p.emit(rel, false);
                            }
                        })
                        .await;
                    debug!(files, "changes emitted");
                }
                reload = reload_rx.recv() => {
                    if reload.is_none() {
                        break;
                    }
                    let files = pipeline.blocking(|p| p.emit_all(false)).await.unwrap_or(0);
                    info!(files, "full reload emitted");
                }
            }
        }
        debug!("pipeline stopped");
    }))
}

fn collect(pipeline: &Pipeline, event: Result<Event, notify::Error>, batch: &mut BTreeSet<String>) {
    match event {
        Ok(event) if is_content_change(&event) => {
            for path in &event.paths {
                if let Some(rel) = affected(&pipeline.root, path, &pipeline.resolver) {
                    batch.insert(rel);
                }
            }
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "file watcher error"),
    }
}

//! Live app folder watch
//!
//! A scanner task diffs directory snapshots on a fixed interval and pushes
//! change events into a queue. A monitor task drains that queue with a
//! bounded receive timeout so it also notices shutdown, inspecting new
//! binaries and keeping the [`AppRegistry`] in sync.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::inspector::AppInspector;
use super::registry::AppRegistry;

/// Binary extensions the watcher registers
pub const APP_EXTENSIONS: &[&str] = &["apk"];

/// File name marker of binaries re-signed in place
pub const RESIGNED_MARKER: &str = "resigned-";

/// Queue capacity between scanner and monitor
const EVENT_QUEUE_CAPACITY: usize = 256;

/// A change observed in the watched folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderEvent {
    Created(PathBuf),
    Deleted(PathBuf),
    Modified(PathBuf),
}

/// Whether a path has a recognized app binary extension
pub fn is_app_binary(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| APP_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Whether a path carries the re-signed marker
pub fn is_resigned(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with(RESIGNED_MARKER))
        .unwrap_or(false)
}

// ============================================================================
// Folder Scanner
// ============================================================================

/// Snapshot-diffing directory scanner
#[derive(Debug)]
pub struct FolderScanner {
    dir: PathBuf,
    known: HashMap<PathBuf, Option<SystemTime>>,
}

impl FolderScanner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            known: HashMap::new(),
        }
    }

    async fn list(&self) -> std::io::Result<HashMap<PathBuf, Option<SystemTime>>> {
        let mut files = HashMap::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                // Raced with a delete
                Err(_) => continue,
            };
            if metadata.is_file() {
                files.insert(entry.path(), metadata.modified().ok());
            }
        }

        Ok(files)
    }

    /// Take the initial snapshot and return every file currently present
    pub async fn prime(&mut self) -> std::io::Result<Vec<PathBuf>> {
        self.known = self.list().await?;
        let mut paths: Vec<PathBuf> = self.known.keys().cloned().collect();
        paths.sort();
        Ok(paths)
    }

    /// Diff the folder against the previous snapshot
    pub async fn poll(&mut self) -> std::io::Result<Vec<FolderEvent>> {
        let current = self.list().await?;
        let mut events = Vec::new();

        for (path, modified) in &current {
            match self.known.get(path) {
                None => events.push(FolderEvent::Created(path.clone())),
                Some(previous) if previous != modified => {
                    events.push(FolderEvent::Modified(path.clone()))
                }
                Some(_) => {}
            }
        }

        for path in self.known.keys() {
            if !current.contains_key(path) {
                events.push(FolderEvent::Deleted(path.clone()));
            }
        }

        self.known = current;
        Ok(events)
    }
}

// ============================================================================
// App Folder Watcher
// ============================================================================

/// Keeps the app catalog in sync with a folder of binaries
pub struct AppFolderWatcher {
    dir: PathBuf,
    registry: Arc<AppRegistry>,
    inspector: Arc<dyn AppInspector>,
    poll_interval: Duration,
    recv_timeout: Duration,
}

impl AppFolderWatcher {
    pub fn new(
        dir: impl Into<PathBuf>,
        registry: Arc<AppRegistry>,
        inspector: Arc<dyn AppInspector>,
    ) -> Self {
        Self {
            dir: dir.into(),
            registry,
            inspector,
            poll_interval: Duration::from_secs(2),
            recv_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register a single binary, logging rather than failing
    async fn register_path(&self, path: &Path) -> bool {
        match self.inspector.inspect(path).await {
            Ok(app) => {
                self.registry.register(app);
                true
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to inspect app binary");
                false
            }
        }
    }

    /// Register every binary already in the folder
    ///
    /// Re-signed copies are skipped since their originals are registered.
    /// Returns the scanner primed with this snapshot.
    pub async fn initial_scan(&self) -> std::io::Result<(FolderScanner, usize)> {
        let mut scanner = FolderScanner::new(&self.dir);
        let mut registered = 0;

        for path in scanner.prime().await? {
            if !is_app_binary(&path) {
                continue;
            }
            if is_resigned(&path) {
                tracing::debug!(path = %path.display(), "Skipping re-signed binary");
                continue;
            }
            if self.register_path(&path).await {
                registered += 1;
            }
        }

        tracing::info!(dir = %self.dir.display(), registered, "Initial app folder scan complete");
        Ok((scanner, registered))
    }

    /// Apply one folder event to the catalog
    pub async fn handle_event(&self, event: FolderEvent) {
        match event {
            FolderEvent::Created(path) => {
                if is_app_binary(&path) {
                    self.register_path(&path).await;
                } else {
                    tracing::debug!(path = %path.display(), "Ignoring non-app file");
                }
            }
            FolderEvent::Deleted(path) => {
                self.registry.unregister(&path);
            }
            // a binary still being copied may have failed inspection on creation
            FolderEvent::Modified(path) => {
                if is_app_binary(&path) && !self.registry.contains_path(&path) {
                    self.register_path(&path).await;
                } else {
                    tracing::debug!(path = %path.display(), "Ignoring modified file");
                }
            }
        }
    }

    /// Scan the folder, then keep watching until shutdown
    pub async fn spawn(self, shutdown_rx: watch::Receiver<bool>) -> std::io::Result<WatcherHandle> {
        let (scanner, _) = self.initial_scan().await?;
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let scanner_handle =
            spawn_scanner(scanner, tx, self.poll_interval, shutdown_rx.clone());
        let monitor_handle = tokio::spawn(self.monitor(rx, shutdown_rx));

        Ok(WatcherHandle {
            scanner_handle,
            monitor_handle,
        })
    }

    /// Drain the event queue until shutdown or until the scanner goes away
    pub async fn monitor(self, mut rx: mpsc::Receiver<FolderEvent>, shutdown_rx: watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                tracing::info!("App folder monitor shutting down");
                break;
            }

            match tokio::time::timeout(self.recv_timeout, rx.recv()).await {
                Ok(Some(event)) => self.handle_event(event).await,
                Ok(None) => {
                    tracing::info!("App folder event queue closed");
                    break;
                }
                Err(_) => continue,
            }
        }
    }
}

fn spawn_scanner(
    mut scanner: FolderScanner,
    tx: mpsc::Sender<FolderEvent>,
    poll_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let events = match scanner.poll().await {
                        Ok(events) => events,
                        Err(e) => {
                            tracing::warn!(dir = %scanner.dir.display(), error = %e, "App folder scan failed");
                            continue;
                        }
                    };
                    for event in events {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    tracing::info!("App folder scanner shutting down");
                    break;
                }
            }
        }
    })
}

/// Handle to the running watcher tasks
pub struct WatcherHandle {
    scanner_handle: JoinHandle<()>,
    monitor_handle: JoinHandle<()>,
}

impl WatcherHandle {
    /// Wait for both tasks to finish
    pub async fn wait(self) {
        let _ = tokio::join!(self.scanner_handle, self.monitor_handle);
    }

    pub fn is_running(&self) -> bool {
        !self.scanner_handle.is_finished() && !self.monitor_handle.is_finished()
    }
}

//! Filesystem watcher — turns notify events on the shared folder (and
//! any explicitly watched files) into upload/delete work for the
//! session, with per-path debouncing and echo suppression.
//!
//! notify delivers events on its own thread; a bridge thread debounces
//! and filters them, then hands the survivors to the async side over a
//! bounded tokio channel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use dashmap::DashMap;
use ferry_core::limits::{WATCH_DEBOUNCE, WATCH_SETTLE};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::suppress::SuppressionSet;

/// Name fragments that mark editor scratch files and partial writes.
const IGNORED_SUFFIXES: &[&str] = &["~", ".swp", ".swx", ".tmp", ".part"];

/// A filesystem change that survived filtering and debouncing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsChange {
    /// File created or modified; `source` is where to read it from.
    Modified { source: PathBuf, rel_path: String },
    /// File removed.
    Removed { rel_path: String },
}

/// Handle for adding and removing watched files at runtime. The folder
/// itself is watched recursively for the whole lifetime of the daemon.
pub struct FolderWatcher {
    watcher: Arc<Mutex<RecommendedWatcher>>,
    // Explicitly watched files outside the folder, mapped to the name
    // they travel under on the wire.
    extra: Arc<DashMap<PathBuf, String>>,
}

impl FolderWatcher {
    /// Watch the folder recursively and return change events on the
    /// receiver. Runs until the receiver is dropped.
    pub fn spawn(
        folder: &Path,
        suppress: SuppressionSet,
    ) -> Result<(Self, mpsc::Receiver<FsChange>)> {
        let folder = folder
            .canonicalize()
            .with_context(|| format!("cannot watch {}", folder.display()))?;

        let (raw_tx, raw_rx) = std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = raw_tx.send(res);
        })
        .context("failed to create filesystem watcher")?;
        watcher
            .watch(&folder, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", folder.display()))?;

        let extra: Arc<DashMap<PathBuf, String>> = Arc::new(DashMap::new());
        let (tx, rx) = mpsc::channel(64);

        let bridge = Bridge {
            folder,
            extra: extra.clone(),
            suppress,
            tx,
            last_seen: HashMap::new(),
        };
        std::thread::Builder::new()
            .name("ferry-watch".into())
            .spawn(move || bridge.run(raw_rx))
            .context("failed to spawn watcher bridge thread")?;

        Ok((
            Self {
                watcher: Arc::new(Mutex::new(watcher)),
                extra,
            },
            rx,
        ))
    }

    /// Start watching a single file outside the shared folder. It
    /// travels on the wire under its file name.
    pub fn watch_file(&self, path: &Path) -> Result<String> {
        let path = path
            .canonicalize()
            .with_context(|| format!("cannot watch {}", path.display()))?;
        let name = path
            .file_name()
            .context("watched path has no file name")?
            .to_string_lossy()
            .into_owned();
        self.watcher
            .lock()
            .expect("watcher lock poisoned")
            .watch(&path, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", path.display()))?;
        self.extra.insert(path, name.clone());
        Ok(name)
    }

    /// Stop watching a previously added file.
    pub fn unwatch_file(&self, path: &Path) -> Result<()> {
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.watcher
            .lock()
            .expect("watcher lock poisoned")
            .unwatch(&path)
            .with_context(|| format!("failed to unwatch {}", path.display()))?;
        self.extra.remove(&path);
        Ok(())
    }
}

struct Bridge {
    folder: PathBuf,
    extra: Arc<DashMap<PathBuf, String>>,
    suppress: SuppressionSet,
    tx: mpsc::Sender<FsChange>,
    last_seen: HashMap<PathBuf, Instant>,
}

impl Bridge {
    fn run(mut self, raw_rx: std::sync::mpsc::Receiver<notify::Result<notify::Event>>) {
        for res in raw_rx {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "watcher error");
                    continue;
                }
            };
            let removed = match event.kind {
                EventKind::Remove(_) => true,
                EventKind::Create(_) | EventKind::Modify(_) => false,
                _ => continue,
            };
            for path in event.paths {
                if self.handle(path, removed).is_err() {
                    // Receiver gone, daemon is shutting down.
                    return;
                }
            }
        }
    }

    fn handle(&mut self, path: PathBuf, removed: bool) -> Result<(), ()> {
        if is_ignored(&path) {
            return Ok(());
        }
        let Some(rel_path) = self.rel_name(&path) else {
            return Ok(());
        };

        if removed {
            self.last_seen.remove(&path);
            tracing::info!(path = rel_path, "file removed locally");
            return self
                .tx
                .blocking_send(FsChange::Removed { rel_path })
                .map_err(|_| ());
        }

        if self.suppress.contains(&rel_path) {
            tracing::debug!(path = rel_path, "suppressing echo of a received file");
            return Ok(());
        }

        let now = Instant::now();
        if self
            .last_seen
            .get(&path)
            .is_some_and(|prev| now.duration_since(*prev) < WATCH_DEBOUNCE)
        {
            return Ok(());
        }
        self.last_seen.insert(path.clone(), now);

        // Give the writer a beat to finish, then check what is there.
        std::thread::sleep(WATCH_SETTLE);
        let Ok(meta) = std::fs::metadata(&path) else {
            return Ok(());
        };
        if !meta.is_file() || meta.len() == 0 {
            return Ok(());
        }

        tracing::info!(path = rel_path, bytes = meta.len(), "file changed locally");
        self.tx
            .blocking_send(FsChange::Modified {
                source: path,
                rel_path,
            })
            .map_err(|_| ())
    }

    /// The name this path travels under, or None if it is neither
    /// inside the folder nor explicitly watched.
    fn rel_name(&self, path: &Path) -> Option<String> {
        if let Ok(rel) = path.strip_prefix(&self.folder) {
            return Some(rel.to_string_lossy().replace('\\', "/"));
        }
        self.extra.get(path).map(|name| name.value().clone())
    }
}

fn is_ignored(path: &Path) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return true;
    };
    // tempfile's scratch names start with .tmp; our own atomic writes
    // would otherwise loop through here.
    name.starts_with(".tmp") || IGNORED_SUFFIXES.iter().any(|s| name.ends_with(s))
}

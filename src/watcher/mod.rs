//! File watching for live reload.
//!
//! Uses notify crate for cross-platform file system events. One watcher
//! covers several files; changes are debounced per file.
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};

/// Which watched file changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchTarget {
    Document,
    Settings,
}

impl fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Document => f.write_str("document"),
            Self::Settings => f.write_str("settings"),
        }
    }
}

#[derive(Debug)]
struct WatchedFile {
    target: WatchTarget,
    path: PathBuf,
    name: Option<OsString>,
    root: PathBuf,
    pending_since: Option<Instant>,
}

impl WatchedFile {
    fn is_relevant(&self, event: &Event) -> bool {
        event.paths.iter().any(|path| {
            path == &self.root
                || path == &self.path
                || (path.parent() == Some(self.root.as_path())
                    && self
                        .name
                        .as_ref()
                        .is_some_and(|name| path.file_name().is_some_and(|f| f == name)))
        })
    }
}

/// Watches a set of files and emits debounced change notifications.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    files: Vec<WatchedFile>,
    roots: Vec<PathBuf>,
    debounce: Duration,
}

impl FileWatcher {
    /// Create a watcher with nothing registered yet.
    ///
    /// # Errors
    /// Returns an error if the file watcher cannot be created.
    pub fn new(debounce: Duration) -> notify::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;

        Ok(Self {
            watcher,
            rx,
            files: Vec::new(),
            roots: Vec::new(),
            debounce,
        })
    }

    /// Start watching `path` and report its changes as `target`.
    ///
    /// The file itself need not exist yet, but its directory must.
    ///
    /// # Errors
    /// Returns an error if the containing directory cannot be watched.
    pub fn watch(&mut self, target: WatchTarget, path: impl AsRef<Path>) -> notify::Result<()> {
        let path = canonical_target(path.as_ref());
        let root = watch_root_for(&path);

        if !self.roots.contains(&root) {
            self.watcher.watch(&root, RecursiveMode::NonRecursive)?;
            self.roots.push(root.clone());
        }

        tracing::debug!(%target, path = %path.display(), root = %root.display(), "watching");
        self.files.retain(|f| f.target != target);
        self.files.push(WatchedFile {
            target,
            name: path.file_name().map(std::ffi::OsStr::to_os_string),
            path,
            root,
            pending_since: None,
        });
        Ok(())
    }

    /// The canonical path registered for `target`.
    pub fn path_of(&self, target: WatchTarget) -> Option<&Path> {
        self.files
            .iter()
            .find(|f| f.target == target)
            .map(|f| f.path.as_path())
    }

    /// Targets whose debounced change is ready, in registration order.
    pub fn take_changes(&mut self) -> Vec<WatchTarget> {
        let mut total_events = 0u32;
        let mut irrelevant_events = 0u32;
        let now = Instant::now();

        while let Ok(event) = self.rx.try_recv() {
            total_events += 1;
            match event {
                Ok(ev) => {
                    let mut relevant = false;
                    for file in &mut self.files {
                        if file.is_relevant(&ev) {
                            file.pending_since = Some(now);
                            relevant = true;
                        }
                    }
                    if !relevant {
                        irrelevant_events += 1;
                        tracing::trace!(kind = ?ev.kind, paths = ?ev.paths, "irrelevant watch event");
                    }
                }
                Err(err) => {
                    tracing::warn!("watch error: {err}");
                }
            }
        }

        if total_events > 0 {
            tracing::trace!(total_events, irrelevant_events, "watcher poll");
        }

        let mut ready = Vec::new();
        for file in &mut self.files {
            if file
                .pending_since
                .is_some_and(|since| since.elapsed() >= self.debounce)
            {
                file.pending_since = None;
                ready.push(file.target);
            }
        }
        ready
    }
}

// Event paths from the OS are absolute and canonical, so stored paths must
// be too. A file that does not exist yet is resolved through its parent.
fn canonical_target(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => parent
            .canonicalize()
            .map_or_else(|_| path.to_path_buf(), |p| p.join(name)),
        _ => path.to_path_buf(),
    }
}

fn watch_root_for(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

//
// watch.rs
//
// File watch bridge: "watch a path, get called back on change"
//
// Two implementations share one registry type:
// - NativeWatcher: OS notifications through the `notify` crate
// - NotificationWatcher: driven by the editor's workspace/didChangeWatchedFiles
//

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use crate::path_util::normalize_path;

/// Callback invoked with the changed path.
pub type WatchCallback = Arc<dyn Fn(&Path) + Send + Sync>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum WatchError {
    #[error("file watcher error: {0}")]
    Notify(String),
    #[error("cannot watch path without a parent directory: {0}")]
    Unsupported(PathBuf),
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::Notify(e.to_string())
    }
}

/// Abstraction over a filesystem watch service.
///
/// Registration is per file path. The returned handle keeps the registration
/// alive; closing or dropping it releases the callback (and the underlying OS
/// watch once no callback for that directory remains).
///
/// Callbacks run on the watcher's event thread and must not block.
pub trait FileWatcher: Send + Sync {
    fn watch(&self, path: &Path, on_change: WatchCallback) -> Result<WatchHandle, WatchError>;

    /// Number of live registrations.
    fn active_watches(&self) -> usize;
}

/// Live watch registration. Released on `close()` or drop.
pub struct WatchHandle {
    id: u64,
    path: PathBuf,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl WatchHandle {
    fn new(id: u64, path: PathBuf, release: Box<dyn FnOnce() + Send + Sync>) -> Self {
        Self {
            id,
            path,
            release: Some(release),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn close(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            log::trace!("Closing watch #{} on {}", self.id, self.path.display());
            release();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Callbacks keyed by normalized file path.
#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    callbacks: Mutex<HashMap<PathBuf, Vec<(u64, WatchCallback)>>>,
}

impl Registry {
    fn add(&self, path: PathBuf, on_change: WatchCallback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .lock()
            .entry(path)
            .or_default()
            .push((id, on_change));
        id
    }

    /// Returns true when `path` has no registrations left.
    fn remove(&self, path: &Path, id: u64) -> bool {
        let mut callbacks = self.callbacks.lock();
        let Some(slot) = callbacks.get_mut(path) else {
            return false;
        };
        slot.retain(|(cb_id, _)| *cb_id != id);
        if slot.is_empty() {
            callbacks.remove(path);
            return true;
        }
        false
    }

    /// Invoke every callback registered for `path`.
    ///
    /// Callbacks are cloned out first so a callback may close handles
    /// (re-entering the registry) without deadlocking.
    fn dispatch(&self, path: &Path) -> usize {
        let key = normalize_path(path);
        let targets: Vec<WatchCallback> = {
            let callbacks = self.callbacks.lock();
            callbacks
                .get(&key)
                .map(|slot| slot.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default()
        };
        for cb in &targets {
            cb(&key);
        }
        targets.len()
    }

    fn len(&self) -> usize {
        self.callbacks.lock().values().map(Vec::len).sum()
    }

    fn directories_in_use(&self) -> HashMap<PathBuf, usize> {
        let mut dirs = HashMap::new();
        for path in self.callbacks.lock().keys() {
            if let Some(parent) = path.parent() {
                *dirs.entry(parent.to_path_buf()).or_insert(0) += 1;
            }
        }
        dirs
    }
}

// ============================================================================
// NativeWatcher
// ============================================================================

struct NativeInner {
    registry: Arc<Registry>,
    watcher: Mutex<RecommendedWatcher>,
}

/// OS-backed watcher.
///
/// Watches the parent directory of each registered file (non-recursively) so
/// that editors which save by rename-and-replace are still observed, then
/// filters events down to the registered file paths.
pub struct NativeWatcher {
    inner: Arc<NativeInner>,
}

impl NativeWatcher {
    pub fn new() -> Result<Self, WatchError> {
        let registry = Arc::new(Registry::default());
        let dispatch_registry = registry.clone();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Access(_)) {
                    return;
                }
                for path in &event.paths {
                    let fired = dispatch_registry.dispatch(path);
                    if fired > 0 {
                        log::trace!("Watch event {:?} on {} ({} callbacks)", event.kind, path.display(), fired);
                    }
                }
            }
            Err(e) => log::warn!("File watcher error: {}", e),
        })?;

        Ok(Self {
            inner: Arc::new(NativeInner {
                registry,
                watcher: Mutex::new(watcher),
            }),
        })
    }
}

impl FileWatcher for NativeWatcher {
    fn watch(&self, path: &Path, on_change: WatchCallback) -> Result<WatchHandle, WatchError> {
        let path = normalize_path(path);
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| WatchError::Unsupported(path.clone()))?;

        let dir_already_watched = self.inner.registry.directories_in_use().contains_key(&dir);
        if !dir_already_watched {
            self.inner
                .watcher
                .lock()
                .watch(&dir, RecursiveMode::NonRecursive)?;
            log::trace!("Watching directory {}", dir.display());
        }

        let id = self.inner.registry.add(path.clone(), on_change);
        let weak: Weak<NativeInner> = Arc::downgrade(&self.inner);
        let release_path = path.clone();
        let release = Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.registry.remove(&release_path, id);
            let Some(dir) = release_path.parent() else {
                return;
            };
            if !inner.registry.directories_in_use().contains_key(dir) {
                if let Err(e) = inner.watcher.lock().unwatch(dir) {
                    log::trace!("Failed to unwatch {}: {}", dir.display(), e);
                }
            }
        });
        Ok(WatchHandle::new(id, path, release))
    }

    fn active_watches(&self) -> usize {
        self.inner.registry.len()
    }
}

// ============================================================================
// NotificationWatcher
// ============================================================================

/// Watcher driven by external change notifications.
///
/// Used when the editor client owns file watching: the language server
/// forwards each `workspace/didChangeWatchedFiles` entry to [`notify_changed`].
///
/// [`notify_changed`]: NotificationWatcher::notify_changed
#[derive(Clone, Default)]
pub struct NotificationWatcher {
    registry: Arc<Registry>,
}

impl NotificationWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire callbacks registered for `path`. Returns how many ran.
    pub fn notify_changed(&self, path: &Path) -> usize {
        self.registry.dispatch(path)
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        self.registry
            .callbacks
            .lock()
            .contains_key(&normalize_path(path))
    }
}

impl FileWatcher for NotificationWatcher {
    fn watch(&self, path: &Path, on_change: WatchCallback) -> Result<WatchHandle, WatchError> {
        let path = normalize_path(path);
        let id = self.registry.add(path.clone(), on_change);
        let registry = Arc::downgrade(&self.registry);
        let release_path = path.clone();
        Ok(WatchHandle::new(
            id,
            path,
            Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.remove(&release_path, id);
                }
            }),
        ))
    }

    fn active_watches(&self) -> usize {
        self.registry.len()
    }
}

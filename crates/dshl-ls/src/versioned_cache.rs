//
// versioned_cache.rs
//
// Versioned file content cache with single-flight loads
//
// Each path carries three counters:
// - last_modified: bumped by the file watch on every detected change
// - caching: the version the newest started load is fetching
// - cached: the version the stored content corresponds to
//
// A request reads last_modified as its target and is served from the stored
// content (target <= cached), joins an in-flight load (target <= caching), or
// starts a new load. A load commits only if no newer load committed first, so
// content never moves backwards.
//

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::path_util::normalize_path;
use crate::watch::{FileWatcher, WatchCallback, WatchHandle};

// ============================================================================
// Errors and loaders
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("failed to read {path}: {message}")]
    Io {
        path: PathBuf,
        kind: std::io::ErrorKind,
        message: String,
    },
    #[error("load of {path} was aborted")]
    LoadAborted { path: PathBuf },
}

impl CacheError {
    pub fn io(path: &Path, e: &std::io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Source of file content for a cache.
#[async_trait]
pub trait ContentLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<Arc<str>, CacheError>;
}

/// Reads files from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskLoader;

#[async_trait]
impl ContentLoader for DiskLoader {
    async fn load(&self, path: &Path) -> Result<Arc<str>, CacheError> {
        tokio::fs::read_to_string(path)
            .await
            .map(Arc::from)
            .map_err(|e| CacheError::io(path, &e))
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Counters for cache behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    /// Requests answered from stored content
    pub hits: u64,
    /// Requests that joined an in-flight load
    pub joined: u64,
    /// Underlying loads started
    pub loads_started: u64,
    /// Loads whose result was dropped because a newer load committed first
    pub loads_discarded: u64,
    /// Loads that failed
    pub load_failures: u64,
}

#[derive(Default)]
struct AtomicMetrics {
    hits: AtomicU64,
    joined: AtomicU64,
    loads_started: AtomicU64,
    loads_discarded: AtomicU64,
    load_failures: AtomicU64,
}

impl AtomicMetrics {
    fn snapshot(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            loads_started: self.loads_started.load(Ordering::Relaxed),
            loads_discarded: self.loads_discarded.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Entries
// ============================================================================

type LoadOutcome = Result<Arc<str>, CacheError>;

struct InFlight {
    version: u64,
    receiver: watch::Receiver<Option<LoadOutcome>>,
}

struct EntryState {
    content: Arc<str>,
    cached: u64,
    caching: u64,
    in_flight: Option<InFlight>,
}

struct CacheEntry {
    path: PathBuf,
    last_modified: Arc<AtomicU64>,
    state: Mutex<EntryState>,
    watch: Mutex<Option<WatchHandle>>,
}

impl CacheEntry {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            last_modified: Arc::new(AtomicU64::new(1)),
            state: Mutex::new(EntryState {
                content: Arc::from(""),
                cached: 0,
                caching: 0,
                in_flight: None,
            }),
            watch: Mutex::new(None),
        }
    }

    /// Apply a finished load for `target`. Returns what callers of this load observe.
    fn commit(&self, target: u64, result: LoadOutcome, metrics: &AtomicMetrics) -> LoadOutcome {
        let mut state = self.state.lock();
        if state.in_flight.as_ref().is_some_and(|f| f.version == target) {
            state.in_flight = None;
        }

        match result {
            Ok(content) => {
                if state.cached > target {
                    log::trace!(
                        "Discarding load of {} for version {} (version {} already cached)",
                        self.path.display(),
                        target,
                        state.cached
                    );
                    metrics.loads_discarded.fetch_add(1, Ordering::Relaxed);
                } else {
                    state.content = content;
                    state.cached = target;
                }
                debug_assert!(state.cached <= self.last_modified.load(Ordering::Acquire));
                Ok(state.content.clone())
            }
            Err(e) => {
                metrics.load_failures.fetch_add(1, Ordering::Relaxed);
                log::trace!("Load of {} failed: {}", self.path.display(), e);
                Err(e)
            }
        }
    }
}

enum Plan {
    Hit(Arc<str>),
    Wait(watch::Receiver<Option<LoadOutcome>>),
}

// ============================================================================
// VersionedCache
// ============================================================================

/// Per-path file text cache.
///
/// Guarantees at most one load in flight per requested version, and that a
/// caller never receives content older than the file's change state when its
/// request started.
///
/// Loads run on spawned tasks, so a caller that gives up does not strand the
/// other callers joined on the same load. Requires a Tokio runtime.
pub struct VersionedCache {
    entries: Mutex<HashMap<PathBuf, Arc<CacheEntry>>>,
    loader: Arc<dyn ContentLoader>,
    watcher: Arc<dyn FileWatcher>,
    metrics: Arc<AtomicMetrics>,
}

impl VersionedCache {
    pub fn new(loader: Arc<dyn ContentLoader>, watcher: Arc<dyn FileWatcher>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            loader,
            watcher,
            metrics: Arc::new(AtomicMetrics::default()),
        }
    }

    /// Cache over the real filesystem.
    pub fn with_disk(watcher: Arc<dyn FileWatcher>) -> Self {
        Self::new(Arc::new(DiskLoader), watcher)
    }

    /// Get the text of `path`, loading it if the cached copy is stale.
    pub async fn get(&self, path: &Path) -> Result<Arc<str>, CacheError> {
        let entry = self.entry(path);

        let plan = {
            let mut state = entry.state.lock();
            let target = entry.last_modified.load(Ordering::Acquire);

            if target <= state.cached {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                Plan::Hit(state.content.clone())
            } else if let Some(in_flight) = state.in_flight.as_ref().filter(|f| target <= f.version) {
                self.metrics.joined.fetch_add(1, Ordering::Relaxed);
                log::trace!(
                    "Joining in-flight load of {} (version {})",
                    entry.path.display(),
                    in_flight.version
                );
                Plan::Wait(in_flight.receiver.clone())
            } else {
                Plan::Wait(self.start_load(&entry, &mut state, target))
            }
        };

        match plan {
            Plan::Hit(content) => Ok(content),
            Plan::Wait(receiver) => wait_for_outcome(receiver, &entry.path).await,
        }
    }

    /// Record a change to `path` exactly as its watch callback would.
    ///
    /// Returns false if the path has no cache entry.
    pub fn notify_changed(&self, path: &Path) -> bool {
        let key = normalize_path(path);
        let entries = self.entries.lock();
        match entries.get(&key) {
            Some(entry) => {
                entry.last_modified.fetch_add(1, Ordering::AcqRel);
                true
            }
            None => false,
        }
    }

    /// Close every watch and drop all entries.
    pub fn clear(&self) {
        let drained: Vec<Arc<CacheEntry>> = self.entries.lock().drain().map(|(_, e)| e).collect();
        let count = drained.len();
        for entry in drained {
            if let Some(handle) = entry.watch.lock().take() {
                handle.close();
            }
        }
        log::trace!("Cleared versioned cache ({} entries)", count);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.lock().contains_key(&normalize_path(path))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(cached, caching, last_modified)` for `path`, if present.
    pub fn versions(&self, path: &Path) -> Option<(u64, u64, u64)> {
        let entry = self.entries.lock().get(&normalize_path(path)).cloned()?;
        let state = entry.state.lock();
        Some((
            state.cached,
            state.caching,
            entry.last_modified.load(Ordering::Acquire),
        ))
    }

    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.snapshot()
    }

    /// Find or create the entry for `path`. New entries register a watch.
    fn entry(&self, path: &Path) -> Arc<CacheEntry> {
        let key = normalize_path(path);
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(&key) {
            return entry.clone();
        }

        let entry = Arc::new(CacheEntry::new(key.clone()));
        let counter = entry.last_modified.clone();
        let on_change: WatchCallback = Arc::new(move |_: &Path| {
            counter.fetch_add(1, Ordering::AcqRel);
        });
        match self.watcher.watch(&key, on_change) {
            Ok(handle) => *entry.watch.lock() = Some(handle),
            Err(e) => log::warn!("Failed to watch {}: {}", key.display(), e),
        }
        entries.insert(key, entry.clone());
        entry
    }

    fn start_load(
        &self,
        entry: &Arc<CacheEntry>,
        state: &mut EntryState,
        target: u64,
    ) -> watch::Receiver<Option<LoadOutcome>> {
        let (sender, receiver) = watch::channel(None);
        state.caching = target;
        state.in_flight = Some(InFlight {
            version: target,
            receiver: receiver.clone(),
        });
        self.metrics.loads_started.fetch_add(1, Ordering::Relaxed);
        log::trace!("Loading {} for version {}", entry.path.display(), target);

        let loader = self.loader.clone();
        let metrics = self.metrics.clone();
        let entry = entry.clone();
        tokio::spawn(async move {
            let result = loader.load(&entry.path).await;
            let outcome = entry.commit(target, result, &metrics);
            let _ = sender.send(Some(outcome));
        });

        receiver
    }
}

async fn wait_for_outcome(
    mut receiver: watch::Receiver<Option<LoadOutcome>>,
    path: &Path,
) -> Result<Arc<str>, CacheError> {
    loop {
        let current = receiver.borrow_and_update().clone();
        if let Some(outcome) = current {
            return outcome;
        }
        if receiver.changed().await.is_err() {
            // The loading task ended without reporting (panicked or runtime shut down)
            return Err(CacheError::LoadAborted {
                path: path.to_path_buf(),
            });
        }
    }
}

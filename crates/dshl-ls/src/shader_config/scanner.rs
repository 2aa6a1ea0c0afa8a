//
// shader_config/scanner.rs
//
// Configuration discovery scanner
//
// Every scan allocates a generation id when it starts and builds its result
// privately. At the end it publishes only if its id is still the latest one
// issued; otherwise a newer scan exists and the result is dropped. Scans never
// cancel each other, they only race to publish.
//

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};

use super::parse::{extract_inc_dirs, extract_includes};
use super::table::{game_key, IncludeDirectoryTable};
use crate::config::{
    ScanMode, CONFIG_EXTENSION, GAME_SHADERS_SUBPATH, SAMPLES_DIR, SHADER_CONFIG_PREFIX,
};
use crate::path_util::{join_normalized, normalize_path};
use crate::versioned_cache::ContentLoader;
use crate::watch::{FileWatcher, WatchCallback, WatchHandle};

/// Why a rescan was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RescanReason {
    Startup,
    ConfigurationChanged,
    /// A watched config file changed
    FileChanged(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RescanRequest {
    pub mode: ScanMode,
    pub reason: RescanReason,
}

impl RescanRequest {
    pub fn new(mode: ScanMode, reason: RescanReason) -> Self {
        Self { mode, reason }
    }

    /// Fold a later request into this one: the later mode wins, and a file
    /// change anywhere in the batch is kept.
    pub fn merge(self, later: RescanRequest) -> RescanRequest {
        let reason = match (&self.reason, &later.reason) {
            (_, RescanReason::FileChanged(_)) => later.reason,
            (RescanReason::FileChanged(_), _) => self.reason,
            _ => later.reason,
        };
        RescanRequest {
            mode: later.mode,
            reason,
        }
    }
}

/// Result of one scan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    Published { generation: u64 },
    /// A newer scan was started before this one finished
    Superseded { generation: u64, latest: u64 },
}

impl ScanOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, ScanOutcome::Published { .. })
    }
}

// ============================================================================
// ConfigScanner
// ============================================================================

/// Watches and identity of one scan while it runs.
///
/// Handles stay private to the run and are installed as the scanner's live
/// watches only when the run publishes. A superseded run closes its own.
struct ScanRun {
    generation: u64,
    mode: ScanMode,
    watches: HashMap<PathBuf, WatchHandle>,
}

impl ScanRun {
    fn new(generation: u64, mode: ScanMode) -> Self {
        Self {
            generation,
            mode,
            watches: HashMap::new(),
        }
    }
}

fn release_watches(watches: HashMap<PathBuf, WatchHandle>) -> usize {
    let count = watches.len();
    for (_, handle) in watches {
        handle.close();
    }
    count
}

/// Discovers shader configs and publishes include directory tables.
///
/// Published values are immutable snapshots swapped whole; readers clone the
/// `Arc` and never observe a partially built table.
pub struct ConfigScanner {
    workspace_root: PathBuf,
    generation: AtomicU64,
    table: RwLock<Arc<IncludeDirectoryTable>>,
    override_dirs: RwLock<Arc<Vec<PathBuf>>>,
    published: watch::Sender<u64>,
    /// Config file text, read once per path until invalidated
    contents: DashMap<PathBuf, Arc<str>>,
    /// Bumped by every invalidation; reads started before a bump are not cached
    contents_epoch: Mutex<u64>,
    loader: Arc<dyn ContentLoader>,
    watcher: Arc<dyn FileWatcher>,
    /// Watches of the last published scan
    watches: Mutex<HashMap<PathBuf, WatchHandle>>,
    rescan_tx: mpsc::UnboundedSender<RescanRequest>,
    max_include_depth: usize,
}

impl ConfigScanner {
    /// Create a scanner and the receiving end of its rescan queue.
    pub fn new(
        workspace_root: PathBuf,
        loader: Arc<dyn ContentLoader>,
        watcher: Arc<dyn FileWatcher>,
        max_include_depth: usize,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<RescanRequest>) {
        let (rescan_tx, rescan_rx) = mpsc::unbounded_channel();
        let (published, _) = watch::channel(0);
        let scanner = Arc::new(Self {
            workspace_root: normalize_path(&workspace_root),
            generation: AtomicU64::new(0),
            table: RwLock::new(Arc::new(IncludeDirectoryTable::new())),
            override_dirs: RwLock::new(Arc::new(Vec::new())),
            published,
            contents: DashMap::new(),
            contents_epoch: Mutex::new(0),
            loader,
            watcher,
            watches: Mutex::new(HashMap::new()),
            rescan_tx,
            max_include_depth,
        });
        (scanner, rescan_rx)
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Latest published include directory table.
    pub fn table(&self) -> Arc<IncludeDirectoryTable> {
        self.table.read().clone()
    }

    /// Latest published override include directory list.
    pub fn override_dirs(&self) -> Arc<Vec<PathBuf>> {
        self.override_dirs.read().clone()
    }

    /// Receiver of the generation id of each successful publish.
    pub fn subscribe_published(&self) -> watch::Receiver<u64> {
        self.published.subscribe()
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Issue the next generation id.
    pub fn begin_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Enqueue a rescan for the rescan worker.
    pub fn request_rescan(&self, request: RescanRequest) {
        if self.rescan_tx.send(request).is_err() {
            log::trace!("Rescan queue closed; dropping request");
        }
    }

    /// Scan the workspace for game folders and publish the resulting table.
    pub async fn scan_discovered(&self) -> ScanOutcome {
        let generation = self.begin_generation();
        self.run_discovered(generation).await
    }

    /// Parse a single config file and publish its flat include directory list.
    pub async fn scan_override(&self, path: &Path) -> ScanOutcome {
        let generation = self.begin_generation();
        self.run_override(generation, path).await
    }

    /// Run a scan under an already-issued generation id.
    pub async fn run(&self, generation: u64, mode: &ScanMode) -> ScanOutcome {
        match mode {
            ScanMode::Discovered => self.run_discovered(generation).await,
            ScanMode::Override(path) => self.run_override(generation, path).await,
        }
    }

    /// Release the watches of the last published scan.
    pub fn close_watches(&self) -> usize {
        let drained = std::mem::take(&mut *self.watches.lock());
        let count = release_watches(drained);
        log::trace!("Closed {} config watches", count);
        count
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.watches.lock().keys().cloned().collect()
    }

    /// Forget all cached config text.
    ///
    /// Reads already in flight finish for their own scan but are not cached.
    pub fn invalidate_contents(&self) {
        let mut epoch = self.contents_epoch.lock();
        *epoch += 1;
        self.contents.clear();
    }

    async fn run_discovered(&self, generation: u64) -> ScanOutcome {
        log::trace!(
            "Starting discovery scan (generation {}) in {}",
            generation,
            self.workspace_root.display()
        );
        let mut run = ScanRun::new(generation, ScanMode::Discovered);
        let mut table = IncludeDirectoryTable::new();

        for folder in discover_game_folders(&self.workspace_root).await {
            let key = game_key(&self.workspace_root, &folder);
            let shaders_dir = folder.join(GAME_SHADERS_SUBPATH);
            let configs = list_shader_configs(&shaders_dir).await;
            log::trace!(
                "Game folder '{}' has {} shader configs",
                key,
                configs.len()
            );
            table.insert_game(key.clone(), folder.clone());

            for (name, config_path) in configs {
                let mut dirs = Vec::new();
                self.parse_config(&mut run, &config_path, &mut dirs).await;
                if let Some(slot) = table.config_dirs_mut(&key, &name) {
                    *slot = dirs;
                }
            }
        }

        let config_count: usize = table.games().map(|(_, g)| g.configs.len()).sum();
        let summary = format!(
            "include directory table: {} games, {} shader configs",
            table.len(),
            config_count
        );
        self.publish(run, &summary, || *self.table.write() = Arc::new(table))
    }

    async fn run_override(&self, generation: u64, path: &Path) -> ScanOutcome {
        let path = if path.is_absolute() {
            normalize_path(path)
        } else {
            normalize_path(&self.workspace_root.join(path))
        };
        log::trace!(
            "Starting override scan (generation {}) of {}",
            generation,
            path.display()
        );

        let mut run = ScanRun::new(generation, ScanMode::Override(path.clone()));
        let mut dirs = Vec::new();
        self.parse_config(&mut run, &path, &mut dirs).await;
        let summary = format!("override include directories: {} entries", dirs.len());
        self.publish(run, &summary, || *self.override_dirs.write() = Arc::new(dirs))
    }

    /// Expand `original` and every config it includes, appending include
    /// directories to `results` in discovery order.
    ///
    /// `incDir` values resolve against the directory of `original`;
    /// `include` targets resolve against the directory of the file naming them.
    async fn parse_config(&self, run: &mut ScanRun, original: &Path, results: &mut Vec<PathBuf>) {
        let original = normalize_path(original);
        let original_dir = original.parent().map(Path::to_path_buf).unwrap_or_default();

        // Depth-first, pre-order: a file's own incDirs come before its includes
        let mut stack: Vec<(PathBuf, Vec<PathBuf>)> = vec![(original.clone(), Vec::new())];

        while let Some((path, chain)) = stack.pop() {
            self.ensure_watched(run, &path);

            let Some(content) = self.read_config(run.generation, &path).await else {
                continue;
            };

            for value in extract_inc_dirs(&content) {
                results.push(join_normalized(&original_dir, value));
            }

            let includes = extract_includes(&content);
            if includes.is_empty() {
                continue;
            }
            if chain.len() >= self.max_include_depth {
                log::warn!(
                    "Config include depth {} exceeded at {}; not following its includes",
                    self.max_include_depth,
                    path.display()
                );
                continue;
            }

            let here = path.parent().map(Path::to_path_buf).unwrap_or_default();
            let mut chain = chain;
            chain.push(path.clone());

            let children: Vec<PathBuf> = includes
                .iter()
                .map(|target| join_normalized(&here, target))
                .filter(|child| {
                    if chain.contains(child) {
                        log::warn!(
                            "Config include cycle: {} includes {}",
                            path.display(),
                            child.display()
                        );
                        false
                    } else {
                        true
                    }
                })
                .collect();

            for child in children.into_iter().rev() {
                stack.push((child, chain.clone()));
            }
        }
    }

    async fn read_config(&self, generation: u64, path: &Path) -> Option<Arc<str>> {
        if let Some(content) = self.contents.get(path).map(|c| c.value().clone()) {
            return Some(content);
        }

        let epoch = *self.contents_epoch.lock();
        match self.loader.load(path).await {
            Ok(content) => {
                let current = self.contents_epoch.lock();
                if *current == epoch && generation == self.current_generation() {
                    self.contents.insert(path.to_path_buf(), content.clone());
                } else {
                    log::trace!("Not caching stale read of {}", path.display());
                }
                Some(content)
            }
            Err(e) => {
                log::trace!("Config file contributes nothing: {}", e);
                None
            }
        }
    }

    fn ensure_watched(&self, run: &mut ScanRun, path: &Path) {
        if run.watches.contains_key(path) {
            return;
        }

        let tx = self.rescan_tx.clone();
        let mode = run.mode.clone();
        let on_change: WatchCallback = Arc::new(move |changed: &Path| {
            log::trace!("Config file changed: {}", changed.display());
            let _ = tx.send(RescanRequest::new(
                mode.clone(),
                RescanReason::FileChanged(changed.to_path_buf()),
            ));
        });

        match self.watcher.watch(path, on_change) {
            Ok(handle) => {
                run.watches.insert(path.to_path_buf(), handle);
            }
            Err(e) => log::trace!("Could not watch config {}: {}", path.display(), e),
        }
    }

    /// Publish a finished run if it is still the latest generation.
    ///
    /// The generation check, the value swap and the watch swap all happen
    /// under the watch lock, so publishes are serialized and a stale run
    /// can never install its watches.
    fn publish(&self, run: ScanRun, summary: &str, commit: impl FnOnce()) -> ScanOutcome {
        let ScanRun {
            generation,
            mode,
            watches,
        } = run;

        let mut live = self.watches.lock();
        let latest = self.current_generation();
        debug_assert!(generation <= latest, "generation counter went backwards");
        if generation != latest {
            drop(live);
            let closed = release_watches(watches);
            log::trace!(
                "Discarding {:?} scan {} (latest is {}); closed {} watches",
                mode,
                generation,
                latest,
                closed
            );
            return ScanOutcome::Superseded { generation, latest };
        }

        commit();
        let replaced = std::mem::replace(&mut *live, watches);
        drop(live);
        release_watches(replaced);

        log::info!("Published {} (generation {})", summary, generation);
        self.published.send_replace(generation);
        ScanOutcome::Published { generation }
    }
}

// ============================================================================
// Directory helpers
// ============================================================================

/// Direct subdirectories of `dir`, sorted by name. Unreadable dirs yield nothing.
async fn subdirectories(dir: &Path) -> Vec<PathBuf> {
    let mut result = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return result;
    };
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let path = entry.path();
                let is_directory = match entry.file_type().await {
                    Ok(ft) if ft.is_symlink() => is_dir(&path).await,
                    Ok(ft) => ft.is_dir(),
                    Err(_) => is_dir(&path).await,
                };
                if is_directory {
                    result.push(path);
                }
            }
            Ok(None) => break,
            Err(e) => {
                log::trace!("Failed to read entry in {}: {}", dir.display(), e);
                break;
            }
        }
    }
    result.sort();
    result
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// Game folders: root children (then `samples/` children) containing `prog/shaders`.
pub async fn discover_game_folders(root: &Path) -> Vec<PathBuf> {
    let mut candidates = subdirectories(root).await;
    let samples = root.join(SAMPLES_DIR);
    if is_dir(&samples).await {
        candidates.extend(subdirectories(&samples).await);
    }

    let mut games = Vec::new();
    for candidate in candidates {
        if is_dir(&candidate.join(GAME_SHADERS_SUBPATH)).await {
            games.push(candidate);
        }
    }
    games
}

/// `shaders_*.blk` files in `shaders_dir` as `(file name, path)`, sorted by name.
pub async fn list_shader_configs(shaders_dir: &Path) -> Vec<(String, PathBuf)> {
    let mut configs = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(shaders_dir).await else {
        return configs;
    };
    let suffix = format!(".{}", CONFIG_EXTENSION);
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(SHADER_CONFIG_PREFIX) || !name.ends_with(&suffix) {
            continue;
        }
        let path = entry.path();
        let is_file = match entry.file_type().await {
            Ok(ft) if !ft.is_symlink() => ft.is_file(),
            _ => tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
        };
        if is_file {
            configs.push((name, normalize_path(&path)));
        }
    }
    configs.sort_by(|a, b| a.0.cmp(&b.0));
    configs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixture_workspace::ShaderWorkspace;
    use crate::versioned_cache::{CacheError, DiskLoader};
    use crate::watch::NotificationWatcher;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::oneshot;

    fn scanner_for(
        root: &Path,
        watcher: &NotificationWatcher,
    ) -> (Arc<ConfigScanner>, mpsc::UnboundedReceiver<RescanRequest>) {
        ConfigScanner::new(
            root.to_path_buf(),
            Arc::new(DiskLoader),
            Arc::new(watcher.clone()),
            32,
        )
    }

    #[test]
    fn test_rescan_request_merge_keeps_file_change() {
        let a = RescanRequest::new(
            ScanMode::Discovered,
            RescanReason::FileChanged(PathBuf::from("/a.blk")),
        );
        let b = RescanRequest::new(ScanMode::Discovered, RescanReason::ConfigurationChanged);
        let merged = a.clone().merge(b.clone());
        assert_eq!(merged.reason, RescanReason::FileChanged(PathBuf::from("/a.blk")));

        let c = RescanRequest::new(
            ScanMode::Override(PathBuf::from("/o.blk")),
            RescanReason::Startup,
        );
        let merged = b.merge(c);
        assert_eq!(merged.mode, ScanMode::Override(PathBuf::from("/o.blk")));
        assert_eq!(merged.reason, RescanReason::Startup);
    }

    #[tokio::test]
    async fn test_discovers_games_and_samples() {
        let ws = ShaderWorkspace::new();
        ws.add_config("gameA", "shaders_dx12.blk", r#"incDir:t="../shaders_common""#);
        ws.add_config("gameA", "shaders_vulkan.blk", r#"incDir:t="../vk""#);
        ws.add_config("samples/demo", "shaders_dx11.blk", r#"incDir:t="inc""#);
        ws.add_file("notAGame/readme.txt", "");
        ws.add_file("gameA/prog/shaders/other.blk", r#"incDir:t="ignored""#);

        let watcher = NotificationWatcher::new();
        let (scanner, _rx) = scanner_for(ws.root(), &watcher);
        assert!(scanner.scan_discovered().await.is_published());

        let table = scanner.table();
        let keys: Vec<&str> = table.games().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["gameA", "samples/demo"]);

        let (_, game_a) = table.find_game("gameA").unwrap();
        let names: Vec<&str> = game_a.config_names().collect();
        assert_eq!(names, vec!["shaders_dx12.blk", "shaders_vulkan.blk"]);
        assert_eq!(
            game_a.include_dirs("shaders_dx12.blk").unwrap(),
            &[ws.path("gameA/prog/shaders_common")]
        );

        let (_, demo) = table.find_game("demo").unwrap();
        assert_eq!(
            demo.include_dirs("shaders_dx11.blk").unwrap(),
            &[ws.path("samples/demo/prog/shaders/inc")]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_game_folder_is_discovered() {
        let ws = ShaderWorkspace::new();
        ws.add_config("real/gameA", "shaders_dx12.blk", r#"incDir:t="inc""#);
        ws.add_file("elsewhere/shaders_vulkan.blk", r#"incDir:t="vk""#);
        std::os::unix::fs::symlink(ws.path("real/gameA"), ws.path("linked")).unwrap();
        std::os::unix::fs::symlink(
            ws.path("elsewhere/shaders_vulkan.blk"),
            ws.path("real/gameA/prog/shaders/shaders_vulkan.blk"),
        )
        .unwrap();

        let games = discover_game_folders(ws.root()).await;
        assert_eq!(games, vec![ws.path("linked")]);

        let configs = list_shader_configs(&ws.path("linked/prog/shaders")).await;
        let names: Vec<&str> = configs.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["shaders_dx12.blk", "shaders_vulkan.blk"]);
    }

    #[tokio::test]
    async fn test_nested_include_contributes_to_original_config() {
        let ws = ShaderWorkspace::new();
        ws.add_config(
            "gameA",
            "shaders_dx12.blk",
            r#"incDir:t="first"
               include "common/base.blk"
               incDir:t="second""#,
        );
        // incDir inside the nested file resolves against the ORIGINAL config's directory
        ws.add_file(
            "gameA/prog/shaders/common/base.blk",
            r#"incDir:t="../shaders_common"
               include "deeper.blk""#,
        );
        // include targets resolve against the file naming them
        ws.add_file("gameA/prog/shaders/common/deeper.blk", r#"incDir:t="deep""#);

        let watcher = NotificationWatcher::new();
        let (scanner, _rx) = scanner_for(ws.root(), &watcher);
        scanner.scan_discovered().await;

        let table = scanner.table();
        let (_, game) = table.find_game("gameA").unwrap();
        assert_eq!(game.configs.len(), 1);
        assert_eq!(
            game.include_dirs("shaders_dx12.blk").unwrap(),
            &[
                ws.path("gameA/prog/shaders/first"),
                ws.path("gameA/prog/shaders/second"),
                ws.path("gameA/prog/shaders_common"),
                ws.path("gameA/prog/shaders/deep"),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_include_contributes_nothing() {
        let ws = ShaderWorkspace::new();
        ws.add_config(
            "gameA",
            "shaders_dx12.blk",
            r#"include "missing.blk"
               incDir:t="kept""#,
        );

        let watcher = NotificationWatcher::new();
        let (scanner, _rx) = scanner_for(ws.root(), &watcher);
        assert!(scanner.scan_discovered().await.is_published());

        let table = scanner.table();
        let (_, game) = table.find_game("gameA").unwrap();
        assert_eq!(
            game.include_dirs("shaders_dx12.blk").unwrap(),
            &[ws.path("gameA/prog/shaders/kept")]
        );
        // The missing file is still watched so creating it triggers a rescan
        assert!(watcher.is_watched(&ws.path("gameA/prog/shaders/missing.blk")));
    }

    #[tokio::test]
    async fn test_include_cycle_is_broken() {
        let ws = ShaderWorkspace::new();
        ws.add_config(
            "gameA",
            "shaders_dx12.blk",
            r#"incDir:t="a" include "loop.blk""#,
        );
        ws.add_file(
            "gameA/prog/shaders/loop.blk",
            r#"incDir:t="b" include "shaders_dx12.blk""#,
        );

        let watcher = NotificationWatcher::new();
        let (scanner, _rx) = scanner_for(ws.root(), &watcher);
        scanner.scan_discovered().await;

        let table = scanner.table();
        let (_, game) = table.find_game("gameA").unwrap();
        assert_eq!(
            game.include_dirs("shaders_dx12.blk").unwrap(),
            &[ws.path("gameA/prog/shaders/a"), ws.path("gameA/prog/shaders/b")]
        );
    }

    #[tokio::test]
    async fn test_diamond_includes_keep_duplicates() {
        let ws = ShaderWorkspace::new();
        ws.add_config(
            "gameA",
            "shaders_dx12.blk",
            r#"include "left.blk" include "right.blk""#,
        );
        ws.add_file("gameA/prog/shaders/left.blk", r#"include "shared.blk""#);
        ws.add_file("gameA/prog/shaders/right.blk", r#"include "shared.blk""#);
        ws.add_file("gameA/prog/shaders/shared.blk", r#"incDir:t="s""#);

        let watcher = NotificationWatcher::new();
        let (scanner, _rx) = scanner_for(ws.root(), &watcher);
        scanner.scan_discovered().await;

        let table = scanner.table();
        let (_, game) = table.find_game("gameA").unwrap();
        let s = ws.path("gameA/prog/shaders/s");
        assert_eq!(game.include_dirs("shaders_dx12.blk").unwrap(), &[s.clone(), s]);
    }

    #[tokio::test]
    async fn test_include_depth_limit() {
        let ws = ShaderWorkspace::new();
        ws.add_config("gameA", "shaders_dx12.blk", r#"incDir:t="d0" include "l1.blk""#);
        ws.add_file("gameA/prog/shaders/l1.blk", r#"incDir:t="d1" include "l2.blk""#);
        ws.add_file("gameA/prog/shaders/l2.blk", r#"incDir:t="d2""#);

        let watcher = NotificationWatcher::new();
        let (scanner, _rx) = ConfigScanner::new(
            ws.root().to_path_buf(),
            Arc::new(DiskLoader),
            Arc::new(watcher.clone()),
            1,
        );
        scanner.scan_discovered().await;

        let table = scanner.table();
        let (_, game) = table.find_game("gameA").unwrap();
        assert_eq!(
            game.include_dirs("shaders_dx12.blk").unwrap(),
            &[ws.path("gameA/prog/shaders/d0"), ws.path("gameA/prog/shaders/d1")]
        );
    }

    #[tokio::test]
    async fn test_override_scan_populates_flat_list() {
        let ws = ShaderWorkspace::new();
        ws.add_file(
            "custom/shaders_tool.blk",
            r#"incDir:t="inc" include "sub/more.blk""#,
        );
        ws.add_file("custom/sub/more.blk", r#"incDir:t="../more_inc""#);

        let watcher = NotificationWatcher::new();
        let (scanner, _rx) = scanner_for(ws.root(), &watcher);
        let outcome = scanner.scan_override(Path::new("custom/shaders_tool.blk")).await;
        assert!(outcome.is_published());

        assert_eq!(
            scanner.override_dirs().as_slice(),
            &[ws.path("custom/inc"), ws.path("more_inc")]
        );
        assert!(scanner.table().is_empty());
    }

    #[tokio::test]
    async fn test_watch_event_enqueues_rescan_in_matching_mode() {
        let ws = ShaderWorkspace::new();
        let config = ws.add_config("gameA", "shaders_dx12.blk", r#"incDir:t="a""#);

        let watcher = NotificationWatcher::new();
        let (scanner, mut rx) = scanner_for(ws.root(), &watcher);
        scanner.scan_discovered().await;
        assert_eq!(scanner.watched_paths(), vec![config.clone()]);

        assert_eq!(watcher.notify_changed(&config), 1);
        let request = rx.try_recv().unwrap();
        assert_eq!(request.mode, ScanMode::Discovered);
        assert_eq!(request.reason, RescanReason::FileChanged(config.clone()));

        scanner.scan_override(&config).await;
        // The override scan's watch replaces the discovery one
        assert_eq!(watcher.active_watches(), 1);
        assert_eq!(watcher.notify_changed(&config), 1);
        assert_eq!(rx.try_recv().unwrap().mode, ScanMode::Override(config.clone()));

        assert_eq!(scanner.close_watches(), 1);
        assert_eq!(watcher.active_watches(), 0);
    }

    #[tokio::test]
    async fn test_content_cache_holds_until_invalidated() {
        let ws = ShaderWorkspace::new();
        let config = ws.add_config("gameA", "shaders_dx12.blk", r#"incDir:t="old""#);

        let watcher = NotificationWatcher::new();
        let (scanner, _rx) = scanner_for(ws.root(), &watcher);
        scanner.scan_discovered().await;

        std::fs::write(&config, r#"incDir:t="new""#).unwrap();
        scanner.scan_discovered().await;
        let dirs = |s: &ConfigScanner| {
            s.table()
                .find_game("gameA")
                .and_then(|(_, g)| g.include_dirs("shaders_dx12.blk").map(<[_]>::to_vec))
                .unwrap()
        };
        assert_eq!(dirs(scanner.as_ref()), vec![ws.path("gameA/prog/shaders/old")]);

        scanner.invalidate_contents();
        scanner.scan_discovered().await;
        assert_eq!(dirs(scanner.as_ref()), vec![ws.path("gameA/prog/shaders/new")]);
    }

    #[tokio::test]
    async fn test_empty_workspace_publishes_empty_table() {
        let ws = ShaderWorkspace::new();
        let watcher = NotificationWatcher::new();
        let (scanner, _rx) = scanner_for(ws.root(), &watcher);
        let mut published = scanner.subscribe_published();

        assert_eq!(
            scanner.scan_discovered().await,
            ScanOutcome::Published { generation: 1 }
        );
        assert!(scanner.table().is_empty());
        assert!(published.has_changed().unwrap());
        assert_eq!(*published.borrow_and_update(), 1);
    }

    /// Loader whose first call blocks until released and returns scripted text.
    struct ScriptedLoader {
        responses: Mutex<VecDeque<(String, Option<oneshot::Receiver<()>>)>>,
        calls: AtomicU64,
    }

    #[async_trait]
    impl ContentLoader for ScriptedLoader {
        async fn load(&self, _path: &Path) -> Result<Arc<str>, CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.responses.lock().pop_front();
            let (text, gate) = next.unwrap_or_default();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            Ok(Arc::from(text))
        }
    }

    #[tokio::test]
    async fn test_older_scan_finishing_last_does_not_publish() {
        let ws = ShaderWorkspace::new();
        ws.add_config("gameA", "shaders_dx12.blk", "");

        let (release_a, gate_a) = oneshot::channel();
        let loader = Arc::new(ScriptedLoader {
            responses: Mutex::new(VecDeque::from(vec![
                (r#"incDir:t="from_a""#.to_string(), Some(gate_a)),
                (r#"incDir:t="from_b""#.to_string(), None),
            ])),
            calls: AtomicU64::new(0),
        });
        let watcher = NotificationWatcher::new();
        let (scanner, _rx) = ConfigScanner::new(
            ws.root().to_path_buf(),
            loader.clone(),
            Arc::new(watcher.clone()),
            32,
        );

        // Scan A starts first and blocks reading its config
        let scan_a = {
            let scanner = scanner.clone();
            tokio::spawn(async move { scanner.scan_discovered().await })
        };
        while loader.calls.load(Ordering::SeqCst) < 1 {
            tokio::task::yield_now().await;
        }

        // Scan B starts later and completes first
        let outcome_b = scanner.scan_discovered().await;
        assert_eq!(outcome_b, ScanOutcome::Published { generation: 2 });

        release_a.send(()).unwrap();
        let outcome_a = scan_a.await.unwrap();
        assert_eq!(
            outcome_a,
            ScanOutcome::Superseded {
                generation: 1,
                latest: 2
            }
        );

        let table = scanner.table();
        let (_, game) = table.find_game("gameA").unwrap();
        assert_eq!(
            game.include_dirs("shaders_dx12.blk").unwrap(),
            &[ws.path("gameA/prog/shaders/from_b")]
        );
        // Only the published scan's watch survives
        assert_eq!(watcher.active_watches(), 1);

        // The superseded read did not replace the cached text
        scanner.scan_discovered().await;
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
        let table = scanner.table();
        let (_, game) = table.find_game("gameA").unwrap();
        assert_eq!(
            game.include_dirs("shaders_dx12.blk").unwrap(),
            &[ws.path("gameA/prog/shaders/from_b")]
        );
    }

    #[tokio::test]
    async fn test_read_across_invalidation_is_not_cached() {
        let ws = ShaderWorkspace::new();
        ws.add_config("gameA", "shaders_dx12.blk", "");

        let (release, gate) = oneshot::channel();
        let loader = Arc::new(ScriptedLoader {
            responses: Mutex::new(VecDeque::from(vec![
                (r#"incDir:t="old""#.to_string(), Some(gate)),
                (r#"incDir:t="new""#.to_string(), None),
            ])),
            calls: AtomicU64::new(0),
        });
        let watcher = NotificationWatcher::new();
        let (scanner, _rx) = ConfigScanner::new(
            ws.root().to_path_buf(),
            loader.clone(),
            Arc::new(watcher),
            32,
        );

        let generation = scanner.begin_generation();
        let in_flight = {
            let scanner = scanner.clone();
            tokio::spawn(async move { scanner.run(generation, &ScanMode::Discovered).await })
        };
        while loader.calls.load(Ordering::SeqCst) < 1 {
            tokio::task::yield_now().await;
        }

        // The file changes while the read is in flight
        scanner.invalidate_contents();
        let replacement = scanner.begin_generation();
        release.send(()).unwrap();
        assert!(!in_flight.await.unwrap().is_published());

        assert!(scanner.run(replacement, &ScanMode::Discovered).await.is_published());
        let table = scanner.table();
        let (_, game) = table.find_game("gameA").unwrap();
        assert_eq!(
            game.include_dirs("shaders_dx12.blk").unwrap(),
            &[ws.path("gameA/prog/shaders/new")]
        );
    }
}

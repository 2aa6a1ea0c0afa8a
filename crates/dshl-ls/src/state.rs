//
// state.rs
//
// Shared server state
//

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tower_lsp::lsp_types::Url;

use crate::config::{LaunchContext, ServerConfig, WatcherKind};
use crate::include_resolver::IncludeResolver;
use crate::selector::unknown_game;
use crate::shader_config::{ConfigScanner, RescanWorker};
use crate::versioned_cache::VersionedCache;
use crate::watch::{FileWatcher, NativeWatcher, NotificationWatcher};

/// An open document. Its text is authoritative over the file on disk.
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    pub version: Option<i32>,
}

impl Document {
    pub fn new(text: String, version: Option<i32>) -> Self {
        Self { text, version }
    }
}

pub struct WorldState {
    pub workspace_root: Option<PathBuf>,
    pub documents: HashMap<Url, Document>,
    pub launch_context: LaunchContext,
    pub server_config: ServerConfig,
    /// Fed by `workspace/didChangeWatchedFiles`; always present
    pub client_watcher: NotificationWatcher,
    /// Watch service handed to the cache and scanner
    pub watcher: Arc<dyn FileWatcher>,
    pub cache: Arc<VersionedCache>,
    pub scanner: Option<Arc<ConfigScanner>>,
    pub rescan_worker: Option<RescanWorker>,
}

impl Default for WorldState {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl WorldState {
    pub fn new(server_config: ServerConfig) -> Self {
        let client_watcher = NotificationWatcher::new();
        let watcher = select_watcher(server_config.watcher, &client_watcher);
        Self {
            workspace_root: None,
            documents: HashMap::new(),
            launch_context: LaunchContext::default(),
            server_config,
            client_watcher,
            cache: Arc::new(VersionedCache::with_disk(watcher.clone())),
            watcher,
            scanner: None,
            rescan_worker: None,
        }
    }

    /// Replace server settings. The watch service is rebuilt when its kind
    /// changes, which also drops every cached file.
    pub fn apply_server_config(&mut self, config: ServerConfig) {
        if config.watcher != self.server_config.watcher {
            self.cache.clear();
            self.watcher = select_watcher(config.watcher, &self.client_watcher);
            self.cache = Arc::new(VersionedCache::with_disk(self.watcher.clone()));
        }
        self.server_config = config;
    }

    /// Replace the launch context. Returns true when the scan mode changed.
    ///
    /// An unknown game is reported here once rather than on every request.
    pub fn set_launch_context(&mut self, context: LaunchContext) -> bool {
        let mode_changed = self.launch_context.scan_mode_changed(&context);
        self.launch_context = context;
        if let Some(scanner) = &self.scanner {
            let table = scanner.table();
            if let Some(game) = unknown_game(&self.launch_context, &table) {
                log::warn!("Game '{}' was not found in the workspace", game);
            }
        }
        mode_changed
    }

    pub fn open_document(&mut self, uri: Url, text: String, version: Option<i32>) {
        self.documents.insert(uri, Document::new(text, version));
    }

    /// Full-text change of an open document.
    pub fn update_document(&mut self, uri: &Url, text: String, version: Option<i32>) {
        match self.documents.get_mut(uri) {
            Some(doc) => {
                doc.text = text;
                doc.version = version;
            }
            None => {
                self.documents.insert(uri.clone(), Document::new(text, version));
            }
        }
    }

    pub fn close_document(&mut self, uri: &Url) {
        self.documents.remove(uri);
    }

    /// Resolver over a snapshot of the latest published include directories.
    pub fn resolver(&self) -> IncludeResolver {
        match &self.scanner {
            Some(scanner) => {
                let table = scanner.table();
                let overrides = scanner.override_dirs();
                IncludeResolver::for_context(&self.launch_context, &table, &overrides)
            }
            None => IncludeResolver::default(),
        }
    }

    /// Text of `uri`: the open document if any, else the cached file content.
    pub async fn document_text(&self, uri: &Url) -> Option<String> {
        if let Some(doc) = self.documents.get(uri) {
            return Some(doc.text.clone());
        }
        let path = uri.to_file_path().ok()?;
        match self.cache.get(&path).await {
            Ok(text) => Some(text.to_string()),
            Err(e) => {
                log::trace!("No text for {}: {}", uri, e);
                None
            }
        }
    }

    /// Release cached files, scanner watches and the rescan worker.
    pub fn shutdown(&mut self) {
        self.cache.clear();
        if let Some(worker) = self.rescan_worker.take() {
            worker.shutdown();
        }
        if let Some(scanner) = &self.scanner {
            scanner.close_watches();
        }
    }

    pub fn workspace_root(&self) -> Option<&Path> {
        self.workspace_root.as_deref()
    }
}

fn select_watcher(kind: WatcherKind, client: &NotificationWatcher) -> Arc<dyn FileWatcher> {
    match kind {
        WatcherKind::Client => Arc::new(client.clone()),
        WatcherKind::Native => match NativeWatcher::new() {
            Ok(native) => Arc::new(native),
            Err(e) => {
                log::warn!(
                    "Native file watching unavailable ({}); relying on client notifications",
                    e
                );
                Arc::new(client.clone())
            }
        },
    }
}

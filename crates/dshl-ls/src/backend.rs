//
// backend.rs
//
// tower-lsp wiring for the include discovery core
//

use std::sync::Arc;

use tokio::sync::RwLock;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::Client;
use tower_lsp::LanguageServer;
use tower_lsp::LspService;
use tower_lsp::Server;

use crate::config::{parse_launch_context, parse_server_config, WatcherKind};
use crate::handlers::{self, Navigation};
use crate::shader_config::{ConfigScanner, RescanReason, RescanRequest, RescanWorker};
use crate::state::WorldState;
use crate::versioned_cache::DiskLoader;

/// Files whose changes matter when the client supplies watch events
const CLIENT_WATCH_GLOB: &str = "**/*.{blk,dshl,hlsl,hlsli}";

pub struct Backend {
    client: Client,
    state: Arc<RwLock<WorldState>>,
}

impl Backend {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            state: Arc::new(RwLock::new(WorldState::default())),
        }
    }

    async fn register_client_watchers(&self) {
        let options = DidChangeWatchedFilesRegistrationOptions {
            watchers: vec![FileSystemWatcher {
                glob_pattern: GlobPattern::String(CLIENT_WATCH_GLOB.to_string()),
                kind: None,
            }],
        };
        let register_options = match serde_json::to_value(options) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Failed to encode watcher registration: {}", e);
                return;
            }
        };
        let registration = Registration {
            id: String::from("dshl-watched-files"),
            method: String::from("workspace/didChangeWatchedFiles"),
            register_options: Some(register_options),
        };
        if let Err(e) = self.client.register_capability(vec![registration]).await {
            log::warn!("Client refused file watcher registration: {}", e);
        }
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        log::info!("Initializing dshl-ls");

        let mut state = self.state.write().await;

        let root = params
            .workspace_folders
            .as_ref()
            .and_then(|folders| folders.first())
            .map(|f| f.uri.clone())
            .or(params.root_uri);
        if let Some(root) = root {
            match root.to_file_path() {
                Ok(path) => {
                    log::info!("Workspace root: {}", path.display());
                    state.workspace_root = Some(path);
                }
                Err(()) => log::warn!("Workspace root is not a file path: {}", root),
            }
        }

        if let Some(options) = params.initialization_options.as_ref() {
            if let Some(config) = parse_server_config(options) {
                state.apply_server_config(config);
            }
            if let Some(context) = parse_launch_context(options) {
                state.set_launch_context(context);
            }
        }

        drop(state);

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::FULL,
                )),
                completion_provider: Some(CompletionOptions {
                    trigger_characters: Some(vec![
                        String::from("\""),
                        String::from("<"),
                        String::from("/"),
                    ]),
                    ..Default::default()
                }),
                definition_provider: Some(OneOf::Left(true)),
                document_link_provider: Some(DocumentLinkOptions {
                    resolve_provider: Some(false),
                    work_done_progress_options: Default::default(),
                }),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: String::from("dshl-ls"),
                version: Some(String::from(env!("CARGO_PKG_VERSION"))),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        log::info!("dshl-ls initialized");

        let (root, watcher, watcher_kind, max_depth, mode) = {
            let state = self.state.read().await;
            (
                state.workspace_root.clone(),
                state.watcher.clone(),
                state.server_config.watcher,
                state.server_config.max_config_include_depth,
                state.launch_context.scan_mode(),
            )
        };

        if watcher_kind == WatcherKind::Client {
            self.register_client_watchers().await;
        }

        let Some(root) = root else {
            log::warn!("No workspace folder; shader include directories are unavailable");
            return;
        };

        let (scanner, requests) =
            ConfigScanner::new(root, Arc::new(DiskLoader), watcher, max_depth);
        let worker = RescanWorker::spawn(scanner.clone(), requests);
        scanner.request_rescan(RescanRequest::new(mode, RescanReason::Startup));

        let mut state = self.state.write().await;
        state.scanner = Some(scanner);
        state.rescan_worker = Some(worker);
    }

    async fn shutdown(&self) -> Result<()> {
        log::info!("dshl-ls shutting down");
        self.state.write().await.shutdown();
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let doc = params.text_document;
        log::trace!("Opened {}", doc.uri);
        self.state
            .write()
            .await
            .open_document(doc.uri, doc.text, Some(doc.version));
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        // Full sync: the last change carries the whole text
        let Some(change) = params.content_changes.into_iter().last() else {
            return;
        };
        self.state.write().await.update_document(
            &params.text_document.uri,
            change.text,
            Some(params.text_document.version),
        );
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        self.state
            .write()
            .await
            .close_document(&params.text_document.uri);
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        log::trace!("Configuration changed");

        let new_context = parse_launch_context(&params.settings);
        let new_config = parse_server_config(&params.settings);
        if new_context.is_none() && new_config.is_none() {
            log::warn!("No 'dshl' settings in configuration change; keeping current configuration");
            return;
        }

        let mut state = self.state.write().await;

        if let Some(config) = new_config {
            if config.watcher != state.server_config.watcher
                || config.max_config_include_depth != state.server_config.max_config_include_depth
            {
                log::info!("Watcher and include depth settings take effect after a restart");
            }
            state.server_config.show_missing_include_warnings =
                config.show_missing_include_warnings;
        }

        if let Some(context) = new_context {
            if state.set_launch_context(context) {
                if let Some(scanner) = &state.scanner {
                    scanner.request_rescan(RescanRequest::new(
                        state.launch_context.scan_mode(),
                        RescanReason::ConfigurationChanged,
                    ));
                }
            }
        }
    }

    async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        log::trace!(
            "Received watched files change: {} changes",
            params.changes.len()
        );

        let state = self.state.read().await;
        for change in &params.changes {
            let Ok(path) = change.uri.to_file_path() else {
                continue;
            };
            // Registered callbacks include the cache's when it watches through the client
            if state.client_watcher.notify_changed(&path) == 0 {
                state.cache.notify_changed(&path);
            }
        }
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let (navigation, warn) = {
            let state = self.state.read().await;
            (
                handlers::goto_definition(
                    &state,
                    &params.text_document_position_params.text_document.uri,
                    params.text_document_position_params.position,
                )
                .await,
                state.server_config.show_missing_include_warnings,
            )
        };

        match navigation {
            Navigation::Target(location) => Ok(Some(GotoDefinitionResponse::Scalar(location))),
            Navigation::Unresolved(statement) => {
                log::warn!("Could not resolve include '{}'", statement.path);
                if warn {
                    self.client
                        .show_message(
                            MessageType::WARNING,
                            format!(
                                "Could not find the file {}, check your shader configuration",
                                statement.path
                            ),
                        )
                        .await;
                }
                Ok(None)
            }
            Navigation::NotAnInclude => Ok(None),
        }
    }

    async fn document_link(&self, params: DocumentLinkParams) -> Result<Option<Vec<DocumentLink>>> {
        let state = self.state.read().await;
        let links = handlers::document_links(&state, &params.text_document.uri).await;
        Ok(Some(links))
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let state = self.state.read().await;
        Ok(handlers::completion(
            &state,
            &params.text_document_position.text_document.uri,
            params.text_document_position.position,
        )
        .await)
    }
}

pub async fn start_lsp() -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::build(Backend::new).finish();
    Server::new(stdin, stdout, socket).serve(service).await;

    Ok(())
}

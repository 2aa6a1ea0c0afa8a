//
// include_resolver.rs
//
// Include statement resolution for navigation and path completion
//
// This module provides:
// 1. Target resolution: include statement -> one file on disk
// 2. Completion candidates: include statement + cursor -> directory entries
// 3. Conversion of candidates into LSP completion items
//

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tower_lsp::lsp_types::{
    Command, CompletionItem, CompletionItemKind, CompletionTextEdit, Position, Range, TextEdit,
};

use crate::config::{LaunchContext, ENGINE_EXTENSION, HLSL_EXTENSIONS};
use crate::path_util::{join_normalized, normalize_path, utf16_column_to_byte_offset};
use crate::selector::select_include_directories;
use crate::shader_config::IncludeDirectoryTable;

// ============================================================================
// Types
// ============================================================================

/// Include syntax, which decides search order and accepted extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IncludeKind {
    /// `#include "file.hlsl"`: local folder first, then include directories
    Quoted,
    /// `#include <file.hlsl>`: include directories only
    Angular,
    /// `include "file.dshl"`: engine-native include
    Engine,
}

impl IncludeKind {
    /// Whether a file named `name` is a valid target for this kind.
    pub fn accepts_file(&self, name: &str) -> bool {
        let Some(ext) = Path::new(name).extension().and_then(|e| e.to_str()) else {
            return false;
        };
        match self {
            IncludeKind::Engine => ext.eq_ignore_ascii_case(ENGINE_EXTENSION),
            IncludeKind::Quoted | IncludeKind::Angular => {
                HLSL_EXTENSIONS.iter().any(|h| ext.eq_ignore_ascii_case(h))
            }
        }
    }

    fn searches_locally(&self) -> bool {
        !matches!(self, IncludeKind::Angular)
    }
}

/// One include statement found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeStatement {
    /// Path text between the delimiters
    pub path: String,
    /// Absolute path of the document containing the statement
    pub originating_document: PathBuf,
    /// Range of the path text (UTF-16 columns)
    pub range: Range,
    pub kind: IncludeKind,
}

impl IncludeStatement {
    fn document_dir(&self) -> PathBuf {
        self.originating_document
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    fn document_name(&self) -> Option<&str> {
        self.originating_document.file_name().and_then(|n| n.to_str())
    }
}

/// A file system entry offered as a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionCandidate {
    pub name: String,
    pub path: PathBuf,
    pub is_directory: bool,
}

// ============================================================================
// Resolver
// ============================================================================

/// Resolves include statements against one ordered include directory list.
#[derive(Debug, Clone, Default)]
pub struct IncludeResolver {
    include_dirs: Vec<PathBuf>,
}

impl IncludeResolver {
    pub fn new(include_dirs: Vec<PathBuf>) -> Self {
        Self { include_dirs }
    }

    /// Resolver for the directories the selector picks for `context`.
    pub fn for_context(
        context: &LaunchContext,
        table: &IncludeDirectoryTable,
        override_dirs: &[PathBuf],
    ) -> Self {
        Self::new(select_include_directories(context, table, override_dirs))
    }

    pub fn include_dirs(&self) -> &[PathBuf] {
        &self.include_dirs
    }

    /// File the statement refers to, or `None` if nothing matches.
    pub async fn resolve_target(&self, statement: &IncludeStatement) -> Option<PathBuf> {
        if statement.path.is_empty() {
            return None;
        }

        if statement.kind.searches_locally() {
            let local = join_normalized(&statement.document_dir(), &statement.path);
            if local != normalize_path(&statement.originating_document) && is_file(&local).await {
                log::trace!("Resolved {} locally to {}", statement.path, local.display());
                return Some(local);
            }
        }

        for dir in &self.include_dirs {
            let candidate = join_normalized(dir, &statement.path);
            if is_file(&candidate).await {
                log::trace!(
                    "Resolved {} via include directory {}",
                    statement.path,
                    dir.display()
                );
                return Some(candidate);
            }
        }

        log::trace!(
            "Could not resolve include {} from {}",
            statement.path,
            statement.originating_document.display()
        );
        None
    }

    /// Completion candidates for the statement at `cursor`.
    ///
    /// Local entries come first (unless the include is angular), then each
    /// include directory in order. Names already offered are not repeated.
    pub async fn resolve_completions(
        &self,
        statement: &IncludeStatement,
        cursor: Position,
    ) -> Vec<CompletionCandidate> {
        let sub_path = completion_path(statement, cursor);
        let mut seen: HashSet<String> = HashSet::new();
        let mut result = Vec::new();

        let own_name = statement.document_name();
        let mut listed = Vec::new();
        if statement.kind.searches_locally() {
            listed.push(join_normalized(&statement.document_dir(), sub_path));
        }
        listed.extend(self.include_dirs.iter().map(|dir| join_normalized(dir, sub_path)));

        // The includer's own file name is never offered, wherever it is found
        for dir in listed {
            for entry in list_directory_entries(&dir).await {
                if Some(entry.name.as_str()) == own_name {
                    continue;
                }
                if accepts(statement.kind, &entry) && seen.insert(entry.name.clone()) {
                    result.push(entry);
                }
            }
        }

        result
    }
}

fn accepts(kind: IncludeKind, entry: &CompletionCandidate) -> bool {
    entry.is_directory || kind.accepts_file(&entry.name)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Directory part of the path text that completions should list.
///
/// On the statement's own line this is the text before the last separator
/// preceding the cursor; elsewhere it is the whole path text.
pub fn completion_path(statement: &IncludeStatement, cursor: Position) -> &str {
    let path = statement.path.as_str();
    if cursor.line != statement.range.start.line {
        return path;
    }

    let column = cursor.character.saturating_sub(statement.range.start.character);
    let typed = &path[..utf16_column_to_byte_offset(path, column)];
    match typed.rfind(['/', '\\']) {
        Some(idx) => &typed[..idx],
        None => "",
    }
}

/// Non-hidden entries of `dir`, directories first, then by name ignoring case.
/// Unreadable directories yield nothing.
async fn list_directory_entries(dir: &Path) -> Vec<CompletionCandidate> {
    let mut entries = Vec::new();
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) => {
            log::trace!("Failed to read directory {:?}: {}", dir, e);
            return entries;
        }
    };

    loop {
        let entry = match read_dir.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                log::trace!("Failed to read directory entry: {}", e);
                break;
            }
        };

        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }

        let path = entry.path();
        let is_directory = match entry.file_type().await {
            Ok(ft) if !ft.is_symlink() => ft.is_dir(),
            _ => tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false),
        };

        entries.push(CompletionCandidate {
            name,
            path,
            is_directory,
        });
    }

    entries.sort_by(|a, b| match (a.is_directory, b.is_directory) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });
    entries
}

// ============================================================================
// LSP conversion
// ============================================================================

/// Completion item replacing the path typed so far with `dir_prefix/name`.
///
/// Directories get a trailing `/` and re-trigger suggestions once accepted.
pub fn to_completion_item(
    candidate: &CompletionCandidate,
    dir_prefix: &str,
    path_start: Position,
    cursor: Position,
) -> CompletionItem {
    let prefix = dir_prefix.replace('\\', "/");
    let prefix = if prefix.is_empty() || prefix.ends_with('/') {
        prefix
    } else {
        format!("{}/", prefix)
    };
    let insert_text = if candidate.is_directory {
        format!("{}{}/", prefix, candidate.name)
    } else {
        format!("{}{}", prefix, candidate.name)
    };

    let command = candidate.is_directory.then(|| Command {
        title: String::from("Trigger Suggest"),
        command: String::from("editor.action.triggerSuggest"),
        arguments: None,
    });

    CompletionItem {
        label: candidate.name.clone(),
        kind: Some(if candidate.is_directory {
            CompletionItemKind::FOLDER
        } else {
            CompletionItemKind::FILE
        }),
        text_edit: Some(CompletionTextEdit::Edit(TextEdit {
            range: Range {
                start: path_start,
                end: cursor,
            },
            new_text: insert_text,
        })),
        command,
        sort_text: Some(if candidate.is_directory {
            format!("0{}", candidate.name)
        } else {
            format!("1{}", candidate.name)
        }),
        ..Default::default()
    }
}

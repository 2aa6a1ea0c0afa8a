//
// handlers.rs
//
// Request handlers over WorldState
//

use tower_lsp::lsp_types::{
    CompletionResponse, DocumentLink, Location, Position, Range, Url,
};

use crate::include_detect::{detect_includes, include_at_position};
use crate::include_resolver::{completion_path, to_completion_item, IncludeStatement};
use crate::path_util::byte_offset_to_utf16_column;
use crate::state::WorldState;

/// Result of resolving the include under the cursor.
#[derive(Debug, Clone, PartialEq)]
pub enum Navigation {
    Target(Location),
    /// An include statement whose target could not be found
    Unresolved(IncludeStatement),
    /// The cursor is not on an include path
    NotAnInclude,
}

fn file_location(path: &std::path::Path) -> Option<Location> {
    let uri = Url::from_file_path(path).ok()?;
    Some(Location {
        uri,
        range: Range::default(),
    })
}

pub async fn goto_definition(state: &WorldState, uri: &Url, position: Position) -> Navigation {
    let (Some(text), Ok(path)) = (state.document_text(uri).await, uri.to_file_path()) else {
        return Navigation::NotAnInclude;
    };
    let Some(statement) = include_at_position(&text, &path, position) else {
        return Navigation::NotAnInclude;
    };

    match state.resolver().resolve_target(&statement).await {
        Some(target) => match file_location(&target) {
            Some(location) => Navigation::Target(location),
            None => Navigation::Unresolved(statement),
        },
        None => Navigation::Unresolved(statement),
    }
}

/// Links for every include statement that resolves.
pub async fn document_links(state: &WorldState, uri: &Url) -> Vec<DocumentLink> {
    let (Some(text), Ok(path)) = (state.document_text(uri).await, uri.to_file_path()) else {
        return Vec::new();
    };

    let resolver = state.resolver();
    let mut links = Vec::new();
    for statement in detect_includes(&text, &path) {
        let Some(target) = resolver.resolve_target(&statement).await else {
            continue;
        };
        if let Ok(target_uri) = Url::from_file_path(&target) {
            links.push(DocumentLink {
                range: statement.range,
                target: Some(target_uri),
                tooltip: None,
                data: None,
            });
        }
    }
    links
}

/// Path completions for the include under the cursor.
///
/// Each item replaces only the segment after the last separator.
pub async fn completion(
    state: &WorldState,
    uri: &Url,
    position: Position,
) -> Option<CompletionResponse> {
    let text = state.document_text(uri).await?;
    let path = uri.to_file_path().ok()?;
    let statement = include_at_position(&text, &path, position)?;

    let candidates = state
        .resolver()
        .resolve_completions(&statement, position)
        .await;
    if candidates.is_empty() {
        return None;
    }

    let sub_path = completion_path(&statement, position);
    let mut segment_start = statement.range.start;
    if !sub_path.is_empty() {
        segment_start.character += byte_offset_to_utf16_column(sub_path, sub_path.len()) + 1;
    }

    let items = candidates
        .iter()
        .map(|c| to_completion_item(c, "", segment_start, position))
        .collect();
    Some(CompletionResponse::Array(items))
}

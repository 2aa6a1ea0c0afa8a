//
// include_detect.rs
//
// Line-level detection of include statements in shader sources
//
// Recognized forms, one per line:
//   #include "path"    Quoted
//   #include <path>    Angular
//   include "path"     Engine
// A missing closing delimiter extends the path to the end of the line, so
// statements being typed still produce completions.
//

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tower_lsp::lsp_types::{Position, Range};

use crate::include_resolver::{IncludeKind, IncludeStatement};
use crate::path_util::byte_offset_to_utf16_column;

fn include_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"^\s*(#\s*)?include\s*(["<])"#).unwrap())
}

fn detect_line(line_no: u32, line: &str, document: &Path) -> Option<IncludeStatement> {
    let caps = include_pattern().captures(line)?;
    let is_preprocessor = caps.get(1).is_some();
    let open = caps.get(2)?;

    let (kind, close) = match (is_preprocessor, open.as_str()) {
        (true, "\"") => (IncludeKind::Quoted, '"'),
        (true, "<") => (IncludeKind::Angular, '>'),
        (false, "\"") => (IncludeKind::Engine, '"'),
        _ => return None,
    };

    let start = open.end();
    let rest = line[start..].trim_end_matches(['\r', '\n']);
    let end = start + rest.find(close).unwrap_or(rest.len());

    Some(IncludeStatement {
        path: line[start..end].to_string(),
        originating_document: document.to_path_buf(),
        range: Range {
            start: Position::new(line_no, byte_offset_to_utf16_column(line, start)),
            end: Position::new(line_no, byte_offset_to_utf16_column(line, end)),
        },
        kind,
    })
}

/// Every include statement in `content`, in line order.
pub fn detect_includes(content: &str, document: &Path) -> Vec<IncludeStatement> {
    content
        .lines()
        .enumerate()
        .filter_map(|(i, line)| detect_line(i as u32, line, document))
        .collect()
}

/// The include statement whose path text contains `position`, if any.
///
/// Both ends of the path range count as inside.
pub fn include_at_position(
    content: &str,
    document: &Path,
    position: Position,
) -> Option<IncludeStatement> {
    let line = content.lines().nth(position.line as usize)?;
    let statement = detect_line(position.line, line, document)?;
    let range = statement.range;
    (range.start.character <= position.character && position.character <= range.end.character)
        .then_some(statement)
}

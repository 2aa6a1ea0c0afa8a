//
// path_util.rs
//
// Lexical path helpers and LSP column conversion
//

use std::path::{Component, Path, PathBuf};

/// Normalize a path by resolving `.` and `..` components without touching the
/// filesystem. Leading `..` segments that would climb above the root are dropped.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                // Only pop Normal segments; RootDir and Prefix stay in place
                if let Some(last) = components.last() {
                    if matches!(last, Component::Normal(_)) {
                        components.pop();
                        continue;
                    }
                    if matches!(last, Component::RootDir | Component::Prefix(_)) {
                        continue;
                    }
                }
                components.push(component);
            }
            Component::CurDir => {}
            c => components.push(c),
        }
    }

    let mut result = PathBuf::new();
    for c in components {
        result.push(c);
    }
    result
}

/// Join `relative` onto `base` and normalize the result.
///
/// Backslashes in `relative` are treated as separators, since shader configs
/// authored on Windows freely mix both styles.
pub fn join_normalized(base: &Path, relative: &str) -> PathBuf {
    let relative = normalize_separators(relative);
    normalize_path(&base.join(relative))
}

/// Convert backslashes to forward slashes.
pub fn normalize_separators(path: &str) -> String {
    path.replace("\\\\", "/").replace('\\', "/")
}

/// Convert a UTF-16 column offset (from LSP `Position.character`) to a byte
/// offset within `line`. Columns past the end clamp to `line.len()`.
pub fn utf16_column_to_byte_offset(line: &str, utf16_col: u32) -> usize {
    let mut utf16_count = 0;
    for (byte_idx, ch) in line.char_indices() {
        if utf16_count >= utf16_col as usize {
            return byte_idx;
        }
        utf16_count += ch.len_utf16();
    }
    line.len()
}

/// Convert a byte offset within `line` to a UTF-16 column.
pub fn byte_offset_to_utf16_column(line: &str, byte_offset: usize) -> u32 {
    let end = byte_offset.min(line.len());
    line[..end].chars().map(|c| c.len_utf16() as u32).sum()
}

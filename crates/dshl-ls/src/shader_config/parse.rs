//
// shader_config/parse.rs
//
// Pattern extraction from shader config files
//
// Only two constructs matter for include discovery:
//   incDir:t="relative/path"     an include directory assignment
//   include "relative/path"      a nested config file
// Both may appear anywhere, in any order. This is a pattern scan, not a parser.
//

use std::sync::OnceLock;

use regex::Regex;

struct ConfigPatterns {
    inc_dir: Regex,
    include: Regex,
}

fn patterns() -> &'static ConfigPatterns {
    static PATTERNS: OnceLock<ConfigPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| ConfigPatterns {
        inc_dir: Regex::new(r#"\bincDir\s*:\s*t\s*=\s*"([^"]*)""#).unwrap(),
        include: Regex::new(r#"\binclude\s*"([^"]*)""#).unwrap(),
    })
}

/// Values of every `incDir:t="..."` assignment, in match order.
pub fn extract_inc_dirs(content: &str) -> Vec<&str> {
    patterns()
        .inc_dir
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Targets of every `include "..."` statement, in match order.
pub fn extract_includes(content: &str) -> Vec<&str> {
    patterns()
        .include
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|v| !v.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_inc_dirs_in_order() {
        let content = r#"
            incDir:t="../shaders_common"
            source { file:t="x.dshl" }
            incDir : t = "../../engine/shaders"
        "#;
        assert_eq!(
            extract_inc_dirs(content),
            vec!["../shaders_common", "../../engine/shaders"]
        );
    }

    #[test]
    fn test_inc_dir_requires_string_type() {
        // Only the t (string) type declares a directory
        assert!(extract_inc_dirs(r#"incDir:i=3"#).is_empty());
        assert!(extract_inc_dirs(r#"myincDir:t="x""#).is_empty());
    }

    #[test]
    fn test_extract_includes() {
        let content = r#"include "common/shaders_base.blk"
            include"other.blk"
            outputs { include_debug:b=yes }"#;
        assert_eq!(
            extract_includes(content),
            vec!["common/shaders_base.blk", "other.blk"]
        );
    }

    #[test]
    fn test_includes_and_inc_dirs_do_not_overlap() {
        let content = r#"incDir:t="a" include "b.blk""#;
        assert_eq!(extract_inc_dirs(content), vec!["a"]);
        assert_eq!(extract_includes(content), vec!["b.blk"]);
    }

    #[test]
    fn test_empty_values_are_skipped() {
        assert!(extract_inc_dirs(r#"incDir:t="""#).is_empty());
        assert!(extract_includes(r#"include """#).is_empty());
    }

    #[test]
    fn test_single_line_file() {
        let content = r#"incDir:t="one" incDir:t="two" include "n.blk" incDir:t="three""#;
        assert_eq!(extract_inc_dirs(content), vec!["one", "two", "three"]);
    }
}

//
// selector.rs
//
// Choose one include directory list for the current launch context
//

use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::LaunchContext;
use crate::shader_config::IncludeDirectoryTable;

fn driver_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\./compile(?:_game)?_shaders_(\w+)\.bat").unwrap())
}

/// Driver token named by a build command, e.g. `dx12` for
/// `./compile_game_shaders_dx12.bat`. Extraction is case-sensitive.
pub fn extract_driver_token(build_command: &str) -> Option<&str> {
    driver_pattern()
        .captures(build_command)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// The (game key, config name) pair a context selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChoice<'a> {
    pub game: &'a str,
    pub config: &'a str,
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Pick the shader config for `context` from `table`.
///
/// Game: the context's game, else the table's first game. Config: first name
/// containing the platform, else first containing the build command's driver
/// token, else the game's first config. Each step falls through when it
/// matches nothing.
pub fn select_config<'a>(
    context: &LaunchContext,
    table: &'a IncludeDirectoryTable,
) -> Option<ConfigChoice<'a>> {
    let (game, configs) = match context.game.as_deref() {
        Some(name) => match table.find_game(name) {
            Some(found) => found,
            None => {
                log::trace!("Game '{}' was not found in the workspace", name);
                return None;
            }
        },
        None => table.first_game()?,
    };

    let by_platform = context.platform.as_deref().and_then(|platform| {
        configs
            .config_names()
            .find(|name| contains_ignore_case(name, platform))
    });

    let by_driver = || {
        let token = extract_driver_token(context.build_command.as_deref()?)?;
        configs
            .config_names()
            .find(|name| contains_ignore_case(name, token))
    };

    let config = by_platform
        .or_else(by_driver)
        .or_else(|| configs.config_names().next())?;

    log::trace!("Selected shader config {} for game {}", config, game);
    Some(ConfigChoice { game, config })
}

/// The context's game when a non-empty table does not know it.
pub fn unknown_game<'c>(
    context: &'c LaunchContext,
    table: &IncludeDirectoryTable,
) -> Option<&'c str> {
    let name = context.game.as_deref()?;
    if table.is_empty() || table.find_game(name).is_some() {
        return None;
    }
    Some(name)
}

/// Include directories for `context`, in precedence order.
///
/// In override mode a non-empty override list wins outright. Otherwise the
/// list comes from the config chosen by [`select_config`]; no match gives an
/// empty list.
pub fn select_include_directories(
    context: &LaunchContext,
    table: &IncludeDirectoryTable,
    override_dirs: &[PathBuf],
) -> Vec<PathBuf> {
    if context.shader_config_override_path.is_some() && !override_dirs.is_empty() {
        return override_dirs.to_vec();
    }

    let Some(choice) = select_config(context, table) else {
        return Vec::new();
    };
    table
        .find_game(choice.game)
        .and_then(|(_, g)| g.include_dirs(choice.config))
        .map(<[PathBuf]>::to_vec)
        .unwrap_or_default()
}

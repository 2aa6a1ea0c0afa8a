//
// config.rs
//
// Launch context and server settings
//

use std::path::PathBuf;

use serde::Deserialize;

/// Extension of the engine's declarative configuration files.
pub const CONFIG_EXTENSION: &str = "blk";
/// Prefix shared by every per-platform shader config file.
pub const SHADER_CONFIG_PREFIX: &str = "shaders_";
/// Shader tree location inside a game folder.
pub const GAME_SHADERS_SUBPATH: &str = "prog/shaders";
/// Workspace-root folder whose children are also game folder candidates.
pub const SAMPLES_DIR: &str = "samples";
/// Engine-native shader include extension.
pub const ENGINE_EXTENSION: &str = "dshl";
/// HLSL source and include extensions.
pub const HLSL_EXTENSIONS: [&str; 2] = ["hlsl", "hlsli"];

/// Settings section read from initialization options and configuration changes.
pub const SETTINGS_SECTION: &str = "dshl";

/// How configuration discovery should run for the current context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanMode {
    /// Walk the workspace for game folders
    Discovered,
    /// Parse a single configuration file the user pointed at
    Override(PathBuf),
}

/// User context that drives config selection.
///
/// Empty strings are normalized to `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchContext {
    pub game: Option<String>,
    pub platform: Option<String>,
    pub build_command: Option<String>,
    pub shader_config_override_path: Option<String>,
}

impl LaunchContext {
    pub fn scan_mode(&self) -> ScanMode {
        match &self.shader_config_override_path {
            Some(path) => ScanMode::Override(PathBuf::from(path)),
            None => ScanMode::Discovered,
        }
    }

    /// True when moving from `self` to `other` needs a different scan.
    pub fn scan_mode_changed(&self, other: &Self) -> bool {
        self.scan_mode() != other.scan_mode()
    }
}

/// Which watch service backs cache and scanner invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatcherKind {
    /// OS notifications via `notify`
    #[default]
    Native,
    /// Editor-provided `workspace/didChangeWatchedFiles`
    Client,
}

/// Server-level settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub watcher: WatcherKind,
    /// Maximum nesting of `include` statements followed inside config files
    pub max_config_include_depth: usize,
    /// Whether unresolved navigation shows a warning message
    pub show_missing_include_warnings: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            watcher: WatcherKind::Native,
            max_config_include_depth: 32,
            show_missing_include_warnings: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawSettings {
    game: Option<String>,
    platform: Option<String>,
    build_command: Option<String>,
    shader_config_override: Option<String>,
    watcher: Option<String>,
    max_config_include_depth: Option<u64>,
    show_missing_include_warnings: Option<bool>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.contains('\0'))
}

fn raw_section(settings: &serde_json::Value) -> Option<RawSettings> {
    let section = settings.get(SETTINGS_SECTION)?;
    match serde_json::from_value::<RawSettings>(section.clone()) {
        Ok(raw) => Some(raw),
        Err(e) => {
            log::warn!("Ignoring malformed '{}' settings: {}", SETTINGS_SECTION, e);
            None
        }
    }
}

/// Parse the launch context from LSP settings.
///
/// Returns `None` when the `dshl` section is absent or malformed, so the caller
/// can keep its current context.
///
/// ```
/// use dshl_ls::config::parse_launch_context;
/// let settings = serde_json::json!({
///     "dshl": { "game": "gameA", "platform": "", "buildCommand": "./compile_shaders_dx12.bat" }
/// });
/// let ctx = parse_launch_context(&settings).unwrap();
/// assert_eq!(ctx.game.as_deref(), Some("gameA"));
/// assert!(ctx.platform.is_none());
/// ```
pub fn parse_launch_context(settings: &serde_json::Value) -> Option<LaunchContext> {
    let raw = raw_section(settings)?;
    let context = LaunchContext {
        game: non_empty(raw.game),
        platform: non_empty(raw.platform),
        build_command: non_empty(raw.build_command),
        shader_config_override_path: non_empty(raw.shader_config_override),
    };

    log::info!("Launch context loaded from settings:");
    log::info!("  game: {:?}", context.game);
    log::info!("  platform: {:?}", context.platform);
    log::info!("  build_command: {:?}", context.build_command);
    log::info!(
        "  shader_config_override: {:?}",
        context.shader_config_override_path
    );

    Some(context)
}

/// Parse server settings; absent fields keep their defaults.
pub fn parse_server_config(settings: &serde_json::Value) -> Option<ServerConfig> {
    let raw = raw_section(settings)?;
    let mut config = ServerConfig::default();

    if let Some(v) = raw.watcher.as_deref() {
        config.watcher = match v.to_lowercase().as_str() {
            "client" => WatcherKind::Client,
            _ => WatcherKind::Native,
        };
    }
    if let Some(v) = raw.max_config_include_depth {
        config.max_config_include_depth = v as usize;
    }
    if let Some(v) = raw.show_missing_include_warnings {
        config.show_missing_include_warnings = v;
    }

    log::info!("Server configuration loaded from settings:");
    log::info!("  watcher: {:?}", config.watcher);
    log::info!(
        "  max_config_include_depth: {}",
        config.max_config_include_depth
    );
    log::info!(
        "  show_missing_include_warnings: {}",
        config.show_missing_include_warnings
    );

    Some(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_launch_context() {
        let settings = json!({
            "dshl": {
                "game": "gameA",
                "platform": "vulkan",
                "buildCommand": "./compile_game_shaders_dx12.bat",
                "shaderConfigOverride": "/ws/custom/shaders_test.blk"
            }
        });
        let ctx = parse_launch_context(&settings).unwrap();
        assert_eq!(ctx.game.as_deref(), Some("gameA"));
        assert_eq!(ctx.platform.as_deref(), Some("vulkan"));
        assert_eq!(
            ctx.build_command.as_deref(),
            Some("./compile_game_shaders_dx12.bat")
        );
        assert_eq!(
            ctx.scan_mode(),
            ScanMode::Override(PathBuf::from("/ws/custom/shaders_test.blk"))
        );
    }

    #[test]
    fn test_empty_strings_are_unset() {
        let settings = json!({ "dshl": { "game": "  ", "shaderConfigOverride": "" } });
        let ctx = parse_launch_context(&settings).unwrap();
        assert_eq!(ctx, LaunchContext::default());
        assert_eq!(ctx.scan_mode(), ScanMode::Discovered);
    }

    #[test]
    fn test_missing_section_returns_none() {
        assert!(parse_launch_context(&json!({ "other": {} })).is_none());
        assert!(parse_server_config(&json!(null)).is_none());
    }

    #[test]
    fn test_malformed_section_returns_none() {
        assert!(parse_launch_context(&json!({ "dshl": { "game": 42 } })).is_none());
    }

    #[test]
    fn test_scan_mode_changed() {
        let discovered = LaunchContext::default();
        let mut other = discovered.clone();
        other.platform = Some("dx12".to_string());
        assert!(!discovered.scan_mode_changed(&other));

        other.shader_config_override_path = Some("/a/shaders_x.blk".to_string());
        assert!(discovered.scan_mode_changed(&other));

        let mut moved = other.clone();
        moved.shader_config_override_path = Some("/b/shaders_x.blk".to_string());
        assert!(other.scan_mode_changed(&moved));
    }

    #[test]
    fn test_server_config_defaults_and_overrides() {
        let config = parse_server_config(&json!({ "dshl": {} })).unwrap();
        assert_eq!(config, ServerConfig::default());

        let config = parse_server_config(&json!({
            "dshl": {
                "watcher": "client",
                "maxConfigIncludeDepth": 4,
                "showMissingIncludeWarnings": false
            }
        }))
        .unwrap();
        assert_eq!(config.watcher, WatcherKind::Client);
        assert_eq!(config.max_config_include_depth, 4);
        assert!(!config.show_missing_include_warnings);
    }
}

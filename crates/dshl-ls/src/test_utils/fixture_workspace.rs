//! Shader workspace fixtures for tests.
//!
//! `ShaderWorkspace` lays out files by hand inside a temporary directory.
//! `FixtureConfig` generates a deterministic multi-game tree: each game gets a
//! `prog/shaders` folder, one `shaders_<platform>.blk` per platform pointing at
//! a shared include folder, and a few `.dshl`/`.hlsl` files to complete against.

use std::fmt::Write;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::config::GAME_SHADERS_SUBPATH;
use crate::path_util::normalize_path;

/// A temporary workspace root. Removed when dropped.
pub struct ShaderWorkspace {
    dir: TempDir,
}

impl Default for ShaderWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

impl ShaderWorkspace {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory for shader workspace");
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Normalized absolute path of `relative` inside the workspace.
    pub fn path(&self, relative: &str) -> PathBuf {
        normalize_path(&self.dir.path().join(relative))
    }

    /// Write `content` to `relative`, creating parent directories.
    pub fn add_file(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .unwrap_or_else(|e| panic!("Failed to create {}: {}", parent.display(), e));
        }
        std::fs::write(&path, content)
            .unwrap_or_else(|e| panic!("Failed to write fixture file {}: {}", relative, e));
        path
    }

    pub fn add_dir(&self, relative: &str) -> PathBuf {
        let path = self.path(relative);
        std::fs::create_dir_all(&path)
            .unwrap_or_else(|e| panic!("Failed to create fixture dir {}: {}", relative, e));
        path
    }

    /// Write a shader config into `<game>/prog/shaders/<name>`.
    pub fn add_config(&self, game: &str, name: &str, content: &str) -> PathBuf {
        self.add_file(&format!("{}/{}/{}", game, GAME_SHADERS_SUBPATH, name), content)
    }
}

/// Shape of a generated multi-game workspace.
#[derive(Debug, Clone)]
pub struct FixtureConfig {
    pub game_count: usize,
    pub platforms: Vec<&'static str>,
    pub shared_files: usize,
    /// Wrap each config's incDir in a nested `include` chain this deep
    pub nested_include_depth: usize,
}

impl FixtureConfig {
    /// Two games, dx12 and vulkan, two shared include files.
    pub fn small() -> Self {
        Self {
            game_count: 2,
            platforms: vec!["dx12", "vulkan"],
            shared_files: 2,
            nested_include_depth: 0,
        }
    }
}

/// Game folder name for index `i`.
pub fn game_name(i: usize) -> String {
    format!("game{}", i)
}

fn config_content(game: usize, platform: &str) -> String {
    let mut content = String::new();
    writeln!(content, "// generated for {} {}", game_name(game), platform).unwrap();
    writeln!(content, "incDir:t=\"../shaders_common\"").unwrap();
    writeln!(content, "incDir:t=\"../shaders_{}\"", platform).unwrap();
    content
}

/// Generate the workspace described by `config` into a new temporary root.
///
/// Output is deterministic for a given config.
pub fn create_fixture_workspace(config: &FixtureConfig) -> ShaderWorkspace {
    let ws = ShaderWorkspace::new();
    for game in 0..config.game_count {
        let name = game_name(game);
        for platform in &config.platforms {
            let config_name = format!("shaders_{}.blk", platform);
            if config.nested_include_depth == 0 {
                ws.add_config(&name, &config_name, &config_content(game, platform));
                continue;
            }

            // shaders_x.blk -> nested/level_1.blk -> ... -> level_N.blk holding the incDirs
            ws.add_config(
                &name,
                &config_name,
                &format!("include \"nested/{}_level_1.blk\"\n", platform),
            );
            for level in 1..=config.nested_include_depth {
                let body = if level == config.nested_include_depth {
                    config_content(game, platform)
                } else {
                    format!("include \"{}_level_{}.blk\"\n", platform, level + 1)
                };
                ws.add_file(
                    &format!(
                        "{}/{}/nested/{}_level_{}.blk",
                        name, GAME_SHADERS_SUBPATH, platform, level
                    ),
                    &body,
                );
            }
        }

        ws.add_file(&format!("{}/{}/main.dshl", name, GAME_SHADERS_SUBPATH), "include \"common_0.dshl\"\n");
        for i in 0..config.shared_files {
            ws.add_file(
                &format!("{}/prog/shaders_common/common_{}.dshl", name, i),
                &format!("// shared {}\n", i),
            );
        }
        ws.add_file(&format!("{}/prog/shaders_common/noise.hlsl", name), "float noise();\n");
        for platform in &config.platforms {
            ws.add_file(
                &format!("{}/prog/shaders_{}/{}_specific.hlsli", name, platform, platform),
                "",
            );
        }
    }
    ws
}

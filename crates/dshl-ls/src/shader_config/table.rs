//
// shader_config/table.rs
//
// Include directory table: game -> shader config -> include directories
//

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

/// Shader configs discovered for one game folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameConfigs {
    /// Absolute path of the game folder
    pub folder: PathBuf,
    /// Config file name -> include directories, in discovery order
    pub configs: IndexMap<String, Vec<PathBuf>>,
}

impl GameConfigs {
    pub fn new(folder: PathBuf) -> Self {
        Self {
            folder,
            configs: IndexMap::new(),
        }
    }

    /// Config names in discovery order.
    pub fn config_names(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(String::as_str)
    }

    pub fn include_dirs(&self, config_name: &str) -> Option<&[PathBuf]> {
        self.configs.get(config_name).map(Vec::as_slice)
    }
}

/// Include directories per (game, shader config) pair.
///
/// Games are keyed by their folder path relative to the workspace root using
/// `/` separators, e.g. `gameA` or `samples/demo`. Iteration follows
/// insertion order, which the scanner makes deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncludeDirectoryTable {
    games: IndexMap<String, GameConfigs>,
}

impl IncludeDirectoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn games(&self) -> impl Iterator<Item = (&str, &GameConfigs)> {
        self.games.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn first_game(&self) -> Option<(&str, &GameConfigs)> {
        self.games.first().map(|(k, v)| (k.as_str(), v))
    }

    /// Look up a game by key, by folder name, or by absolute folder path.
    pub fn find_game(&self, name: &str) -> Option<(&str, &GameConfigs)> {
        if let Some((k, v)) = self.games.get_key_value(name) {
            return Some((k.as_str(), v));
        }
        self.games
            .iter()
            .find(|(_, g)| {
                g.folder.file_name().and_then(|n| n.to_str()) == Some(name)
                    || g.folder == Path::new(name)
            })
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Register a game folder (kept even if it ends up with no configs).
    pub fn insert_game(&mut self, key: String, folder: PathBuf) -> &mut GameConfigs {
        self.games
            .entry(key)
            .or_insert_with(|| GameConfigs::new(folder))
    }

    /// Include directory list for a (game, config) pair, created empty if new.
    pub fn config_dirs_mut(&mut self, game: &str, config_name: &str) -> Option<&mut Vec<PathBuf>> {
        let game = self.games.get_mut(game)?;
        Some(game.configs.entry(config_name.to_string()).or_default())
    }
}

/// Table key for a game folder under `root`.
pub fn game_key(root: &Path, folder: &Path) -> String {
    let relative = folder.strip_prefix(root).unwrap_or(folder);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

//! Workspace layout and the optional on-disk config file.
//!
//! Everything lives under one workspace directory (default `~/.cardvault`,
//! overridable via `CARDVAULT_HOME` or `--workspace`): the snapshot documents
//! in `snapshots/`, the durable mirror database, and an optional
//! `config.json` overriding individual snapshot paths.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::loader::SnapshotPaths;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    #[serde(default)]
    pub tcg_cards: Option<PathBuf>,
    #[serde(default)]
    pub pocket_cards: Option<PathBuf>,
    #[serde(default)]
    pub sets: Option<PathBuf>,
    #[serde(default)]
    pub pocket_sets: Option<PathBuf>,
    #[serde(default)]
    pub pokemon_metadata: Option<PathBuf>,
    #[serde(default)]
    pub custom_cards: Option<PathBuf>,
    #[serde(default)]
    pub annotations: Option<PathBuf>,
    #[serde(default)]
    pub cache_db: Option<PathBuf>,
}

pub fn workspace_dir(flag: Option<&Path>) -> PathBuf {
    if let Some(dir) = flag {
        return dir.to_path_buf();
    }
    if let Ok(dir) = std::env::var("CARDVAULT_HOME") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".cardvault")
}

pub fn config_file_path(workspace: &Path) -> PathBuf {
    workspace.join("config.json")
}

/// Missing or malformed config degrades to defaults; the file is optional.
pub fn load_file_config(path: &Path) -> FileConfig {
    match std::fs::read_to_string(path) {
        Ok(data) => serde_json::from_str(&data).unwrap_or_default(),
        Err(_) => FileConfig::default(),
    }
}

pub fn cache_db_path(workspace: &Path, config: &FileConfig) -> PathBuf {
    config
        .cache_db
        .clone()
        .unwrap_or_else(|| workspace.join("cache.db"))
}

/// Resolve the snapshot document paths: config overrides first, conventional
/// `snapshots/` filenames otherwise. Optional inputs only participate when
/// the file actually exists.
pub fn snapshot_paths(workspace: &Path, config: &FileConfig) -> SnapshotPaths {
    let snapshots = workspace.join("snapshots");
    let conventional = |name: &str| snapshots.join(name);
    let optional = |over: &Option<PathBuf>, name: &str| -> Option<PathBuf> {
        match over {
            Some(path) => Some(path.clone()),
            None => Some(conventional(name)).filter(|p| p.exists()),
        }
    };
    SnapshotPaths {
        tcg_cards: config
            .tcg_cards
            .clone()
            .unwrap_or_else(|| conventional("tcg_cards.json")),
        pocket_cards: config
            .pocket_cards
            .clone()
            .unwrap_or_else(|| conventional("pocket_cards.json")),
        sets: optional(&config.sets, "sets.json"),
        pocket_sets: optional(&config.pocket_sets, "pocket_sets.json"),
        pokemon_metadata: optional(&config.pokemon_metadata, "pokemon_metadata.json"),
        custom_cards: optional(&config.custom_cards, "custom_cards.json"),
        annotations: optional(&config.annotations, "annotations.json"),
    }
}

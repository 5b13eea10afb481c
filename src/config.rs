//! Settings for building and viewing span trees.
//! The settings are passed explicitly to the functions that need them, there is no global state.
//! They can be persisted to a JSON file in the user's data directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

/// Gaps between siblings longer than this (in seconds) get a missing instrumentation placeholder.
pub const MISSING_INSTRUMENTATION_THRESHOLD: f64 = 0.1;

/// Number of rows shown by a flamegraph preview when nothing else is configured.
pub const DEFAULT_VIEWPORT_ROWS: u32 = 10;

/// How to order spans that start at exactly the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum TieBreak {
    /// Longer span first, so that a parent which starts together with its child is placed
    /// before the child. Equal durations are ordered by span id.
    #[default]
    LongerFirst,
    /// Keep the order in which the spans were given.
    InputOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TreeConfig {
    pub missing_instrumentation_threshold: f64,
    #[serde(default)]
    pub tie_break: TieBreak,
}

impl Default for TreeConfig {
    fn default() -> Self {
        TreeConfig {
            missing_instrumentation_threshold: MISSING_INSTRUMENTATION_THRESHOLD,
            tie_break: TieBreak::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ViewerConfig {
    pub tree: TreeConfig,
    /// Row budget of the preview viewport.
    pub viewport_rows: u32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        ViewerConfig {
            tree: TreeConfig::default(),
            viewport_rows: DEFAULT_VIEWPORT_ROWS,
        }
    }
}

/// Versioned on-disk format. Add a new variant when the layout changes so that files written by
/// older versions can still be read.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum PersistentConfig {
    V1(ViewerConfig),
}

impl Default for PersistentConfig {
    fn default() -> Self {
        PersistentConfig::V1(ViewerConfig::default())
    }
}

impl From<PersistentConfig> for ViewerConfig {
    fn from(config: PersistentConfig) -> Self {
        match config {
            PersistentConfig::V1(config) => config,
        }
    }
}

/// Load the config from `path`, or from the default location when `path` is `None`.
/// A missing file is not an error, defaults are used instead.
pub fn load_config(path: Option<&Path>) -> Result<ViewerConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config_file_path()?,
    };
    debug!("Reading config from {}", path.display());
    if !path.try_exists()? {
        info!("Config file {} not found, using defaults", path.display());
        return Ok(ViewerConfig::default());
    }
    let file = std::fs::File::open(&path)
        .with_context(|| format!("Failed to open config file {}", path.display()))?;
    let data: PersistentConfig = serde_json::from_reader(file)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(data.into())
}

pub fn save_config(config: &ViewerConfig, path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config_file_path()?,
    };
    info!("Writing config to {}", path.display());

    let folder = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&folder)?;

    // Write to a temporary file first and then move it into place, a crash in the middle of
    // writing won't leave a truncated config behind.
    let random_number: u64 = rand::random();
    let write_file_path = folder.join(format!("temporary_config{}.json", random_number));
    let mut file = std::fs::File::create(&write_file_path)?;
    serde_json::to_writer_pretty(&mut file, &PersistentConfig::V1(*config))?;
    file.sync_all()?;

    std::fs::rename(&write_file_path, &path)?;
    Ok(())
}

pub fn config_file_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("org", "tracetree", "tracetree")
        .context("Unable to determine the user's data directory")?;
    Ok(dirs.data_dir().join("config.json"))
}

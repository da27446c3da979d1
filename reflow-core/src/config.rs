use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::flow::{
    FlowKind, Theme, DEFAULT_NARROW_BREAKPOINT, DEFAULT_SPREAD_MIN_WIDTH, FONT_SIZE_DEFAULT,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub reader: ReaderConfig,
    pub viewport: ViewportConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub flow: FlowKind,
    pub font_size: u16,
    pub theme: Theme,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            flow: FlowKind::default(),
            font_size: FONT_SIZE_DEFAULT,
            theme: Theme::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    pub narrow_breakpoint: u32,
    pub spread_min_width: u32,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            narrow_breakpoint: DEFAULT_NARROW_BREAKPOINT,
            spread_min_width: DEFAULT_SPREAD_MIN_WIDTH,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Overrides the platform data directory for the book library.
    pub library_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw =
            fs::read_to_string(path).with_context(|| format!("failed to read config {:?}", path))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse config {:?}", path))
    }

    pub fn load_default(dirs: &ProjectDirs) -> Result<Self> {
        Self::load(&dirs.config_dir().join("config.toml"))
    }

    pub fn library_dir(&self, dirs: &ProjectDirs) -> PathBuf {
        self.storage
            .library_dir
            .clone()
            .unwrap_or_else(|| dirs.data_local_dir().join("library"))
    }
}

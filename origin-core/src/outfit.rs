//! Outfit preset persistence.
//!
//! Presets are stored as a single JSON document mapping preset names to
//! figures. A missing file reads as an empty set of presets; writes replace
//! the file in place.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Application directory under the user config dir.
pub const APP_DIR: &str = "Origin-Tools";
/// Preset file name.
pub const OUTFIT_FILE: &str = "outfit_config.json";

/// Errors from outfit persistence.
#[derive(Debug, Error)]
pub enum OutfitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no user config directory on this platform")]
    NoConfigDir,
}

/// A stored preset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutfitDetails {
    pub figure: String,
}

/// The whole preset file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutfitConfig {
    #[serde(default)]
    pub outfits: BTreeMap<String, OutfitDetails>,
}

impl OutfitConfig {
    pub fn get(&self, name: &str) -> Option<&OutfitDetails> {
        self.outfits.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, figure: impl Into<String>) {
        self.outfits.insert(
            name.into(),
            OutfitDetails {
                figure: figure.into(),
            },
        );
    }

    pub fn names(&self) -> Vec<String> {
        self.outfits.keys().cloned().collect()
    }
}

/// Load/save contract for outfit presets.
#[async_trait]
pub trait OutfitStore: Send + Sync {
    /// Read all presets. An absent store reads as empty.
    async fn load(&self) -> Result<OutfitConfig, OutfitError>;

    /// Replace all presets.
    async fn save(&self, config: &OutfitConfig) -> Result<(), OutfitError>;
}

/// Default preset path: `<config dir>/Origin-Tools/outfit_config.json`.
pub fn default_outfit_path() -> Result<PathBuf, OutfitError> {
    let dir = dirs::config_dir().ok_or(OutfitError::NoConfigDir)?;
    Ok(dir.join(APP_DIR).join(OUTFIT_FILE))
}

/// Presets in a JSON file.
#[derive(Debug, Clone)]
pub struct JsonOutfitStore {
    path: PathBuf,
}

impl JsonOutfitStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default per-user location.
    pub fn at_default_location() -> Result<Self, OutfitError> {
        Ok(Self::new(default_outfit_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl OutfitStore for JsonOutfitStore {
    async fn load(&self) -> Result<OutfitConfig, OutfitError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(OutfitConfig::default()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    async fn save(&self, config: &OutfitConfig) -> Result<(), OutfitError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, content).await?;
        Ok(())
    }
}

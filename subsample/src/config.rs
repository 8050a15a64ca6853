use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::heap::MemoryClass;
use crate::image::ImageFormat;
use crate::sample::DecodeConstraints;

/// Persisted decoder settings
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub max_pixels: Option<u64>,
    pub min_side: Option<u32>,
    // Only used for the pixel budget when max_pixels is unset
    pub memory_class: Option<MemoryClass>,
    pub image_format: ImageFormat,
}

impl DecoderConfig {
    /// Stored settings, `None` when there are none or they cannot be read
    pub fn load() -> Option<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn save(&self) -> Option<()> {
        self.save_to(&Self::config_path()?)
    }

    /// A missing file is silent, an unreadable or malformed one is logged
    pub fn load_from(path: &Path) -> Option<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("Could not read settings from {}: {}", path.display(), e);
                return None;
            }
        };

        serde_json::from_str(&contents)
            .map_err(|e| log::warn!("Ignoring malformed settings in {}: {}", path.display(), e))
            .ok()
    }

    pub fn save_to(&self, path: &Path) -> Option<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| log::warn!("Could not create {}: {}", parent.display(), e))
                .ok()?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| log::warn!("Could not serialize settings: {}", e))
            .ok()?;
        fs::write(path, json)
            .map_err(|e| log::warn!("Could not write {}: {}", path.display(), e))
            .ok()
    }

    pub fn config_path() -> Option<PathBuf> {
        let home = std::env::home_dir()?;
        Some(home.join(".config").join("subsample").join("config.json"))
    }

    pub fn constraints(&self) -> DecodeConstraints {
        let max_pixels = self
            .max_pixels
            .or_else(|| self.memory_class.map(|class| class.pixel_budget()));
        DecodeConstraints::new(max_pixels, self.min_side)
    }
}

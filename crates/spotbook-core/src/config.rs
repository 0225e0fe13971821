use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SpotError, SpotResult};

/// Configuration for the spot coordinator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Image ids are drawn uniformly from `0..image_id_range`.
    pub image_id_range: u32,
    /// File extension appended to every image blob path.
    pub image_extension: String,
    /// Content type sent with every upload.
    pub image_content_type: String,
    /// Largest accepted upload, in bytes.
    pub max_image_bytes: usize,
    /// Download URL prefix used by images stored before `storagePath`
    /// existed; stripped when migrating them.
    pub legacy_url_prefix: String,
    /// Query string marker that ends the encoded path in a legacy URL.
    pub legacy_url_query_marker: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            image_id_range: 10_000_000,
            image_extension: "png".into(),
            image_content_type: "image/png".into(),
            max_image_bytes: 5 * 1024 * 1024,
            legacy_url_prefix: "https://firebasestorage.googleapis.com/v0/b/spotbook.appspot.com/o/"
                .into(),
            legacy_url_query_marker: "?alt=media&token=".into(),
        }
    }
}

impl CoordinatorConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(raw: &str) -> SpotResult<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| SpotError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file.
    pub fn load(path: &Path) -> SpotResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SpotError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> SpotResult<()> {
        if self.image_id_range == 0 {
            return Err(SpotError::Config("image_id_range must be positive".into()));
        }
        if self.image_extension.is_empty() || self.image_extension.contains('/') {
            return Err(SpotError::Config(format!(
                "invalid image_extension '{}'",
                self.image_extension
            )));
        }
        if self.max_image_bytes == 0 {
            return Err(SpotError::Config("max_image_bytes must be positive".into()));
        }
        Ok(())
    }
}

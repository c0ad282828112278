//! Configuration loading and types for folio.
//!
//! - Type definitions for config structures (`types`)
//! - Loading configs from files and the environment (`load`)

mod load;
mod types;

use std::collections::HashSet;
use std::path::PathBuf;

use sha2::{Digest, Sha256};

pub use load::{CONFIG_FILE, base_path_from_config};
pub use types::{CacheConfig, Config, MarkdownConfig, ProjectConfig, VolumeConfig};

// =============================================================================
// Errors
// =============================================================================

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to deserialize config: {0}")]
    Deserialize(#[from] config::ConfigError),

    #[error("failed to get current working directory: {0}")]
    CwdFailure(std::io::Error),

    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("config path is not valid UTF-8: {0}")]
    EncodePath(PathBuf),

    #[error("invalid config: {0}")]
    Validation(String),
}

// =============================================================================
// Validation and fingerprints
// =============================================================================

impl Config {
    /// A starter config for `folio init`.
    pub fn starter(name: impl Into<String>) -> Self {
        Self {
            project: ProjectConfig {
                name: name.into(),
                output: PathBuf::from("_build"),
                template: None,
            },
            cache: CacheConfig::default(),
            volumes: vec![VolumeConfig {
                name: "guide".into(),
                path: PathBuf::from("./guide"),
                title: Some("User Guide".into()),
            }],
            markdown: MarkdownConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.volumes.is_empty() {
            return Err(ConfigError::Validation(
                "at least one volume is required\n\nExample:\n  volumes:\n    - name: guide\n      path: ./guide".into(),
            ));
        }

        let mut seen = HashSet::new();
        for volume in &self.volumes {
            if volume.name.is_empty() || volume.name.contains(['/', '\\']) {
                return Err(ConfigError::Validation(format!(
                    "volume name '{}' must be non-empty and contain no path separators",
                    volume.name
                )));
            }
            if !seen.insert(volume.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate volume name '{}'",
                    volume.name
                )));
            }
        }

        Ok(())
    }

    /// Hash of everything in the config that affects a volume's cached
    /// stage results.
    pub fn volume_fingerprint(&self, volume: &VolumeConfig) -> String {
        let mut hasher = Sha256::new();
        // Plain strings and lists; serialization cannot fail.
        hasher.update(serde_json::to_vec(volume).unwrap_or_default());
        hasher.update(serde_json::to_vec(&self.markdown).unwrap_or_default());
        hex::encode(hasher.finalize())
    }
}

//! Configuration type definitions.
//!
//! Pure data: everything `folio.yaml` can hold. Loading lives in `load`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::util::title_case;

/// The whole of `folio.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub project: ProjectConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub volumes: Vec<VolumeConfig>,
    #[serde(default)]
    pub markdown: MarkdownConfig,
}

// =============================================================================
// Project configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    /// Where rendered pages are written, relative to the config file
    #[serde(default = "default_output")]
    pub output: PathBuf,
    /// A tera page template to use instead of the built-in one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PathBuf>,
}

fn default_output() -> PathBuf {
    PathBuf::from("_build")
}

// =============================================================================
// Cache configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Cache directory, relative to the config file
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".folio/cache")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            dir: default_cache_dir(),
        }
    }
}

// =============================================================================
// Volume configuration
// =============================================================================

/// A directory of Markdown pages built together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Unique identifier, also the output subdirectory
    pub name: String,
    /// Content directory, relative to the config file
    pub path: PathBuf,
    /// Display title (defaults to the name in title case)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl VolumeConfig {
    pub fn title(&self) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| title_case(&self.name))
    }
}

// =============================================================================
// Markdown configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkdownConfig {
    /// Extensions to enable for markdown processing
    #[serde(default = "default_markdown_extensions")]
    pub extensions: Vec<String>,
}

fn default_markdown_extensions() -> Vec<String> {
    vec![
        "footnotes".to_string(),
        "heading_attributes".to_string(),
        "strikethrough".to_string(),
        "tables".to_string(),
        "tasklists".to_string(),
    ]
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            extensions: default_markdown_extensions(),
        }
    }
}

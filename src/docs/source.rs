use std::path::{Path, PathBuf};

use crate::config::VolumeConfig;
use crate::engine::PageId;

use super::paths::{is_page_file, page_id};

// =============================================================================
// Errors
// =============================================================================

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("volume path does not exist: {0}")]
    PathNotFound(PathBuf),

    #[error("volume path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read directory entry in {path}: {source}")]
    ReadEntry {
        path: PathBuf,
        source: std::io::Error,
    },
}

// =============================================================================
// Volumes
// =============================================================================

/// A volume after discovery: where its content lives and which pages it has.
#[derive(Debug, Clone)]
pub struct Volume {
    pub config: VolumeConfig,
    /// The resolved local content directory
    pub root: PathBuf,
    /// Page paths relative to `root`, sorted
    pub pages: Vec<PathBuf>,
}

impl Volume {
    /// Resolve a volume's directory against `base_path` and find its pages.
    pub fn discover(config: VolumeConfig, base_path: &Path) -> Result<Self, SourceError> {
        let root = if config.path.is_relative() {
            base_path.join(&config.path)
        } else {
            config.path.clone()
        };

        if !root.exists() {
            return Err(SourceError::PathNotFound(root));
        }
        if !root.is_dir() {
            return Err(SourceError::NotADirectory(root));
        }

        let mut pages = Vec::new();
        walk_directory(&root, &PathBuf::new(), &mut pages)?;
        pages.sort();

        Ok(Self {
            config,
            root,
            pages,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Page ids in volume order.
    pub fn page_ids(&self) -> Vec<PageId> {
        self.pages
            .iter()
            .map(|path| page_id(self.name(), path))
            .collect()
    }

    /// The source file of a page, given its volume-relative path.
    pub fn source_path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }
}

/// Recursively collect Markdown files below `dir`.
fn walk_directory(
    dir: &Path,
    relative_path: &Path,
    pages: &mut Vec<PathBuf>,
) -> Result<(), SourceError> {
    let entries = std::fs::read_dir(dir).map_err(|e| SourceError::ReadDir {
        path: dir.to_path_buf(),
        source: e,
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| SourceError::ReadEntry {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let path = entry.path();
        let file_name = entry.file_name();
        let file_name_str = file_name.to_string_lossy();

        // Skip hidden files and directories
        if file_name_str.starts_with('.') {
            continue;
        }

        // Skip common non-content directories
        if path.is_dir() && matches!(file_name_str.as_ref(), "node_modules" | "target") {
            continue;
        }

        let item_relative_path = relative_path.join(&file_name);

        if path.is_dir() {
            walk_directory(&path, &item_relative_path, pages)?;
        } else if path.is_file() && is_page_file(&item_relative_path) {
            pages.push(item_relative_path);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume_config(path: &Path) -> VolumeConfig {
        VolumeConfig {
            name: "guide".into(),
            path: path.to_path_buf(),
            title: None,
        }
    }

    #[test]
    fn test_discover_finds_markdown_pages_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("guide");
        std::fs::create_dir_all(root.join("start")).unwrap();
        std::fs::create_dir_all(root.join(".hidden")).unwrap();
        std::fs::write(root.join("zeta.md"), "# Z").unwrap();
        std::fs::write(root.join("alpha.markdown"), "# A").unwrap();
        std::fs::write(root.join("start/install.md"), "# I").unwrap();
        std::fs::write(root.join("logo.png"), "png").unwrap();
        std::fs::write(root.join(".hidden/secret.md"), "# S").unwrap();

        let volume = Volume::discover(volume_config(Path::new("guide")), dir.path()).unwrap();

        assert_eq!(
            volume.page_ids(),
            vec![
                PageId::new("guide/alpha.markdown"),
                PageId::new("guide/start/install.md"),
                PageId::new("guide/zeta.md"),
            ]
        );
        assert_eq!(
            volume.source_path("start/install.md"),
            root.join("start/install.md")
        );
    }

    #[test]
    fn test_discover_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = Volume::discover(volume_config(Path::new("nope")), dir.path());
        assert!(matches!(result, Err(SourceError::PathNotFound(_))));
    }

    #[test]
    fn test_discover_file_instead_of_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("guide"), "not a dir").unwrap();
        let result = Volume::discover(volume_config(Path::new("guide")), dir.path());
        assert!(matches!(result, Err(SourceError::NotADirectory(_))));
    }
}

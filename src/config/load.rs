//! Configuration loading from files and the environment.

use std::path::{Path, PathBuf};

use super::{Config, ConfigError};

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "folio.yaml";

/// Prefix of environment variables that override file settings,
/// e.g. `FOLIO__CACHE__ENABLED=false`.
const ENV_PREFIX: &str = "FOLIO";
const ENV_SEPARATOR: &str = "__";

impl Config {
    /// Resolve the `--config-file` argument to an absolute path, defaulting to
    /// `folio.yaml` in the working directory.
    pub fn path_from_arg(config_file: Option<&Path>) -> Result<PathBuf, ConfigError> {
        let config_file = config_file.unwrap_or(Path::new(CONFIG_FILE));
        if config_file.is_relative() {
            Ok(std::env::current_dir()
                .map_err(ConfigError::CwdFailure)?
                .join(config_file))
        } else {
            Ok(config_file.to_path_buf())
        }
    }

    /// Load the config from the command line argument, defaulting to `folio.yaml`
    pub fn load_from_arg(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let path = Self::path_from_arg(config_file)?;
        Self::load_from_file(&path)
    }

    /// Load and validate the config at `path`, with environment overrides
    /// layered on top.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let path_str = path
            .as_os_str()
            .to_str()
            .ok_or_else(|| ConfigError::EncodePath(path.to_path_buf()))?;

        let config = config::Config::builder()
            .add_source(config::File::new(path_str, config::FileFormat::Yaml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Config>()?;

        config.validate()?;
        Ok(config)
    }
}

/// Directory relative paths in a config file are resolved against.
pub fn base_path_from_config(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, text: &str) -> PathBuf {
        let path = dir.join(CONFIG_FILE);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_load_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            "project:\n  name: Manual\nvolumes:\n  - name: guide\n    path: ./guide\n",
        );

        let config = Config::load_from_file(&path).unwrap();

        assert_eq!(config.project.name, "Manual");
        assert_eq!(config.project.output, PathBuf::from("_build"));
        assert!(config.cache.enabled);
        assert_eq!(config.cache.dir, PathBuf::from(".folio/cache"));
        assert_eq!(config.volumes.len(), 1);
        assert_eq!(config.volumes[0].title(), "Guide");
        assert!(config.markdown.extensions.contains(&"tables".to_string()));
    }

    #[test]
    fn test_load_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"
project:
  name: Manual
  output: out
cache:
  enabled: false
  dir: tmp/cache
volumes:
  - name: guide
    path: ./guide
    title: User Guide
  - name: api
    path: ./api
markdown:
  extensions: [tables]
"#,
        );

        let config = Config::load_from_file(&path).unwrap();

        assert_eq!(config.project.output, PathBuf::from("out"));
        assert!(!config.cache.enabled);
        assert_eq!(config.volumes[0].title(), "User Guide");
        assert_eq!(config.volumes[1].name, "api");
        assert_eq!(config.markdown.extensions, vec!["tables".to_string()]);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load_from_file(&dir.path().join(CONFIG_FILE));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_duplicate_volumes_are_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            "project:\n  name: Manual\nvolumes:\n  - name: guide\n    path: a\n  - name: guide\n    path: b\n",
        );

        let result = Config::load_from_file(&path);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_base_path_from_config() {
        assert_eq!(
            base_path_from_config(Path::new("/project/folio.yaml")),
            PathBuf::from("/project")
        );
        assert_eq!(
            base_path_from_config(Path::new("folio.yaml")),
            PathBuf::from("")
        );
    }
}

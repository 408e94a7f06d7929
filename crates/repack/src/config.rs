//! Merge configuration
//!
//! Settings come from a TOML file (`repack.toml`) and are overridden by
//! command-line flags. Lookup order: an explicit path, `repack.toml` in the
//! working directory, then `repack/repack.toml` in the user configuration
//! directory. Missing files fall back to defaults.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use etcetera::BaseStrategy;
use log::debug;
use serde::Deserialize;

/// File name looked up in the working directory and the user config dir
pub const CONFIG_FILE_NAME: &str = "repack.toml";

/// Internalization settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct InternalizeConfig {
    /// Internalize every secondary module unless excluded
    pub enabled: bool,
    /// Modules internalized even when `enabled` is false
    pub include: Vec<String>,
    /// Modules never internalized
    pub exclude: Vec<String>,
    /// Regex patterns of type names that stay public
    pub exclude_patterns: Vec<String>,
    /// File with one exclude pattern per line, relative to the config file
    pub exclude_file: Option<PathBuf>,
    /// Keep public serializable and contract types public
    pub exclude_serializable: bool,
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Name of the merged module; defaults to the primary module's name
    pub target_name: Option<String>,
    pub internalize: InternalizeConfig,
}

impl Config {
    /// Load a configuration file, folding its exclude file into the patterns
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Self = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if let Some(exclude_file) = config.internalize.exclude_file.take() {
            let exclude_file = match path.parent() {
                Some(dir) if exclude_file.is_relative() => dir.join(exclude_file),
                _ => exclude_file,
            };
            let patterns = read_pattern_file(&exclude_file)?;
            debug!(
                "Loaded {} exclude patterns from {}",
                patterns.len(),
                exclude_file.display()
            );
            config.internalize.exclude_patterns.extend(patterns);
        }

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Find and load the configuration that applies to this run
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.is_file() {
            return Self::load(&local);
        }

        if let Ok(strategy) = etcetera::choose_base_strategy() {
            let user = strategy.config_dir().join("repack").join(CONFIG_FILE_NAME);
            if user.is_file() {
                return Self::load(&user);
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }
}

/// Read exclude patterns, one per line; blank lines and `#` comments are skipped
pub fn read_pattern_file(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read exclude file {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_load_config_with_exclude_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("keep-public.txt"),
            "# types consumers bind to\n^Lib\\.Api\\.\n\n  Contracts  \n",
        )
        .unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &config_path,
            r#"
target-name = "App.Merged"

[internalize]
enabled = true
exclude = ["Plugins"]
exclude-patterns = ["Generated$"]
exclude-file = "keep-public.txt"
exclude-serializable = true
"#,
        )
        .unwrap();

        let config = Config::load(&config_path).unwrap();

        assert_eq!(config.target_name.as_deref(), Some("App.Merged"));
        assert_eq!(
            config.internalize,
            InternalizeConfig {
                enabled: true,
                include: Vec::new(),
                exclude: vec!["Plugins".to_owned()],
                exclude_patterns: vec![
                    "Generated$".to_owned(),
                    "^Lib\\.Api\\.".to_owned(),
                    "Contracts".to_owned(),
                ],
                exclude_file: None,
                exclude_serializable: true,
            }
        );
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILE_NAME);
        fs::write(&config_path, "[internalize]\nenable = true\n").unwrap();

        let err = Config::load(&config_path).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config file"));
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("absent.toml");
        assert!(Config::discover(Some(&missing)).is_err());
    }
}

use std::fs;
use std::path::{Path, PathBuf};

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

pub const DEFAULT_CONFIG_FILE: &str = "d3d9-game-host.toml";

///Runtime settings, read from a TOML file next to the host process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub log_dir: PathBuf,
    ///off, error, warn, info, debug or trace
    pub log_level: String,
    pub log_to_stdout: bool,
    ///Library that exports Direct3DCreate9.
    pub d3d9_library: String,
    pub run_demo: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            log_level: "debug".to_owned(),
            log_to_stdout: true,
            d3d9_library: "d3d9.dll".to_owned(),
            run_demo: true,
        }
    }
}

impl HostConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_owned(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigurationError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    ///Loads `path`, writing the defaults there first if it does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigurationError> {
        if !path.exists() {
            Self::default().save(path)?;
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigurationError> {
        let text = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigurationError::Io {
                path: parent.to_owned(),
                source,
            })?;
        }
        fs::write(path, text).map_err(|source| ConfigurationError::Io {
            path: path.to_owned(),
            source,
        })
    }

    ///The configured level, or Debug if it is not a level name.
    pub fn level_filter(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or(LevelFilter::Debug)
    }

    pub fn has_known_level(&self) -> bool {
        self.log_level.parse::<LevelFilter>().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(DEFAULT_CONFIG_FILE);

        let config = HostConfig::load_or_create(&path).unwrap();
        assert_eq!(config, HostConfig::default());
        assert!(path.exists());
        assert_eq!(HostConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn partial_files_keep_the_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "log_level = \"trace\"\nrun_demo = false\n").unwrap();

        let config = HostConfig::load_or_create(&path).unwrap();
        assert_eq!(
            config,
            HostConfig {
                log_level: "trace".into(),
                run_demo: false,
                ..Default::default()
            }
        );
        assert_eq!(config.level_filter(), LevelFilter::Trace);
    }

    #[test]
    fn unknown_level_falls_back_to_debug() {
        let config = HostConfig {
            log_level: "verbose".into(),
            ..Default::default()
        };
        assert_eq!(config.level_filter(), LevelFilter::Debug);
        assert!(!config.has_known_level());
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "log_to_stdout = \"sometimes\"").unwrap();

        assert!(matches!(
            HostConfig::load_or_create(&path),
            Err(ConfigurationError::Parse { .. })
        ));
    }
}

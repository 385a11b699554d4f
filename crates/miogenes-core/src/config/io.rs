//! Reading and writing the YAML config file

use super::PipelineConfig;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file could not be read or written
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("Failed to read config file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to serialize config")]
    Serialize(#[source] serde_yaml::Error),

    #[error("Failed to write config file {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PipelineConfig {
    /// Load from a YAML file.
    ///
    /// A missing file yields the defaults. A file that exists but cannot be
    /// read or parsed is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("PipelineConfig::load: No config at {:?}, using defaults", path);
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigFileError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config = serde_yaml::from_str(&contents).map_err(|source| ConfigFileError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("PipelineConfig::load: Loaded {:?}", path);
        Ok(config)
    }

    /// Write as YAML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigFileError> {
        let write_err = |source: io::Error| ConfigFileError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let yaml = serde_yaml::to_string(self).map_err(ConfigFileError::Serialize)?;
        std::fs::write(path, yaml).map_err(write_err)?;
        log::info!("PipelineConfig::save: Wrote {:?}", path);
        Ok(())
    }
}

//! Standard locations for the preprocessing config file

use std::path::PathBuf;

/// Get the default config directory
///
/// Returns: `<platform config dir>/miogenes`, falling back to `./.miogenes`
/// when the platform has no config directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("miogenes"))
        .unwrap_or_else(|| PathBuf::from(".").join(".miogenes"))
}

/// Get the default pipeline config path
///
/// Returns: `<config dir>/miogenes/prep.yaml`
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("prep.yaml")
}

//! Pipeline configuration
//!
//! One immutable [`PipelineConfig`] is built at start-up (YAML file plus
//! command-line overrides) and passed by reference into every component, so
//! independent pipelines with different constants can coexist in one process.
//!
//! # Usage
//!
//! ```ignore
//! use miogenes_core::config::{default_config_path, PipelineConfig};
//!
//! let config = PipelineConfig::load(&default_config_path())?;
//! config.validate()?;
//! ```

mod io;
mod paths;
mod pipeline;

pub use io::ConfigFileError;
pub use paths::{default_config_dir, default_config_path};
pub use pipeline::{
    AudioConfig, ConfigError, PathsConfig, PipelineConfig, ProbeBackend, ProbeConfig,
    SplitConfig, SplitPolicy, WindowConfig, WindowPolicy,
};

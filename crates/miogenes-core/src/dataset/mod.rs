//! Final dataset: four flat float32 arrays plus a JSON manifest

mod assemble;
pub mod manifest;
pub mod split;

pub use assemble::DatasetAssembler;
pub use manifest::{DatasetFiles, DatasetManifest, MANIFEST_FILE};
pub use split::{split_keys, Partition, SplitPlan};

use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Dataset assembly errors. All of them abort assembly.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("window store error")]
    Store(#[from] StoreError),

    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to memory-map {path}")]
    Map {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("window store changed during assembly: arrays sized for {expected} windows, store now holds {found}")]
    AssemblyCountMismatch { expected: usize, found: usize },

    #[error("{partition} row {row} was never written")]
    RowGap { partition: Partition, row: usize },

    #[error("manifest serialization failed")]
    Manifest(#[from] serde_json::Error),
}

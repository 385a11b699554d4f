//! JSON sidecar describing the raw dataset arrays
//!
//! The four `.f32` files carry no header; consumers read shapes from here.

use super::DatasetError;
use crate::config::SplitPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MANIFEST_FILE: &str = "dataset.json";
pub const FEATURES_TRAIN_FILE: &str = "features_train.f32";
pub const LABELS_TRAIN_FILE: &str = "labels_train.f32";
pub const FEATURES_TEST_FILE: &str = "features_test.f32";
pub const LABELS_TEST_FILE: &str = "labels_test.f32";

/// Output file names, relative to the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetFiles {
    pub features_train: String,
    pub labels_train: String,
    pub features_test: String,
    pub labels_test: String,
}

impl Default for DatasetFiles {
    fn default() -> Self {
        Self {
            features_train: FEATURES_TRAIN_FILE.to_string(),
            labels_train: LABELS_TRAIN_FILE.to_string(),
            features_test: FEATURES_TEST_FILE.to_string(),
            labels_test: LABELS_TEST_FILE.to_string(),
        }
    }
}

/// Shapes and provenance of an assembled dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub n_train: usize,
    pub n_test: usize,
    /// Samples per feature row
    pub audio_len: usize,
    /// Entries per label row
    pub n_labels: usize,
    pub sample_rate: u32,
    pub dtype: String,
    pub byte_order: String,
    pub split_policy: SplitPolicy,
    pub test_fraction: f64,
    pub seed: u64,
    pub files: DatasetFiles,
}

impl DatasetManifest {
    pub fn total(&self) -> usize {
        self.n_train + self.n_test
    }

    pub fn write(&self, dir: &Path) -> Result<(), DatasetError> {
        let path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).map_err(|source| DatasetError::Io { path, source })
    }

    pub fn read(dir: &Path) -> Result<Self, DatasetError> {
        let path = dir.join(MANIFEST_FILE);
        let json = std::fs::read_to_string(&path).map_err(|source| DatasetError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(serde_json::from_str(&json)?)
    }
}

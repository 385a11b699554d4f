//! Common types for Miogenes
//!
//! Fixed-field records passed between the pipeline stages. Each record is
//! created once and never mutated afterwards.

use std::path::PathBuf;

/// Default sample rate every track is decoded to (8 kHz)
pub const DEFAULT_SAMPLING_RATE: u32 = 8000;

/// Default window length in seconds
pub const DEFAULT_CAPTURE_SECONDS: u32 = 15;

/// Default distance between window starts (3.5 seconds at 8 kHz)
pub const DEFAULT_WINDOW_STEP: usize = 28_000;

/// Numeric track identifier, parsed from the file name
pub type TrackId = u64;

/// A discovered audio file whose genres all resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: TrackId,
    pub path: PathBuf,
    /// Dense genre indices in metadata order (may contain duplicates)
    pub categories: Vec<usize>,
}

/// Address of one window in the intermediate store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowKey {
    pub source_id: TrackId,
    pub window_index: u32,
}

impl WindowKey {
    pub fn new(source_id: TrackId, window_index: u32) -> Self {
        Self {
            source_id,
            window_index,
        }
    }
}

/// A fixed-length slice of a normalized waveform
///
/// Borrows from the decoded track so cutting windows never copies samples.
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    pub key: WindowKey,
    pub samples: &'a [f32],
}

/// One-hot (multi-hot) genre membership for a single track
#[derive(Debug, Clone, PartialEq)]
pub struct LabelVector {
    pub source_id: TrackId,
    pub onehot: Vec<f32>,
}

impl LabelVector {
    /// Encode resolved categories as set membership.
    ///
    /// Duplicates collapse. Callers guarantee every index is `< n_labels`
    /// (the genre index only hands out in-range indices).
    pub fn from_categories(source_id: TrackId, categories: &[usize], n_labels: usize) -> Self {
        let mut onehot = vec![0.0f32; n_labels];
        for &category in categories {
            onehot[category] = 1.0;
        }
        Self { source_id, onehot }
    }

    /// Indices set to 1.0
    pub fn positives(&self) -> Vec<usize> {
        self.onehot
            .iter()
            .enumerate()
            .filter(|(_, &v)| v > 0.0)
            .map(|(i, _)| i)
            .collect()
    }
}

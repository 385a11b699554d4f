//! Waveform normalization and windowing
//!
//! A decoded track is min-max normalized into `[0, 1]` and cut into windows
//! of `audio_len` samples, which go straight into the [`WindowStore`] along
//! with the track's label vector.

use crate::audio::{DecodeError, Decoder};
use crate::config::{WindowConfig, WindowPolicy};
use crate::store::{StoreError, WindowStore};
use crate::types::{CatalogEntry, LabelVector, Window, WindowKey};
use thiserror::Error;

/// Per-file extraction failures. Neither is cached as a bad id.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("decode failed")]
    Decode(#[from] DecodeError),

    #[error("window store write failed")]
    Store(#[from] StoreError),
}

/// What a successfully processed track produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// Windows and label written
    Extracted { windows: u32 },
    /// Zero dynamic range or non-numeric samples: no windows
    Silent,
    /// Fewer samples than one window: no windows
    TooShort { len: usize },
}

impl ExtractOutcome {
    pub fn windows(&self) -> u32 {
        match self {
            ExtractOutcome::Extracted { windows } => *windows,
            _ => 0,
        }
    }
}

/// Result of checking a waveform before cutting it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveformCheck {
    Usable,
    Silent,
    TooShort,
}

/// Min-max normalize in place.
///
/// Returns false, leaving the samples in an unspecified state, when the
/// waveform is constant, contains non-finite values or normalizes to NaN.
pub fn normalize(samples: &mut [f32]) -> bool {
    if samples.is_empty() {
        return false;
    }
    let (min, max) = samples
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &s| {
            (lo.min(s), hi.max(s))
        });
    let range = max - min;
    if range == 0.0 || !range.is_finite() {
        return false;
    }
    for sample in samples.iter_mut() {
        *sample = (*sample - min) / range;
    }
    !samples.iter().any(|s| s.is_nan())
}

/// Normalize and check that at least one window fits
pub fn prepare_waveform(samples: &mut [f32], audio_len: usize) -> WaveformCheck {
    if samples.is_empty() {
        return WaveformCheck::TooShort;
    }
    if !normalize(samples) {
        return WaveformCheck::Silent;
    }
    if samples.len() < audio_len {
        return WaveformCheck::TooShort;
    }
    WaveformCheck::Usable
}

/// Number of stride windows: `floor((len - audio_len) / step) + 1`, or 0
pub fn stride_window_count(len: usize, audio_len: usize, step: usize) -> usize {
    if len < audio_len || step == 0 {
        return 0;
    }
    (len - audio_len) / step + 1
}

/// Start offsets of every window for a track of `len` samples
pub fn window_starts(len: usize, audio_len: usize, config: &WindowConfig) -> Vec<usize> {
    if len < audio_len {
        return Vec::new();
    }
    let last = len - audio_len;
    match config.policy {
        WindowPolicy::Stride => {
            let count = stride_window_count(len, audio_len, config.step);
            (0..count).map(|i| i * config.step).collect()
        }
        WindowPolicy::Proportional => {
            let mut starts: Vec<usize> = config
                .offsets
                .iter()
                .map(|frac| ((frac * len as f64).floor() as usize).min(last))
                .collect();
            starts.sort_unstable();
            starts.dedup();
            starts
        }
    }
}

/// Decodes, normalizes and windows one catalog entry into the store
pub struct WindowExtractor<'a> {
    decoder: &'a dyn Decoder,
    store: &'a WindowStore,
    windows: &'a WindowConfig,
    sampling_rate: u32,
}

impl<'a> WindowExtractor<'a> {
    pub fn new(
        decoder: &'a dyn Decoder,
        store: &'a WindowStore,
        windows: &'a WindowConfig,
        sampling_rate: u32,
    ) -> Self {
        Self {
            decoder,
            store,
            windows,
            sampling_rate,
        }
    }

    pub fn audio_len(&self) -> usize {
        self.store.audio_len()
    }

    /// Process one track.
    ///
    /// Any earlier output for the id is purged first. Windows are written in
    /// index order, then the label, then the completion marker; a track that
    /// yields no windows still gets a marker so later runs skip it.
    pub fn extract(&self, entry: &CatalogEntry) -> Result<ExtractOutcome, ExtractError> {
        let audio = self.decoder.decode(&entry.path, self.sampling_rate)?;
        let mut samples = audio.samples;
        let audio_len = self.audio_len();

        self.store.purge(entry.id)?;

        let outcome = match prepare_waveform(&mut samples, audio_len) {
            WaveformCheck::Silent => ExtractOutcome::Silent,
            WaveformCheck::TooShort => ExtractOutcome::TooShort { len: samples.len() },
            WaveformCheck::Usable => {
                let starts = window_starts(samples.len(), audio_len, self.windows);
                for (index, &start) in starts.iter().enumerate() {
                    self.store.write_window(&Window {
                        key: WindowKey::new(entry.id, index as u32),
                        samples: &samples[start..start + audio_len],
                    })?;
                }
                let label = LabelVector::from_categories(
                    entry.id,
                    &entry.categories,
                    self.store.n_labels(),
                );
                self.store.write_label(&label)?;
                ExtractOutcome::Extracted {
                    windows: starts.len() as u32,
                }
            }
        };

        self.store.mark_done(entry.id, outcome.windows())?;

        log::debug!("extract: Track {} -> {:?}", entry.id, outcome);
        Ok(outcome)
    }
}

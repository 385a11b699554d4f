//! Audio decode and decodability probes
//!
//! Both capabilities sit behind traits so the pipeline can run against any
//! backend (and tests against synthetic ones).

mod decode;
mod error;
mod probe;
mod resample;

pub use decode::SymphoniaDecoder;
pub use error::{DecodeError, ProbeError};
pub use probe::{prober_for, FfmpegProber, SymphoniaProber};
pub use resample::resample_mono;

use std::path::Path;

/// A decoded track, downmixed to one channel
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode a file to mono at a fixed rate
pub trait Decoder: Send + Sync {
    fn decode(&self, path: &Path, target_rate: u32) -> Result<DecodedAudio, DecodeError>;
}

/// Outcome of a decodability check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeVerdict {
    Decodable,
    Undecodable(String),
}

impl ProbeVerdict {
    pub fn is_decodable(&self) -> bool {
        matches!(self, ProbeVerdict::Decodable)
    }
}

/// Decide whether a file can be decoded at all
pub trait Prober: Send + Sync {
    fn probe(&self, path: &Path) -> Result<ProbeVerdict, ProbeError>;
}

/// Average interleaved frames down to one channel
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

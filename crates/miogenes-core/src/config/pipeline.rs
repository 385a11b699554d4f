//! Configuration for one preprocessing run
//!
//! Stored as YAML. Every section falls back to defaults field by field, so a
//! config file only needs to mention what it changes.

use crate::types::{DEFAULT_CAPTURE_SECONDS, DEFAULT_SAMPLING_RATE, DEFAULT_WINDOW_STEP};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Invalid configuration values
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("sampling_rate must be positive")]
    ZeroSamplingRate,

    #[error("capture_seconds must be positive")]
    ZeroCaptureLength,

    #[error("window step must be positive")]
    ZeroWindowStep,

    #[error("proportional window policy needs at least one offset")]
    NoOffsets,

    #[error("window offset {0} is outside [0, 1)")]
    OffsetOutOfRange(f64),

    #[error("test_fraction {0} is outside [0, 1)")]
    TestFractionOutOfRange(f64),

    #[error("worker count must be positive")]
    ZeroWorkers,
}

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Decode target and window length
    pub audio: AudioConfig,
    /// How windows are cut from a track
    pub windows: WindowConfig,
    /// Train/test partitioning
    pub split: SplitConfig,
    /// Decodability check used by the validation phase
    pub probe: ProbeConfig,
    /// Output and cache locations
    pub paths: PathsConfig,
    /// Parallel workers per phase (None = one per available core)
    pub workers: Option<usize>,
    /// Raw genre ids in dense-index order (None = built-in FMA table)
    pub genres: Option<Vec<String>>,
    /// Delete intermediate windows once the dataset is assembled
    pub consume_windows: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            windows: WindowConfig::default(),
            split: SplitConfig::default(),
            probe: ProbeConfig::default(),
            paths: PathsConfig::default(),
            workers: None,
            genres: None,
            consume_windows: false,
        }
    }
}

impl PipelineConfig {
    /// Samples per window (`sampling_rate * capture_seconds`)
    pub fn audio_len(&self) -> usize {
        self.audio.sampling_rate as usize * self.audio.capture_seconds as usize
    }

    /// Effective worker count for each parallel phase
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn samples_dir(&self) -> PathBuf {
        self.paths.work_dir.join(&self.paths.samples_dir)
    }

    pub fn good_log_path(&self) -> PathBuf {
        self.paths.work_dir.join(&self.paths.good_log)
    }

    pub fn bad_log_path(&self) -> PathBuf {
        self.paths.work_dir.join(&self.paths.bad_log)
    }

    pub fn dataset_dir(&self) -> PathBuf {
        self.paths.work_dir.join(&self.paths.dataset_dir)
    }

    /// Check value ranges. Call once after loading and applying overrides.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audio.sampling_rate == 0 {
            return Err(ConfigError::ZeroSamplingRate);
        }
        if self.audio.capture_seconds == 0 {
            return Err(ConfigError::ZeroCaptureLength);
        }
        match self.windows.policy {
            WindowPolicy::Stride => {
                if self.windows.step == 0 {
                    return Err(ConfigError::ZeroWindowStep);
                }
            }
            WindowPolicy::Proportional => {
                if self.windows.offsets.is_empty() {
                    return Err(ConfigError::NoOffsets);
                }
                if let Some(&bad) = self
                    .windows
                    .offsets
                    .iter()
                    .find(|o| !(0.0..1.0).contains(*o))
                {
                    return Err(ConfigError::OffsetOutOfRange(bad));
                }
            }
        }
        if !(0.0..1.0).contains(&self.split.test_fraction) {
            return Err(ConfigError::TestFractionOutOfRange(self.split.test_fraction));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }
}

/// Decode target configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Every track is resampled to this rate (Hz)
    pub sampling_rate: u32,
    /// Window length in seconds
    pub capture_seconds: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sampling_rate: DEFAULT_SAMPLING_RATE,
            capture_seconds: DEFAULT_CAPTURE_SECONDS,
        }
    }
}

/// How window start positions are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowPolicy {
    /// Every `step` samples from offset 0 while a full window fits
    Stride,
    /// A fixed set of fractional offsets into the track
    Proportional,
}

/// Windowing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub policy: WindowPolicy,
    /// Distance between window starts in samples (stride policy)
    pub step: usize,
    /// Fractions of the track length where windows start (proportional policy)
    pub offsets: Vec<f64>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            policy: WindowPolicy::Stride,
            step: DEFAULT_WINDOW_STEP,
            offsets: vec![0.0, 0.25, 1.0 / 3.0, 0.5, 2.0 / 3.0],
        }
    }
}

/// How windows are divided between train and test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitPolicy {
    /// Seeded shuffle, the first `test_fraction` of windows go to test
    Shuffle,
    /// Every k-th window goes to test, k = round(1 / test_fraction)
    Interleave,
}

/// Train/test split configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub policy: SplitPolicy,
    /// Share of windows assigned to the test partition, in [0, 1)
    pub test_fraction: f64,
    /// Shuffle seed
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            policy: SplitPolicy::Shuffle,
            test_fraction: 0.1,
            seed: 0,
        }
    }
}

/// Which decodability check runs in the validation phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeBackend {
    /// Full trial decode in-process
    Symphonia,
    /// `ffmpeg -i <file> -f null -`, exit status decides
    Ffmpeg,
}

/// Probe configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub backend: ProbeBackend,
    /// Program invoked by the ffmpeg backend
    pub ffmpeg_program: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            backend: ProbeBackend::Symphonia,
            ffmpeg_program: String::from("ffmpeg"),
        }
    }
}

/// Output and cache locations, relative paths resolve against `work_dir`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub work_dir: PathBuf,
    /// Intermediate window store
    pub samples_dir: PathBuf,
    /// Validation cache log of decodable ids
    pub good_log: PathBuf,
    /// Validation cache log of undecodable ids
    pub bad_log: PathBuf,
    /// Where the four dataset arrays and the manifest are written
    pub dataset_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            samples_dir: PathBuf::from("samples"),
            good_log: PathBuf::from("good_ids.txt"),
            bad_log: PathBuf::from("bad_ids.txt"),
            dataset_dir: PathBuf::from("."),
        }
    }
}

//! Decode and probe error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while decoding a track
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to open audio file: {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("No audio track found")]
    NoAudioTrack,

    #[error("Unknown sample rate")]
    UnknownSampleRate,

    #[error("Corrupt audio stream: {0}")]
    Corrupt(String),

    #[error("Stream decoded to zero samples")]
    Empty,

    #[error("Resampling failed: {0}")]
    Resample(String),
}

/// The probe itself could not run. Never a verdict about the file.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Failed to run probe program '{program}'")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

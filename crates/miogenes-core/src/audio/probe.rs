//! Decodability probes

use super::{DecodeError, ProbeError, ProbeVerdict, Prober, SymphoniaDecoder};
use crate::config::{ProbeBackend, ProbeConfig};
use std::path::Path;
use std::process::{Command, Stdio};

/// Runs `ffmpeg -v error -i <path> -f null -`; exit status zero is decodable
#[derive(Debug, Clone)]
pub struct FfmpegProber {
    program: String,
}

impl FfmpegProber {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FfmpegProber {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Prober for FfmpegProber {
    fn probe(&self, path: &Path) -> Result<ProbeVerdict, ProbeError> {
        let status = Command::new(&self.program)
            .args(["-nostdin", "-v", "error", "-i"])
            .arg(path)
            .args(["-f", "null", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|source| ProbeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if status.success() {
            Ok(ProbeVerdict::Decodable)
        } else {
            Ok(ProbeVerdict::Undecodable(format!(
                "{} exited with {}",
                self.program, status
            )))
        }
    }
}

/// Full in-process trial decode with a strict decoder
#[derive(Debug, Clone, Copy)]
pub struct SymphoniaProber {
    decoder: SymphoniaDecoder,
}

impl Default for SymphoniaProber {
    fn default() -> Self {
        Self {
            decoder: SymphoniaDecoder::strict(),
        }
    }
}

impl Prober for SymphoniaProber {
    fn probe(&self, path: &Path) -> Result<ProbeVerdict, ProbeError> {
        match self.decoder.decode_native(path) {
            Ok(_) => Ok(ProbeVerdict::Decodable),
            // Not being able to open the file says nothing about its contents
            Err(DecodeError::Open { path, source }) => Err(ProbeError::Io { path, source }),
            Err(e) => Ok(ProbeVerdict::Undecodable(e.to_string())),
        }
    }
}

/// Build the prober selected in the configuration
pub fn prober_for(config: &ProbeConfig) -> Box<dyn Prober> {
    match config.backend {
        ProbeBackend::Symphonia => Box::new(SymphoniaProber::default()),
        ProbeBackend::Ffmpeg => Box::new(FfmpegProber::new(config.ffmpeg_program.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..4000 {
            writer.write_sample(((i % 100) * 200) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_symphonia_prober_verdicts() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("1.wav");
        let bad = dir.path().join("2.mp3");
        write_wav(&good);
        std::fs::write(&bad, [0xde, 0xad, 0xbe, 0xef].repeat(64)).unwrap();

        let prober = SymphoniaProber::default();
        assert_eq!(prober.probe(&good).unwrap(), ProbeVerdict::Decodable);
        assert!(!prober.probe(&bad).unwrap().is_decodable());
    }

    #[test]
    fn test_symphonia_prober_missing_file_is_error() {
        let prober = SymphoniaProber::default();
        assert!(matches!(
            prober.probe(Path::new("/nonexistent/3.wav")),
            Err(ProbeError::Io { .. })
        ));
    }

    #[test]
    fn test_ffmpeg_prober_missing_program_is_error() {
        let prober = FfmpegProber::new("miogenes-no-such-program");
        let err = prober.probe(Path::new("1.wav")).unwrap_err();
        assert!(matches!(err, ProbeError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_ffmpeg_prober_uses_exit_status() {
        let path = Path::new("1.wav");
        assert_eq!(
            FfmpegProber::new("true").probe(path).unwrap(),
            ProbeVerdict::Decodable
        );
        assert!(!FfmpegProber::new("false").probe(path).unwrap().is_decodable());
    }

    #[test]
    fn test_prober_for_backend() {
        let config = ProbeConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("4.wav");
        write_wav(&good);
        assert!(prober_for(&config).probe(&good).unwrap().is_decodable());
    }
}

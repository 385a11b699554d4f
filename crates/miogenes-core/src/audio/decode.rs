//! Symphonia-based decoder

use super::{downmix_to_mono, resample_mono, DecodeError, DecodedAudio, Decoder};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decodes anything symphonia can open, downmixes to mono and resamples.
///
/// In lenient mode (the default) a bad packet is logged and skipped and a
/// read error ends the stream early, so a slightly damaged track still yields
/// audio. Strict mode turns both into [`DecodeError::Corrupt`] and also
/// rejects streams that decode to nothing; the trial-decode probe uses it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaDecoder {
    strict: bool,
}

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self { strict: true }
    }

    /// Decode at the file's own sample rate. Returns mono samples and the rate.
    pub fn decode_native(&self, path: &Path) -> Result<DecodedAudio, DecodeError> {
        let file = File::open(path).map_err(|e| DecodeError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or(DecodeError::UnknownSampleRate)?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

        let mut samples: Vec<f32> = Vec::new();
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(e) if self.strict => return Err(DecodeError::Corrupt(e.to_string())),
                Err(e) => {
                    log::warn!("decode_native: Error reading packet in {:?}: {}", path, e);
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(e) if self.strict => return Err(DecodeError::Corrupt(e.to_string())),
                Err(e) => {
                    log::warn!("decode_native: Error decoding packet in {:?}: {}", path, e);
                    continue;
                }
            };

            let channels = decoded.spec().channels.count();
            let buf = sample_buf.get_or_insert_with(|| {
                SampleBuffer::new(decoded.capacity() as u64, *decoded.spec())
            });
            buf.copy_interleaved_ref(decoded);
            samples.extend(downmix_to_mono(buf.samples(), channels));
        }

        if self.strict && samples.is_empty() {
            return Err(DecodeError::Empty);
        }

        log::debug!(
            "decode_native: {:?} decoded to {} samples at {} Hz",
            path,
            samples.len(),
            sample_rate
        );

        Ok(DecodedAudio {
            samples,
            sample_rate,
        })
    }
}

impl Decoder for SymphoniaDecoder {
    fn decode(&self, path: &Path, target_rate: u32) -> Result<DecodedAudio, DecodeError> {
        let native = self.decode_native(path)?;
        let samples = resample_mono(&native.samples, native.sample_rate, target_rate)?;
        Ok(DecodedAudio {
            samples,
            sample_rate: target_rate,
        })
    }
}

//! Sample rate conversion with rubato

use super::DecodeError;
use rubato::{FftFixedIn, Resampler};

/// Input frames per FFT chunk
const CHUNK_FRAMES: usize = 1024;

/// Convert a mono signal from `from` Hz to `to` Hz.
///
/// The resampler's output delay is trimmed off and the result is cut to
/// `ceil(len * to / from)` samples, so the output lines up with the input.
pub fn resample_mono(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>, DecodeError> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let resample_err = |e: &dyn std::fmt::Display| DecodeError::Resample(e.to_string());

    let mut resampler = FftFixedIn::<f32>::new(from as usize, to as usize, CHUNK_FRAMES, 2, 1)
        .map_err(|e| resample_err(&e))?;

    let expected = (samples.len() as u64 * to as u64).div_ceil(from as u64) as usize;
    let delay = resampler.output_delay();

    let mut out = Vec::with_capacity(expected + delay + resampler.output_frames_max());
    let mut buf = vec![vec![0.0f32; resampler.output_frames_max()]; 1];

    let mut remaining = samples;
    while remaining.len() >= resampler.input_frames_next() {
        let (consumed, produced) = resampler
            .process_into_buffer(&[remaining], &mut buf, None)
            .map_err(|e| resample_err(&e))?;
        remaining = &remaining[consumed..];
        out.extend_from_slice(&buf[0][..produced]);
    }

    if !remaining.is_empty() {
        let tail = [remaining];
        let (_, produced) = resampler
            .process_partial_into_buffer(Some(&tail[..]), &mut buf, None)
            .map_err(|e| resample_err(&e))?;
        out.extend_from_slice(&buf[0][..produced]);
    }

    // Push zeros through until the delayed tail has come out
    while out.len() < expected + delay {
        let (_, produced) = resampler
            .process_partial_into_buffer(None::<&[&[f32]]>, &mut buf, None)
            .map_err(|e| resample_err(&e))?;
        if produced == 0 {
            break;
        }
        out.extend_from_slice(&buf[0][..produced]);
    }

    out.drain(..delay.min(out.len()));
    out.truncate(expected);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(rate: u32, secs: f32, freq: f32) -> Vec<f32> {
        let n = (rate as f32 * secs) as usize;
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_same_rate_is_identity() {
        let input = sine(8000, 0.5, 440.0);
        assert_eq!(resample_mono(&input, 8000, 8000).unwrap(), input);
    }

    #[test]
    fn test_output_length() {
        let input = sine(44_100, 1.0, 440.0);
        assert_eq!(resample_mono(&input, 44_100, 8000).unwrap().len(), 8000);

        let input = sine(16_000, 0.3, 440.0);
        assert_eq!(resample_mono(&input, 16_000, 8000).unwrap().len(), 2400);

        // Odd lengths round up
        let input = vec![0.0f32; 1001];
        assert_eq!(resample_mono(&input, 16_000, 8000).unwrap().len(), 501);
    }

    #[test]
    fn test_downsampled_sine_keeps_amplitude() {
        let input = sine(22_050, 2.0, 440.0);
        let output = resample_mono(&input, 22_050, 8000).unwrap();
        let middle = &output[4000..12_000];
        let peak = middle.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((0.9..1.1).contains(&peak), "peak {}", peak);
    }
}

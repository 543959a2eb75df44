//! General-purpose audio decoding.
//!
//! Uses symphonia for format-agnostic decoding (OGG/Vorbis, FLAC, MP3, AAC, WAV, ...)
//! and rubato to bring the result to the canonical 44.1kHz.

use anyhow::{anyhow, Context, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// Decoded, down-mixed audio.
#[derive(Debug, Clone)]
pub struct MonoAudio {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Channel count of the source before down-mixing
    pub source_channels: usize,
}

impl MonoAudio {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode an in-memory byte buffer.
pub fn decode_bytes(data: Vec<u8>, extension_hint: Option<&str>) -> Result<MonoAudio> {
    decode_source(Box::new(Cursor::new(data)), extension_hint)
}

/// Decode an audio file from disk.
pub fn decode_file(path: &Path) -> Result<MonoAudio> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
    let extension = path.extension().and_then(|e| e.to_str());
    decode_source(Box::new(file), extension)
}

fn decode_source(source: Box<dyn MediaSource>, extension_hint: Option<&str>) -> Result<MonoAudio> {
    let mss = MediaSourceStream::new(source, Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = extension_hint {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .context("Failed to probe audio container")?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No audio track found")?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.context("Sample rate unknown")?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("No decoder for this codec")?;

    let mut samples: Vec<f32> = Vec::new();
    let mut source_channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);
    let mut interleaved: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(anyhow!("Error reading packet: {}", e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // A corrupt packet is skipped; anything else ends the decode
            Err(SymphoniaError::DecodeError(msg)) => {
                debug!(error = %msg, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(anyhow!("Decoder failed: {}", e)),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        source_channels = channels;

        let needs_new_buffer = interleaved
            .as_ref()
            .map_or(true, |buf| buf.capacity() < decoded.capacity() * channels);
        if needs_new_buffer {
            interleaved = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        }

        if let Some(buf) = interleaved.as_mut() {
            buf.copy_interleaved_ref(decoded);
            samples.extend(downmix(buf.samples(), channels));
        }
    }

    if samples.is_empty() {
        return Err(anyhow!("Decoded stream contains no samples"));
    }

    debug!(
        sample_rate = sample_rate,
        channels = source_channels,
        total_samples = samples.len(),
        "Audio decoding complete"
    );

    Ok(MonoAudio {
        samples,
        sample_rate,
        source_channels,
    })
}

/// Average interleaved frames down to one channel.
fn downmix(interleaved: &[f32], channels: usize) -> impl Iterator<Item = f32> + '_ {
    interleaved
        .chunks_exact(channels)
        .map(move |frame| frame.iter().sum::<f32>() / channels as f32)
}

/// Resample mono audio to `target_rate`.
///
/// Returns the input untouched when it is already at the target rate.
pub fn resample(audio: MonoAudio, target_rate: u32) -> Result<MonoAudio> {
    if audio.sample_rate == target_rate {
        return Ok(audio);
    }

    debug!("Resampling from {}Hz to {}Hz", audio.sample_rate, target_rate);

    let input_frames = audio.samples.len();
    if input_frames == 0 {
        return Err(anyhow!("Nothing to resample"));
    }

    let mut resampler = FastFixedIn::<f32>::new(
        target_rate as f64 / audio.sample_rate as f64,
        1.0,
        PolynomialDegree::Septic,
        input_frames,
        1,
    )
    .map_err(|e| anyhow!("Failed to create resampler: {}", e))?;

    let planar_input = vec![audio.samples];
    let planar_output = resampler
        .process(&planar_input, None)
        .map_err(|e| anyhow!("Resampling failed: {}", e))?;

    let samples = planar_output.into_iter().next().unwrap_or_default();
    if samples.is_empty() {
        return Err(anyhow!("Resampling produced no samples"));
    }

    Ok(MonoAudio {
        samples,
        sample_rate: target_rate,
        source_channels: audio.source_channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::{encode_test_wav, sine};

    #[test]
    fn test_decode_downmixes_stereo() {
        let left = sine(440.0, 0.5, 22050, 0.5);
        let right = vec![0.0f32; left.len()];
        let bytes = encode_test_wav(&[left.clone(), right], 22050);

        let audio = decode_bytes(bytes, Some("wav")).unwrap();
        assert_eq!(audio.sample_rate, 22050);
        assert_eq!(audio.source_channels, 2);
        assert_eq!(audio.samples.len(), left.len());
        // Averaging with a silent channel halves the amplitude
        let peak = audio.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - 0.25).abs() < 0.01, "peak was {}", peak);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let garbage = b"definitely not an audio container".to_vec();
        assert!(decode_bytes(garbage, None).is_err());
    }

    #[test]
    fn test_decode_rejects_empty_input() {
        assert!(decode_bytes(Vec::new(), Some("ogg")).is_err());
    }

    #[test]
    fn test_resample_changes_length_proportionally() {
        let audio = MonoAudio {
            samples: sine(220.0, 1.0, 48000, 0.5),
            sample_rate: 48000,
            source_channels: 1,
        };
        let resampled = resample(audio, 44100).unwrap();
        assert_eq!(resampled.sample_rate, 44100);
        let expected = 44100.0;
        let actual = resampled.samples.len() as f64;
        assert!((actual - expected).abs() / expected < 0.01, "got {} samples", actual);
    }

    #[test]
    fn test_resample_is_noop_at_target_rate() {
        let samples = sine(220.0, 0.1, 44100, 0.5);
        let audio = MonoAudio {
            samples: samples.clone(),
            sample_rate: 44100,
            source_channels: 1,
        };
        assert_eq!(resample(audio, 44100).unwrap().samples, samples);
    }
}

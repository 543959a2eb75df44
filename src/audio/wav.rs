//! Canonical WAV encoding: mono, 16-bit PCM, 44.1kHz.

use anyhow::{anyhow, Context, Result};
use std::io::Cursor;

/// Sample rate every normalized file is written at.
pub const CANONICAL_SAMPLE_RATE: u32 = 44100;
pub const CANONICAL_CHANNELS: u16 = 1;
pub const CANONICAL_BIT_DEPTH: u16 = 16;

/// Scale [-1.0, 1.0] floats to 16-bit PCM.
pub fn float_to_pcm(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            let scaled = sample * 32768.0;
            scaled.clamp(-32768.0, 32767.0) as i16
        })
        .collect()
}

/// Encode mono float samples as a 16-bit PCM WAV file.
pub fn encode_mono_pcm16(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    if samples.is_empty() {
        return Err(anyhow!("Refusing to encode a WAV file with no samples"));
    }

    let header = wav::Header::new(
        wav::header::WAV_FORMAT_PCM,
        CANONICAL_CHANNELS,
        sample_rate,
        CANONICAL_BIT_DEPTH,
    );
    let track = wav::BitDepth::Sixteen(float_to_pcm(samples));

    let mut out = Cursor::new(Vec::new());
    wav::write(header, &track, &mut out).context("Failed to write WAV data")?;
    Ok(out.into_inner())
}

/// Number of samples (all channels) in a WAV file.
pub fn sample_count(bytes: &[u8]) -> Result<usize> {
    let (_, data) = wav::read(&mut Cursor::new(bytes)).context("Not a readable WAV file")?;
    Ok(match data {
        wav::BitDepth::Eight(s) => s.len(),
        wav::BitDepth::Sixteen(s) => s.len(),
        wav::BitDepth::TwentyFour(s) => s.len(),
        wav::BitDepth::ThirtyTwoFloat(s) => s.len(),
        wav::BitDepth::Empty => 0,
    })
}

/// Test fixtures shared by the audio, transcription and pipeline tests.
#[cfg(test)]
pub mod fixtures {
    use super::*;

    /// A sine tone in [-amplitude, amplitude].
    pub fn sine(freq: f32, seconds: f32, sample_rate: u32, amplitude: f32) -> Vec<f32> {
        let n = (seconds * sample_rate as f32).round() as usize;
        (0..n)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                amplitude * (2.0 * std::f32::consts::PI * freq * t).sin()
            })
            .collect()
    }

    /// Encode one or more equally long channels as 16-bit PCM WAV.
    pub fn encode_test_wav(channels: &[Vec<f32>], sample_rate: u32) -> Vec<u8> {
        let frames = channels[0].len();
        let mut interleaved = Vec::with_capacity(frames * channels.len());
        for i in 0..frames {
            for channel in channels {
                interleaved.push(channel[i]);
            }
        }

        let header = wav::Header::new(
            wav::header::WAV_FORMAT_PCM,
            channels.len() as u16,
            sample_rate,
            16,
        );
        let mut out = Cursor::new(Vec::new());
        wav::write(header, &wav::BitDepth::Sixteen(float_to_pcm(&interleaved)), &mut out)
            .unwrap();
        out.into_inner()
    }

    /// A 44-byte WAV: canonical header, empty `data` chunk.
    pub fn header_only_wav() -> Vec<u8> {
        let mut out = Vec::with_capacity(44);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&36u32.to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&44100u32.to_le_bytes());
        out.extend_from_slice(&(44100u32 * 2).to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&0u32.to_le_bytes());
        out
    }

    /// Parse a WAV file back into its header and 16-bit samples.
    pub fn read_pcm16(bytes: &[u8]) -> (wav::Header, Vec<i16>) {
        let (header, data) = wav::read(&mut Cursor::new(bytes.to_vec())).unwrap();
        match data {
            wav::BitDepth::Sixteen(samples) => (header, samples),
            _ => panic!("expected 16-bit PCM"),
        }
    }
}

#[cfg(test)]
pub use fixtures::{encode_test_wav, header_only_wav, read_pcm16, sine};

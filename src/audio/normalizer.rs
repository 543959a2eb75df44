//! # Format Normalizer
//!
//! Turns whatever the client uploaded into canonical audio: mono, 16-bit PCM, 44.1kHz,
//! inside a WAV container.
//!
//! ## Strategy chain (first success wins):
//! 1. **Passthrough**: declared WAV types are trusted as-is, byte for byte
//! 2. **Decoded**: in-process decode with symphonia, resampled and re-encoded
//! 3. **Transcoded**: browser-recorded containers go through the external transcoder
//!
//! A strategy either produces canonical bytes, declines (it does not apply, or a
//! recoverable decode failure), or fails hard. Only the transcoder fails hard, so that
//! a missing or failing tool is never reported as an unsupported format. No strategy
//! hands on audio without samples.

use crate::audio::decode::{decode_bytes, resample};
use crate::audio::mime::DeclaredMime;
use crate::audio::transcoder::Transcoder;
use crate::audio::wav::{encode_mono_pcm16, CANONICAL_SAMPLE_RATE};
use crate::error::{AppError, AppResult};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

/// Which strategy produced the canonical audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    Passthrough,
    Decoded,
    Transcoded,
}

impl Normalization {
    /// The fallback chain, in the order strategies are tried.
    const CHAIN: [Normalization; 3] = [
        Normalization::Passthrough,
        Normalization::Decoded,
        Normalization::Transcoded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Normalization::Passthrough => "passthrough",
            Normalization::Decoded => "decoded",
            Normalization::Transcoded => "transcoded",
        }
    }
}

/// Canonical WAV bytes plus the strategy that made them.
#[derive(Debug, Clone)]
pub struct NormalizedAudio {
    pub bytes: Vec<u8>,
    pub strategy: Normalization,
}

enum Attempt {
    Produced(Vec<u8>),
    Declined(String),
}

pub struct FormatNormalizer {
    transcoder: Transcoder,
    container_mime_types: Vec<String>,
}

impl FormatNormalizer {
    pub fn new(transcoder: Transcoder, container_mime_types: Vec<String>) -> Self {
        Self {
            transcoder,
            container_mime_types,
        }
    }

    pub fn transcoder(&self) -> &Transcoder {
        &self.transcoder
    }

    /// Normalize `data` declared as `mime`. Transcoder temporaries go to `scratch_dir`.
    ///
    /// Fails with `Format` when no strategy applies, and with `TranscoderUnavailable` /
    /// `TranscodingFailed` when the transcoder was needed and could not deliver.
    pub fn normalize(
        &self,
        data: &[u8],
        mime: &DeclaredMime,
        scratch_dir: &Path,
    ) -> AppResult<NormalizedAudio> {
        if data.is_empty() {
            debug!(mime = %mime.raw(), "Rejecting empty upload");
            return Err(AppError::Format {
                mime: mime.raw().to_string(),
            });
        }

        for strategy in Normalization::CHAIN {
            match self.attempt(strategy, data, mime, scratch_dir)? {
                Attempt::Produced(bytes) => {
                    info!(
                        mime = %mime.raw(),
                        strategy = strategy.as_str(),
                        input_bytes = data.len(),
                        output_bytes = bytes.len(),
                        "Audio normalized"
                    );
                    return Ok(NormalizedAudio { bytes, strategy });
                }
                Attempt::Declined(reason) => {
                    debug!(mime = %mime.raw(), strategy = strategy.as_str(), %reason, "Strategy declined");
                }
            }
        }

        Err(AppError::Format {
            mime: mime.raw().to_string(),
        })
    }

    fn attempt(
        &self,
        strategy: Normalization,
        data: &[u8],
        mime: &DeclaredMime,
        scratch_dir: &Path,
    ) -> AppResult<Attempt> {
        match strategy {
            Normalization::Passthrough => {
                if mime.is_wav() {
                    Ok(Attempt::Produced(data.to_vec()))
                } else {
                    Ok(Attempt::Declined("not a WAV type".to_string()))
                }
            }
            Normalization::Decoded => Ok(match decode_to_canonical(data, mime) {
                Ok(bytes) => Attempt::Produced(bytes),
                Err(e) => Attempt::Declined(format!("{:#}", e)),
            }),
            Normalization::Transcoded => {
                if !mime.is_one_of(&self.container_mime_types) {
                    return Ok(Attempt::Declined("not a transcoder container".to_string()));
                }
                self.transcoder.transcode(data, scratch_dir).map(Attempt::Produced)
            }
        }
    }
}

fn decode_to_canonical(data: &[u8], mime: &DeclaredMime) -> anyhow::Result<Vec<u8>> {
    let decoded = decode_bytes(data.to_vec(), mime.extension_hint())?;
    let canonical = resample(decoded, CANONICAL_SAMPLE_RATE)?;
    encode_mono_pcm16(&canonical.samples, canonical.sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::transcoder::leftover_temp_files;
    use crate::audio::wav::{encode_test_wav, read_pcm16, sine};
    use std::time::Duration;

    /// 0.5 s of a 440 Hz tone, mono 16-bit FLAC at 22.05 kHz.
    const FLAC_TONE: &[u8] =
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/tone_440hz_22050.flac"));

    fn normalizer(program: &str) -> FormatNormalizer {
        FormatNormalizer::new(
            Transcoder::new(program, Duration::from_secs(30)),
            vec!["audio/webm".to_string(), "audio/ogg".to_string()],
        )
    }

    #[test]
    fn test_wav_is_passed_through_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let n = normalizer("ffmpeg");
        let bytes = encode_test_wav(&[sine(440.0, 0.2, 22050, 0.5)], 22050);

        for declared in ["audio/wav", "audio/x-wav"] {
            let out = n.normalize(&bytes, &DeclaredMime::parse(declared), dir.path()).unwrap();
            assert_eq!(out.strategy, Normalization::Passthrough);
            assert_eq!(out.bytes, bytes);
        }

        // Passthrough does not validate: garbage declared as WAV is accepted as-is
        let out = n
            .normalize(b"not really wav", &DeclaredMime::parse("audio/wav"), dir.path())
            .unwrap();
        assert_eq!(out.bytes, b"not really wav");
    }

    #[test]
    fn test_empty_input_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let n = normalizer("ffmpeg");

        for declared in ["audio/wav", "audio/ogg", "audio/webm", "audio/flac"] {
            let err = n.normalize(&[], &DeclaredMime::parse(declared), dir.path()).unwrap_err();
            assert!(matches!(err, AppError::Format { .. }), "got {:?}", err);
        }
    }

    #[test]
    fn test_decoded_audio_is_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let n = normalizer("no-such-transcoder-3f9a");
        let left = sine(440.0, 0.5, 48000, 0.5);
        let right = sine(660.0, 0.5, 48000, 0.5);
        let bytes = encode_test_wav(&[left, right], 48000);

        let out = n.normalize(&bytes, &DeclaredMime::parse("audio/ogg"), dir.path()).unwrap();
        assert_eq!(out.strategy, Normalization::Decoded);

        let (header, pcm) = read_pcm16(&out.bytes);
        assert_eq!(header.channel_count, 1);
        assert_eq!(header.bits_per_sample, 16);
        assert_eq!(header.sampling_rate, 44100);
        let expected = 0.5 * 44100.0;
        assert!((pcm.len() as f64 - expected).abs() / expected < 0.02);
    }

    #[test]
    fn test_flac_is_decoded_to_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let n = normalizer("no-such-transcoder-3f9a");

        for declared in ["audio/flac", "audio/x-flac"] {
            let out = n.normalize(FLAC_TONE, &DeclaredMime::parse(declared), dir.path()).unwrap();
            assert_eq!(out.strategy, Normalization::Decoded);

            let (header, pcm) = read_pcm16(&out.bytes);
            assert_eq!(header.channel_count, 1);
            assert_eq!(header.sampling_rate, 44100);
            let expected = 0.5 * 44100.0;
            assert!((pcm.len() as f64 - expected).abs() / expected < 0.02, "{}", pcm.len());
            assert!(pcm.iter().any(|&s| s.unsigned_abs() > 8000));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_transcoder_output_without_samples_is_not_accepted() {
        use crate::process::fake_program;
        use crate::audio::wav::header_only_wav;

        let bin_dir = tempfile::tempdir().unwrap();
        let header = bin_dir.path().join("header.wav");
        std::fs::write(&header, header_only_wav()).unwrap();
        let script = fake_program(
            bin_dir.path(),
            "fake-ffmpeg",
            &format!("cp \"{}\" \"$last\"", header.display()),
        );

        let dir = tempfile::tempdir().unwrap();
        let n = normalizer(&script.to_string_lossy());
        let err = n
            .normalize(b"opus frames nobody can decode", &DeclaredMime::parse("audio/webm"), dir.path())
            .unwrap_err();
        assert!(matches!(err, AppError::TranscodingFailed(_)), "got {:?}", err);
        assert_eq!(leftover_temp_files(dir.path()), 0);
    }

    #[test]
    fn test_unknown_type_is_a_format_error_with_the_mime() {
        let dir = tempfile::tempdir().unwrap();
        let n = normalizer("no-such-transcoder-3f9a");

        let err = n
            .normalize(b"\x00\x01\x02garbage", &DeclaredMime::parse("audio/x-unknown"), dir.path())
            .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported audio format: audio/x-unknown");
    }

    #[test]
    fn test_missing_transcoder_is_not_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let n = normalizer("no-such-transcoder-3f9a");

        let err = n
            .normalize(
                b"opus frames nobody can decode",
                &DeclaredMime::parse("audio/webm;codecs=opus"),
                dir.path(),
            )
            .unwrap_err();
        assert!(matches!(err, AppError::TranscoderUnavailable(_)), "got {:?}", err);
        assert_eq!(leftover_temp_files(dir.path()), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_transcoder_is_reported_as_such() {
        let dir = tempfile::tempdir().unwrap();
        let n = normalizer("false");

        let err = n
            .normalize(b"opus frames nobody can decode", &DeclaredMime::parse("audio/webm"), dir.path())
            .unwrap_err();
        assert!(matches!(err, AppError::TranscodingFailed(_)), "got {:?}", err);
        assert_eq!(leftover_temp_files(dir.path()), 0);
    }
}

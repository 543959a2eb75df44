//! # Built-in Spectral Note Model
//!
//! An in-process polyphonic pitch tracker over the 88 piano keys, driven by candle.
//!
//! ## Pipeline:
//! 1. **Framing**: hop of 256 samples at 22.05kHz (scaled to the input rate, ~11.6ms),
//!    Hann window of 8 hops, frames centred on their hop
//! 2. **Projection**: one matmul of the frame matrix against a windowed cos|sin basis,
//!    one column pair per MIDI pitch 21..=108, giving per-pitch magnitudes
//! 3. **Activations**: magnitudes normalised by the clip maximum; a pitch only stays
//!    active in a frame where it is a local peak across neighbouring pitches
//! 4. **Onsets**: how far a pitch's activation rose above its minimum over the
//!    preceding onset window
//! 5. **Note tracking**: onset peaks start notes, which are backtracked and extended
//!    on the frame activation, split at re-articulations and dropped when too short
//!
//! Clips whose loudest partial stays below -60 dBFS produce no notes.

use crate::audio::decode::{decode_file, MonoAudio};
use crate::transcription::backend::{InferenceBackend, PredictOptions, ICASSP_2022_MODEL};
use crate::transcription::midi::{write_notes, NoteEvent};
use anyhow::{anyhow, Context, Result};
use candle_core::{Device, Tensor};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

pub const LOWEST_PITCH: u8 = 21;
pub const PITCH_COUNT: usize = 88;

/// Hop length at the reference rate of 22.05kHz.
const REFERENCE_HOP: f64 = 256.0;
const REFERENCE_RATE: f64 = 22050.0;
const WINDOW_HOPS: usize = 8;

/// Frames per matmul; bounds the frame matrix to a few MB.
const FRAMES_PER_CHUNK: usize = 256;

/// Absolute magnitude below which a clip counts as silent (-60 dBFS).
const SILENCE_FLOOR: f32 = 1e-3;

/// Frames looked back over when measuring an onset.
const ONSET_WINDOW: usize = 8;
/// Sub-threshold frames tolerated inside a note.
const MAX_GAP_FRAMES: usize = 11;
/// Shortest note kept (~128ms).
const MIN_NOTE_FRAMES: usize = 11;

/// Frame-level outputs of the model.
#[derive(Debug, Clone)]
pub struct Activations {
    /// `[frame][pitch]`, in 0..=1
    pub frames: Vec<Vec<f32>>,
    /// `[frame][pitch]`, in 0..=1
    pub onsets: Vec<Vec<f32>>,
    pub frame_seconds: f64,
}

impl Activations {
    fn silent(frame_count: usize, frame_seconds: f64) -> Self {
        Self {
            frames: vec![vec![0.0; PITCH_COUNT]; frame_count],
            onsets: vec![vec![0.0; PITCH_COUNT]; frame_count],
            frame_seconds,
        }
    }
}

pub struct SpectralNoteModel {
    device: Device,
}

impl SpectralNoteModel {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Frame and onset activations for a clip.
    pub fn activations(&self, audio: &MonoAudio) -> Result<Activations> {
        if audio.sample_rate == 0 {
            return Err(anyhow!("Audio has no sample rate"));
        }
        let hop = hop_length(audio.sample_rate);
        let frame_seconds = hop as f64 / audio.sample_rate as f64;

        let magnitudes = self.magnitudes(&audio.samples, audio.sample_rate)?;
        let peak = magnitudes
            .iter()
            .flat_map(|row| row.iter().copied())
            .fold(0.0f32, f32::max);
        if peak < SILENCE_FLOOR {
            debug!(peak, "Clip is silent");
            return Ok(Activations::silent(magnitudes.len(), frame_seconds));
        }

        let frames: Vec<Vec<f32>> = magnitudes
            .iter()
            .map(|row| suppress_non_peaks(row, peak))
            .collect();
        let onsets = onset_strengths(&frames);

        Ok(Activations {
            frames,
            onsets,
            frame_seconds,
        })
    }

    /// Detect notes in a clip.
    pub fn transcribe(&self, audio: &MonoAudio, options: &PredictOptions) -> Result<Vec<NoteEvent>> {
        let activations = self.activations(audio)?;
        Ok(track_notes(&activations, options))
    }

    /// Per-pitch magnitudes, `[frame][pitch]`, scaled so a full-scale sine reads 1.0.
    fn magnitudes(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<Vec<f32>>> {
        let hop = hop_length(sample_rate);
        let window = hop * WINDOW_HOPS;
        let half = window / 2;
        let frame_count = samples.len() / hop + 1;

        let hann = hann_window(window);
        let scale = 2.0 / hann.iter().map(|&w| w as f64).sum::<f64>();
        let basis = Tensor::from_vec(
            pitch_basis(sample_rate, &hann),
            (window, 2 * PITCH_COUNT),
            &self.device,
        )?;

        let mut rows = Vec::with_capacity(frame_count);
        for chunk_start in (0..frame_count).step_by(FRAMES_PER_CHUNK) {
            let count = FRAMES_PER_CHUNK.min(frame_count - chunk_start);
            let mut data = vec![0.0f32; count * window];

            for f in 0..count {
                // Window covers samples [center - half, center + half)
                let center = (chunk_start + f) * hop;
                let first = center.saturating_sub(half);
                let last = (center + half).min(samples.len());
                if first >= last {
                    continue;
                }
                let offset = first + half - center;
                let row = &mut data[f * window..(f + 1) * window];
                row[offset..offset + (last - first)].copy_from_slice(&samples[first..last]);
            }

            let frames = Tensor::from_vec(data, (count, window), &self.device)?;
            let projected = frames.matmul(&basis)?;
            let re = projected.narrow(1, 0, PITCH_COUNT)?;
            let im = projected.narrow(1, PITCH_COUNT, PITCH_COUNT)?;
            let magnitude = (re.sqr()? + im.sqr()?)?.sqrt()?.affine(scale, 0.0)?;
            rows.extend(magnitude.to_vec2::<f32>()?);
        }

        Ok(rows)
    }
}

impl InferenceBackend for SpectralNoteModel {
    fn name(&self) -> &str {
        "builtin"
    }

    fn predict_and_save(
        &self,
        audio_paths: &[PathBuf],
        output_dir: &Path,
        options: &PredictOptions,
    ) -> Result<()> {
        if options.model != ICASSP_2022_MODEL {
            return Err(anyhow!(
                "builtin backend only provides '{}', not '{}'",
                ICASSP_2022_MODEL,
                options.model
            ));
        }
        if options.save_model_outputs {
            warn!("Builtin backend does not persist model outputs");
        }

        for path in audio_paths {
            let started = Instant::now();
            let audio = decode_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            let notes = self.transcribe(&audio, options)?;

            info!(
                file = %path.display(),
                audio_seconds = audio.duration_seconds(),
                notes = notes.len(),
                duration_ms = started.elapsed().as_millis() as u64,
                "Builtin inference finished"
            );

            if options.save_midi {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "audio".to_string());
                write_notes(&notes, &output_dir.join(format!("{}_transcription.mid", stem)))?;
            }
        }
        Ok(())
    }
}

fn hop_length(sample_rate: u32) -> usize {
    ((sample_rate as f64 * REFERENCE_HOP / REFERENCE_RATE).round() as usize).max(1)
}

pub fn pitch_frequency(pitch: u8) -> f64 {
    440.0 * 2f64.powf((pitch as f64 - 69.0) / 12.0)
}

fn hann_window(length: usize) -> Vec<f32> {
    (0..length)
        .map(|k| {
            let phase = 2.0 * std::f64::consts::PI * k as f64 / length as f64;
            (0.5 - 0.5 * phase.cos()) as f32
        })
        .collect()
}

/// Row-major `[window][2 * PITCH_COUNT]`: windowed cosines, then windowed sines.
fn pitch_basis(sample_rate: u32, hann: &[f32]) -> Vec<f32> {
    let width = 2 * PITCH_COUNT;
    let nyquist = sample_rate as f64 / 2.0;
    let mut basis = vec![0.0f32; hann.len() * width];

    for p in 0..PITCH_COUNT {
        let freq = pitch_frequency(LOWEST_PITCH + p as u8);
        if freq >= nyquist {
            continue;
        }
        let step = 2.0 * std::f64::consts::PI * freq / sample_rate as f64;
        for (k, &w) in hann.iter().enumerate() {
            let phase = step * k as f64;
            basis[k * width + p] = w * phase.cos() as f32;
            basis[k * width + PITCH_COUNT + p] = w * phase.sin() as f32;
        }
    }
    basis
}

/// Normalise a magnitude row and zero every pitch that is not a local peak.
fn suppress_non_peaks(row: &[f32], peak: f32) -> Vec<f32> {
    (0..row.len())
        .map(|p| {
            let v = row[p];
            let above_lower = p == 0 || v > row[p - 1];
            let above_upper = p + 1 == row.len() || v >= row[p + 1];
            if above_lower && above_upper {
                (v / peak).min(1.0)
            } else {
                0.0
            }
        })
        .collect()
}

/// Rise of each activation over its minimum in the preceding window (frames before
/// the clip count as silent).
fn onset_strengths(frames: &[Vec<f32>]) -> Vec<Vec<f32>> {
    (0..frames.len())
        .map(|i| {
            (0..PITCH_COUNT)
                .map(|p| {
                    let floor = if i < ONSET_WINDOW {
                        0.0
                    } else {
                        frames[i - ONSET_WINDOW..i]
                            .iter()
                            .map(|row| row[p])
                            .fold(f32::INFINITY, f32::min)
                    };
                    (frames[i][p] - floor).max(0.0)
                })
                .collect()
        })
        .collect()
}

fn is_onset_peak(onsets: &[Vec<f32>], i: usize, p: usize, threshold: f32) -> bool {
    let v = onsets[i][p];
    let before = if i == 0 { 0.0 } else { onsets[i - 1][p] };
    let after = onsets.get(i + 1).map_or(0.0, |row| row[p]);
    v >= threshold && v > before && v >= after
}

/// Turn activations into notes, pitch by pitch.
fn track_notes(activations: &Activations, options: &PredictOptions) -> Vec<NoteEvent> {
    let frames = &activations.frames;
    let onsets = &activations.onsets;
    let n = frames.len();
    let mut notes = Vec::new();

    for p in 0..PITCH_COUNT {
        let starts_note =
            |i: usize| is_onset_peak(onsets, i, p, options.onset_threshold) && frames[i][p] >= options.frame_threshold;

        // Earliest frame a note may backtrack to
        let mut floor = 0;
        let mut i = 0;
        while i < n {
            if !starts_note(i) {
                i += 1;
                continue;
            }

            let mut start = i;
            while start > floor && frames[start - 1][p] >= options.frame_threshold {
                start -= 1;
            }

            let mut end = i + 1;
            let mut gap = 0;
            let mut rearticulation = None;
            let mut j = i + 1;
            while j < n {
                if j >= i + ONSET_WINDOW && starts_note(j) {
                    rearticulation = Some(j);
                    break;
                }
                if frames[j][p] >= options.frame_threshold {
                    end = j + 1;
                    gap = 0;
                } else {
                    gap += 1;
                    if gap > MAX_GAP_FRAMES {
                        break;
                    }
                }
                j += 1;
            }

            if end - start >= MIN_NOTE_FRAMES {
                let mean = frames[start..end].iter().map(|row| row[p]).sum::<f32>()
                    / (end - start) as f32;
                notes.push(NoteEvent {
                    pitch: LOWEST_PITCH + p as u8,
                    start_sec: start as f64 * activations.frame_seconds,
                    end_sec: end as f64 * activations.frame_seconds,
                    velocity: (127.0 * mean).round().clamp(1.0, 127.0) as u8,
                });
            }

            floor = end;
            i = rearticulation.unwrap_or(end);
        }
    }

    notes.sort_by(|a, b| {
        a.start_sec
            .total_cmp(&b.start_sec)
            .then(a.pitch.cmp(&b.pitch))
    });
    notes
}

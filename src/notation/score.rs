//! Symbolic view of a MIDI file: notes on a sixteenth-note grid plus the score-level
//! attributes (meter, tempo) notation needs.

use crate::notation::timing::TempoMap;
use anyhow::{anyhow, Result};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::collections::HashMap;

/// Grid steps per quarter note (sixteenth notes).
pub const STEPS_PER_QUARTER: u64 = 4;

/// A note quantized to the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridNote {
    pub pitch: u8,
    /// Inclusive start step
    pub start: u64,
    /// Exclusive end step, always > start
    pub end: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    pub notes: Vec<GridNote>,
    pub beats: u8,
    pub beat_type: u8,
    pub tempo_bpm: f64,
}

impl Score {
    /// Measure length in grid steps.
    pub fn steps_per_measure(&self) -> u64 {
        let quarters_per_beat = 4.0 / self.beat_type.max(1) as f64;
        let steps = self.beats.max(1) as f64 * quarters_per_beat * STEPS_PER_QUARTER as f64;
        (steps.round() as u64).max(1)
    }

    pub fn median_pitch(&self) -> Option<u8> {
        let mut pitches: Vec<u8> = self.notes.iter().map(|n| n.pitch).collect();
        pitches.sort_unstable();
        pitches.get(pitches.len() / 2).copied()
    }
}

/// Raw note span in ticks before quantization.
struct TickNote {
    pitch: u8,
    start: u64,
    end: u64,
}

pub fn parse_score(bytes: &[u8]) -> Result<Score> {
    let smf = Smf::parse(bytes).map_err(|e| anyhow!("Invalid MIDI data: {}", e))?;
    let tempo_map = TempoMap::from_smf(&smf);

    let mut time_signature: Option<(u64, u8, u8)> = None;
    let mut tick_notes = Vec::new();

    for track in &smf.tracks {
        let mut tick = 0u64;
        // (channel, key) -> start ticks of sounding notes, oldest first
        let mut open: HashMap<(u8, u8), Vec<u64>> = HashMap::new();

        for event in track {
            tick += event.delta.as_int() as u64;
            match event.kind {
                TrackEventKind::Meta(MetaMessage::TimeSignature(num, den_log2, _, _)) => {
                    if time_signature.map_or(true, |(at, _, _)| tick < at) {
                        let beat_type = 1u8.checked_shl(den_log2 as u32).unwrap_or(4);
                        time_signature = Some((tick, num, beat_type));
                    }
                }
                TrackEventKind::Midi { channel, message } => {
                    let (key, on) = match message {
                        MidiMessage::NoteOn { key, vel } => (key.as_int(), vel.as_int() > 0),
                        MidiMessage::NoteOff { key, .. } => (key.as_int(), false),
                        _ => continue,
                    };
                    let starts = open.entry((channel.as_int(), key)).or_default();
                    if on {
                        starts.push(tick);
                    } else if !starts.is_empty() {
                        let start = starts.remove(0);
                        tick_notes.push(TickNote { pitch: key, start, end: tick });
                    }
                }
                _ => {}
            }
        }

        // Notes never released end at the last event of their track
        for ((_, key), starts) in open {
            for start in starts {
                tick_notes.push(TickNote { pitch: key, start, end: tick });
            }
        }
    }

    let to_steps = |tick: u64| -> u64 {
        match smf.header.timing {
            Timing::Metrical(tpq) => {
                let tpq = tpq.as_int().max(1) as f64;
                (tick as f64 * STEPS_PER_QUARTER as f64 / tpq).round() as u64
            }
            // Timecode files carry no beat; lay them out at 120 BPM
            Timing::Timecode(..) => {
                (tempo_map.seconds_at(tick) * 2.0 * STEPS_PER_QUARTER as f64).round() as u64
            }
        }
    };

    let mut notes: Vec<GridNote> = tick_notes
        .iter()
        .map(|n| {
            let start = to_steps(n.start);
            let end = to_steps(n.end).max(start + 1);
            GridNote { pitch: n.pitch, start, end }
        })
        .collect();
    notes.sort_by_key(|n| (n.pitch, n.start, n.end));
    let notes = resolve_overlaps(notes);

    let (beats, beat_type) = time_signature
        .map(|(_, num, den)| (num.max(1), den))
        .unwrap_or((4, 4));

    Ok(Score {
        notes,
        beats,
        beat_type,
        tempo_bpm: tempo_map.initial_bpm(),
    })
}

/// Keep at most one sounding note per pitch: an earlier note is cut where a later
/// one on the same pitch starts. Input must be sorted by (pitch, start).
fn resolve_overlaps(notes: Vec<GridNote>) -> Vec<GridNote> {
    let mut resolved: Vec<GridNote> = Vec::with_capacity(notes.len());
    for note in notes {
        if let Some(prev) = resolved.last_mut() {
            if prev.pitch == note.pitch && note.start < prev.end {
                if note.start == prev.start {
                    prev.end = prev.end.max(note.end);
                    continue;
                }
                prev.end = note.start;
            }
        }
        resolved.push(note);
    }
    resolved.sort_by_key(|n| (n.start, n.pitch));
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::midi::{encode_notes, NoteEvent};

    #[test]
    fn test_notes_land_on_the_grid() {
        // 120 BPM: a quarter lasts 0.5s, a sixteenth 0.125s
        let bytes = encode_notes(&[
            NoteEvent { pitch: 69, start_sec: 0.0, end_sec: 2.0086, velocity: 100 },
            NoteEvent { pitch: 72, start_sec: 0.51, end_sec: 0.74, velocity: 100 },
        ])
        .unwrap();
        let score = parse_score(&bytes).unwrap();

        assert_eq!(score.beats, 4);
        assert_eq!(score.beat_type, 4);
        assert!((score.tempo_bpm - 120.0).abs() < 1e-6);
        assert_eq!(
            score.notes,
            vec![
                GridNote { pitch: 69, start: 0, end: 16 },
                GridNote { pitch: 72, start: 4, end: 6 },
            ]
        );
    }

    #[test]
    fn test_very_short_notes_keep_one_step() {
        let bytes = encode_notes(&[NoteEvent { pitch: 60, start_sec: 1.0, end_sec: 1.01, velocity: 80 }])
            .unwrap();
        let score = parse_score(&bytes).unwrap();
        assert_eq!(score.notes, vec![GridNote { pitch: 60, start: 8, end: 9 }]);
    }

    #[test]
    fn test_overlapping_same_pitch_is_cut() {
        let resolved = resolve_overlaps(vec![
            GridNote { pitch: 60, start: 0, end: 8 },
            GridNote { pitch: 60, start: 4, end: 12 },
        ]);
        assert_eq!(
            resolved,
            vec![
                GridNote { pitch: 60, start: 0, end: 4 },
                GridNote { pitch: 60, start: 4, end: 12 },
            ]
        );
    }

    #[test]
    fn test_measure_length() {
        let mut score = Score { notes: vec![], beats: 4, beat_type: 4, tempo_bpm: 120.0 };
        assert_eq!(score.steps_per_measure(), 16);
        score.beats = 6;
        score.beat_type = 8;
        assert_eq!(score.steps_per_measure(), 12);
        score.beats = 3;
        score.beat_type = 4;
        assert_eq!(score.steps_per_measure(), 12);
    }
}

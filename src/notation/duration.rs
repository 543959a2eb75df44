//! Duration metadata for a MIDI artifact.
//!
//! The end of a file is its last channel event (note, controller, pitch bend, ...);
//! meta events such as a trailing end-of-track do not extend it.

use crate::notation::timing::TempoMap;
use anyhow::{anyhow, Result};
use midly::{Smf, TrackEventKind};

/// Seconds until the last channel event.
pub fn midi_duration_seconds(bytes: &[u8]) -> Result<f64> {
    let smf = Smf::parse(bytes).map_err(|e| anyhow!("Invalid MIDI data: {}", e))?;
    let tempo_map = TempoMap::from_smf(&smf);

    let mut last_tick: Option<u64> = None;
    for track in &smf.tracks {
        let mut tick = 0u64;
        for event in track {
            tick += event.delta.as_int() as u64;
            if matches!(event.kind, TrackEventKind::Midi { .. }) {
                last_tick = Some(last_tick.map_or(tick, |t| t.max(tick)));
            }
        }
    }

    Ok(last_tick.map_or(0.0, |tick| tempo_map.seconds_at(tick)))
}

/// Round to two decimal places, as reported in `duration_sec`.
pub fn round_to_hundredths(seconds: f64) -> f64 {
    (seconds.max(0.0) * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::midi::{encode_notes, NoteEvent};

    #[test]
    fn test_duration_is_last_note_off() {
        let bytes = encode_notes(&[
            NoteEvent { pitch: 60, start_sec: 0.0, end_sec: 1.0, velocity: 90 },
            NoteEvent { pitch: 64, start_sec: 0.5, end_sec: 2.25, velocity: 90 },
        ])
        .unwrap();
        let duration = midi_duration_seconds(&bytes).unwrap();
        assert!((duration - 2.25).abs() < 0.01, "duration was {}", duration);
    }

    #[test]
    fn test_file_without_notes_lasts_zero_seconds() {
        let bytes = encode_notes(&[]).unwrap();
        // The program change at tick 0 is the only channel event
        assert_eq!(midi_duration_seconds(&bytes).unwrap(), 0.0);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(midi_duration_seconds(b"MThd but not really").is_err());
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round_to_hundredths(2.0086), 2.01);
        assert_eq!(round_to_hundredths(1.994), 1.99);
        assert_eq!(round_to_hundredths(-0.3), 0.0);
    }
}

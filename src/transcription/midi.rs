//! MIDI file writing for detected notes.

use anyhow::{anyhow, Context, Result};
use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::path::Path;

/// Resolution of written files (ticks per quarter note).
pub const TICKS_PER_QUARTER: u16 = 220;
/// Written tempo: 120 BPM.
pub const MICROSECONDS_PER_QUARTER: u32 = 500_000;

/// A detected note, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEvent {
    pub pitch: u8,
    pub start_sec: f64,
    pub end_sec: f64,
    pub velocity: u8,
}

fn seconds_to_ticks(seconds: f64) -> u32 {
    let ticks_per_second =
        TICKS_PER_QUARTER as f64 * 1_000_000.0 / MICROSECONDS_PER_QUARTER as f64;
    (seconds.max(0.0) * ticks_per_second).round() as u32
}

/// Serialize notes as a single-track standard MIDI file.
pub fn encode_notes(notes: &[NoteEvent]) -> Result<Vec<u8>> {
    // (tick, is_note_on, key, velocity); note-offs sort before note-ons on the same tick
    let mut timeline: Vec<(u32, bool, u8, u8)> = Vec::with_capacity(notes.len() * 2);
    for note in notes {
        let start = seconds_to_ticks(note.start_sec);
        let end = seconds_to_ticks(note.end_sec).max(start + 1);
        timeline.push((start, true, note.pitch.min(127), note.velocity.clamp(1, 127)));
        timeline.push((end, false, note.pitch.min(127), 0));
    }
    timeline.sort_by_key(|&(tick, is_on, key, _)| (tick, is_on, key));

    let mut track = vec![
        TrackEvent {
            delta: u28::from(0),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(b"Piano")),
        },
        TrackEvent {
            delta: u28::from(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::from(MICROSECONDS_PER_QUARTER))),
        },
        TrackEvent {
            delta: u28::from(0),
            kind: TrackEventKind::Midi {
                channel: u4::from(0),
                message: MidiMessage::ProgramChange { program: u7::from(0) },
            },
        },
    ];

    let mut current_tick = 0u32;
    for (tick, is_on, key, vel) in timeline {
        let message = if is_on {
            MidiMessage::NoteOn {
                key: u7::from(key),
                vel: u7::from(vel),
            }
        } else {
            MidiMessage::NoteOff {
                key: u7::from(key),
                vel: u7::from(0),
            }
        };
        track.push(TrackEvent {
            delta: u28::from(tick - current_tick),
            kind: TrackEventKind::Midi {
                channel: u4::from(0),
                message,
            },
        });
        current_tick = tick;
    }

    track.push(TrackEvent {
        delta: u28::from(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let smf = Smf {
        header: Header {
            format: Format::SingleTrack,
            timing: Timing::Metrical(u15::from(TICKS_PER_QUARTER)),
        },
        tracks: vec![track],
    };

    let mut bytes = Vec::new();
    smf.write(&mut bytes)
        .map_err(|e| anyhow!("Failed to encode MIDI data: {:?}", e))?;
    Ok(bytes)
}

/// Write notes to `path` as a MIDI file.
pub fn write_notes(notes: &[NoteEvent], path: &Path) -> Result<()> {
    let bytes = encode_notes(notes)?;
    std::fs::write(path, bytes)
        .with_context(|| format!("Failed to write MIDI file: {}", path.display()))
}

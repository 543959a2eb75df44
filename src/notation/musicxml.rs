//! MusicXML 3.1 (partwise) rendering of a [`Score`].
//!
//! The score is cut into homophonic slices: between any two neighbouring note
//! boundaries or barlines the set of sounding pitches is constant and is written as
//! one chord (or rest). Slices whose length is not a single note value are split into
//! tied pieces; notes continuing across slices and barlines are tied as well.

use crate::notation::score::{GridNote, Score, STEPS_PER_QUARTER};
use std::collections::BTreeSet;
use std::fmt::Write;

const STEP_NAMES: [&str; 12] = ["C", "C", "D", "D", "E", "F", "F", "G", "G", "A", "A", "B"];
const STEP_ALTERS: [i8; 12] = [0, 1, 0, 1, 0, 0, 1, 0, 1, 0, 1, 0];

/// Note values expressible on the sixteenth grid: (steps, type, dotted).
const NOTE_VALUES: [(u64, &str, bool); 8] = [
    (16, "whole", false),
    (12, "half", true),
    (8, "half", false),
    (6, "quarter", true),
    (4, "quarter", false),
    (3, "eighth", true),
    (2, "eighth", false),
    (1, "16th", false),
];

/// Pitches sounding over one slice, with whether each continues from the previous
/// slice and into the next one.
struct Slice {
    start: u64,
    end: u64,
    pitches: Vec<SoundingPitch>,
}

#[derive(Clone, Copy)]
struct SoundingPitch {
    pitch: u8,
    tied_from_previous: bool,
    tied_to_next: bool,
}

pub fn render(score: &Score, title: &str) -> String {
    let measure_len = score.steps_per_measure();
    let last_end = score.notes.iter().map(|n| n.end).max().unwrap_or(0);
    let measure_count = last_end.div_ceil(measure_len).max(1);
    let slices = slice_score(&score.notes, measure_len, measure_count * measure_len);

    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>\n");
    xml.push_str("<!DOCTYPE score-partwise PUBLIC \"-//Recordare//DTD MusicXML 3.1 Partwise//EN\" \"http://www.musicxml.org/dtds/partwise.dtd\">\n");
    xml.push_str("<score-partwise version=\"3.1\">\n");
    let _ = writeln!(xml, "  <movement-title>{}</movement-title>", escape(title));
    xml.push_str("  <identification>\n    <encoding>\n");
    let _ = writeln!(
        xml,
        "      <software>{} {}</software>",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    xml.push_str("    </encoding>\n  </identification>\n");
    xml.push_str("  <part-list>\n    <score-part id=\"P1\">\n      <part-name>Piano</part-name>\n    </score-part>\n  </part-list>\n");
    xml.push_str("  <part id=\"P1\">\n");

    let mut slices = slices.into_iter().peekable();
    for measure in 0..measure_count {
        let measure_start = measure * measure_len;
        let measure_end = measure_start + measure_len;
        let _ = writeln!(xml, "    <measure number=\"{}\">", measure + 1);
        if measure == 0 {
            write_attributes(&mut xml, score);
        }

        while let Some(slice) = slices.next_if(|s| s.end <= measure_end) {
            debug_assert!(slice.start >= measure_start);
            write_slice(&mut xml, &slice, measure_len);
        }

        xml.push_str("    </measure>\n");
    }

    xml.push_str("  </part>\n</score-partwise>\n");
    xml
}

fn write_attributes(xml: &mut String, score: &Score) {
    let (sign, line) = match score.median_pitch() {
        Some(pitch) if pitch < 60 => ("F", 4),
        _ => ("G", 2),
    };
    xml.push_str("      <attributes>\n");
    let _ = writeln!(xml, "        <divisions>{}</divisions>", STEPS_PER_QUARTER);
    xml.push_str("        <key>\n          <fifths>0</fifths>\n        </key>\n");
    let _ = writeln!(
        xml,
        "        <time>\n          <beats>{}</beats>\n          <beat-type>{}</beat-type>\n        </time>",
        score.beats, score.beat_type
    );
    let _ = writeln!(
        xml,
        "        <clef>\n          <sign>{}</sign>\n          <line>{}</line>\n        </clef>",
        sign, line
    );
    xml.push_str("      </attributes>\n");

    let bpm = (score.tempo_bpm * 100.0).round() / 100.0;
    xml.push_str("      <direction placement=\"above\">\n        <direction-type>\n          <metronome>\n            <beat-unit>quarter</beat-unit>\n");
    let _ = writeln!(xml, "            <per-minute>{}</per-minute>", bpm);
    xml.push_str("          </metronome>\n        </direction-type>\n");
    let _ = writeln!(xml, "        <sound tempo=\"{}\"/>", bpm);
    xml.push_str("      </direction>\n");
}

fn write_slice(xml: &mut String, slice: &Slice, measure_len: u64) {
    let pieces = split_duration(slice.end - slice.start);

    if slice.pitches.is_empty() {
        // A rest filling the measure is written as a whole-measure rest
        if slice.end - slice.start == measure_len {
            let _ = writeln!(
                xml,
                "      <note>\n        <rest measure=\"yes\"/>\n        <duration>{}</duration>\n        <voice>1</voice>\n      </note>",
                measure_len
            );
            return;
        }
        for &(steps, kind, dotted) in &pieces {
            let _ = writeln!(
                xml,
                "      <note>\n        <rest/>\n        <duration>{}</duration>\n        <voice>1</voice>\n        <type>{}</type>{}\n      </note>",
                steps,
                kind,
                if dotted { "\n        <dot/>" } else { "" }
            );
        }
        return;
    }

    let last_piece = pieces.len() - 1;
    for (index, &(steps, kind, dotted)) in pieces.iter().enumerate() {
        for (chord_index, sounding) in slice.pitches.iter().enumerate() {
            let tie_stop = index > 0 || sounding.tied_from_previous;
            let tie_start = index < last_piece || sounding.tied_to_next;
            write_note(xml, sounding.pitch, steps, kind, dotted, chord_index > 0, tie_stop, tie_start);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn write_note(
    xml: &mut String,
    pitch: u8,
    steps: u64,
    kind: &str,
    dotted: bool,
    in_chord: bool,
    tie_stop: bool,
    tie_start: bool,
) {
    let pc = (pitch % 12) as usize;
    let octave = pitch as i32 / 12 - 1;

    xml.push_str("      <note>\n");
    if in_chord {
        xml.push_str("        <chord/>\n");
    }
    let _ = writeln!(xml, "        <pitch>\n          <step>{}</step>", STEP_NAMES[pc]);
    if STEP_ALTERS[pc] != 0 {
        let _ = writeln!(xml, "          <alter>{}</alter>", STEP_ALTERS[pc]);
    }
    let _ = writeln!(xml, "          <octave>{}</octave>\n        </pitch>", octave);
    let _ = writeln!(xml, "        <duration>{}</duration>", steps);
    if tie_stop {
        xml.push_str("        <tie type=\"stop\"/>\n");
    }
    if tie_start {
        xml.push_str("        <tie type=\"start\"/>\n");
    }
    xml.push_str("        <voice>1</voice>\n");
    let _ = writeln!(xml, "        <type>{}</type>", kind);
    if dotted {
        xml.push_str("        <dot/>\n");
    }
    if tie_stop || tie_start {
        xml.push_str("        <notations>\n");
        if tie_stop {
            xml.push_str("          <tied type=\"stop\"/>\n");
        }
        if tie_start {
            xml.push_str("          <tied type=\"start\"/>\n");
        }
        xml.push_str("        </notations>\n");
    }
    xml.push_str("      </note>\n");
}

/// Cut `[0, total)` at every note boundary and barline.
fn slice_score(notes: &[GridNote], measure_len: u64, total: u64) -> Vec<Slice> {
    let mut boundaries: BTreeSet<u64> = (0..=total).step_by(measure_len as usize).collect();
    boundaries.insert(total);
    for note in notes {
        boundaries.insert(note.start.min(total));
        boundaries.insert(note.end.min(total));
    }

    let points: Vec<u64> = boundaries.into_iter().collect();
    points
        .windows(2)
        .map(|w| {
            let (start, end) = (w[0], w[1]);
            let mut pitches: Vec<SoundingPitch> = notes
                .iter()
                .filter(|n| n.start < end && n.end > start)
                .map(|n| SoundingPitch {
                    pitch: n.pitch,
                    tied_from_previous: n.start < start,
                    tied_to_next: n.end > end,
                })
                .collect();
            pitches.sort_by_key(|p| p.pitch);
            Slice { start, end, pitches }
        })
        .collect()
}

/// Greedy split of a duration into notatable values, longest first.
fn split_duration(mut steps: u64) -> Vec<(u64, &'static str, bool)> {
    let mut pieces = Vec::new();
    while steps > 0 {
        let value = NOTE_VALUES
            .iter()
            .find(|(len, _, _)| *len <= steps)
            .copied()
            .unwrap_or((1, "16th", false));
        pieces.push(value);
        steps -= value.0;
    }
    pieces
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

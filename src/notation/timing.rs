//! Tick to seconds conversion for parsed MIDI files.

use midly::{MetaMessage, Smf, Timing, TrackEventKind};

/// MIDI files without a tempo event run at 120 BPM.
pub const DEFAULT_US_PER_QUARTER: u32 = 500_000;

#[derive(Debug, Clone, Copy, PartialEq)]
struct TempoPoint {
    tick: u64,
    us_per_quarter: u32,
    /// Seconds elapsed at `tick`
    seconds: f64,
}

/// Tempo map merged from every track of a file.
#[derive(Debug, Clone)]
pub struct TempoMap {
    timing: Timing,
    points: Vec<TempoPoint>,
}

impl TempoMap {
    pub fn from_smf(smf: &Smf) -> Self {
        let mut changes: Vec<(u64, u32)> = Vec::new();
        for track in &smf.tracks {
            let mut tick = 0u64;
            for event in track {
                tick += event.delta.as_int() as u64;
                if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = event.kind {
                    changes.push((tick, tempo.as_int()));
                }
            }
        }
        changes.sort_by_key(|&(tick, _)| tick);
        // Last change wins when several land on one tick
        changes.dedup_by(|later, earlier| {
            if later.0 == earlier.0 {
                earlier.1 = later.1;
                true
            } else {
                false
            }
        });
        if changes.first().map_or(true, |&(tick, _)| tick != 0) {
            changes.insert(0, (0, DEFAULT_US_PER_QUARTER));
        }

        let ticks_per_quarter = match smf.header.timing {
            Timing::Metrical(tpq) => tpq.as_int().max(1) as f64,
            Timing::Timecode(..) => 1.0,
        };

        let mut points: Vec<TempoPoint> = Vec::with_capacity(changes.len());
        for (tick, us_per_quarter) in changes {
            let seconds = match points.last() {
                Some(prev) => {
                    prev.seconds
                        + (tick - prev.tick) as f64 * prev.us_per_quarter as f64
                            / 1_000_000.0
                            / ticks_per_quarter
                }
                None => 0.0,
            };
            points.push(TempoPoint {
                tick,
                us_per_quarter,
                seconds,
            });
        }

        Self {
            timing: smf.header.timing,
            points,
        }
    }

    pub fn seconds_at(&self, tick: u64) -> f64 {
        match self.timing {
            Timing::Timecode(fps, subframes) => {
                tick as f64 / (fps.as_f32() as f64 * subframes.max(1) as f64)
            }
            Timing::Metrical(tpq) => {
                let tpq = tpq.as_int().max(1) as f64;
                let point = self
                    .points
                    .iter()
                    .rev()
                    .find(|p| p.tick <= tick)
                    .copied()
                    .unwrap_or(TempoPoint {
                        tick: 0,
                        us_per_quarter: DEFAULT_US_PER_QUARTER,
                        seconds: 0.0,
                    });
                point.seconds
                    + (tick - point.tick) as f64 * point.us_per_quarter as f64 / 1_000_000.0 / tpq
            }
        }
    }

    /// Tempo in effect at the start of the file.
    pub fn initial_bpm(&self) -> f64 {
        let us = self
            .points
            .first()
            .map_or(DEFAULT_US_PER_QUARTER, |p| p.us_per_quarter);
        60_000_000.0 / us.max(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::num::{u15, u24, u28};
    use midly::{Format, Header, TrackEvent};

    fn smf_with_tempos(tempos: &[(u32, u32)]) -> Smf<'static> {
        let mut track = Vec::new();
        let mut last = 0;
        for &(tick, us) in tempos {
            track.push(TrackEvent {
                delta: u28::from(tick - last),
                kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::from(us))),
            });
            last = tick;
        }
        Smf {
            header: Header::new(Format::SingleTrack, Timing::Metrical(u15::from(480))),
            tracks: vec![track],
        }
    }

    #[test]
    fn test_default_tempo_is_120_bpm() {
        let map = TempoMap::from_smf(&smf_with_tempos(&[]));
        assert!((map.seconds_at(480) - 0.5).abs() < 1e-9);
        assert!((map.initial_bpm() - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_tempo_changes_are_integrated() {
        // 120 BPM for one quarter, then 60 BPM
        let map = TempoMap::from_smf(&smf_with_tempos(&[(0, 500_000), (480, 1_000_000)]));
        assert!((map.seconds_at(480) - 0.5).abs() < 1e-9);
        assert!((map.seconds_at(960) - 1.5).abs() < 1e-9);
    }
}

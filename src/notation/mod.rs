//! # Notation Exporter
//!
//! Turns the MIDI artifact into MusicXML text and duration metadata.
//!
//! ## Key Components:
//! - **timing**: tempo map (ticks to seconds)
//! - **score**: MIDI notes quantized to a sixteenth-note grid
//! - **musicxml**: MusicXML 3.1 partwise rendering
//! - **duration**: time of the last channel event
//!
//! Notation and duration are derived independently from the same bytes. A failure in
//! one is reported with its own kind (`NotationExport` / `Metadata`) and never hidden
//! behind a default value.

pub mod duration;
pub mod musicxml;
pub mod score;
pub mod timing;

use crate::error::{AppError, AppResult};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// MusicXML text plus metadata for one MIDI artifact.
#[derive(Debug, Clone)]
pub struct ExportedNotation {
    pub musicxml: String,
    /// Rounded to two decimals
    pub duration_sec: f64,
    pub note_count: usize,
}

pub struct NotationExporter;

impl NotationExporter {
    /// Export `midi_path`. The MusicXML file is written next to it and read back.
    pub fn export(midi_path: &Path) -> AppResult<ExportedNotation> {
        let bytes = fs::read(midi_path).map_err(|e| {
            AppError::NotationExport(format!("cannot read {}: {}", midi_path.display(), e))
        })?;

        let notation = Self::musicxml(midi_path, &bytes);
        let duration = duration::midi_duration_seconds(&bytes)
            .map(duration::round_to_hundredths)
            .map_err(|e| AppError::Metadata(format!("{:#}", e)));

        match (notation, duration) {
            (Ok((musicxml, note_count)), Ok(duration_sec)) => {
                debug!(note_count, duration_sec, "Notation exported");
                Ok(ExportedNotation {
                    musicxml,
                    duration_sec,
                    note_count,
                })
            }
            (Err(notation_err), Err(metadata_err)) => {
                warn!(error = %metadata_err, "Metadata extraction also failed");
                Err(notation_err)
            }
            (Err(err), Ok(_)) | (Ok(_), Err(err)) => Err(err),
        }
    }

    fn musicxml(midi_path: &Path, bytes: &[u8]) -> AppResult<(String, usize)> {
        let score = score::parse_score(bytes)
            .map_err(|e| AppError::NotationExport(format!("{:#}", e)))?;
        let title = midi_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let xml = musicxml::render(&score, &title);

        let xml_path = midi_path.with_extension("musicxml");
        fs::write(&xml_path, xml.as_bytes()).map_err(|e| {
            AppError::NotationExport(format!("cannot write {}: {}", xml_path.display(), e))
        })?;
        let text = fs::read(&xml_path)
            .map_err(|e| AppError::NotationExport(format!("cannot read back MusicXML: {}", e)))
            .and_then(|raw| {
                String::from_utf8(raw)
                    .map_err(|e| AppError::NotationExport(format!("MusicXML is not UTF-8: {}", e)))
            })?;

        Ok((text, score.notes.len()))
    }
}

//! # Transcription Engine Adapter
//!
//! Drives the configured inference backend over the normalized audio and locates the
//! MIDI file it left behind.
//!
//! ## Artifact selection:
//! Files in the output directory with a `.mid` or `.midi` extension (any case) are
//! candidates. When there are several, the lexicographically smallest file name wins,
//! so repeated runs always pick the same file. No candidate at all is a `NoOutput` error.

use crate::config::{EngineConfig, BACKEND_COMMAND};
use crate::device::{create_device_from_string, DeviceManager};
use crate::error::{AppError, AppResult};
use crate::transcription::backend::{CommandBackend, InferenceBackend, PredictOptions};
use crate::transcription::model::SpectralNoteModel;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// MIDI file produced by one inference run. Lives inside the request workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiArtifact {
    pub path: PathBuf,
}

impl MidiArtifact {
    pub fn read(&self) -> AppResult<Vec<u8>> {
        fs::read(&self.path).map_err(|e| {
            AppError::Internal(format!(
                "Failed to read MIDI artifact {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

/// Shared, stateless adapter around one inference backend.
#[derive(Clone)]
pub struct TranscriptionEngine {
    backend: Arc<dyn InferenceBackend>,
    options: PredictOptions,
}

impl TranscriptionEngine {
    pub fn new(backend: Arc<dyn InferenceBackend>, options: PredictOptions) -> Self {
        Self { backend, options }
    }

    /// Build the backend named in the engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        let backend: Arc<dyn InferenceBackend> = if config.backend == BACKEND_COMMAND {
            Arc::new(CommandBackend::new(
                config.command.clone(),
                Duration::from_secs(config.timeout_secs),
            ))
        } else {
            let model = SpectralNoteModel::new(create_device_from_string(&config.device));
            debug!(device = %DeviceManager::get_device_info(model.device()), "Builtin model device");
            Arc::new(model)
        };
        info!(backend = backend.name(), model = %config.model, "Transcription engine ready");
        Self::new(backend, PredictOptions::with_model(config.model.clone()))
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn options(&self) -> &PredictOptions {
        &self.options
    }

    /// Run inference on `audio_path` and return the MIDI file found in `output_dir`.
    pub fn transcribe(&self, audio_path: &Path, output_dir: &Path) -> AppResult<MidiArtifact> {
        let started = Instant::now();
        self.backend
            .predict_and_save(&[audio_path.to_path_buf()], output_dir, &self.options)
            .map_err(|e| AppError::Inference(format!("{:#}", e)))?;

        let artifact = find_midi_artifact(output_dir)?;
        debug!(
            backend = self.backend.name(),
            artifact = %artifact.path.display(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Inference produced MIDI artifact"
        );
        Ok(artifact)
    }
}

fn is_midi_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mid") || ext.eq_ignore_ascii_case("midi"))
}

/// Pick the MIDI artifact in `dir` (lexicographically first by file name).
pub fn find_midi_artifact(dir: &Path) -> AppResult<MidiArtifact> {
    let entries = fs::read_dir(dir).map_err(|e| {
        AppError::NoOutput(format!("cannot read output directory {}: {}", dir.display(), e))
    })?;

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_midi_file(path))
        .collect();
    candidates.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    if candidates.len() > 1 {
        debug!(count = candidates.len(), "Several MIDI files found, taking the first by name");
    }

    candidates
        .into_iter()
        .next()
        .map(|path| MidiArtifact { path })
        .ok_or_else(|| {
            AppError::NoOutput(format!("no .mid/.midi file in {}", dir.display()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend that writes fixed files instead of running a model.
    struct FixtureBackend {
        files: Vec<&'static str>,
        fail: bool,
    }

    impl InferenceBackend for FixtureBackend {
        fn name(&self) -> &str {
            "fixture"
        }

        fn predict_and_save(
            &self,
            _audio_paths: &[PathBuf],
            output_dir: &Path,
            _options: &PredictOptions,
        ) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("model crashed");
            }
            for name in &self.files {
                fs::write(output_dir.join(name), b"MThd")?;
            }
            Ok(())
        }
    }

    fn engine(files: Vec<&'static str>, fail: bool) -> TranscriptionEngine {
        TranscriptionEngine::new(Arc::new(FixtureBackend { files, fail }), PredictOptions::default())
    }

    #[test]
    fn test_single_artifact_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = engine(vec!["input_basic_pitch.mid"], false)
            .transcribe(&dir.path().join("input.wav"), dir.path())
            .unwrap();
        assert_eq!(artifact.path, dir.path().join("input_basic_pitch.mid"));
        assert_eq!(artifact.read().unwrap(), b"MThd");
    }

    #[test]
    fn test_selection_is_lexicographic_and_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = engine(vec!["zeta.midi", "notes.csv", "beta.MID", "gamma.mid"], false)
            .transcribe(&dir.path().join("input.wav"), dir.path())
            .unwrap();
        assert_eq!(artifact.path.file_name().unwrap(), "beta.MID");
    }

    #[test]
    fn test_missing_artifact_is_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let err = engine(vec!["input.npz", "input.csv"], false)
            .transcribe(&dir.path().join("input.wav"), dir.path())
            .unwrap_err();
        assert!(matches!(err, AppError::NoOutput(_)), "got {:?}", err);
    }

    #[test]
    fn test_backend_failure_is_inference_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = engine(vec![], true)
            .transcribe(&dir.path().join("input.wav"), dir.path())
            .unwrap_err();
        assert!(matches!(err, AppError::Inference(_)), "got {:?}", err);
    }

    #[test]
    fn test_directories_named_like_midi_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("a.mid")).unwrap();
        let err = find_midi_artifact(dir.path()).unwrap_err();
        assert!(matches!(err, AppError::NoOutput(_)));
    }

    #[test]
    fn test_command_backend_from_config() {
        let config = EngineConfig {
            backend: BACKEND_COMMAND.to_string(),
            command: "basic-pitch".to_string(),
            model: "icassp_2022".to_string(),
            device: "cpu".to_string(),
            timeout_secs: 600,
        };
        let engine = TranscriptionEngine::from_config(&config);
        assert_eq!(engine.backend_name(), "command");
        assert_eq!(engine.options().onset_threshold, 0.5);
    }
}

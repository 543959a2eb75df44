//! # Pipeline Orchestrator
//!
//! Runs one upload through every stage, strictly in order:
//!
//! `Received → Normalized → Transcribed → Exported → Completed`
//!
//! The first failing stage ends the run with its classified error; nothing partial is
//! returned. The scoped workspace lives from normalization until export and is removed
//! before `run` returns, on every path.
//!
//! ## Blocking:
//! `run` is synchronous and CPU/process bound. HTTP handlers call it through
//! `web::block` so it never runs on an async worker.

use crate::audio::{FormatNormalizer, Normalization, Transcoder, UploadedAudio};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::notation::NotationExporter;
use crate::transcription::TranscriptionEngine;
use crate::workspace::with_workspace;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Progress of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    Normalized,
    Transcribed,
    Exported,
    Completed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Received => "received",
            PipelineStage::Normalized => "normalized",
            PipelineStage::Transcribed => "transcribed",
            PipelineStage::Exported => "exported",
            PipelineStage::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Metadata returned next to the notation.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionMeta {
    /// Seconds, rounded to two decimals
    pub duration_sec: f64,
    pub source_mime: String,
    pub normalization: Normalization,
    pub note_count: usize,
}

/// Successful result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionResult {
    pub musicxml: String,
    pub midi_b64: String,
    pub meta: TranscriptionMeta,
}

pub struct TranscriptionPipeline {
    normalizer: FormatNormalizer,
    engine: TranscriptionEngine,
    workspace_root: PathBuf,
    workspace_prefix: String,
}

impl TranscriptionPipeline {
    pub fn new(
        normalizer: FormatNormalizer,
        engine: TranscriptionEngine,
        workspace_root: PathBuf,
        workspace_prefix: String,
    ) -> Self {
        Self {
            normalizer,
            engine,
            workspace_root,
            workspace_prefix,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let root = config.workspace_root();
        let normalizer = FormatNormalizer::new(
            Transcoder::new(
                config.transcoder.program.clone(),
                Duration::from_secs(config.transcoder.timeout_secs),
            ),
            config.transcoder.container_mime_types.clone(),
        );
        Self::new(
            normalizer,
            TranscriptionEngine::from_config(&config.engine),
            root,
            config.workspace.prefix.clone(),
        )
    }

    pub fn transcoder(&self) -> &Transcoder {
        self.normalizer.transcoder()
    }

    pub fn engine(&self) -> &TranscriptionEngine {
        &self.engine
    }

    /// Run the whole pipeline for one upload.
    pub fn run(&self, upload: UploadedAudio) -> AppResult<TranscriptionResult> {
        let started = Instant::now();
        let mut stage = PipelineStage::Received;

        let result = self.run_stages(&upload, &mut stage);
        match &result {
            Ok(output) => info!(
                mime = %upload.declared_mime,
                normalization = output.meta.normalization.as_str(),
                notes = output.meta.note_count,
                duration_sec = output.meta.duration_sec,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Transcription completed"
            ),
            Err(e) => warn!(
                mime = %upload.declared_mime,
                last_stage = %stage,
                kind = e.kind(),
                class = e.class().as_str(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Transcription failed: {}",
                e
            ),
        }
        result
    }

    fn run_stages(
        &self,
        upload: &UploadedAudio,
        stage: &mut PipelineStage,
    ) -> AppResult<TranscriptionResult> {
        let mime = upload.mime();
        if !mime.is_audio() {
            return Err(AppError::InvalidInput(format!(
                "expected an audio/* content type, got '{}'",
                upload.declared_mime
            )));
        }

        with_workspace(&self.workspace_root, &self.workspace_prefix, |dir| {
            let normalized = self.normalizer.normalize(&upload.data, &mime, dir)?;
            let input_path = dir.join("input.wav");
            fs::write(&input_path, &normalized.bytes)?;
            advance(stage, PipelineStage::Normalized);

            let output_dir = dir.join("output");
            fs::create_dir(&output_dir)?;
            let artifact = self.engine.transcribe(&input_path, &output_dir)?;
            let midi = artifact.read()?;
            advance(stage, PipelineStage::Transcribed);

            let exported = NotationExporter::export(&artifact.path)?;
            advance(stage, PipelineStage::Exported);

            let result = TranscriptionResult {
                musicxml: exported.musicxml,
                midi_b64: STANDARD.encode(&midi),
                meta: TranscriptionMeta {
                    duration_sec: exported.duration_sec,
                    source_mime: mime.essence().to_string(),
                    normalization: normalized.strategy,
                    note_count: exported.note_count,
                },
            };
            advance(stage, PipelineStage::Completed);
            Ok(result)
        })
    }
}

fn advance(stage: &mut PipelineStage, next: PipelineStage) {
    debug!(from = %stage, to = %next, "Pipeline stage");
    *stage = next;
}

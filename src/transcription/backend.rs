//! # Inference Backends
//!
//! The note-inference stage behind one trait, so the engine adapter does not care whether
//! notes come from the in-process model or an external basic-pitch compatible CLI.
//!
//! ## Contract:
//! `predict_and_save` reads each audio file and leaves a MIDI file per input in
//! `output_dir`. It reports failures of the stage itself; finding the artifact is the
//! adapter's job.

use crate::process::{run_with_timeout, RunOutcome};
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Model reference both backends treat as "the default pretrained model".
pub const ICASSP_2022_MODEL: &str = "icassp_2022";

/// Fixed inference parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictOptions {
    /// Minimum onset activation for a note to start
    pub onset_threshold: f32,
    /// Minimum frame activation for a note to continue
    pub frame_threshold: f32,
    /// Pretrained model reference
    pub model: String,
    pub save_midi: bool,
    /// Intermediate activations are never needed downstream
    pub save_model_outputs: bool,
}

impl PredictOptions {
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            onset_threshold: 0.5,
            frame_threshold: 0.3,
            model: ICASSP_2022_MODEL.to_string(),
            save_midi: true,
            save_model_outputs: false,
        }
    }
}

pub trait InferenceBackend: Send + Sync {
    /// Short name for logs and the health endpoint.
    fn name(&self) -> &str;

    fn predict_and_save(
        &self,
        audio_paths: &[PathBuf],
        output_dir: &Path,
        options: &PredictOptions,
    ) -> Result<()>;
}

/// Runs an external `basic-pitch` compatible program.
///
/// `<program> <output_dir> <audio...> --save-midi --onset-threshold 0.5 --frame-threshold 0.3`
///
/// A run longer than `timeout` is killed and reported as a failure.
pub struct CommandBackend {
    program: String,
    timeout: Duration,
}

impl CommandBackend {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn arguments(&self, audio_paths: &[PathBuf], output_dir: &Path, options: &PredictOptions) -> Vec<String> {
        let mut args = vec![output_dir.display().to_string()];
        args.extend(audio_paths.iter().map(|p| p.display().to_string()));
        if options.save_midi {
            args.push("--save-midi".to_string());
        }
        if options.save_model_outputs {
            args.push("--save-model-outputs".to_string());
        }
        args.push("--onset-threshold".to_string());
        args.push(options.onset_threshold.to_string());
        args.push("--frame-threshold".to_string());
        args.push(options.frame_threshold.to_string());
        // The CLI ships with the default model; only other models need a path
        if options.model != ICASSP_2022_MODEL {
            args.push("--model-path".to_string());
            args.push(options.model.clone());
        }
        args
    }
}

impl InferenceBackend for CommandBackend {
    fn name(&self) -> &str {
        "command"
    }

    fn predict_and_save(
        &self,
        audio_paths: &[PathBuf],
        output_dir: &Path,
        options: &PredictOptions,
    ) -> Result<()> {
        let args = self.arguments(audio_paths, output_dir, options);
        debug!(program = %self.program, ?args, "Running inference command");

        let started = Instant::now();
        let outcome = run_with_timeout(Command::new(&self.program).args(&args), self.timeout)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    anyhow!("inference program '{}' not found", self.program)
                } else {
                    anyhow!("failed to start '{}': {}", self.program, e)
                }
            })?;
        let output = match outcome {
            RunOutcome::Finished(output) => output,
            RunOutcome::TimedOut => {
                warn!(program = %self.program, timeout_secs = self.timeout.as_secs_f64(), "Inference command killed");
                return Err(anyhow!(
                    "'{}' timed out after {:.1}s",
                    self.program,
                    self.timeout.as_secs_f64()
                ));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last_line = stderr.lines().last().unwrap_or_default();
            return Err(anyhow!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                last_line.trim()
            ));
        }

        info!(
            program = %self.program,
            files = audio_paths.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Inference command finished"
        );
        Ok(())
    }
}

//! External transcoder process (ffmpeg or a compatible CLI).
//!
//! The transcoder is the last normalization strategy, reserved for browser-recorded
//! containers that the in-process decoder cannot handle. Every invocation gets its own
//! pair of temporary files inside the request workspace; both are removed when the call
//! returns, whatever the outcome.
//!
//! ## Outcomes:
//! - **Ok**: the tool exited with status 0 and wrote a WAV file holding at least one sample
//! - **TranscoderUnavailable**: the program could not be started at all
//! - **TranscodingFailed**: the program rejected the input, ran out of time, or wrote
//!   something that is not usable audio

use crate::audio::wav::sample_count;
use crate::error::{AppError, AppResult};
use crate::process::{run_with_timeout, RunOutcome};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};
use tempfile::{Builder, NamedTempFile};
use tracing::{debug, warn};

/// How many bytes of the tool's stderr are kept in error messages.
const STDERR_TAIL_BYTES: usize = 600;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of checking whether the transcoder can be started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscoderStatus {
    Available { version: String },
    Missing,
    Broken(String),
}

impl TranscoderStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, TranscoderStatus::Available { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Transcoder {
    program: String,
    timeout: Duration,
}

impl Transcoder {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Convert arbitrary container bytes to mono 44.1kHz WAV.
    ///
    /// Runs `<program> -y -i <in.bin> -ac 1 -ar 44100 <out.wav>` with both files in
    /// `scratch_dir`.
    pub fn transcode(&self, data: &[u8], scratch_dir: &Path) -> AppResult<Vec<u8>> {
        let mut input = temp_file(scratch_dir, ".bin")?;
        input
            .write_all(data)
            .and_then(|_| input.flush())
            .map_err(|e| AppError::Internal(format!("Failed to write transcoder input: {}", e)))?;
        let output = temp_file(scratch_dir, ".wav")?;

        let started = Instant::now();
        let result = run_with_timeout(
            Command::new(&self.program)
                .arg("-y")
                .arg("-i")
                .arg(input.path())
                .args(["-ac", "1", "-ar", "44100"])
                .arg(output.path()),
            self.timeout,
        );

        let run = match self.interpret(result)? {
            RunOutcome::Finished(run) => run,
            RunOutcome::TimedOut => {
                warn!(program = %self.program, timeout_secs = self.timeout.as_secs_f64(), "Transcoder killed");
                return Err(AppError::TranscodingFailed(format!(
                    "{} timed out after {:.1}s",
                    self.program,
                    self.timeout.as_secs_f64()
                )));
            }
        };
        debug!(
            program = %self.program,
            duration_ms = started.elapsed().as_millis() as u64,
            "Transcoder finished"
        );

        if !run.status.success() {
            return Err(AppError::TranscodingFailed(format!(
                "{} exited with {}: {}",
                self.program,
                run.status,
                stderr_tail(&run.stderr)
            )));
        }

        let wav = fs::read(output.path())
            .map_err(|e| AppError::Internal(format!("Failed to read transcoder output: {}", e)))?;
        if wav.is_empty() {
            return Err(AppError::TranscodingFailed(format!(
                "{} produced an empty file",
                self.program
            )));
        }
        match sample_count(&wav) {
            Ok(0) => {
                return Err(AppError::TranscodingFailed(format!(
                    "{} produced audio with no samples",
                    self.program
                )))
            }
            Ok(samples) => debug!(samples, "Transcoder output validated"),
            Err(e) => {
                return Err(AppError::TranscodingFailed(format!(
                    "{} produced an unreadable WAV file: {:#}",
                    self.program, e
                )))
            }
        }

        // `input` and `output` are removed here; removal failures are ignored by tempfile.
        Ok(wav)
    }

    /// Check that the program starts (`<program> -version`).
    pub fn probe(&self) -> TranscoderStatus {
        match run_with_timeout(Command::new(&self.program).arg("-version"), PROBE_TIMEOUT) {
            Ok(RunOutcome::Finished(out)) if out.status.success() => {
                let version = String::from_utf8_lossy(&out.stdout)
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                TranscoderStatus::Available { version }
            }
            Ok(RunOutcome::Finished(out)) => {
                TranscoderStatus::Broken(format!("-version exited with {}", out.status))
            }
            Ok(RunOutcome::TimedOut) => TranscoderStatus::Broken("-version did not return".to_string()),
            Err(e) if is_missing(&e) => TranscoderStatus::Missing,
            Err(e) => TranscoderStatus::Broken(e.to_string()),
        }
    }

    fn interpret(&self, result: std::io::Result<RunOutcome>) -> AppResult<RunOutcome> {
        match result {
            Ok(output) => Ok(output),
            Err(e) if is_missing(&e) => {
                warn!(program = %self.program, "Transcoder is not installed");
                Err(AppError::TranscoderUnavailable(format!(
                    "'{}' not found on this host",
                    self.program
                )))
            }
            Err(e) => Err(AppError::TranscoderUnavailable(format!(
                "'{}' could not be started: {}",
                self.program, e
            ))),
        }
    }
}

fn temp_file(dir: &Path, suffix: &str) -> AppResult<NamedTempFile> {
    Builder::new()
        .prefix("transcode-")
        .suffix(suffix)
        .tempfile_in(dir)
        .map_err(|e| {
            AppError::Internal(format!(
                "Failed to create temporary file in {}: {}",
                dir.display(),
                e
            ))
        })
}

fn is_missing(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied)
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

/// Whether `dir` still holds any transcoder temporaries.
#[cfg(test)]
pub(crate) fn leftover_temp_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().starts_with("transcode-"))
                .count()
        })
        .unwrap_or(0)
}

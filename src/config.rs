//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP__ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms set these)
//! 2. Environment variables (`APP__SERVER__PORT`, `APP__TRANSCODER__PROGRAM`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use crate::transcription::backend::ICASSP_2022_MODEL;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub transcoder: TranscoderConfig,
    pub engine: EngineConfig,
    pub workspace: WorkspaceConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// External transcoder used as the last normalization fallback.
///
/// ## Fields:
/// - `program`: executable name or path (looked up on `PATH` when bare)
/// - `container_mime_types`: browser-recorded containers that may be handed to the
///   transcoder once in-process decoding has failed
/// - `timeout_secs`: a run still going after this long is killed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    pub program: String,
    pub container_mime_types: Vec<String>,
    pub timeout_secs: u64,
}

/// Inference backend selection.
///
/// ## Fields:
/// - `backend`: `"builtin"` (in-process spectral note model) or `"command"`
///   (external basic-pitch compatible CLI)
/// - `command`: program used by the `command` backend
/// - `model`: pretrained model reference handed to the backend
/// - `device`: compute device for the builtin model (`auto`, `cpu`, `cuda`, `metal`)
/// - `timeout_secs`: time limit for one run of the `command` backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub backend: String,
    pub command: String,
    pub model: String,
    pub device: String,
    pub timeout_secs: u64,
}

/// Where request workspaces are created.
///
/// An empty `root` means the system temporary directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub root: String,
    pub prefix: String,
}

/// Performance tuning configuration.
///
/// ## Tuning guidelines:
/// - Each job pins one blocking worker for the whole inference run, so keep
///   `max_concurrent_jobs` at or below the number of cores
/// - `max_upload_bytes` bounds memory held per request (the upload is buffered)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_jobs: usize,
    pub max_upload_bytes: usize,
}

pub const BACKEND_BUILTIN: &str = "builtin";
pub const BACKEND_COMMAND: &str = "command";

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            transcoder: TranscoderConfig {
                program: "ffmpeg".to_string(),
                container_mime_types: [
                    "audio/webm",
                    "audio/ogg",
                    "audio/mp4",
                    "audio/x-m4a",
                    "audio/aac",
                    "audio/3gpp",
                    "audio/x-matroska",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
                timeout_secs: 120,
            },
            engine: EngineConfig {
                backend: BACKEND_BUILTIN.to_string(),
                command: "basic-pitch".to_string(),
                model: ICASSP_2022_MODEL.to_string(),
                device: "auto".to_string(),
                timeout_secs: 600,
            },
            workspace: WorkspaceConfig {
                root: String::new(),
                prefix: "transcribe-".to_string(),
            },
            performance: PerformanceConfig {
                max_concurrent_jobs: 2,
                max_upload_bytes: 50 * 1024 * 1024,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP__SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP__TRANSCODER__PROGRAM=/usr/local/bin/ffmpeg`: Pin the transcoder binary
    /// - `APP__PERFORMANCE__MAX_CONCURRENT_JOBS=4`: Allow more parallel pipelines
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    ///
    /// The double-underscore separator keeps field names such as `max_upload_bytes` intact.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_concurrent_jobs == 0 {
            return Err(anyhow::anyhow!("Max concurrent jobs must be greater than 0"));
        }

        if self.performance.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        if self.transcoder.program.trim().is_empty() {
            return Err(anyhow::anyhow!("Transcoder program cannot be empty"));
        }

        if self.transcoder.timeout_secs == 0 || self.engine.timeout_secs == 0 {
            return Err(anyhow::anyhow!("External program timeouts must be greater than 0"));
        }

        match self.engine.backend.as_str() {
            BACKEND_BUILTIN => {
                if self.engine.model != ICASSP_2022_MODEL {
                    return Err(anyhow::anyhow!(
                        "The builtin backend only provides the '{}' model",
                        ICASSP_2022_MODEL
                    ));
                }
            }
            BACKEND_COMMAND => {
                if self.engine.command.trim().is_empty() {
                    return Err(anyhow::anyhow!(
                        "Engine command cannot be empty for the command backend"
                    ));
                }
            }
            other => {
                return Err(anyhow::anyhow!(
                    "Unknown engine backend '{}' (expected '{}' or '{}')",
                    other,
                    BACKEND_BUILTIN,
                    BACKEND_COMMAND
                ));
            }
        }

        if self.workspace.prefix.contains(std::path::MAIN_SEPARATOR) {
            return Err(anyhow::anyhow!("Workspace prefix cannot contain a path separator"));
        }

        Ok(())
    }

    /// Directory under which request workspaces are created.
    pub fn workspace_root(&self) -> PathBuf {
        if self.workspace.root.trim().is_empty() {
            env::temp_dir()
        } else {
            PathBuf::from(&self.workspace.root)
        }
    }
}

//! # Error Handling
//!
//! Every way a transcription request can fail, and how each failure is turned into an
//! HTTP response.
//!
//! ## Error Classes:
//! Each variant belongs to one [`ErrorClass`], which tells the caller what to do next:
//! - **ClientInput**: fix the upload (wrong type, undecodable audio) and resend
//! - **ServerEnvironment**: a host dependency is missing; an operator has to step in
//! - **Server**: the pipeline broke on valid input; not retried automatically
//!
//! ## JSON Response Format:
//! ```json
//! {
//!   "error": {
//!     "type": "format_error",
//!     "class": "client_input",
//!     "message": "Unsupported audio format: audio/x-unknown",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// ## Pipeline Errors:
/// - **InvalidInput**: declared type is not `audio/*`
/// - **Format**: no decoding strategy could make sense of the bytes
/// - **TranscoderUnavailable**: the external transcoder is not installed or not runnable
/// - **TranscodingFailed**: the transcoder ran but failed, timed out, or wrote no usable audio
/// - **Inference**: the inference backend itself failed
/// - **NoOutput**: inference finished but left no MIDI artifact behind
/// - **NotationExport** / **Metadata**: the MIDI artifact exists but could not be read back
///
/// ## Service Errors:
/// - **BadRequest**: malformed multipart body
/// - **PayloadTooLarge**: upload exceeded the configured limit
/// - **ConfigError**: configuration problems
/// - **Internal**: anything else that went wrong on our side
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (I/O failures, worker pool shutdown, etc.)
    Internal(String),

    /// Client sent a malformed request body
    BadRequest(String),

    /// Upload exceeded `performance.max_upload_bytes`
    PayloadTooLarge(usize),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// Declared MIME type is missing or not an audio type
    InvalidInput(String),

    /// No normalization strategy succeeded for the declared MIME type
    Format { mime: String },

    /// External transcoder missing from the host
    TranscoderUnavailable(String),

    /// External transcoder ran but reported failure
    TranscodingFailed(String),

    /// Inference backend failed before producing output
    Inference(String),

    /// Inference produced no MIDI artifact
    NoOutput(String),

    /// MIDI artifact could not be converted to MusicXML
    NotationExport(String),

    /// Duration could not be extracted from the MIDI artifact
    Metadata(String),
}

/// What the caller should do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The upload itself is the problem; resend something else
    ClientInput,
    /// The host is misconfigured (missing dependency)
    ServerEnvironment,
    /// Server-side fault on otherwise valid input
    Server,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::ClientInput => "client_input",
            ErrorClass::ServerEnvironment => "server_environment",
            ErrorClass::Server => "server",
        }
    }
}

impl AppError {
    /// Machine-readable error type, also used as the metrics key.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "internal_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::ConfigError(_) => "config_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::Format { .. } => "format_error",
            AppError::TranscoderUnavailable(_) => "transcoder_unavailable",
            AppError::TranscodingFailed(_) => "transcoding_failed",
            AppError::Inference(_) => "inference_error",
            AppError::NoOutput(_) => "no_output",
            AppError::NotationExport(_) => "notation_export_error",
            AppError::Metadata(_) => "metadata_error",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            AppError::BadRequest(_)
            | AppError::PayloadTooLarge(_)
            | AppError::InvalidInput(_)
            | AppError::Format { .. }
            | AppError::TranscodingFailed(_) => ErrorClass::ClientInput,
            AppError::TranscoderUnavailable(_) | AppError::ConfigError(_) => {
                ErrorClass::ServerEnvironment
            }
            AppError::Internal(_)
            | AppError::Inference(_)
            | AppError::NoOutput(_)
            | AppError::NotationExport(_)
            | AppError::Metadata(_) => ErrorClass::Server,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::PayloadTooLarge(limit) => {
                write!(f, "Upload too large (limit: {} bytes)", limit)
            }
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            AppError::Format { mime } => write!(f, "Unsupported audio format: {}", mime),
            AppError::TranscoderUnavailable(msg) => write!(f, "Transcoder unavailable: {}", msg),
            AppError::TranscodingFailed(msg) => write!(f, "Transcoding failed: {}", msg),
            AppError::Inference(msg) => write!(f, "Inference failed: {}", msg),
            AppError::NoOutput(msg) => write!(f, "No MIDI produced: {}", msg),
            AppError::NotationExport(msg) => write!(f, "Notation export failed: {}", msg),
            AppError::Metadata(msg) => write!(f, "Metadata extraction failed: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Converts pipeline errors into JSON HTTP responses.
///
/// ## HTTP Status Code Mapping:
/// - InvalidInput → 415 (Unsupported Media Type)
/// - Format / TranscodingFailed → 422 (Unprocessable Entity)
/// - BadRequest → 400, PayloadTooLarge → 413
/// - TranscoderUnavailable → 503 (the host is missing a dependency)
/// - everything else → 500
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::Format { .. } | AppError::TranscodingFailed(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::TranscoderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_)
            | AppError::ConfigError(_)
            | AppError::Inference(_)
            | AppError::NoOutput(_)
            | AppError::NotationExport(_)
            | AppError::Metadata(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": self.kind(),
                "class": self.class().as_str(),
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Untyped failures from helper code become internal errors unless a stage
/// boundary has already classified them.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<AppError>() {
            Ok(app_err) => app_err,
            Err(err) => AppError::Internal(format!("{:#}", err)),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(format!("I/O error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_names_the_mime_type() {
        let err = AppError::Format { mime: "audio/x-unknown".to_string() };
        assert_eq!(err.to_string(), "Unsupported audio format: audio/x-unknown");
        assert_eq!(err.class(), ErrorClass::ClientInput);
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_transcoder_errors_are_classified_apart() {
        let missing = AppError::TranscoderUnavailable("ffmpeg not found".to_string());
        let failed = AppError::TranscodingFailed("exit status 1".to_string());

        assert_eq!(missing.class(), ErrorClass::ServerEnvironment);
        assert_eq!(missing.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(failed.class(), ErrorClass::ClientInput);
        assert_ne!(missing.kind(), failed.kind());
    }

    #[test]
    fn test_invalid_input_maps_to_415() {
        let err = AppError::InvalidInput("expected audio/*, got text/plain".to_string());
        assert_eq!(err.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(err.error_response().status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn test_server_side_pipeline_errors() {
        for err in [
            AppError::NoOutput("empty dir".to_string()),
            AppError::NotationExport("bad header".to_string()),
            AppError::Metadata("bad header".to_string()),
            AppError::Inference("model crashed".to_string()),
        ] {
            assert_eq!(err.class(), ErrorClass::Server);
            assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn test_anyhow_keeps_classified_errors() {
        let wrapped = anyhow::Error::new(AppError::NoOutput("nothing".to_string()));
        let err: AppError = wrapped.into();
        assert!(matches!(err, AppError::NoOutput(_)));

        let plain: AppError = anyhow::anyhow!("disk full").into();
        assert!(matches!(plain, AppError::Internal(_)));
    }
}

//! # Transcription Endpoint
//!
//! `POST /transcribe` (also under `/api/v1`) takes a multipart form with one `file`
//! part and answers with MusicXML, the base64 MIDI and metadata.
//!
//! ## Request:
//! ```text
//! Content-Type: multipart/form-data; boundary=...
//! part "file", Content-Type: audio/webm;codecs=opus
//! ```
//!
//! ## Response:
//! ```json
//! {
//!   "musicxml": "<?xml version=\"1.0\" ...",
//!   "midi_b64": "TVRoZAAAAAYAAAABANw...",
//!   "meta": {
//!     "duration_sec": 2.01,
//!     "source_mime": "audio/webm",
//!     "normalization": "transcoded",
//!     "note_count": 1
//!   }
//! }
//! ```
//!
//! ## Concurrency:
//! Each upload waits for a job slot, then runs the pipeline on the blocking pool. The
//! slot permit moves into the blocking job, so a client that disconnects mid-run does
//! not free its slot before the pipeline and its workspace cleanup are done.

use crate::audio::{DeclaredMime, UploadedAudio};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::stream::StreamExt;
use tracing::{debug, info};

/// Name of the multipart part holding the audio.
pub const FILE_FIELD: &str = "file";

pub async fn transcribe(
    state: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let limit = state.config.performance.max_upload_bytes;
    let upload = read_upload(payload, limit).await?;

    // Reject before taking a job slot
    let mime = upload.mime();
    if !mime.is_audio() {
        return Err(AppError::InvalidInput(format!(
            "expected an audio/* content type, got '{}'",
            upload.declared_mime
        )));
    }
    info!(
        mime = %upload.declared_mime,
        size_bytes = upload.data.len(),
        "Upload received"
    );

    let permit = state
        .job_slots
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| AppError::Internal(format!("Job slots closed: {}", e)))?;

    let job_state = state.clone();
    let result = web::block(move || {
        let _permit = permit;
        let job = job_state.start_job();
        let result = job_state.pipeline.run(upload);
        job.finish(result.as_ref().err().map(|e| e.kind()));
        result
    })
    .await
    .map_err(|e| AppError::Internal(format!("Transcription job was cancelled: {}", e)))??;

    Ok(HttpResponse::Ok().json(result))
}

/// Read the `file` part, enforcing `limit` while the bytes stream in.
async fn read_upload(mut payload: Multipart, limit: usize) -> AppResult<UploadedAudio> {
    let mut upload: Option<UploadedAudio> = None;

    while let Some(item) = payload.next().await {
        let mut field: Field =
            item.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;

        let field_name = field
            .content_disposition()
            .and_then(|cd| cd.get_name())
            .map(str::to_string);

        if field_name.as_deref() != Some(FILE_FIELD) || upload.is_some() {
            debug!(field = ?field_name, "Skipping multipart field");
            drain(&mut field).await?;
            continue;
        }

        let declared_mime = field
            .content_type()
            .map(|m| m.to_string())
            .ok_or_else(|| {
                AppError::InvalidInput("the file part has no Content-Type".to_string())
            })?;
        // Type errors win over size errors: nothing is buffered for a non-audio part
        if !DeclaredMime::parse(&declared_mime).is_audio() {
            return Err(AppError::InvalidInput(format!(
                "expected an audio/* content type, got '{}'",
                declared_mime
            )));
        }

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk =
                chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
            if data.len() + chunk.len() > limit {
                return Err(AppError::PayloadTooLarge(limit));
            }
            data.extend_from_slice(&chunk);
        }

        upload = Some(UploadedAudio::new(data, declared_mime));
    }

    upload.ok_or_else(|| {
        AppError::BadRequest(format!("No '{}' part in the multipart form", FILE_FIELD))
    })
}

async fn drain(field: &mut Field) -> AppResult<()> {
    while let Some(chunk) = field.next().await {
        chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
    }
    Ok(())
}

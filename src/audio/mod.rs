//! # Audio Ingestion Module
//!
//! Brings client uploads into the one format every later stage assumes.
//!
//! ## Key Components:
//! - **mime**: declared content type parsing (`audio/webm;codecs=opus` → `audio/webm`)
//! - **decode**: in-process decoding and resampling (symphonia + rubato)
//! - **wav**: canonical WAV encoding
//! - **transcoder**: the external transcoder fallback
//! - **normalizer**: the ordered strategy chain tying the above together
//!
//! ## Canonical Audio:
//! - **Sample Rate**: 44.1kHz
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono

pub mod decode;
pub mod mime;
pub mod normalizer;
pub mod transcoder;
pub mod wav;

pub use mime::DeclaredMime;
pub use normalizer::{FormatNormalizer, Normalization};
pub use transcoder::{Transcoder, TranscoderStatus};

/// An upload as received: raw bytes and the declared MIME type.
#[derive(Debug, Clone)]
pub struct UploadedAudio {
    pub data: Vec<u8>,
    pub declared_mime: String,
}

impl UploadedAudio {
    pub fn new(data: Vec<u8>, declared_mime: impl Into<String>) -> Self {
        Self {
            data,
            declared_mime: declared_mime.into(),
        }
    }

    pub fn mime(&self) -> DeclaredMime {
        DeclaredMime::parse(&self.declared_mime)
    }
}

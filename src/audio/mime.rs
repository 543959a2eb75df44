//! Declared MIME type handling.
//!
//! Browsers send things like `audio/webm;codecs=opus` or `Audio/WAV`, so the declared
//! type is reduced to its lowercase essence before any decision is made on it.

/// MIME types that are already canonical WAV and skip decoding.
const WAV_MIME_TYPES: &[&str] = &["audio/wav", "audio/x-wav", "audio/wave", "audio/vnd.wave"];

/// A declared MIME type, split into essence and the original text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredMime {
    raw: String,
    essence: String,
}

impl DeclaredMime {
    pub fn parse(raw: &str) -> Self {
        let essence = raw
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        Self {
            raw: raw.trim().to_string(),
            essence,
        }
    }

    /// The type as the client sent it (used in error messages).
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// `type/subtype` without parameters, lowercased.
    pub fn essence(&self) -> &str {
        &self.essence
    }

    pub fn is_audio(&self) -> bool {
        self.essence
            .strip_prefix("audio/")
            .is_some_and(|subtype| !subtype.is_empty())
    }

    pub fn is_wav(&self) -> bool {
        WAV_MIME_TYPES.contains(&self.essence.as_str())
    }

    /// Whether this type appears in the transcoder's container list.
    pub fn is_one_of(&self, candidates: &[String]) -> bool {
        candidates
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(&self.essence))
    }

    /// File extension hint for decoders probing the bytes.
    pub fn extension_hint(&self) -> Option<&'static str> {
        let subtype = self.essence.strip_prefix("audio/")?;
        let ext = match subtype {
            "wav" | "x-wav" | "wave" | "vnd.wave" => "wav",
            "ogg" | "opus" | "vorbis" => "ogg",
            "webm" => "webm",
            "x-matroska" => "mka",
            "mpeg" | "mp3" => "mp3",
            "mp4" | "x-m4a" | "m4a" => "m4a",
            "aac" => "aac",
            "flac" | "x-flac" => "flac",
            "aiff" | "x-aiff" => "aiff",
            _ => return None,
        };
        Some(ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters_and_case_are_ignored() {
        let mime = DeclaredMime::parse("Audio/WebM; codecs=opus");
        assert_eq!(mime.essence(), "audio/webm");
        assert_eq!(mime.raw(), "Audio/WebM; codecs=opus");
        assert!(mime.is_audio());
        assert!(!mime.is_wav());
    }

    #[test]
    fn test_wav_variants() {
        for raw in ["audio/wav", "audio/x-wav", "AUDIO/WAVE"] {
            assert!(DeclaredMime::parse(raw).is_wav(), "{} should be WAV", raw);
        }
        assert!(!DeclaredMime::parse("audio/webm").is_wav());
    }

    #[test]
    fn test_non_audio_types() {
        assert!(!DeclaredMime::parse("text/plain").is_audio());
        assert!(!DeclaredMime::parse("audio/").is_audio());
        assert!(!DeclaredMime::parse("").is_audio());
        assert!(!DeclaredMime::parse("video/webm").is_audio());
    }

    #[test]
    fn test_container_membership() {
        let containers = vec!["audio/webm".to_string(), "audio/ogg".to_string()];
        assert!(DeclaredMime::parse("audio/webm;codecs=opus").is_one_of(&containers));
        assert!(!DeclaredMime::parse("audio/flac").is_one_of(&containers));
    }

    #[test]
    fn test_extension_hints() {
        assert_eq!(DeclaredMime::parse("audio/ogg").extension_hint(), Some("ogg"));
        assert_eq!(DeclaredMime::parse("audio/x-m4a").extension_hint(), Some("m4a"));
        assert_eq!(DeclaredMime::parse("audio/x-unknown").extension_hint(), None);
    }
}

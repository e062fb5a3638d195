//! Capability backends.
//!
//! - [`UnavailableTranscriber`]: stands in when no speech-to-text worker is configured
//! - `remote` (feature): acoustic model and transcriber reached over HTTP

#[cfg(feature = "remote")]
pub mod remote;

use crate::{ReferenceAudio, Transcriber, TtsError};

/// Transcriber that always fails, so speakers must be added with a transcript.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableTranscriber;

impl Transcriber for UnavailableTranscriber {
    fn transcribe(&self, _audio: &ReferenceAudio) -> Result<String, TtsError> {
        Err(TtsError::TranscriptionFailure(
            "no transcriber is configured; supply prompt_text".to_string(),
        ))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TtsError {
    #[error("Speaker '{0}' not found. Call list() to see registered speakers.")]
    NotFound(String),
    #[error("Invalid reference audio: {0}")]
    InvalidReference(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Synthesis failed: {0}")]
    SynthesisFailure(String),
    #[error("Transcription failed: {0}")]
    TranscriptionFailure(String),
    #[error("Phonetic conversion failed: {0}")]
    PhoneticConversion(String),
    #[error("Invalid config: {0}")]
    Config(String),
    #[error("Failed to parse speaker cache: {0}")]
    CacheParse(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TtsError {
    /// Re-tag any error raised by the acoustic model as a synthesis failure.
    pub(crate) fn into_synthesis_failure(self) -> Self {
        match self {
            err @ TtsError::SynthesisFailure(_) => err,
            other => TtsError::SynthesisFailure(other.to_string()),
        }
    }
}

impl From<derive_builder::UninitializedFieldError> for TtsError {
    fn from(err: derive_builder::UninitializedFieldError) -> Self {
        TtsError::InvalidInput(err.to_string())
    }
}

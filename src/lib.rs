//! # tts-server-rs
//!
//! A Rust text-to-speech service built around cached speaker profiles and
//! zero-shot voice cloning.
//!
//! ## Features
//!
//! - **Speaker profiles**: register a reference clip once, synthesize by id afterwards
//! - **Zero-shot cloning**: synthesize with an inline reference clip and transcript
//! - **Selective phonetic annotation**: only rare or ambiguous characters get bopomofo hints
//! - **Streaming HTTP API**: frames are streamed to the client as the model produces them
//!
//! The acoustic model, the grapheme-to-phoneme converter and the speech-to-text
//! fallback are injected through the [`AcousticModel`], [`PhoneticConverter`]
//! and [`Transcriber`] traits. The `remote` feature provides HTTP-backed
//! implementations in [`engines::remote`].
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tts_server::{
//!     speakers::SpeakerStore, synthesis::{Synthesizer, SynthesisRequestBuilder, VoiceSource},
//!     text::TextFrontend,
//! };
//!
//! let frontend = Arc::new(TextFrontend::new(lexicon, converter));
//! let store = Arc::new(SpeakerStore::new(frontend.clone(), transcriber));
//! store.add_from_file("voiceA", "data/example.wav".as_ref(), Some("今天天氣真好"))?;
//!
//! let synthesizer = Synthesizer::new(model, frontend, store);
//! let request = SynthesisRequestBuilder::default()
//!     .text("明天也很好")
//!     .voice(VoiceSource::Speaker("voiceA".into()))
//!     .build()?;
//! synthesizer.synthesize_blocking(request)?.write_wav("output.wav".as_ref())?;
//! # Ok::<(), tts_server::TtsError>(())
//! ```

pub mod audio;
pub mod engines;
pub mod error;
pub mod server;
pub mod speakers;
pub mod synthesis;
pub mod text;

#[cfg(test)]
pub(crate) mod testing;

use std::path::Path;

pub use audio::ReferenceAudio;
pub use error::TtsError;

/// The collected result of a synthesis operation.
///
/// Contains raw f32 audio samples and the sample rate of the output audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioResult {
    /// Raw mono audio samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Sample rate reported by the acoustic model (22050 for BreezyVoice)
    pub sample_rate: u32,
}

impl AudioResult {
    /// Write the audio to a 16-bit PCM WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<(), TtsError> {
        let bytes = self.to_wav_bytes()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Encode the audio as an in-memory 16-bit PCM WAV file.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>, TtsError> {
        audio::encode_wav(&self.samples, self.sample_rate)
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Boxed iterator of audio frames produced by an [`AcousticModel`].
pub type FrameIter<'a> = Box<dyn Iterator<Item = Result<Vec<f32>, TtsError>> + Send + 'a>;

/// Everything the acoustic model needs for one segment of text.
#[derive(Debug, Clone, Copy)]
pub struct AcousticInput<'a> {
    /// Normalized and annotated target text
    pub text: &'a str,
    /// Normalized and annotated transcript of the reference clip
    pub prompt_text: &'a str,
    /// Reference clip the output voice is conditioned on
    pub reference: &'a ReferenceAudio,
    /// Speed multiplier, only set when the model reports [`AcousticModel::supports_speed`]
    pub speed: Option<f32>,
}

/// Text-to-mel-to-waveform capability.
///
/// Implementations yield frames incrementally so that callers can stream them
/// while the rest of the clip is still being generated. Errors raised here are
/// reported to callers as [`TtsError::SynthesisFailure`].
pub trait AcousticModel: Send + Sync {
    /// Identifier reported by the `/models` endpoint.
    fn model_id(&self) -> &str;

    /// Sample rate of the produced frames.
    fn sample_rate(&self) -> u32;

    /// Whether the model honours [`AcousticInput::speed`].
    fn supports_speed(&self) -> bool {
        false
    }

    /// Start synthesizing one segment of text.
    fn synthesize<'a>(&'a self, input: AcousticInput<'a>) -> Result<FrameIter<'a>, TtsError>;
}

/// Grapheme-to-phoneme capability.
pub trait PhoneticConverter: Send + Sync {
    /// Predict one reading per character of `text`.
    ///
    /// The returned vector must have exactly one entry per `char`; characters
    /// without a reading (punctuation, latin letters) map to `None`.
    fn to_phonetic(&self, text: &str) -> Result<Vec<Option<String>>, TtsError>;
}

/// Speech-to-text capability used when a speaker is added without a transcript.
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, audio: &ReferenceAudio) -> Result<String, TtsError>;
}

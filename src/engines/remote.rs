//! Acoustic model and transcriber served by HTTP workers.
//!
//! The model directory holds a `model.json` describing the workers:
//!
//! ```json
//! {
//!   "id": "MediaTek-Research/BreezyVoice",
//!   "sample_rate": 22050,
//!   "endpoint": "http://127.0.0.1:9000",
//!   "transcriber_endpoint": "http://127.0.0.1:9001",
//!   "supports_speed": false,
//!   "timeout_secs": 300
//! }
//! ```
//!
//! and optionally a `lexicon.json` for the text frontend.

use std::io::{ErrorKind, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::UnavailableTranscriber;
use crate::audio::{pcm16_le_bytes, pcm16_to_f32};
use crate::text::{Lexicon, LexiconConverter, TextFrontend};
use crate::{
    AcousticInput, AcousticModel, FrameIter, ReferenceAudio, Transcriber, TtsError,
};

/// Samples per frame read back from the acoustic worker (0.2 s at 22.05 kHz).
pub const FRAME_SAMPLES: usize = 4410;

const MODEL_CONFIG_FILE: &str = "model.json";

fn default_sample_rate() -> u32 {
    22050
}

fn default_timeout_secs() -> u64 {
    300
}

/// Contents of `model.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelConfig {
    /// Reported by `/models`
    pub id: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Base URL of the acoustic worker
    pub endpoint: String,
    /// Base URL of the speech-to-text worker
    #[serde(default)]
    pub transcriber_endpoint: Option<String>,
    #[serde(default)]
    pub supports_speed: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Read and validate `model.json` from `model_dir`.
pub fn load_model_config(model_dir: &Path) -> Result<ModelConfig, TtsError> {
    let path = model_dir.join(MODEL_CONFIG_FILE);
    let data = std::fs::read_to_string(&path)
        .map_err(|e| TtsError::Config(format!("{}: {e}", path.display())))?;
    let config: ModelConfig = serde_json::from_str(&data)
        .map_err(|e| TtsError::Config(format!("{}: {e}", path.display())))?;

    if config.id.trim().is_empty() {
        return Err(TtsError::Config("model id is empty".to_string()));
    }
    if config.endpoint.trim().is_empty() {
        return Err(TtsError::Config("acoustic endpoint is empty".to_string()));
    }
    if config.sample_rate == 0 {
        return Err(TtsError::Config("sample_rate must be positive".to_string()));
    }
    Ok(config)
}

/// Everything loaded from a model directory.
pub struct Backend {
    pub config: ModelConfig,
    pub model: Arc<dyn AcousticModel>,
    pub transcriber: Arc<dyn Transcriber>,
    pub lexicon: Arc<Lexicon>,
}

impl Backend {
    /// Frontend over the loaded lexicon with the dictionary converter.
    pub fn frontend(&self) -> Arc<TextFrontend> {
        Arc::new(TextFrontend::new(
            self.lexicon.clone(),
            Arc::new(LexiconConverter::new(self.lexicon.clone())),
        ))
    }
}

/// Load the model config, the lexicon and connect the workers.
///
/// Must be called outside of an async context: the blocking HTTP client
/// refuses to be built on a runtime thread.
pub fn load_backend(model_dir: &Path) -> Result<Backend, TtsError> {
    let config = load_model_config(model_dir)?;
    log::info!(
        "Loading model '{}' ({} Hz) served at {}",
        config.id,
        config.sample_rate,
        config.endpoint
    );

    let client = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| TtsError::Config(format!("failed to build HTTP client: {e}")))?;

    let transcriber: Arc<dyn Transcriber> = match &config.transcriber_endpoint {
        Some(endpoint) => Arc::new(RemoteTranscriber::new(client.clone(), endpoint)),
        None => {
            log::warn!("No transcriber_endpoint configured, speakers need an explicit transcript");
            Arc::new(UnavailableTranscriber)
        }
    };
    let model = Arc::new(RemoteAcousticModel::new(client, config.clone()));
    let lexicon = Arc::new(Lexicon::load_or_builtin(model_dir)?);

    Ok(Backend {
        config,
        model,
        transcriber,
        lexicon,
    })
}

#[derive(Serialize)]
struct SynthesizeBody<'a> {
    text: &'a str,
    prompt_text: &'a str,
    /// Base64 of little-endian 16-bit PCM
    prompt_audio: String,
    prompt_sample_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f32>,
}

/// Acoustic worker returning raw 16-bit PCM at the configured sample rate.
pub struct RemoteAcousticModel {
    client: Client,
    config: ModelConfig,
}

impl RemoteAcousticModel {
    pub fn new(client: Client, config: ModelConfig) -> Self {
        Self { client, config }
    }
}

impl AcousticModel for RemoteAcousticModel {
    fn model_id(&self) -> &str {
        &self.config.id
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn supports_speed(&self) -> bool {
        self.config.supports_speed
    }

    fn synthesize<'a>(&'a self, input: AcousticInput<'a>) -> Result<FrameIter<'a>, TtsError> {
        let url = format!("{}/synthesize", self.config.endpoint.trim_end_matches('/'));
        let body = SynthesizeBody {
            text: input.text,
            prompt_text: input.prompt_text,
            prompt_audio: STANDARD.encode(pcm16_le_bytes(input.reference.samples())),
            prompt_sample_rate: input.reference.sample_rate(),
            speed: input.speed,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| TtsError::SynthesisFailure(format!("acoustic worker: {e}")))?;

        Ok(Box::new(PcmFrames::new(response, FRAME_SAMPLES)))
    }
}

/// Splits a 16-bit PCM byte stream into frames of at most `frame_samples` samples.
pub struct PcmFrames<R> {
    reader: R,
    buf: Vec<u8>,
    carry: Option<u8>,
    done: bool,
}

impl<R: Read> PcmFrames<R> {
    pub fn new(reader: R, frame_samples: usize) -> Self {
        Self {
            reader,
            buf: vec![0; frame_samples.max(1) * 2],
            carry: None,
            done: false,
        }
    }
}

impl<R: Read> Iterator for PcmFrames<R> {
    type Item = Result<Vec<f32>, TtsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut filled = 0;
        if let Some(byte) = self.carry.take() {
            self.buf[0] = byte;
            filled = 1;
        }
        while filled < self.buf.len() {
            match self.reader.read(&mut self.buf[filled..]) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(TtsError::SynthesisFailure(format!(
                        "acoustic worker stream: {e}"
                    ))));
                }
            }
        }

        let even = filled - filled % 2;
        if even < filled {
            if self.done {
                log::warn!("Acoustic worker sent a trailing odd byte, dropping it");
            } else {
                self.carry = Some(self.buf[even]);
            }
        }
        if even == 0 {
            return None;
        }
        Some(Ok(pcm16_to_f32(&self.buf[..even])))
    }
}

#[derive(Serialize)]
struct TranscribeBody {
    /// Base64 of little-endian 16-bit PCM
    audio: String,
    sample_rate: u32,
}

#[derive(Deserialize)]
struct TranscribeReply {
    text: String,
}

/// Speech-to-text worker.
pub struct RemoteTranscriber {
    client: Client,
    url: String,
}

impl RemoteTranscriber {
    pub fn new(client: Client, endpoint: &str) -> Self {
        Self {
            client,
            url: format!("{}/transcribe", endpoint.trim_end_matches('/')),
        }
    }
}

impl Transcriber for RemoteTranscriber {
    fn transcribe(&self, audio: &ReferenceAudio) -> Result<String, TtsError> {
        let body = TranscribeBody {
            audio: STANDARD.encode(pcm16_le_bytes(audio.samples())),
            sample_rate: audio.sample_rate(),
        };
        let reply: TranscribeReply = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|e| TtsError::TranscriptionFailure(format!("transcriber worker: {e}")))?;

        log::debug!("Transcribed reference clip: {}", reply.text);
        Ok(reply.text)
    }
}

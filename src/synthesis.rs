//! Request-to-audio orchestration.
//!
//! A request is normalized and annotated, its voice resolved against the
//! speaker store or an inline clip, and the target text is fed to the acoustic
//! model one sentence at a time.

use std::sync::Arc;

use derive_builder::Builder;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

use crate::audio::{pcm16_le_bytes, ReferenceAudio};
use crate::speakers::{SpeakerProfile, SpeakerStore};
use crate::text::TextFrontend;
use crate::{AcousticInput, AcousticModel, AudioResult, TtsError};

/// Accepted range for [`SynthesisRequest::speed`].
pub const SPEED_RANGE: std::ops::RangeInclusive<f32> = 0.25..=4.0;

/// Frames buffered between the producer and a slow client.
const FRAME_CHANNEL_CAPACITY: usize = 16;

/// Where the output voice comes from.
#[derive(Debug, Clone)]
pub enum VoiceSource {
    /// A profile registered in the speaker store, looked up at request time.
    Speaker(String),
    /// A profile the caller already holds.
    Profile(Arc<SpeakerProfile>),
    /// An ad-hoc clip; its transcript is normalized and annotated on every call.
    Inline {
        reference: Arc<ReferenceAudio>,
        transcript: String,
    },
}

/// Parameters for one synthesis call.
///
/// ```ignore
/// let request = SynthesisRequestBuilder::default()
///     .text("明天也很好")
///     .voice(VoiceSource::Speaker("voiceA".into()))
///     .speed(1.2)
///     .build()?;
/// ```
#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", build_fn(error = "TtsError"))]
pub struct SynthesisRequest {
    #[builder(setter(into))]
    pub text: String,
    pub voice: VoiceSource,
    /// Speed multiplier. Ignored by models without speed control.
    #[builder(default = "1.0")]
    pub speed: f32,
}

/// Everything resolved up front so the model loop never touches the store.
#[derive(Debug, Clone)]
pub struct SynthesisJob {
    segments: Vec<String>,
    prompt_text: String,
    reference: Arc<ReferenceAudio>,
    speed: Option<f32>,
}

impl SynthesisJob {
    /// Annotated target segments, in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn prompt_text(&self) -> &str {
        &self.prompt_text
    }

    /// Drive the model over every segment, handing each frame to `emit`.
    ///
    /// Production stops early when `emit` returns `false`. Returns the number
    /// of samples emitted.
    pub fn run<F>(&self, model: &dyn AcousticModel, mut emit: F) -> Result<usize, TtsError>
    where
        F: FnMut(Vec<f32>) -> bool,
    {
        let mut total = 0;
        for segment in &self.segments {
            let input = AcousticInput {
                text: segment,
                prompt_text: &self.prompt_text,
                reference: &self.reference,
                speed: self.speed,
            };
            let frames = model
                .synthesize(input)
                .map_err(TtsError::into_synthesis_failure)?;

            for frame in frames {
                let frame = frame.map_err(TtsError::into_synthesis_failure)?;
                if frame.is_empty() {
                    continue;
                }
                total += frame.len();
                if !emit(frame) {
                    log::debug!("Frame receiver dropped, stopping after {total} samples");
                    return Ok(total);
                }
            }
        }

        if total == 0 {
            return Err(TtsError::SynthesisFailure(
                "model produced no audio".to_string(),
            ));
        }
        Ok(total)
    }
}

/// Incremental synthesis output. Frames arrive in order; consume once.
pub struct SynthesisStream {
    sample_rate: u32,
    frames: mpsc::Receiver<Result<Vec<f32>, TtsError>>,
}

impl SynthesisStream {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub async fn next_frame(&mut self) -> Option<Result<Vec<f32>, TtsError>> {
        self.frames.recv().await
    }

    /// Wait for every frame and concatenate them.
    pub async fn collect(mut self) -> Result<AudioResult, TtsError> {
        let mut samples = Vec::new();
        while let Some(frame) = self.next_frame().await {
            samples.extend_from_slice(&frame?);
        }
        Ok(AudioResult {
            samples,
            sample_rate: self.sample_rate,
        })
    }

    /// Frames as little-endian 16-bit PCM chunks.
    pub fn into_pcm16(self) -> impl Stream<Item = Result<Vec<u8>, TtsError>> + Send + 'static {
        ReceiverStream::new(self.frames).map(|frame| frame.map(|samples| pcm16_le_bytes(&samples)))
    }
}

/// Ties the frontend, the speaker store and the acoustic model together.
#[derive(Clone)]
pub struct Synthesizer {
    model: Arc<dyn AcousticModel>,
    frontend: Arc<TextFrontend>,
    store: Arc<SpeakerStore>,
}

impl Synthesizer {
    pub fn new(
        model: Arc<dyn AcousticModel>,
        frontend: Arc<TextFrontend>,
        store: Arc<SpeakerStore>,
    ) -> Self {
        Self {
            model,
            frontend,
            store,
        }
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    pub fn sample_rate(&self) -> u32 {
        self.model.sample_rate()
    }

    pub fn store(&self) -> &Arc<SpeakerStore> {
        &self.store
    }

    pub fn frontend(&self) -> &Arc<TextFrontend> {
        &self.frontend
    }

    /// Validate a request and resolve its voice and text.
    pub fn prepare(&self, request: SynthesisRequest) -> Result<SynthesisJob, TtsError> {
        let target = self.frontend.normalize_checked(&request.text)?;

        if !request.speed.is_finite() || !SPEED_RANGE.contains(&request.speed) {
            return Err(TtsError::InvalidInput(format!(
                "speed must be between {} and {}, got {}",
                SPEED_RANGE.start(),
                SPEED_RANGE.end(),
                request.speed
            )));
        }

        let (reference, prompt_text) = match request.voice {
            VoiceSource::Speaker(id) => {
                let profile = self.store.get(&id)?;
                (profile.reference.clone(), profile.phonetic_transcript.clone())
            }
            VoiceSource::Profile(profile) => {
                (profile.reference.clone(), profile.phonetic_transcript.clone())
            }
            VoiceSource::Inline {
                reference,
                transcript,
            } => {
                if reference.samples().is_empty() {
                    return Err(TtsError::InvalidReference(
                        "reference clip is empty".to_string(),
                    ));
                }
                let prompt_text = self.frontend.prepare(&transcript)?;
                (reference, prompt_text)
            }
        };

        let annotated = self.frontend.annotate(&target)?;
        let segments = self.frontend.normalizer().segments(&annotated);

        let speed = if self.model.supports_speed() {
            Some(request.speed)
        } else {
            if request.speed != 1.0 {
                log::debug!(
                    "Model '{}' has no speed control, ignoring speed {}",
                    self.model.model_id(),
                    request.speed
                );
            }
            None
        };

        log::debug!("Prepared {} segment(s): {:?}", segments.len(), segments);

        Ok(SynthesisJob {
            segments,
            prompt_text,
            reference,
            speed,
        })
    }

    /// Synthesize on the calling thread and collect the whole clip.
    pub fn synthesize_blocking(&self, request: SynthesisRequest) -> Result<AudioResult, TtsError> {
        let job = self.prepare(request)?;
        let mut samples = Vec::new();
        job.run(self.model.as_ref(), |frame| {
            samples.extend_from_slice(&frame);
            true
        })?;
        Ok(AudioResult {
            samples,
            sample_rate: self.model.sample_rate(),
        })
    }

    /// Start synthesizing on the blocking pool and return the frame stream.
    ///
    /// Validation and voice errors are returned here, before any frame is
    /// produced. Model errors arrive as the last item of the stream. Dropping
    /// the stream stops production at the next frame.
    pub async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisStream, TtsError> {
        let this = self.clone();
        let job = tokio::task::spawn_blocking(move || this.prepare(request))
            .await
            .map_err(join_error)??;

        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let model = self.model.clone();
        tokio::task::spawn_blocking(move || {
            let result = job.run(model.as_ref(), |frame| tx.blocking_send(Ok(frame)).is_ok());
            if let Err(err) = result {
                log::error!("Synthesis failed: {err}");
                let _ = tx.blocking_send(Err(err));
            }
        });

        Ok(SynthesisStream {
            sample_rate: self.model.sample_rate(),
            frames: rx,
        })
    }
}

fn join_error(err: tokio::task::JoinError) -> TtsError {
    TtsError::SynthesisFailure(format!("synthesis task failed: {err}"))
}

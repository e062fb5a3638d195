//! Stub capabilities and fixtures shared by the unit tests.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::ReferenceAudio;
use crate::text::{Lexicon, LexiconConverter, TextFrontend};
use crate::{AcousticInput, AcousticModel, FrameIter, PhoneticConverter, Transcriber, TtsError};

pub const STUB_SAMPLE_RATE: u32 = 22050;

/// Encode samples as an in-memory 16-bit mono WAV file.
pub fn wav_bytes(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn tone(len: usize, amplitude: f32) -> Vec<f32> {
    (0..len)
        .map(|i| (i as f32 * 0.05).sin() * amplitude)
        .collect()
}

/// Half a second of 16 kHz tone.
pub fn reference_clip() -> ReferenceAudio {
    ReferenceAudio::from_samples(tone(8000, 0.5), 16000).unwrap()
}

pub fn frontend() -> Arc<TextFrontend> {
    let lexicon = Arc::new(Lexicon::builtin());
    Arc::new(TextFrontend::new(
        lexicon.clone(),
        Arc::new(LexiconConverter::new(lexicon)),
    ))
}

/// Frontend whose converter is shared with the caller.
pub fn frontend_with(converter: Arc<dyn PhoneticConverter>) -> Arc<TextFrontend> {
    Arc::new(TextFrontend::new(Arc::new(Lexicon::builtin()), converter))
}

/// Builtin converter that counts how often it is invoked.
pub struct CountingConverter {
    inner: LexiconConverter,
    calls: AtomicUsize,
}

impl CountingConverter {
    pub fn new() -> Self {
        Self {
            inner: LexiconConverter::new(Arc::new(Lexicon::builtin())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PhoneticConverter for CountingConverter {
    fn to_phonetic(&self, text: &str) -> Result<Vec<Option<String>>, TtsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.to_phonetic(text)
    }
}

pub struct StubTranscriber {
    text: String,
    calls: AtomicUsize,
}

impl StubTranscriber {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transcriber for StubTranscriber {
    fn transcribe(&self, _audio: &ReferenceAudio) -> Result<String, TtsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.clone())
    }
}

/// What the stub model was asked to synthesize.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedInput {
    pub text: String,
    pub prompt_text: String,
    pub reference: ReferenceAudio,
    pub speed: Option<f32>,
}

/// Acoustic model emitting `frames_per_segment` frames of `frame_len` samples per call.
pub struct StubModel {
    pub frames_per_segment: usize,
    pub frame_len: usize,
    pub speed: bool,
    inputs: Mutex<Vec<RecordedInput>>,
    produced: AtomicUsize,
}

impl StubModel {
    pub fn new() -> Self {
        Self {
            frames_per_segment: 2,
            frame_len: 160,
            speed: false,
            inputs: Mutex::new(Vec::new()),
            produced: AtomicUsize::new(0),
        }
    }

    pub fn with_speed(mut self) -> Self {
        self.speed = true;
        self
    }

    pub fn with_frames(mut self, frames_per_segment: usize) -> Self {
        self.frames_per_segment = frames_per_segment;
        self
    }

    pub fn inputs(&self) -> Vec<RecordedInput> {
        self.inputs.lock().clone()
    }

    /// Number of frames handed out so far.
    pub fn produced(&self) -> usize {
        self.produced.load(Ordering::SeqCst)
    }
}

impl AcousticModel for StubModel {
    fn model_id(&self) -> &str {
        "stub-voice"
    }

    fn sample_rate(&self) -> u32 {
        STUB_SAMPLE_RATE
    }

    fn supports_speed(&self) -> bool {
        self.speed
    }

    fn synthesize<'a>(&'a self, input: AcousticInput<'a>) -> Result<FrameIter<'a>, TtsError> {
        self.inputs.lock().push(RecordedInput {
            text: input.text.to_string(),
            prompt_text: input.prompt_text.to_string(),
            reference: input.reference.clone(),
            speed: input.speed,
        });
        let frame_len = self.frame_len;
        Ok(Box::new((0..self.frames_per_segment).map(move |_| {
            self.produced.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.25; frame_len])
        })))
    }
}

/// Acoustic model that fails on its second frame.
pub struct FailingModel;

impl AcousticModel for FailingModel {
    fn model_id(&self) -> &str {
        "failing"
    }

    fn sample_rate(&self) -> u32 {
        STUB_SAMPLE_RATE
    }

    fn synthesize<'a>(&'a self, _input: AcousticInput<'a>) -> Result<FrameIter<'a>, TtsError> {
        let frames: Vec<Result<Vec<f32>, TtsError>> = vec![
            Ok(vec![0.1; 16]),
            Err(TtsError::Io(std::io::Error::other("worker went away"))),
        ];
        Ok(Box::new(frames.into_iter()))
    }
}

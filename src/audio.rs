//! Reference clip decoding and PCM helpers.

use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;

use crate::TtsError;

/// Sample rate every reference clip is resampled to.
pub const REFERENCE_SAMPLE_RATE: u32 = 16000;

/// A decoded reference clip: mono f32 samples at [`REFERENCE_SAMPLE_RATE`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceAudio {
    samples: Vec<f32>,
}

impl ReferenceAudio {
    /// Build a reference clip from mono samples at an arbitrary rate.
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Result<Self, TtsError> {
        if sample_rate == 0 {
            return Err(TtsError::InvalidReference("sample rate is zero".to_string()));
        }
        if samples.is_empty() {
            return Err(TtsError::InvalidReference("clip contains no samples".to_string()));
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(TtsError::InvalidReference(
                "clip contains non-finite samples".to_string(),
            ));
        }

        let samples = resample_linear(&samples, sample_rate, REFERENCE_SAMPLE_RATE);
        Ok(Self { samples })
    }

    /// Decode a WAV file held in memory.
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self, TtsError> {
        let reader = hound::WavReader::new(Cursor::new(bytes))
            .map_err(|e| TtsError::InvalidReference(format!("not a readable WAV file: {e}")))?;
        Self::decode(reader)
    }

    /// Decode a WAV file from disk.
    pub fn load(path: &Path) -> Result<Self, TtsError> {
        let file = BufReader::new(File::open(path)?);
        let reader = hound::WavReader::new(file).map_err(|e| {
            TtsError::InvalidReference(format!("{}: not a readable WAV file: {e}", path.display()))
        })?;
        Self::decode(reader)
    }

    fn decode<R: Read>(mut reader: hound::WavReader<R>) -> Result<Self, TtsError> {
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|e| TtsError::InvalidReference(format!("corrupt sample data: {e}")))?,
            hound::SampleFormat::Int => {
                let scale = 1.0 / (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<_, _>>()
                    .map_err(|e| {
                        TtsError::InvalidReference(format!("corrupt sample data: {e}"))
                    })?
            }
        };

        let mono = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect()
        };

        log::debug!(
            "Decoded reference clip: {} samples at {} Hz, {} channel(s)",
            mono.len(),
            spec.sample_rate,
            channels
        );

        Self::from_samples(mono, spec.sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        REFERENCE_SAMPLE_RATE
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / REFERENCE_SAMPLE_RATE as f64
    }
}

/// Linear-interpolation resampler.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64 / ratio).round() as usize).max(1);
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = (pos.floor() as usize).min(last);
            let frac = (pos - idx as f64) as f32;
            let left = samples[idx];
            let right = samples[(idx + 1).min(last)];
            left + (right - left) * frac
        })
        .collect()
}

/// Convert f32 samples to little-endian signed 16-bit PCM.
pub fn pcm16_le_bytes(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        out.extend_from_slice(&to_i16(sample).to_le_bytes());
    }
    out
}

/// Convert little-endian signed 16-bit PCM to f32 samples. A trailing odd byte is ignored.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn pcm16_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Encode samples as a complete 16-bit PCM WAV file.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, TtsError> {
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, pcm16_spec(sample_rate))
            .map_err(wav_write_error)?;
        for &sample in samples {
            writer.write_sample(to_i16(sample)).map_err(wav_write_error)?;
        }
        writer.finalize().map_err(wav_write_error)?;
    }
    Ok(cursor.into_inner())
}

/// WAV header for a stream whose length is not known up front.
///
/// The RIFF and data chunk sizes are set to `u32::MAX`, which players treat
/// as "read until end of stream".
pub fn wav_stream_header(sample_rate: u32) -> Result<Vec<u8>, TtsError> {
    let mut header = encode_wav(&[], sample_rate)?;
    header[4..8].copy_from_slice(&u32::MAX.to_le_bytes());

    let data_pos = header
        .windows(4)
        .position(|w| w == b"data")
        .ok_or_else(|| TtsError::SynthesisFailure("WAV header has no data chunk".to_string()))?;
    header[data_pos + 4..data_pos + 8].copy_from_slice(&u32::MAX.to_le_bytes());
    Ok(header)
}

fn wav_write_error(err: hound::Error) -> TtsError {
    match err {
        hound::Error::IoError(io) => TtsError::Io(io),
        other => TtsError::SynthesisFailure(format!("failed to encode WAV: {other}")),
    }
}

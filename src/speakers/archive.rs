//! On-disk speaker cache.
//!
//! A zip archive holding `manifest.json` plus one `voices/{n}.npy` float32
//! array per profile with the 16 kHz reference samples.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zip::write::SimpleFileOptions;

use super::SpeakerProfile;
use crate::audio::{ReferenceAudio, REFERENCE_SAMPLE_RATE};
use crate::TtsError;

const MANIFEST: &str = "manifest.json";
const NPY_MAGIC: &[u8] = b"\x93NUMPY";

#[derive(Serialize, Deserialize)]
struct ManifestEntry {
    id: String,
    transcript: String,
    phonetic_transcript: String,
    sample_rate: u32,
    voice: String,
}

impl ManifestEntry {
    /// Reject entries that `SpeakerStore::prepare` could never have produced.
    fn validate(&self) -> Result<(), TtsError> {
        let blank = [
            ("id", &self.id),
            ("transcript", &self.transcript),
            ("phonetic_transcript", &self.phonetic_transcript),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty());

        match blank {
            Some((field, _)) => Err(TtsError::CacheParse(format!(
                "{MANIFEST}: entry for '{}' has an empty {field}",
                self.id
            ))),
            None => Ok(()),
        }
    }
}

pub(super) fn write(path: &Path, profiles: &[Arc<SpeakerProfile>]) -> Result<(), TtsError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let staged = tempfile::NamedTempFile::new_in(dir)?;

    {
        let mut zip = zip::ZipWriter::new(staged.as_file());
        let mut manifest = Vec::with_capacity(profiles.len());

        for (i, profile) in profiles.iter().enumerate() {
            let voice = format!("voices/{i}.npy");
            zip.start_file(voice.as_str(), SimpleFileOptions::default())?;
            zip.write_all(&encode_npy(profile.reference.samples()))?;

            manifest.push(ManifestEntry {
                id: profile.id.clone(),
                transcript: profile.transcript.clone(),
                phonetic_transcript: profile.phonetic_transcript.clone(),
                sample_rate: profile.reference.sample_rate(),
                voice,
            });
        }

        zip.start_file(MANIFEST, SimpleFileOptions::default())?;
        zip.write_all(&serde_json::to_vec_pretty(&manifest)?)?;
        zip.finish()?;
    }

    staged
        .persist(path)
        .map_err(|e| TtsError::Io(e.error))?;
    Ok(())
}

pub(super) fn read(path: &Path) -> Result<Vec<SpeakerProfile>, TtsError> {
    let file = BufReader::new(File::open(path)?);
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| TtsError::CacheParse(format!("Failed to open zip archive: {e}")))?;

    let manifest: Vec<ManifestEntry> = {
        let mut entry = zip
            .by_name(MANIFEST)
            .map_err(|e| TtsError::CacheParse(format!("Missing {MANIFEST}: {e}")))?;
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        serde_json::from_slice(&data)
            .map_err(|e| TtsError::CacheParse(format!("Invalid {MANIFEST}: {e}")))?
    };

    let mut profiles = Vec::with_capacity(manifest.len());
    for entry in manifest {
        entry.validate()?;
        let mut data = Vec::new();
        zip.by_name(&entry.voice)
            .map_err(|e| TtsError::CacheParse(format!("Failed to read {}: {e}", entry.voice)))?
            .read_to_end(&mut data)?;

        let samples = parse_npy(&data, &entry.voice)?;
        let reference = ReferenceAudio::from_samples(samples, entry.sample_rate)?;
        if entry.sample_rate != REFERENCE_SAMPLE_RATE {
            log::warn!(
                "Resampled cached voice '{}' from {} Hz",
                entry.id,
                entry.sample_rate
            );
        }

        profiles.push(SpeakerProfile {
            id: entry.id,
            reference: Arc::new(reference),
            transcript: entry.transcript,
            phonetic_transcript: entry.phonetic_transcript,
        });
    }
    Ok(profiles)
}

/// Encode samples as a version 1.0 `.npy` file holding a 1-D `<f4` array.
fn encode_npy(samples: &[f32]) -> Vec<u8> {
    let dict = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({},), }}",
        samples.len()
    );
    // magic(6) + version(2) + header_len(2) + dict + padding + '\n' is a multiple of 64
    let unpadded = NPY_MAGIC.len() + 4 + dict.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    let header_len = dict.len() + padding + 1;

    let mut out = Vec::with_capacity(NPY_MAGIC.len() + 4 + header_len + samples.len() * 4);
    out.extend_from_slice(NPY_MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header_len as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.extend(std::iter::repeat(b' ').take(padding));
    out.push(b'\n');
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Parse a `.npy` file holding little-endian float32 samples.
fn parse_npy(data: &[u8], name: &str) -> Result<Vec<f32>, TtsError> {
    if data.len() < 10 {
        return Err(TtsError::CacheParse(format!(
            "{name}: file too short ({} bytes)",
            data.len()
        )));
    }

    if &data[0..6] != NPY_MAGIC {
        return Err(TtsError::CacheParse(format!(
            "{name}: invalid numpy magic bytes"
        )));
    }

    // major version at [6], minor at [7], header_len at [8..10] (little-endian u16)
    let header_len = u16::from_le_bytes([data[8], data[9]]) as usize;
    let data_offset = 10 + header_len;

    if data.len() < data_offset {
        return Err(TtsError::CacheParse(format!(
            "{name}: header truncated (need {data_offset} bytes, got {})",
            data.len()
        )));
    }

    let header = String::from_utf8_lossy(&data[10..data_offset]);
    if !header.contains("'<f4'") {
        return Err(TtsError::CacheParse(format!(
            "{name}: expected little-endian float32 data, header is {}",
            header.trim()
        )));
    }

    let float_data = &data[data_offset..];
    if float_data.len() % 4 != 0 {
        return Err(TtsError::CacheParse(format!(
            "{name}: float data length {} is not a multiple of 4",
            float_data.len()
        )));
    }

    Ok(float_data
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn npy_header_is_64_byte_aligned() {
        let encoded = encode_npy(&[0.5, -0.25, 1.0]);
        let header_len = u16::from_le_bytes([encoded[8], encoded[9]]) as usize;
        assert_eq!((10 + header_len) % 64, 0);
        assert_eq!(encoded[10 + header_len - 1], b'\n');
        assert_eq!(parse_npy(&encoded, "t").unwrap(), vec![0.5, -0.25, 1.0]);
    }

    #[test]
    fn rejects_bad_magic_and_dtype() {
        assert!(matches!(
            parse_npy(b"\x93NUMPZ\x01\x00\x00\x00", "t"),
            Err(TtsError::CacheParse(_))
        ));

        let mut encoded = encode_npy(&[1.0]);
        let pos = encoded.windows(3).position(|w| w == b"<f4").unwrap();
        encoded[pos + 2] = b'8';
        assert!(matches!(parse_npy(&encoded, "t"), Err(TtsError::CacheParse(_))));
    }

    #[test]
    fn rejects_non_archive_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not a zip").unwrap();
        assert!(matches!(read(file.path()), Err(TtsError::CacheParse(_))));
    }

    #[test]
    fn rejects_entries_with_blank_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("speakers.zip");
        let valid = SpeakerProfile {
            id: "voiceA".to_string(),
            reference: Arc::new(crate::testing::reference_clip()),
            transcript: "你好".to_string(),
            phonetic_transcript: "你好".to_string(),
        };

        write(&path, &[Arc::new(valid.clone())]).unwrap();
        assert_eq!(read(&path).unwrap(), vec![valid.clone()]);

        let blanks = [
            SpeakerProfile { id: " ".to_string(), ..valid.clone() },
            SpeakerProfile { transcript: String::new(), ..valid.clone() },
            SpeakerProfile { phonetic_transcript: String::new(), ..valid.clone() },
        ];
        for profile in blanks {
            write(&path, &[Arc::new(profile)]).unwrap();
            assert!(matches!(read(&path), Err(TtsError::CacheParse(_))));
        }
    }
}

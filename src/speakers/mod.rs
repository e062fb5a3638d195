//! Registry of named speaker profiles.

mod archive;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::audio::ReferenceAudio;
use crate::text::TextFrontend;
use crate::{Transcriber, TtsError};

/// A cached voice reference usable by id across requests.
///
/// Profiles are immutable; re-adding an id swaps in a new profile.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerProfile {
    pub id: String,
    pub reference: Arc<ReferenceAudio>,
    /// Transcript of the reference clip as supplied or transcribed
    pub transcript: String,
    /// Normalized and annotated transcript, computed once at registration
    pub phonetic_transcript: String,
}

/// In-memory speaker registry.
///
/// Profiles are built outside the lock and swapped in whole, so a concurrent
/// [`SpeakerStore::get`] sees either the old or the new profile, never a
/// partially built one.
pub struct SpeakerStore {
    profiles: RwLock<HashMap<String, Arc<SpeakerProfile>>>,
    /// Held from snapshot to rename so archive writes land in snapshot order
    save_lock: Mutex<()>,
    frontend: Arc<TextFrontend>,
    transcriber: Arc<dyn Transcriber>,
}

impl SpeakerStore {
    pub fn new(frontend: Arc<TextFrontend>, transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
            save_lock: Mutex::new(()),
            frontend,
            transcriber,
        }
    }

    /// Build a profile without registering it.
    ///
    /// Transcribes the clip when `transcript` is absent or blank, then
    /// normalizes and annotates the transcript.
    pub fn prepare(
        &self,
        id: &str,
        reference: ReferenceAudio,
        transcript: Option<&str>,
    ) -> Result<SpeakerProfile, TtsError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(TtsError::InvalidInput("speaker id is empty".to_string()));
        }
        if reference.samples().is_empty() {
            return Err(TtsError::InvalidReference(format!(
                "reference clip for '{id}' is empty"
            )));
        }

        let transcript = match transcript.map(str::trim).filter(|t| !t.is_empty()) {
            Some(text) => text.to_string(),
            None => {
                log::info!("No transcript supplied for '{id}', transcribing reference clip");
                let text = self.transcriber.transcribe(&reference)?;
                let text = text.trim();
                if text.is_empty() {
                    return Err(TtsError::TranscriptionFailure(format!(
                        "transcriber returned no text for '{id}'"
                    )));
                }
                text.to_string()
            }
        };

        let phonetic_transcript = self.frontend.prepare(&transcript)?;

        Ok(SpeakerProfile {
            id: id.to_string(),
            reference: Arc::new(reference),
            transcript,
            phonetic_transcript,
        })
    }

    /// Register or replace a speaker.
    pub fn add(
        &self,
        id: &str,
        reference: ReferenceAudio,
        transcript: Option<&str>,
    ) -> Result<Arc<SpeakerProfile>, TtsError> {
        let profile = Arc::new(self.prepare(id, reference, transcript)?);
        self.insert(profile.clone());
        Ok(profile)
    }

    /// Decode a WAV clip from disk and register it.
    pub fn add_from_file(
        &self,
        id: &str,
        path: &Path,
        transcript: Option<&str>,
    ) -> Result<Arc<SpeakerProfile>, TtsError> {
        let reference = ReferenceAudio::load(path)?;
        self.add(id, reference, transcript)
    }

    fn insert(&self, profile: Arc<SpeakerProfile>) {
        let id = profile.id.clone();
        let replaced = self.profiles.write().insert(id.clone(), profile).is_some();
        if replaced {
            log::info!("Replaced speaker '{id}'");
        } else {
            log::info!("Added speaker '{id}'");
        }
    }

    pub fn remove(&self, id: &str) -> Result<(), TtsError> {
        let id = id.trim();
        match self.profiles.write().remove(id) {
            Some(_) => {
                log::info!("Removed speaker '{id}'");
                Ok(())
            }
            None => Err(TtsError::NotFound(id.to_string())),
        }
    }

    pub fn get(&self, id: &str) -> Result<Arc<SpeakerProfile>, TtsError> {
        let id = id.trim();
        self.profiles
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| TtsError::NotFound(id.to_string()))
    }

    /// Snapshot of the registered ids in sorted order.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.profiles.read().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }

    /// Write every profile to a zip archive at `path`, replacing it atomically.
    ///
    /// Concurrent saves are serialized, so the archive left behind always
    /// reflects the latest snapshot taken.
    pub fn save(&self, path: &Path) -> Result<(), TtsError> {
        let _guard = self.save_lock.lock();
        let snapshot: Vec<Arc<SpeakerProfile>> = {
            let profiles = self.profiles.read();
            let mut all: Vec<_> = profiles.values().cloned().collect();
            all.sort_by(|a, b| a.id.cmp(&b.id));
            all
        };
        archive::write(path, &snapshot)?;
        log::info!("Saved {} speakers to {}", snapshot.len(), path.display());
        Ok(())
    }

    /// Load profiles from an archive written by [`SpeakerStore::save`].
    ///
    /// Cached phonetic transcripts are reused as-is. Returns the number of
    /// profiles loaded.
    pub fn load(&self, path: &Path) -> Result<usize, TtsError> {
        let loaded = archive::read(path)?;
        let count = loaded.len();
        let mut profiles = self.profiles.write();
        for profile in loaded {
            profiles.insert(profile.id.clone(), Arc::new(profile));
        }
        log::info!("Loaded {count} speakers from {}", path.display());
        Ok(count)
    }
}

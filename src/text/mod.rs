//! Text frontend: normalization followed by selective phonetic annotation.
//!
//! The acoustic model aligns the prompt transcript with the target text, so
//! both must go through exactly the same frontend. [`TextFrontend`] is shared
//! between the speaker store and the synthesizer for that reason.

pub mod annotator;
pub mod lexicon;
pub mod normalizer;

use std::sync::Arc;

use crate::{PhoneticConverter, TtsError};

pub use annotator::{RareCharAnnotator, DEFAULT_RARITY_THRESHOLD};
pub use lexicon::{Lexicon, LexiconConverter};
pub use normalizer::TextNormalizer;

pub struct TextFrontend {
    normalizer: TextNormalizer,
    annotator: RareCharAnnotator,
    converter: Arc<dyn PhoneticConverter>,
}

impl TextFrontend {
    pub fn new(lexicon: Arc<Lexicon>, converter: Arc<dyn PhoneticConverter>) -> Self {
        Self::with_parts(
            TextNormalizer::default(),
            RareCharAnnotator::new(lexicon),
            converter,
        )
    }

    pub fn with_parts(
        normalizer: TextNormalizer,
        annotator: RareCharAnnotator,
        converter: Arc<dyn PhoneticConverter>,
    ) -> Self {
        Self {
            normalizer,
            annotator,
            converter,
        }
    }

    pub fn normalizer(&self) -> &TextNormalizer {
        &self.normalizer
    }

    /// Normalize without sentence splitting.
    pub fn normalize(&self, text: &str) -> String {
        self.normalizer.normalize(text, false)
    }

    /// Annotate already-normalized text.
    pub fn annotate(&self, normalized: &str) -> Result<String, TtsError> {
        self.annotator
            .annotate_rare(normalized, self.converter.as_ref())
    }

    /// Normalize and reject text with nothing to pronounce.
    pub fn normalize_checked(&self, text: &str) -> Result<String, TtsError> {
        let normalized = self.normalize(text);
        if !normalizer::has_speech(&normalized) {
            return Err(TtsError::InvalidInput(
                "text is empty after normalization".to_string(),
            ));
        }
        Ok(normalized)
    }

    /// Normalize then annotate.
    pub fn prepare(&self, text: &str) -> Result<String, TtsError> {
        let normalized = self.normalize_checked(text)?;
        self.annotate(&normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frontend() -> TextFrontend {
        let lexicon = Arc::new(Lexicon::builtin());
        TextFrontend::new(lexicon.clone(), Arc::new(LexiconConverter::new(lexicon)))
    }

    #[test]
    fn prepare_normalizes_then_annotates() {
        let out = frontend().prepare("我在銀行, 存了100元").unwrap();
        assert_eq!(out, "我在銀行[:ㄏㄤˊ]，存了一百元");
    }

    #[test]
    fn prepare_rejects_blank_text() {
        let err = frontend().prepare(" ，\n").unwrap_err();
        assert!(matches!(err, TtsError::InvalidInput(_)));
    }
}

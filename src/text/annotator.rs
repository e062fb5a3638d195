use std::sync::Arc;

use super::lexicon::Lexicon;
use crate::{PhoneticConverter, TtsError};

/// Characters seen fewer times than this in the training corpus are annotated.
pub const DEFAULT_RARITY_THRESHOLD: u32 = 500;

/// Selectively appends `[:reading]` markers to rare or ambiguous characters.
///
/// Annotating everything would strip the prosodic cues the acoustic model reads
/// from plain characters, so only characters the model is likely to get wrong
/// are marked: rare characters, and polyphones whose predicted reading is not
/// their default one.
#[derive(Debug, Clone)]
pub struct RareCharAnnotator {
    lexicon: Arc<Lexicon>,
    threshold: u32,
}

/// A character together with markup the caller already supplied for it.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Char { ch: char, explicit: Option<&'a str> },
    /// Markup with no character in front of it; copied verbatim.
    Orphan(&'a str),
}

impl RareCharAnnotator {
    pub fn new(lexicon: Arc<Lexicon>) -> Self {
        Self::with_threshold(lexicon, DEFAULT_RARITY_THRESHOLD)
    }

    pub fn with_threshold(lexicon: Arc<Lexicon>, threshold: u32) -> Self {
        Self { lexicon, threshold }
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    /// Return a copy of `text` with phonetic markers inserted where needed.
    pub fn annotate_rare(
        &self,
        text: &str,
        converter: &dyn PhoneticConverter,
    ) -> Result<String, TtsError> {
        let tokens = tokenize(text);
        let plain: String = tokens
            .iter()
            .filter_map(|token| match token {
                Token::Char { ch, .. } => Some(*ch),
                Token::Orphan(_) => None,
            })
            .collect();
        if plain.is_empty() {
            return Ok(text.to_string());
        }

        let readings = converter.to_phonetic(&plain)?;
        let expected = plain.chars().count();
        if readings.len() != expected {
            return Err(TtsError::PhoneticConversion(format!(
                "converter returned {} readings for {expected} characters",
                readings.len()
            )));
        }

        let mut out = String::with_capacity(text.len() * 2);
        let mut readings = readings.into_iter();
        for token in tokens {
            match token {
                Token::Orphan(markup) => out.push_str(markup),
                Token::Char { ch, explicit } => {
                    let predicted = readings.next().flatten();
                    out.push(ch);
                    if let Some(markup) = explicit {
                        out.push_str(markup);
                    } else if let Some(reading) = predicted {
                        if self.needs_annotation(ch, &reading) {
                            out.push_str("[:");
                            out.push_str(&reading);
                            out.push(']');
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    fn needs_annotation(&self, ch: char, reading: &str) -> bool {
        if self.lexicon.frequency(ch) < self.threshold {
            return true;
        }
        self.lexicon.is_polyphonic(ch) && self.lexicon.default_reading(ch) != Some(reading)
    }
}

/// Split text into characters, attaching any `[:…]` markup that follows a character.
fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = text;

    while let Some(ch) = rest.chars().next() {
        if let Some(markup) = leading_markup(rest) {
            match tokens.last_mut() {
                Some(Token::Char { explicit, .. }) if explicit.is_none() => {
                    *explicit = Some(markup)
                }
                _ => tokens.push(Token::Orphan(markup)),
            }
            rest = &rest[markup.len()..];
            continue;
        }
        tokens.push(Token::Char { ch, explicit: None });
        rest = &rest[ch.len_utf8()..];
    }
    tokens
}

fn leading_markup(text: &str) -> Option<&str> {
    if !text.starts_with("[:") {
        return None;
    }
    text.find(']').map(|end| &text[..=end])
}

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::{PhoneticConverter, TtsError};

/// Frequency and pronunciation data for one character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharEntry {
    /// Occurrence count in the model's training corpus
    pub frequency: u32,
    /// Bopomofo readings, default reading first
    pub readings: Vec<String>,
}

/// Character frequency table plus word-level readings.
#[derive(Debug, Clone, Default)]
pub struct Lexicon {
    chars: HashMap<char, CharEntry>,
    words: HashMap<String, Vec<String>>,
    max_word_len: usize,
}

#[derive(Deserialize)]
struct LexiconFile {
    #[serde(default)]
    chars: HashMap<String, CharRecord>,
    #[serde(default)]
    words: HashMap<String, Vec<String>>,
}

#[derive(Deserialize)]
struct CharRecord {
    #[serde(default)]
    freq: u32,
    #[serde(default)]
    readings: Vec<String>,
}

impl Lexicon {
    /// Load the lexicon from a `lexicon.json` file.
    ///
    /// The file holds a `"chars"` object mapping single characters to
    /// `{"freq": u32, "readings": [..]}` and an optional `"words"` object
    /// mapping multi-character words to one reading per character.
    pub fn load(path: &Path) -> Result<Self, TtsError> {
        let content = std::fs::read_to_string(path)?;
        let file: LexiconFile = serde_json::from_str(&content)
            .map_err(|e| TtsError::Config(format!("Failed to parse lexicon: {e}")))?;

        let mut lexicon = Self::default();
        for (key, record) in file.chars {
            let mut chars = key.chars();
            let (Some(ch), None) = (chars.next(), chars.next()) else {
                return Err(TtsError::Config(format!(
                    "Lexicon char key must be a single character: {key:?}"
                )));
            };
            lexicon.insert_char(ch, record.freq, record.readings);
        }
        for (word, readings) in file.words {
            if word.chars().count() != readings.len() {
                return Err(TtsError::Config(format!(
                    "Word {word:?} has {} readings for {} characters",
                    readings.len(),
                    word.chars().count()
                )));
            }
            lexicon.insert_word(word, readings);
        }

        log::info!(
            "Loaded lexicon with {} chars and {} words",
            lexicon.chars.len(),
            lexicon.words.len()
        );
        Ok(lexicon)
    }

    /// Load `lexicon.json` from a model directory, falling back to [`Lexicon::builtin`].
    pub fn load_or_builtin(model_dir: &Path) -> Result<Self, TtsError> {
        let path = model_dir.join("lexicon.json");
        if path.exists() {
            Self::load(&path)
        } else {
            log::warn!("lexicon.json not found, using built-in lexicon");
            Ok(Self::builtin())
        }
    }

    pub fn insert_char(&mut self, ch: char, frequency: u32, readings: Vec<String>) {
        self.chars.insert(ch, CharEntry { frequency, readings });
    }

    pub fn insert_word(&mut self, word: String, readings: Vec<String>) {
        self.max_word_len = self.max_word_len.max(word.chars().count());
        self.words.insert(word, readings);
    }

    /// Corpus frequency of `ch`; unknown characters count as never seen.
    pub fn frequency(&self, ch: char) -> u32 {
        self.chars.get(&ch).map_or(0, |entry| entry.frequency)
    }

    pub fn readings(&self, ch: char) -> &[String] {
        self.chars
            .get(&ch)
            .map(|entry| entry.readings.as_slice())
            .unwrap_or_default()
    }

    pub fn default_reading(&self, ch: char) -> Option<&str> {
        self.readings(ch).first().map(String::as_str)
    }

    pub fn is_polyphonic(&self, ch: char) -> bool {
        self.readings(ch).len() >= 2
    }

    /// Readings for the longest known word starting at `chars[0]`.
    fn longest_word(&self, chars: &[char]) -> Option<(usize, &[String])> {
        let longest = self.max_word_len.min(chars.len());
        (2..=longest).rev().find_map(|len| {
            let word: String = chars[..len].iter().collect();
            self.words.get(&word).map(|r| (len, r.as_slice()))
        })
    }

    /// Small built-in table used when no `lexicon.json` ships with the model.
    pub fn builtin() -> Self {
        let chars: &[(char, u32, &[&str])] = &[
            ('今', 9_800, &["ㄐㄧㄣ"]),
            ('天', 24_000, &["ㄊㄧㄢ"]),
            ('明', 12_500, &["ㄇㄧㄥˊ"]),
            ('氣', 9_100, &["ㄑㄧˋ"]),
            ('真', 7_600, &["ㄓㄣ"]),
            ('也', 21_000, &["ㄧㄝˇ"]),
            ('很', 15_400, &["ㄏㄣˇ"]),
            ('我', 48_000, &["ㄨㄛˇ"]),
            ('你', 30_000, &["ㄋㄧˇ"]),
            ('是', 61_000, &["ㄕˋ"]),
            ('在', 42_000, &["ㄗㄞˋ"]),
            ('有', 39_000, &["ㄧㄡˇ"]),
            ('人', 35_000, &["ㄖㄣˊ"]),
            ('不', 52_000, &["ㄅㄨˋ"]),
            ('銀', 1_900, &["ㄧㄣˊ"]),
            ('密', 2_600, &["ㄇㄧˋ"]),
            ('碼', 1_300, &["ㄇㄚˇ"]),
            ('音', 6_200, &["ㄧㄣ"]),
            ('快', 5_800, &["ㄎㄨㄞˋ"]),
            ('要', 27_000, &["ㄧㄠˋ"]),
            ('新', 11_000, &["ㄒㄧㄣ"]),
            ('睡', 1_700, &["ㄕㄨㄟˋ"]),
            ('愛', 6_900, &["ㄞˋ"]),
            ('學', 13_000, &["ㄒㄩㄝˊ"]),
            ('走', 4_700, &["ㄗㄡˇ"]),
            ('大', 33_000, &["ㄉㄚˋ"]),
            ('好', 26_000, &["ㄏㄠˇ", "ㄏㄠˋ"]),
            ('行', 14_000, &["ㄒㄧㄥˊ", "ㄏㄤˊ"]),
            ('長', 10_500, &["ㄔㄤˊ", "ㄓㄤˇ"]),
            ('重', 8_300, &["ㄓㄨㄥˋ", "ㄔㄨㄥˊ"]),
            ('樂', 4_400, &["ㄌㄜˋ", "ㄩㄝˋ"]),
            ('還', 12_000, &["ㄏㄞˊ", "ㄏㄨㄢˊ"]),
            ('得', 20_000, &["ㄉㄜˊ", "ㄉㄜ˙", "ㄉㄟˇ"]),
            ('的', 98_000, &["ㄉㄜ˙", "ㄉㄧˊ", "ㄉㄧˋ"]),
            ('了', 45_000, &["ㄌㄜ˙", "ㄌㄧㄠˇ"]),
            ('覺', 3_900, &["ㄐㄩㄝˊ", "ㄐㄧㄠˋ"]),
            ('數', 6_100, &["ㄕㄨˋ", "ㄕㄨˇ"]),
            ('調', 3_300, &["ㄉㄧㄠˋ", "ㄊㄧㄠˊ"]),
            ('翀', 3, &["ㄔㄨㄥ"]),
            ('犇', 5, &["ㄅㄣ"]),
            ('堃', 12, &["ㄎㄨㄣ"]),
            ('淼', 40, &["ㄇㄧㄠˇ"]),
        ];
        let words: &[(&str, &[&str])] = &[
            ("銀行", &["ㄧㄣˊ", "ㄏㄤˊ"]),
            ("行走", &["ㄒㄧㄥˊ", "ㄗㄡˇ"]),
            ("長大", &["ㄓㄤˇ", "ㄉㄚˋ"]),
            ("音樂", &["ㄧㄣ", "ㄩㄝˋ"]),
            ("快樂", &["ㄎㄨㄞˋ", "ㄌㄜˋ"]),
            ("重要", &["ㄓㄨㄥˋ", "ㄧㄠˋ"]),
            ("重新", &["ㄔㄨㄥˊ", "ㄒㄧㄣ"]),
            ("睡覺", &["ㄕㄨㄟˋ", "ㄐㄧㄠˋ"]),
            ("覺得", &["ㄐㄩㄝˊ", "ㄉㄜ˙"]),
            ("愛好", &["ㄞˋ", "ㄏㄠˋ"]),
            ("還有", &["ㄏㄞˊ", "ㄧㄡˇ"]),
            ("數學", &["ㄕㄨˋ", "ㄒㄩㄝˊ"]),
        ];

        let mut lexicon = Self::default();
        for (ch, freq, readings) in chars {
            lexicon.insert_char(*ch, *freq, readings.iter().map(|r| r.to_string()).collect());
        }
        for (word, readings) in words {
            lexicon.insert_word(
                word.to_string(),
                readings.iter().map(|r| r.to_string()).collect(),
            );
        }
        lexicon
    }
}

/// Dictionary-based converter: longest word match first, default reading otherwise.
#[derive(Debug, Clone)]
pub struct LexiconConverter {
    lexicon: Arc<Lexicon>,
}

impl LexiconConverter {
    pub fn new(lexicon: Arc<Lexicon>) -> Self {
        Self { lexicon }
    }
}

impl PhoneticConverter for LexiconConverter {
    fn to_phonetic(&self, text: &str) -> Result<Vec<Option<String>>, TtsError> {
        let chars: Vec<char> = text.chars().collect();
        let mut readings = Vec::with_capacity(chars.len());
        let mut i = 0;

        while i < chars.len() {
            if let Some((len, word)) = self.lexicon.longest_word(&chars[i..]) {
                readings.extend(word.iter().cloned().map(Some));
                i += len;
                continue;
            }
            readings.push(self.lexicon.default_reading(chars[i]).map(str::to_string));
            i += 1;
        }

        Ok(readings)
    }
}

//! Written-form canonicalization of input text.
//!
//! Numerals are spelled out in Traditional Chinese, ASCII punctuation is mapped
//! to its full-width form and whitespace is collapsed, which is the form the
//! acoustic model was trained on. Inline `[:…]` phonetic markup is carried
//! through untouched.

/// Sentence-final punctuation used for segmentation.
const SENTENCE_END: &[char] = &['。', '！', '？', '；', '…'];

/// Default maximum characters per segment before splitting at commas.
const DEFAULT_MAX_SEGMENT_CHARS: usize = 80;

/// Longest digit run still read as a number; longer runs are read digit by digit.
const MAX_SPELLED_DIGITS: usize = 16;

const DIGITS: [char; 10] = ['零', '一', '二', '三', '四', '五', '六', '七', '八', '九'];
const GROUP_UNITS: [&str; 4] = ["", "萬", "億", "兆"];

#[derive(Debug, Clone)]
pub struct TextNormalizer {
    max_segment_chars: usize,
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self {
            max_segment_chars: DEFAULT_MAX_SEGMENT_CHARS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece<'a> {
    Plain(&'a str),
    Markup(&'a str),
}

impl TextNormalizer {
    pub fn new(max_segment_chars: usize) -> Self {
        Self {
            max_segment_chars: max_segment_chars.max(1),
        }
    }

    /// Canonicalize `text`. With `split`, sentences are separated by `\n`.
    ///
    /// Blank input yields an empty string.
    pub fn normalize(&self, text: &str, split: bool) -> String {
        let mut out = String::with_capacity(text.len());
        for piece in split_markup(text) {
            match piece {
                Piece::Plain(plain) => out.push_str(&normalize_plain(plain)),
                Piece::Markup(markup) => out.push_str(markup),
            }
        }

        let out = collapse_whitespace(&out);
        let out = collapse_punctuation(&out);
        let out = fix_trailing_punctuation(out.trim());

        if split {
            self.segments(&out).join("\n")
        } else {
            out
        }
    }

    /// Split already-normalized text into sentence segments.
    pub fn segments(&self, text: &str) -> Vec<String> {
        let mut sentences = Vec::new();
        let mut current = String::new();

        for piece in split_markup(text) {
            match piece {
                Piece::Markup(markup) => current.push_str(markup),
                Piece::Plain(plain) => {
                    for ch in plain.chars() {
                        if ch == '\n' {
                            flush_segment(&mut sentences, &mut current);
                            continue;
                        }
                        current.push(ch);
                        if SENTENCE_END.contains(&ch) {
                            flush_segment(&mut sentences, &mut current);
                        }
                    }
                }
            }
        }
        flush_segment(&mut sentences, &mut current);

        sentences
            .into_iter()
            .flat_map(|sentence| self.split_long(sentence))
            .collect()
    }

    /// Split a sentence longer than the limit at commas.
    fn split_long(&self, sentence: String) -> Vec<String> {
        if spoken_len(&sentence) <= self.max_segment_chars {
            return vec![sentence];
        }

        let mut parts = Vec::new();
        let mut current = String::new();
        for piece in split_markup(&sentence) {
            match piece {
                Piece::Markup(markup) => current.push_str(markup),
                Piece::Plain(plain) => {
                    for ch in plain.chars() {
                        current.push(ch);
                        if ch == '，' && spoken_len(&current) >= self.max_segment_chars / 2 {
                            flush_segment(&mut parts, &mut current);
                        }
                    }
                }
            }
        }
        flush_segment(&mut parts, &mut current);
        parts
    }
}

/// Whether `text` contains anything to pronounce outside of markup and punctuation.
pub fn has_speech(text: &str) -> bool {
    split_markup(text).iter().any(|piece| match piece {
        Piece::Plain(plain) => plain.chars().any(char::is_alphanumeric),
        Piece::Markup(_) => false,
    })
}

fn flush_segment(segments: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() && !trimmed.chars().all(is_punctuation) {
        segments.push(trimmed.to_string());
    }
    current.clear();
}

/// Number of characters outside of phonetic markup.
fn spoken_len(text: &str) -> usize {
    split_markup(text)
        .iter()
        .map(|piece| match piece {
            Piece::Plain(plain) => plain.chars().count(),
            Piece::Markup(_) => 0,
        })
        .sum()
}

/// Separate `[:…]` markup from the surrounding text.
fn split_markup(text: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut plain_start = 0;
    let mut search_from = 0;

    while let Some(rel) = text[search_from..].find("[:") {
        let start = search_from + rel;
        let Some(close_rel) = text[start..].find(']') else {
            break;
        };
        let end = start + close_rel + 1;
        if plain_start < start {
            pieces.push(Piece::Plain(&text[plain_start..start]));
        }
        pieces.push(Piece::Markup(&text[start..end]));
        plain_start = end;
        search_from = end;
    }

    if plain_start < text.len() {
        pieces.push(Piece::Plain(&text[plain_start..]));
    }
    pieces
}

fn normalize_plain(text: &str) -> String {
    let folded: String = text
        .chars()
        .map(|ch| match ch {
            '０'..='９' => char::from(b'0' + (ch as u32 - '０' as u32) as u8),
            '\u{3000}' => ' ',
            _ => ch,
        })
        .collect();

    let folded = folded
        .replace('²', "平方")
        .replace('³', "立方")
        .replace("——", " ");

    let spelled = spell_numbers(&folded);

    let mut out = String::with_capacity(spelled.len());
    for ch in spelled.chars() {
        match ch {
            ',' => out.push('，'),
            '.' => out.push('。'),
            '!' => out.push('！'),
            '?' => out.push('？'),
            ';' => out.push('；'),
            ':' => out.push('：'),
            '（' | '）' | '【' | '】' | '`' => {}
            _ => out.push(ch),
        }
    }
    out
}

/// Replace every digit run with its spoken Chinese form.
fn spell_numbers(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() * 3);
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        if !ch.is_ascii_digit() {
            let negative = ch == '-'
                && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit())
                && (i == 0 || !chars[i - 1].is_ascii_alphanumeric());
            if negative {
                out.push('負');
            } else {
                out.push(ch);
            }
            i += 1;
            continue;
        }

        let start = i;
        let mut integer = String::new();
        let mut grouped = false;
        while i < chars.len() {
            if chars[i].is_ascii_digit() {
                integer.push(chars[i]);
                i += 1;
            } else if chars[i] == ','
                && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit())
                && is_thousands_group(&chars, i + 1)
            {
                grouped = true;
                i += 1;
            } else {
                break;
            }
        }

        let mut fraction = String::new();
        if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
            i += 1;
            while i < chars.len() && chars[i].is_ascii_digit() {
                fraction.push(chars[i]);
                i += 1;
            }
        }

        let percent = i < chars.len() && matches!(chars[i], '%' | '％');
        if percent {
            i += 1;
            out.push_str("百分之");
        }

        let is_year = !grouped
            && fraction.is_empty()
            && !percent
            && integer.len() == 4
            && chars.get(i) == Some(&'年');
        let read_digits = is_year
            || integer.len() > MAX_SPELLED_DIGITS
            || (integer.len() > 1 && integer.starts_with('0') && !grouped);

        if read_digits {
            out.push_str(&spell_digits(&integer));
        } else {
            match integer.parse::<u64>() {
                Ok(value) => out.push_str(&spell_integer(value)),
                Err(_) => out.extend(chars[start..i].iter()),
            }
        }

        if !fraction.is_empty() {
            out.push('點');
            out.push_str(&spell_digits(&fraction));
        }
    }

    out
}

/// A comma followed by exactly three digits and then a non-digit is a thousands separator.
fn is_thousands_group(chars: &[char], from: usize) -> bool {
    let run = chars[from..]
        .iter()
        .take_while(|c| c.is_ascii_digit())
        .count();
    run == 3
}

fn spell_digits(digits: &str) -> String {
    digits
        .chars()
        .filter_map(|d| d.to_digit(10))
        .map(|d| DIGITS[d as usize])
        .collect()
}

/// Spell an integer with 萬/億/兆 grouping (`10005` → `一萬零五`).
pub(crate) fn spell_integer(value: u64) -> String {
    if value == 0 {
        return DIGITS[0].to_string();
    }

    let mut groups = Vec::new();
    let mut rest = value;
    while rest > 0 {
        groups.push((rest % 10000) as u32);
        rest /= 10000;
    }

    let mut out = String::new();
    let mut pending_zero = false;
    for (idx, &group) in groups.iter().enumerate().rev() {
        if group == 0 {
            pending_zero = !out.is_empty();
            continue;
        }
        if !out.is_empty() && (pending_zero || group < 1000) {
            out.push(DIGITS[0]);
        }
        spell_group(group, &mut out);
        out.push_str(GROUP_UNITS[idx.min(GROUP_UNITS.len() - 1)]);
        pending_zero = false;
    }

    match out.strip_prefix("一十") {
        Some(rest) => format!("十{rest}"),
        None => out,
    }
}

fn spell_group(group: u32, out: &mut String) {
    let digits = [group / 1000, group / 100 % 10, group / 10 % 10, group % 10];
    let units = ["千", "百", "十", ""];
    let mut started = false;
    let mut zero = false;

    for (digit, unit) in digits.iter().zip(units) {
        if *digit == 0 {
            zero = started;
            continue;
        }
        if zero {
            out.push(DIGITS[0]);
            zero = false;
        }
        out.push(DIGITS[*digit as usize]);
        out.push_str(unit);
        started = true;
    }
}

fn collapse_whitespace(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        if !chars[i].is_whitespace() {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        let run_end = chars[i..]
            .iter()
            .position(|c| !c.is_whitespace())
            .map_or(chars.len(), |p| i + p);
        let prev = out.chars().next_back();
        let next = chars.get(run_end).copied();

        // Keep a single space only between two ASCII words.
        if let (Some(p), Some(n)) = (prev, next) {
            if p.is_ascii() && n.is_ascii() && !is_punctuation(p) && !is_punctuation(n) {
                out.push(' ');
            }
        }
        i = run_end;
    }
    out
}

fn collapse_punctuation(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if is_punctuation(ch) && out.ends_with(ch) {
            continue;
        }
        out.push(ch);
    }
    out
}

fn fix_trailing_punctuation(text: &str) -> String {
    let trimmed = text.trim_end_matches(['，', '、']);
    if trimmed.len() != text.len() && !trimmed.is_empty() {
        format!("{trimmed}。")
    } else {
        trimmed.to_string()
    }
}

fn is_punctuation(ch: char) -> bool {
    matches!(
        ch,
        '，' | '。' | '！' | '？' | '；' | '：' | '、' | '…' | '「' | '」' | '"' | '\''
    ) || ch.is_ascii_punctuation() && ch != '[' && ch != ']'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(text: &str) -> String {
        TextNormalizer::default().normalize(text, false)
    }

    #[test]
    fn blank_input_yields_empty_string() {
        assert_eq!(norm(""), "");
        assert_eq!(norm("   \n\t "), "");
    }

    #[test]
    fn spells_integers_with_group_units() {
        assert_eq!(spell_integer(0), "零");
        assert_eq!(spell_integer(10), "十");
        assert_eq!(spell_integer(15), "十五");
        assert_eq!(spell_integer(110), "一百一十");
        assert_eq!(spell_integer(1005), "一千零五");
        assert_eq!(spell_integer(10005), "一萬零五");
        assert_eq!(spell_integer(100_000_000), "一億");
        assert_eq!(spell_integer(100_010_000), "一億零一萬");
        assert_eq!(spell_integer(23_456), "二萬三千四百五十六");
    }

    #[test]
    fn spells_decimals_percentages_and_separators() {
        assert_eq!(norm("圓周率約3.14"), "圓周率約三點一四");
        assert_eq!(norm("成長了50%"), "成長了百分之五十");
        assert_eq!(norm("共1,000人"), "共一千人");
        assert_eq!(norm("氣溫-5度"), "氣溫負五度");
    }

    #[test]
    fn reads_years_and_codes_digit_by_digit() {
        assert_eq!(norm("2024年"), "二零二四年");
        assert_eq!(norm("電話0912"), "電話零九一二");
    }

    #[test]
    fn folds_full_width_digits() {
        assert_eq!(norm("第２名"), "第二名");
    }

    #[test]
    fn maps_punctuation_and_whitespace() {
        assert_eq!(norm("你好, 世界!"), "你好，世界！");
        assert_eq!(norm("今天  天氣\n真好"), "今天天氣真好");
        assert_eq!(norm("hello   world"), "hello world");
        assert_eq!(norm("好，，真好。。"), "好，真好。");
    }

    #[test]
    fn drops_brackets_and_fixes_trailing_comma() {
        assert_eq!(norm("（備註）【重要】內容，"), "備註重要內容。");
        assert_eq!(norm("面積10m²"), "面積十m平方");
    }

    #[test]
    fn keeps_phonetic_markup_untouched() {
        assert_eq!(norm("銀行[:ㄏㄤˊ]在這裡"), "銀行[:ㄏㄤˊ]在這裡");
        assert_eq!(norm("他說:好[:ㄏㄠˋ]"), "他說：好[:ㄏㄠˋ]");
    }

    #[test]
    fn splits_sentences_when_requested() {
        let normalizer = TextNormalizer::default();
        assert_eq!(
            normalizer.normalize("今天天氣真好。明天也很好!", true),
            "今天天氣真好。\n明天也很好！"
        );
        assert_eq!(
            normalizer.normalize("今天天氣真好。明天也很好!", false),
            "今天天氣真好。明天也很好！"
        );
    }

    #[test]
    fn splits_long_sentences_at_commas() {
        let normalizer = TextNormalizer::new(10);
        let segments = normalizer.segments("一二三四五六，七八九十一二，三四五六。");
        assert_eq!(
            segments,
            vec!["一二三四五六，", "七八九十一二，", "三四五六。"]
        );
    }

    #[test]
    fn segment_length_ignores_markup() {
        let normalizer = TextNormalizer::new(4);
        let segments = normalizer.segments("銀行[:ㄏㄤˊ]好[:ㄏㄠˋ]。");
        assert_eq!(segments, vec!["銀行[:ㄏㄤˊ]好[:ㄏㄠˋ]。"]);
    }

    #[test]
    fn speech_requires_a_pronounceable_character() {
        assert!(has_speech("好。"));
        assert!(has_speech("ok"));
        assert!(!has_speech("，。！"));
        assert!(!has_speech("[:ㄏㄠˋ]。"));
    }
}

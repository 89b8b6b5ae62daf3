//! Tokenization and OCR cleanup for the full-text index.
//!
//! Latin-script text is already word-delimited and is indexed as-is, so
//! phrase search keeps working. Dense scripts (CJK, kana) and very long
//! undelimited runs are expanded into overlapping n-grams instead, which
//! lets the FTS engine match arbitrary substrings.
//!
//! ```text
//! "こんにちは"  ──n_gram(2)──▶  "こん んに にち ちは"
//! "こん んに にち ちは"  ──n_gram_to_txt──▶  "こんにちは"
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Code points treated as dense script. Shared read-only by every extraction.
pub const DENSE_SCRIPT_RANGES: &[(char, char)] = &[
    ('\u{3000}', '\u{303F}'), // CJK symbols and punctuation (々 〇 〻 included)
    ('\u{3041}', '\u{3096}'), // Hiragana
    ('\u{30A1}', '\u{30FA}'), // Katakana
    ('\u{31F0}', '\u{31FF}'), // Katakana phonetic extensions
    ('\u{3400}', '\u{9FFF}'), // CJK extension A + unified ideographs
    ('\u{F900}', '\u{FAFF}'), // CJK compatibility ideographs
    ('\u{20000}', '\u{2FFFF}'), // supplementary ideographic plane
    ('\u{30000}', '\u{3134F}'), // tertiary ideographic plane
];

/// Tokens longer than this mark text as lacking word boundaries.
pub const MAX_DELIMITED_TOKEN_LEN: usize = 40;

pub fn is_dense_char(c: char) -> bool {
    DENSE_SCRIPT_RANGES
        .iter()
        .any(|&(lo, hi)| (lo..=hi).contains(&c))
}

fn dense_class() -> String {
    let mut class = String::from("[");
    for &(lo, hi) in DENSE_SCRIPT_RANGES {
        class.push_str(&format!("\\x{{{:X}}}-\\x{{{:X}}}", lo as u32, hi as u32));
    }
    class.push(']');
    class
}

static TOKEN_DELIMITERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s\-/;]").unwrap());

static NOISE_SPACES: Lazy<Regex> =
    Lazy::new(|| Regex::new("[ \u{3000}\t,\"'●■□一]+").unwrap());

static NOISE_PUNCT_RUNS: Lazy<Regex> = Lazy::new(|| {
    let class = "[.,\"'●■□~=ー\u{2212}]";
    Regex::new(&format!("{class}{class}+")).unwrap()
});

static SPACE_IN_DENSE_RUN: Lazy<Regex> = Lazy::new(|| {
    let dense = dense_class();
    Regex::new(&format!("({dense}+)[ \t\u{3000}]({dense}+)")).unwrap()
});

/// Length in chars of the longest whitespace/hyphen/slash/semicolon token.
fn longest_token_len(text: &str) -> usize {
    TOKEN_DELIMITERS
        .split(text)
        .map(|token| token.chars().count())
        .max()
        .unwrap_or(0)
}

/// True when `text` should be indexed as n-grams rather than as words.
pub fn needs_ngram(text: &str) -> bool {
    text.chars().any(is_dense_char) || longest_token_len(text) > MAX_DELIMITED_TOKEN_LEN
}

/// All overlapping substrings of `n` chars, space-joined in order.
///
/// Text shorter than `n` yields an empty string.
pub fn n_gram(text: &str, n: usize) -> String {
    let n = n.max(1);
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < n {
        return String::new();
    }
    chars
        .windows(n)
        .map(|w| w.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Index form of a text unit: n-grams for dense scripts, the text otherwise.
pub fn index_text(text: &str, n: usize) -> String {
    if needs_ngram(text) {
        n_gram(text, n)
    } else {
        text.to_string()
    }
}

/// Best-effort reconstruction of the original text from an index entry.
///
/// If every token is shorter than 3 chars the entry is assumed to be
/// bigrammed and is stitched back together; otherwise it is returned as-is.
pub fn n_gram_to_txt(text: &str) -> String {
    let tokens: Vec<&str> = TOKEN_DELIMITERS.split(text).collect();
    let longest = tokens.iter().map(|t| t.chars().count()).max().unwrap_or(0);
    if longest >= 3 {
        return text.to_string();
    }

    let mut recovered: String = match tokens.first() {
        Some(first) => {
            let mut head: Vec<char> = first.chars().collect();
            head.pop();
            head.into_iter().collect()
        }
        None => String::new(),
    };
    recovered.extend(tokens.iter().filter_map(|t| t.chars().last()));
    recovered
}

/// Cleans up text from an OCR text layer.
///
/// Joins lines, collapses whitespace and bullet noise, applies NFKC (merging
/// ligatures and width variants), drops runs of 2+ noise punctuation, then
/// removes spurious spaces inside dense-script runs.
pub fn clean_ocr_text(text: &str) -> String {
    let joined: String = text.lines().collect::<Vec<_>>().concat();
    let t = NOISE_SPACES.replace_all(joined.trim(), " ");
    let t: String = t.nfkc().collect();
    let mut t = NOISE_PUNCT_RUNS.replace_all(&t, "").into_owned();

    // Matches cannot overlap, so "あ い う" needs a second pass for "い う".
    for _ in 0..3 {
        t = SPACE_IN_DENSE_RUN.replace_all(&t, "${1}${2}").into_owned();
    }
    t.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin_text_is_not_ngrammed() {
        assert!(!needs_ngram("The quick brown fox jumps over the lazy dog"));
        assert!(!needs_ngram("semi;colon/slash-hyphen separated words"));
        assert!(!needs_ngram(""));
        assert!(!needs_ngram("   "));
    }

    #[test]
    fn long_undelimited_token_is_ngrammed() {
        let forty = "a".repeat(40);
        assert!(!needs_ngram(&forty));
        let forty_one = "a".repeat(41);
        assert!(needs_ngram(&format!("short {}", forty_one)));
        // delimiters break the run
        let split = format!("{}-{}", "a".repeat(30), "b".repeat(30));
        assert!(!needs_ngram(&split));
    }

    #[test]
    fn dense_script_anywhere_is_ngrammed() {
        assert!(needs_ngram("こんにちは"));
        assert!(needs_ngram("Chapter 3 漢字"));
        assert!(needs_ngram("カタカナ"));
        assert!(needs_ngram("\u{20B9F}"));
        assert!(!needs_ngram("한국어")); // Hangul is space-delimited
    }

    #[test]
    fn bigrams() {
        assert_eq!(n_gram("こんにちは", 2), "こん んに にち ちは");
        assert_eq!(n_gram("cats", 2), "ca at ts");
        assert_eq!(n_gram("ab", 2), "ab");
        assert_eq!(n_gram("a", 2), "");
        assert_eq!(n_gram("", 2), "");
        assert_eq!(n_gram("abcd", 3), "abc bcd");
    }

    #[test]
    fn index_text_picks_representation() {
        assert_eq!(index_text("plain words", 2), "plain words");
        assert_eq!(index_text("日本語", 2), "日本 本語");
    }

    #[test]
    fn ngram_round_trip() {
        for text in ["ab", "cats", "こんにちは", "東京都庁", "x1y2z3", "ÄÖÜß"] {
            assert_eq!(n_gram_to_txt(&n_gram(text, 2)), text, "round trip of {text}");
        }
    }

    #[test]
    fn plain_text_passes_through_reconstruction() {
        let text = "the quick brown fox";
        assert_eq!(n_gram_to_txt(text), text);
        assert_eq!(n_gram_to_txt(""), "");
    }

    #[test]
    fn ocr_cleanup_joins_lines_and_collapses_noise() {
        assert_eq!(clean_ocr_text("hello\nworld"), "helloworld");
        assert_eq!(clean_ocr_text("a  ,  b\t\tc"), "a b c");
        assert_eq!(clean_ocr_text("■■ item"), "item");
        assert_eq!(clean_ocr_text("wait.... what"), "wait what");
    }

    #[test]
    fn ocr_cleanup_normalizes_compatibility_forms() {
        assert_eq!(clean_ocr_text("ﬁne ﬂow"), "fine flow");
        assert_eq!(clean_ocr_text("ＡＢＣ１２３"), "ABC123");
        assert_eq!(clean_ocr_text("ｶﾀｶﾅ"), "カタカナ");
    }

    #[test]
    fn ocr_cleanup_removes_spaces_inside_dense_runs() {
        assert_eq!(clean_ocr_text("日 本 語 の 文 章"), "日本語の文章");
        assert_eq!(clean_ocr_text("漢字 and 漢字"), "漢字 and 漢字");
    }

    #[test]
    fn ocr_cleanup_of_blank_input_is_empty() {
        assert_eq!(clean_ocr_text(""), "");
        assert_eq!(clean_ocr_text(" \n\t "), "");
    }
}

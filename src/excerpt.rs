//! Highlight excerpts for search results.
//!
//! Offsets here are char offsets, not byte offsets, so windows never split
//! a multi-byte character.

use regex::RegexBuilder;

/// Marker placed before each excerpt and once at the end.
pub const ELLIPSIS: &str = "...";

/// East Asian Wide and Fullwidth code points.
const WIDE_RANGES: &[(char, char)] = &[
    ('\u{1100}', '\u{115F}'),
    ('\u{2E80}', '\u{303E}'),
    ('\u{3041}', '\u{33FF}'),
    ('\u{3400}', '\u{4DBF}'),
    ('\u{4E00}', '\u{9FFF}'),
    ('\u{A000}', '\u{A4CF}'),
    ('\u{AC00}', '\u{D7A3}'),
    ('\u{F900}', '\u{FAFF}'),
    ('\u{FE30}', '\u{FE4F}'),
    ('\u{FF00}', '\u{FF60}'),
    ('\u{FFE0}', '\u{FFE6}'),
    ('\u{1F300}', '\u{1F64F}'),
    ('\u{1F680}', '\u{1F6FF}'),
    ('\u{1F900}', '\u{1F9FF}'),
    ('\u{1FA70}', '\u{1FAFF}'),
    ('\u{20000}', '\u{2FFFD}'),
    ('\u{30000}', '\u{3FFFD}'),
];

pub fn is_wide_char(c: char) -> bool {
    WIDE_RANGES.iter().any(|&(lo, hi)| (lo..=hi).contains(&c))
}

/// The window `[start - context, end + context)` of `text`, clamped to its bounds.
///
/// `context` is halved when the text contains any wide character.
pub fn excerpt(text: &str, start: usize, end: usize, context: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let context = if chars.iter().copied().any(is_wide_char) {
        context / 2
    } else {
        context
    };

    let from = start.saturating_sub(context).min(chars.len());
    let to = end.saturating_add(context).min(chars.len()).max(from);
    chars[from..to].iter().collect()
}

/// Excerpts around the first case-insensitive occurrence of each query term.
///
/// Terms that do not occur contribute nothing, so a query with no matching
/// term yields just [`ELLIPSIS`].
pub fn show_hit_text(text: &str, query: &str, context: usize) -> String {
    let mut out = String::new();
    for term in query.split(' ').filter(|t| !t.is_empty()) {
        let Ok(pattern) = RegexBuilder::new(&regex::escape(term))
            .case_insensitive(true)
            .build()
        else {
            continue;
        };
        let Some(found) = pattern.find(text) else {
            continue;
        };
        let start = text[..found.start()].chars().count();
        let end = start + found.as_str().chars().count();
        out.push_str(ELLIPSIS);
        out.push_str(&excerpt(text, start, end, context));
    }
    out.push_str(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_symmetric_around_match() {
        let text = "the quick brown fox";
        // "quick" spans chars 4..9
        assert_eq!(excerpt(text, 4, 9, 2), "e quick b");
        assert_eq!(excerpt(text, 4, 9, 3), "he quick br");
    }

    #[test]
    fn window_clamps_at_text_bounds() {
        let text = "the quick brown fox";
        assert_eq!(excerpt(text, 4, 9, 4), "the quick bro");
        assert_eq!(excerpt(text, 0, 3, 4), "the qui");
        assert_eq!(excerpt(text, 16, 19, 4), "own fox");
        assert_eq!(excerpt(text, 4, 9, 100), text);
    }

    #[test]
    fn wide_ranges_cover_cjk_fullwidth_and_emoji() {
        for c in ['猫', 'ア', '한', 'Ａ', '😀', '🚀', '🧭', '🪐'] {
            assert!(is_wide_char(c), "{c:?} should be wide");
        }
        for c in ['a', 'é', 'Ω', '½'] {
            assert!(!is_wide_char(c), "{c:?} should be narrow");
        }
    }

    #[test]
    fn wide_text_halves_context() {
        let text = "一二三四五六七八九十";
        // match "五" at 4..5, context 4 -> 2
        assert_eq!(excerpt(text, 4, 5, 4), "三四五六七");
    }

    #[test]
    fn hit_text_frames_each_term() {
        let text = "The Quick brown fox jumps";
        assert_eq!(show_hit_text(text, "quick", 4), "...The Quick bro...");
        assert_eq!(
            show_hit_text(text, "quick jumps", 2),
            "...e Quick b...x jumps..."
        );
    }

    #[test]
    fn missing_term_gives_degenerate_excerpt() {
        assert_eq!(show_hit_text("the quick brown fox", "zebra", 40), "...");
        assert_eq!(show_hit_text("", "", 40), "...");
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        assert_eq!(show_hit_text("cost (net) 5$", "(net)", 1), "... (net) ...");
        assert_eq!(show_hit_text("abc", "a.c(", 5), "...");
    }

    #[test]
    fn multibyte_offsets() {
        let text = "東京タワーの夜景";
        // wide: context 4 -> 2; "タワー" at 2..5
        assert_eq!(show_hit_text(text, "タワー", 4), "...東京タワーの夜...");
    }
}

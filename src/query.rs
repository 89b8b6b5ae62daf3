//! Rewrites free-text user queries into FTS5 match expressions.
//!
//! Each query becomes two alternatives joined by `OR`:
//!
//! ```text
//! cats dogs  ──▶  "cats" "dogs" OR ("ca at ts" "do og gs")
//!                 └─ phrase form ┘    └──── n-gram form ───┘
//! ```
//!
//! The phrase form serves word-indexed (Latin) text; the n-gram form matches
//! the bigram expansion used for dense-script pages. Implicit AND binds
//! tighter than `OR` in FTS5, so each side keeps its own conjunction.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{LibraryError, Result};
use crate::tokenize::n_gram;

const IDEOGRAPHIC_SPACE: char = '\u{3000}';

/// An operator character isolated by spaces on both sides.
static ORPHAN_OPERATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r" ([&+()*#]) ").unwrap());

/// Quotes `term` as an FTS5 string, doubling embedded quotes.
fn quote(term: &str) -> String {
    format!("\"{}\"", term.replace('"', "\"\""))
}

/// Normalizes spacing and splits the query into non-empty terms.
pub fn query_terms(query: &str) -> Vec<String> {
    let query = query.replace(IDEOGRAPHIC_SPACE, " ");
    let query = ORPHAN_OPERATOR.replace_all(&query, "$1");
    query
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Builds the `phrase OR (ngram)` match expression for `query`.
///
/// Returns [`LibraryError::MalformedQuery`] when nothing searchable remains.
pub fn rewrite_query(query: &str, ngram_size: usize) -> Result<String> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return Err(LibraryError::MalformedQuery(query.to_string()));
    }

    let phrase = terms
        .iter()
        .map(|t| quote(t))
        .collect::<Vec<_>>()
        .join(" ");

    let ngram = terms
        .iter()
        .map(|t| {
            if t.chars().count() > 1 {
                quote(&n_gram(t, ngram_size))
            } else {
                t.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    Ok(format!("{} OR ({})", phrase, ngram))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_latin_terms() {
        assert_eq!(
            rewrite_query("cats dogs", 2).unwrap(),
            r#""cats" "dogs" OR ("ca at ts" "do og gs")"#
        );
    }

    #[test]
    fn dense_script_term() {
        assert_eq!(
            rewrite_query("東京タワー", 2).unwrap(),
            r#""東京タワー" OR ("東京 京タ タワ ワー")"#
        );
    }

    #[test]
    fn single_char_terms_stay_unquoted_in_ngram_form() {
        assert_eq!(
            rewrite_query("a cat", 2).unwrap(),
            r#""a" "cat" OR (a "ca at")"#
        );
    }

    #[test]
    fn ideographic_space_separates_terms() {
        assert_eq!(query_terms("日本\u{3000}語"), vec!["日本", "語"]);
    }

    #[test]
    fn orphan_operators_absorb_surrounding_spaces() {
        assert_eq!(query_terms("c + rust"), vec!["c+rust"]);
        assert_eq!(query_terms("a # b * c"), vec!["a#b*c"]);
        assert_eq!(query_terms("x ( y"), vec!["x(y"]);
        // not isolated: left alone
        assert_eq!(query_terms("c++ rust"), vec!["c++", "rust"]);
    }

    #[test]
    fn repeated_spaces_do_not_produce_empty_phrases() {
        assert_eq!(
            rewrite_query("  cats   dogs ", 2).unwrap(),
            r#""cats" "dogs" OR ("ca at ts" "do og gs")"#
        );
    }

    #[test]
    fn embedded_quotes_are_escaped() {
        assert_eq!(
            rewrite_query(r#"say"hi"#, 2).unwrap(),
            r#""say""hi" OR ("sa ay y"" ""h hi")"#
        );
    }

    #[test]
    fn blank_query_is_malformed() {
        for q in ["", "   ", "\u{3000}\u{3000}"] {
            let err = rewrite_query(q, 2).unwrap_err();
            assert!(matches!(err, LibraryError::MalformedQuery(_)), "{q:?}");
        }
    }
}

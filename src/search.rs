//! Search pipeline: rewrite → FTS match → excerpts → title merge.
//!
//! Rows come back from the store in BM25 order. They are grouped per
//! document in order of first appearance, each row's text is recovered from
//! its index form and excerpted around the query terms. Without a document
//! filter, documents whose title contains the query are merged in after the
//! full-text hits.

use std::collections::HashMap;

use tracing::debug;

use crate::error::Result;
use crate::excerpt::show_hit_text;
use crate::library::Library;
use crate::models::{PageHit, SearchResult};
use crate::query::rewrite_query;
use crate::tokenize::n_gram_to_txt;

/// Groups ranked rows by document, keeping the best-ranked row per position.
fn group_hits(
    rows: impl IntoIterator<Item = (i64, f64, String)>,
    query: &str,
    context: usize,
) -> Vec<(i64, Vec<PageHit>)> {
    let mut order: Vec<(i64, Vec<PageHit>)> = Vec::new();
    let mut slots: HashMap<i64, usize> = HashMap::new();

    for (number, position, text) in rows {
        let slot = *slots.entry(number).or_insert_with(|| {
            order.push((number, Vec::new()));
            order.len() - 1
        });
        let hits = &mut order[slot].1;
        if hits.iter().any(|h| h.position == position) {
            continue;
        }
        hits.push(PageHit {
            position,
            excerpt: show_hit_text(&n_gram_to_txt(&text), query, context),
        });
    }
    order
}

fn title_contains(title: &str, query: &str) -> bool {
    title.to_lowercase().contains(&query.to_lowercase())
}

/// Runs `query` against the index, optionally within document `number`.
///
/// `limit` caps the FTS rows fetched (default `search.result_limit`).
pub async fn search(
    library: &Library,
    query: &str,
    number: Option<i64>,
    limit: Option<i64>,
) -> Result<Vec<SearchResult>> {
    let config = library.config();
    let expression = rewrite_query(query, config.index.ngram_size)?;
    let limit = limit.unwrap_or(config.search.result_limit).max(1);
    debug!(%expression, ?number, limit, "fts match");

    let query = query.replace('\u{3000}', " ");
    let query = query.trim();

    let rows = library.store().search(&expression, number, limit).await?;
    let grouped = group_hits(
        rows.into_iter().map(|e| (e.number, e.position, e.text)),
        query,
        config.search.excerpt_context,
    );

    let numbers: Vec<i64> = grouped.iter().map(|(n, _)| *n).collect();
    let mut titles: HashMap<i64, String> = library
        .store()
        .documents_by_numbers(&numbers)
        .await?
        .into_iter()
        .map(|d| (d.number, d.title))
        .collect();

    let mut results: Vec<SearchResult> = grouped
        .into_iter()
        .filter_map(|(number, hits)| {
            // Rows of a document deleted mid-search have no record left.
            let title = titles.remove(&number)?;
            Some(SearchResult {
                number,
                title_match: title_contains(&title, query),
                title,
                hits,
            })
        })
        .collect();

    if number.is_none() {
        for doc in library.store().find_by_title(query).await? {
            if results.iter().any(|r| r.number == doc.number) {
                continue;
            }
            results.push(SearchResult {
                number: doc.number,
                title_match: title_contains(&doc.title, query),
                title: doc.title,
                hits: Vec::new(),
            });
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouping_keeps_rank_order_and_first_row_per_position() {
        let rows = vec![
            (2, 5.0, "the white whale".to_string()),
            (1, 0.0, "a whale of a time".to_string()),
            (2, 1.0, "whale again".to_string()),
            (2, 5.0, "duplicate position".to_string()),
        ];
        let grouped = group_hits(rows, "whale", 4);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].0, 2);
        let positions: Vec<f64> = grouped[0].1.iter().map(|h| h.position).collect();
        assert_eq!(positions, vec![5.0, 1.0]);
        assert_eq!(grouped[0].1[0].excerpt, "...ite whale...");
        assert_eq!(grouped[1].0, 1);
    }

    #[test]
    fn ngram_rows_are_recovered_before_excerpting() {
        let rows = vec![(1, 0.0, "吾輩 輩は は猫 猫で であ ある".to_string())];
        let grouped = group_hits(rows, "猫", 40);
        assert_eq!(grouped[0].1[0].excerpt, "...吾輩は猫である...");
    }

    #[test]
    fn title_match_is_case_insensitive() {
        assert!(title_contains("Moby Dick", "moby"));
        assert!(title_contains("ＡＢＣ Book", "ＡＢＣ"));
        assert!(!title_contains("Dune", "moby"));
    }
}

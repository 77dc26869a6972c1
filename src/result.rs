use std::cmp::Ordering;

use serde::Serialize;

use crate::{corpus::PageRef, tokenizer::Token};

/// Byte range of a match inside a page's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// One ranked page.
///
/// Scores are method-specific: BM25 magnitudes, occurrence counts and
/// cosine similarities are not comparable with each other.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub page: PageRef,
    pub score: f32,
    pub spans: Vec<Span>,
}

impl SearchResult {
    pub fn new(page: PageRef, score: f32) -> Self {
        Self {
            page,
            score,
            spans: Vec::new(),
        }
    }

    /// Descending score, then ascending (document identity, page order).
    pub fn ranking_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.page.cmp(&other.page))
    }
}

/// Sort results into their canonical ranking order.
pub fn sort_results(results: &mut [SearchResult]) {
    results.sort_by(SearchResult::ranking_cmp);
}

/// Spans of every token whose term is one of `terms`.
pub(crate) fn term_spans(tokens: &[Token], terms: &[String]) -> Vec<Span> {
    tokens
        .iter()
        .filter(|t| terms.contains(&t.term))
        .map(|t| Span {
            start: t.start,
            end: t.end,
        })
        .collect()
}

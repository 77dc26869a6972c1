//! Case- and accent-insensitive phrase search over raw page text.
//!
//! The primary pass requires every phrase and word of the query to occur as
//! a substring of the page. When that finds nothing and the query has more
//! than one token, a fallback pass accepts pages that contain every query
//! token in any order.

use std::cmp::Ordering;

use crate::{
    corpus::{Corpus, PageRef},
    reranker::minimal_span,
    result::{SearchResult, Span, term_spans},
    tokenizer::{distinct_terms, fold_case},
};

/// A parsed exact-search query. Needles are already folded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExactQuery {
    /// Double-quoted segments, or the whole query when it has no quotes.
    pub phrases: Vec<String>,
    /// Bare words outside quotes.
    pub words: Vec<String>,
}

impl ExactQuery {
    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty() && self.words.is_empty()
    }

    fn needles(&self) -> impl Iterator<Item = &str> {
        self.phrases.iter().chain(&self.words).map(String::as_str)
    }
}

/// Split `raw` into quoted phrases and bare words.
///
/// ```
/// use pdfdex::exact::parse_query;
///
/// let q = parse_query(r#""Quick Fox" jumps"#);
/// assert_eq!(q.phrases, ["quick fox"]);
/// assert_eq!(q.words, ["jumps"]);
///
/// let q = parse_query("  quick fox ");
/// assert_eq!(q.phrases, ["quick fox"]);
/// assert!(q.words.is_empty());
/// ```
pub fn parse_query(raw: &str) -> ExactQuery {
    let fold = |s: &str| fold_case(s).0;
    let trimmed = raw.trim();
    if !trimmed.contains('"') {
        return ExactQuery {
            phrases: if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![fold(trimmed)]
            },
            words: Vec::new(),
        };
    }

    let mut query = ExactQuery::default();
    // Segments alternate outside/inside quotes; an unterminated quote runs
    // to the end of the query.
    for (i, segment) in trimmed.split('"').enumerate() {
        if i % 2 == 1 {
            let phrase = segment.trim();
            if !phrase.is_empty() {
                query.phrases.push(fold(phrase));
            }
        } else {
            query
                .words
                .extend(segment.split_whitespace().map(fold));
        }
    }
    query
}

struct Hit {
    result: SearchResult,
    proximity: usize,
}

impl Hit {
    fn ranking_cmp(&self, other: &Self) -> Ordering {
        other
            .result
            .score
            .total_cmp(&self.result.score)
            .then(self.proximity.cmp(&other.proximity))
            .then(self.result.page.cmp(&other.result.page))
    }
}

/// Rank pages containing the query.
///
/// Score is the number of occurrences. Ties go to the page whose query terms
/// sit closest together, then to document identity and page order.
pub fn search(corpus: &Corpus, raw: &str) -> Vec<SearchResult> {
    let query = parse_query(raw);
    if query.is_empty() {
        return Vec::new();
    }
    let terms = distinct_terms(raw);

    let mut hits: Vec<Hit> = corpus
        .pages()
        .filter_map(|(page, p)| substring_hit(page, &p.text, &query))
        .map(|result| with_proximity(corpus, result, &terms))
        .collect();

    if hits.is_empty() && terms.len() > 1 {
        hits = corpus
            .pages()
            .filter_map(|(page, _)| all_terms_hit(corpus, page, &terms))
            .map(|result| with_proximity(corpus, result, &terms))
            .collect();
    }

    hits.sort_by(Hit::ranking_cmp);
    hits.into_iter().map(|hit| hit.result).collect()
}

fn substring_hit(
    page: PageRef,
    text: &str,
    query: &ExactQuery,
) -> Option<SearchResult> {
    let (folded, origin) = fold_case(text);
    let mut spans = Vec::new();

    for needle in query.needles() {
        let before = spans.len();
        spans.extend(folded.match_indices(needle).map(|(at, m)| Span {
            start: origin[at],
            end: origin[at + m.len()],
        }));
        if spans.len() == before {
            return None;
        }
    }

    spans.sort_unstable();
    let mut result = SearchResult::new(page, spans.len() as f32);
    result.spans = spans;
    Some(result)
}

fn all_terms_hit(
    corpus: &Corpus,
    page: PageRef,
    terms: &[String],
) -> Option<SearchResult> {
    let tokens = corpus.tokens(page);
    if !terms.iter().all(|t| tokens.iter().any(|tok| tok.term == *t)) {
        return None;
    }
    let spans = term_spans(&tokens, terms);
    let mut result = SearchResult::new(page, spans.len() as f32);
    result.spans = spans;
    Some(result)
}

fn with_proximity(
    corpus: &Corpus,
    result: SearchResult,
    terms: &[String],
) -> Hit {
    let proximity = minimal_span(&corpus.tokens(result.page), terms)
        .map_or(usize::MAX, |w| w.width());
    Hit { result, proximity }
}

//! BM25 ranked retrieval over page tokens.
//!
//! The index is built once per corpus generation and is read-only
//! afterwards. For a query `Q` and page `P`:
//!
//! ```text
//! score(P, Q) = Σ_{t ∈ Q} IDF(t) · f(t,P)·(k1+1) / (f(t,P) + k1·(1 − b + b·|P|/avgPL))
//! IDF(t)      = ln((N − df(t) + 0.5) / (df(t) + 0.5) + 1)
//! ```
//!
//! where `N` counts every page in the corpus (empty ones included) and `|P|`
//! is the page's token count. Query terms are deduplicated before scoring.

use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    corpus::{Corpus, Page, PageRef},
    error::{Error, Result},
    result::{SearchResult, sort_results, term_spans},
    tokenizer::tokenize,
};

pub const DEFAULT_K1: f32 = 1.5;
pub const DEFAULT_B: f32 = 0.75;

/// BM25 tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f32,
    /// Length normalization strength, in `[0, 1]`.
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: DEFAULT_K1,
            b: DEFAULT_B,
        }
    }
}

impl Bm25Params {
    pub fn validate(&self) -> Result<()> {
        if !self.k1.is_finite() || self.k1 < 0.0 {
            return Err(Error::Config(format!(
                "bm25 k1 must be a non-negative number, got {}",
                self.k1
            )));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(Error::Config(format!(
                "bm25 b must be within [0, 1], got {}",
                self.b
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Posting {
    page: PageRef,
    tf: u32,
}

/// Inverted index with the statistics BM25 needs.
#[derive(Debug, Default)]
pub struct LexicalIndex {
    params: Bm25Params,
    postings: HashMap<String, Vec<Posting>>,
    page_lengths: HashMap<PageRef, u32>,
    page_count: usize,
    avg_page_len: f32,
}

impl LexicalIndex {
    /// Build the index over every page of `corpus`.
    ///
    /// Pages are tokenized in parallel without touching the corpus token
    /// cache; postings lists end up ordered by page.
    pub fn build(corpus: &Corpus, params: Bm25Params) -> Self {
        let pages: Vec<(PageRef, &Page)> = corpus.pages().collect();

        let counted: Vec<(PageRef, u32, HashMap<String, u32>)> = pages
            .par_iter()
            .map(|&(page, content)| {
                let tokens = tokenize(&content.text);
                let len = tokens.len() as u32;
                let mut freqs: HashMap<String, u32> = HashMap::new();
                for token in tokens {
                    *freqs.entry(token.term).or_default() += 1;
                }
                (page, len, freqs)
            })
            .collect();

        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
        let mut page_lengths = HashMap::with_capacity(counted.len());
        let mut total_tokens: u64 = 0;

        for (page, len, freqs) in counted {
            total_tokens += u64::from(len);
            page_lengths.insert(page, len);
            for (term, tf) in freqs {
                postings.entry(term).or_default().push(Posting { page, tf });
            }
        }
        for list in postings.values_mut() {
            list.sort_by_key(|p| p.page);
        }

        let page_count = pages.len();
        let avg_page_len = if page_count == 0 {
            0.0
        } else {
            total_tokens as f32 / page_count as f32
        };

        debug!(
            terms = postings.len(),
            pages = page_count,
            avg_page_len,
            "lexical index built"
        );

        Self {
            params,
            postings,
            page_lengths,
            page_count,
            avg_page_len,
        }
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    /// Corpus page count `N`.
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn avg_page_len(&self) -> f32 {
        self.avg_page_len
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    /// Number of pages containing `term`.
    pub fn doc_freq(&self, term: &str) -> usize {
        self.postings.get(term).map_or(0, Vec::len)
    }

    /// Occurrences of `term` in `page`.
    pub fn term_freq(&self, term: &str, page: PageRef) -> u32 {
        self.postings
            .get(term)
            .and_then(|list| {
                list.binary_search_by_key(&page, |p| p.page)
                    .ok()
                    .map(|i| list[i].tf)
            })
            .unwrap_or(0)
    }

    pub fn page_len(&self, page: PageRef) -> u32 {
        self.page_lengths.get(&page).copied().unwrap_or(0)
    }

    pub fn idf(&self, term: &str) -> f32 {
        idf(self.page_count, self.doc_freq(term))
    }

    /// BM25 score of one page for the given query terms.
    pub fn score(&self, page: PageRef, terms: &[String]) -> f32 {
        let len = self.page_len(page);
        dedup(terms)
            .into_iter()
            .map(|term| {
                let tf = self.term_freq(term, page);
                if tf == 0 {
                    return 0.0;
                }
                term_score(
                    self.idf(term),
                    tf,
                    len,
                    self.avg_page_len,
                    self.params,
                )
            })
            .sum()
    }

    /// Rank every page containing at least one query term.
    ///
    /// Zero-score pages are discarded; at most `limit` results are returned,
    /// each carrying the spans of its matched terms.
    pub fn search(
        &self,
        corpus: &Corpus,
        terms: &[String],
        limit: usize,
    ) -> Vec<SearchResult> {
        let terms: Vec<String> =
            dedup(terms).into_iter().map(str::to_string).collect();
        let mut scores: HashMap<PageRef, f32> = HashMap::new();

        for term in &terms {
            let Some(list) = self.postings.get(term) else {
                continue;
            };
            let idf = idf(self.page_count, list.len());
            for posting in list {
                let len = self.page_len(posting.page);
                *scores.entry(posting.page).or_default() += term_score(
                    idf,
                    posting.tf,
                    len,
                    self.avg_page_len,
                    self.params,
                );
            }
        }

        let mut results: Vec<SearchResult> = scores
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .map(|(page, score)| SearchResult::new(page, score))
            .collect();
        sort_results(&mut results);
        results.truncate(limit);

        for result in &mut results {
            result.spans = term_spans(&corpus.tokens(result.page), &terms);
        }
        results
    }
}

fn dedup(terms: &[String]) -> Vec<&str> {
    let mut seen: Vec<&str> = Vec::with_capacity(terms.len());
    for term in terms {
        if !seen.contains(&term.as_str()) {
            seen.push(term);
        }
    }
    seen
}

/// Inverse document frequency; strictly positive for `df <= n`.
pub(crate) fn idf(n: usize, df: usize) -> f32 {
    let n = n as f32;
    let df = df as f32;
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
}

/// Contribution of a single matched term to a page's score.
pub(crate) fn term_score(
    idf: f32,
    tf: u32,
    page_len: u32,
    avg_page_len: f32,
    params: Bm25Params,
) -> f32 {
    let tf = tf as f32;
    let length_ratio = if avg_page_len > 0.0 {
        page_len as f32 / avg_page_len
    } else {
        0.0
    };
    let norm = params.k1 * (1.0 - params.b + params.b * length_ratio);
    idf * (tf * (params.k1 + 1.0)) / (tf + norm)
}

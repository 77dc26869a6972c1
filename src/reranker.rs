//! Second-pass scoring over BM25 candidates.
//!
//! Reranking is pure: `(candidates, mode, query) -> reordered results`.
//! Only lexical candidates are reranked; exact and vector retrieval are
//! terminal.

use rayon::prelude::*;
use serde::Serialize;
use tracing::warn;

use crate::{
    corpus::Corpus,
    embedding::Embedder,
    error::{Error, Result},
    result::{SearchResult, sort_results},
    search::Query,
    tokenizer::{Token, fold_case},
    vector::cosine_similarity,
};

pub const DEFAULT_EXACT_BOOST: f32 = 2.0;
pub const DEFAULT_RERANK_TOP_K: usize = 20;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum RerankMode {
    /// Keep the BM25 order.
    #[default]
    None,
    /// Boost pages where the query terms sit close together.
    Span,
    /// Boost pages containing the query verbatim.
    #[value(name = "exact")]
    ExactBoost,
    /// Replace BM25 scores with embedding similarity.
    Embedding,
}

impl RerankMode {
    pub fn needs_query_embedding(self) -> bool {
        self == Self::Embedding
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankOptions {
    /// Multiplier applied to candidates containing the query phrase.
    pub exact_boost: f32,
    /// Number of leading candidates considered by embedding rerank.
    pub top_k: usize,
}

impl Default for RerankOptions {
    fn default() -> Self {
        Self {
            exact_boost: DEFAULT_EXACT_BOOST,
            top_k: DEFAULT_RERANK_TOP_K,
        }
    }
}

/// Smallest token window holding one occurrence of every distinct query
/// term that the page contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanWindow {
    /// Index of the first token in the window.
    pub first: usize,
    /// Index of the last token in the window.
    pub last: usize,
    /// Number of distinct query terms the window covers.
    pub terms: usize,
}

impl SpanWindow {
    /// Window length in tokens.
    pub fn width(&self) -> usize {
        self.last - self.first + 1
    }
}

/// Find the minimal window over `tokens` covering every distinct query term
/// present in them. `None` when no query term occurs at all.
pub fn minimal_span(tokens: &[Token], terms: &[String]) -> Option<SpanWindow> {
    // (token position, index of the query term it matches)
    let hits: Vec<(usize, usize)> = tokens
        .iter()
        .enumerate()
        .filter_map(|(pos, token)| {
            terms.iter().position(|t| *t == token.term).map(|i| (pos, i))
        })
        .collect();
    if hits.is_empty() {
        return None;
    }

    let mut present = vec![false; terms.len()];
    for &(_, term) in &hits {
        present[term] = true;
    }
    let wanted = present.iter().filter(|p| **p).count();

    let mut counts = vec![0usize; terms.len()];
    let mut covered = 0;
    let mut left = 0;
    let mut best: Option<SpanWindow> = None;

    for right in 0..hits.len() {
        let (_, term) = hits[right];
        if counts[term] == 0 {
            covered += 1;
        }
        counts[term] += 1;

        while covered == wanted {
            let window = SpanWindow {
                first: hits[left].0,
                last: hits[right].0,
                terms: wanted,
            };
            if best.is_none_or(|b| window.width() < b.width()) {
                best = Some(window);
            }
            let (_, dropped) = hits[left];
            counts[dropped] -= 1;
            if counts[dropped] == 0 {
                covered -= 1;
            }
            left += 1;
        }
    }

    best
}

/// `1 / (1 + span_length)`, or 0 when no query term is present.
pub fn span_score(tokens: &[Token], terms: &[String]) -> f32 {
    minimal_span(tokens, terms).map_or(0.0, |w| 1.0 / (1.0 + w.width() as f32))
}

/// Reorder BM25 `candidates` with the selected strategy.
pub fn rerank(
    corpus: &Corpus,
    candidates: Vec<SearchResult>,
    mode: RerankMode,
    query: &Query,
    options: RerankOptions,
    embedder: Option<&dyn Embedder>,
) -> Result<Vec<SearchResult>> {
    match mode {
        RerankMode::None => Ok(candidates),
        RerankMode::Span => Ok(rerank_span(corpus, candidates, query)),
        RerankMode::ExactBoost => Ok(rerank_exact(
            corpus,
            candidates,
            query,
            options.exact_boost,
        )),
        RerankMode::Embedding => rerank_embedding(
            corpus,
            candidates,
            query,
            options.top_k,
            embedder,
        ),
    }
}

fn rerank_span(
    corpus: &Corpus,
    mut candidates: Vec<SearchResult>,
    query: &Query,
) -> Vec<SearchResult> {
    for candidate in &mut candidates {
        let tokens = corpus.tokens(candidate.page);
        candidate.score *= 1.0 + span_score(&tokens, &query.terms);
    }
    sort_results(&mut candidates);
    candidates
}

fn rerank_exact(
    corpus: &Corpus,
    mut candidates: Vec<SearchResult>,
    query: &Query,
    boost: f32,
) -> Vec<SearchResult> {
    let (phrase, _) = fold_case(query.text.trim());
    if phrase.is_empty() {
        return candidates;
    }
    let boost = boost.max(1.0);

    for candidate in &mut candidates {
        let Some(page) = corpus.page(candidate.page) else {
            continue;
        };
        let (folded, _) = fold_case(&page.text);
        if folded.contains(&phrase) {
            candidate.score *= boost;
        }
    }
    sort_results(&mut candidates);
    candidates
}

fn rerank_embedding(
    corpus: &Corpus,
    mut candidates: Vec<SearchResult>,
    query: &Query,
    top_k: usize,
    embedder: Option<&dyn Embedder>,
) -> Result<Vec<SearchResult>> {
    let Some(query_vector) = query.embedding.as_deref() else {
        return Err(Error::unavailable(
            "embedding rerank",
            "no query embedding was supplied",
        ));
    };
    candidates.truncate(top_k);
    if candidates.is_empty() {
        return Ok(candidates);
    }

    let mut ranked: Vec<SearchResult> = candidates
        .into_par_iter()
        .filter_map(|mut candidate| {
            let page = corpus.page(candidate.page)?;
            let on_demand;
            let vector = match (&page.embedding, embedder) {
                (Some(stored), _) => stored.as_slice(),
                (None, Some(embedder)) => match embedder.embed(&page.text) {
                    Ok(v) => {
                        on_demand = v;
                        on_demand.as_slice()
                    }
                    Err(e) => {
                        warn!(page = ?candidate.page, "on-demand embedding failed: {e}");
                        return None;
                    }
                },
                (None, None) => {
                    warn!(
                        page = ?candidate.page,
                        "candidate has no embedding and no embedder was supplied"
                    );
                    return None;
                }
            };
            candidate.score = cosine_similarity(query_vector, vector)?;
            Some(candidate)
        })
        .collect();

    if ranked.is_empty() {
        return Err(Error::unavailable(
            "embedding rerank",
            "no candidate could be compared with the query embedding",
        ));
    }
    sort_results(&mut ranked);
    Ok(ranked)
}

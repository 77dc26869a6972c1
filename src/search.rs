use std::fmt;

use serde::Serialize;

use crate::{
    corpus::Corpus,
    embedding::Embedder,
    error::{Error, Result},
    exact,
    lexical::LexicalIndex,
    reranker::{self, RerankMode, RerankOptions},
    result::{SearchResult, Span},
    text_util,
    tokenizer::distinct_terms,
    vector,
};

/// Default cap on the number of results a search returns.
pub const DEFAULT_MAX_RESULTS: usize = 50;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Ranked keyword retrieval.
    #[default]
    Bm25,
    /// Case-insensitive phrase containment.
    Exact,
    /// Cosine similarity over page embeddings.
    Vector,
}

impl RetrievalMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bm25 => "bm25",
            Self::Exact => "exact",
            Self::Vector => "vector",
        }
    }
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw query text, its distinct terms, and an optional query embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub text: String,
    pub terms: Vec<String>,
    pub embedding: Option<Vec<f32>>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            terms: distinct_terms(&text),
            text,
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// How a query is retrieved and reranked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchRequest {
    pub mode: RetrievalMode,
    pub rerank: RerankMode,
    /// Maximum number of results; BM25 candidates are cut here before
    /// reranking.
    pub max_results: usize,
    pub rerank_options: RerankOptions,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            mode: RetrievalMode::default(),
            rerank: RerankMode::default(),
            max_results: DEFAULT_MAX_RESULTS,
            rerank_options: RerankOptions::default(),
        }
    }
}

impl SearchRequest {
    pub fn needs_query_embedding(&self) -> bool {
        self.mode == RetrievalMode::Vector || self.rerank.needs_query_embedding()
    }
}

/// Run one query against a corpus generation.
///
/// When the request needs a query embedding that `query` does not carry,
/// it is computed with `embedder`. Reranking is only defined over BM25
/// candidates; combining it with another retrieval mode is reported as
/// [`Error::Unavailable`].
pub fn execute_search(
    corpus: &Corpus,
    index: &LexicalIndex,
    request: &SearchRequest,
    query: &Query,
    embedder: Option<&dyn Embedder>,
) -> Result<Vec<SearchResult>> {
    let embedded;
    let query = match embedder {
        Some(embedder)
            if request.needs_query_embedding() && query.embedding.is_none() =>
        {
            let vector = embedder.embed(&query.text)?;
            embedded = query.clone().with_embedding(vector);
            &embedded
        }
        _ => query,
    };

    let mut results = match (request.mode, request.rerank) {
        (RetrievalMode::Bm25, rerank) => {
            let candidates =
                index.search(corpus, &query.terms, request.max_results);
            reranker::rerank(
                corpus,
                candidates,
                rerank,
                query,
                request.rerank_options,
                embedder,
            )?
        }
        (mode, rerank) if rerank != RerankMode::None => {
            return Err(Error::unavailable(
                "reranking",
                format!(
                    "{mode} results are final; only bm25 candidates can be \
                     reranked"
                ),
            ));
        }
        (RetrievalMode::Exact, _) => exact::search(corpus, &query.text),
        (RetrievalMode::Vector, _) => {
            let Some(embedding) = query.embedding.as_deref() else {
                return Err(Error::unavailable(
                    "vector search",
                    "no query embedding was supplied",
                ));
            };
            vector::search(corpus, embedding)?
        }
    };

    results.truncate(request.max_results);
    Ok(results)
}

/// A search result resolved against its corpus, ready for output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultView {
    pub rank: usize,
    pub score: f32,
    pub document: String,
    pub file: String,
    pub page: u32,
    pub spans: Vec<Span>,
    pub snippet: String,
}

/// Resolve results into ranked, printable views.
pub fn result_views(
    corpus: &Corpus,
    results: &[SearchResult],
) -> Vec<ResultView> {
    results
        .iter()
        .filter_map(|r| {
            let document = corpus.document(r.page)?;
            let page = corpus.page(r.page)?;
            Some((r, document, page))
        })
        .enumerate()
        .map(|(i, (r, document, page))| ResultView {
            rank: i + 1,
            score: r.score,
            document: document.id.clone(),
            file: document.name(),
            page: page.number,
            spans: r.spans.clone(),
            snippet: text_util::render_snippet(&page.text, &r.spans),
        })
        .collect()
}

/// Format results for human-readable terminal output.
pub fn format_human(corpus: &Corpus, results: &[SearchResult]) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    for view in result_views(corpus, results) {
        println!(
            "{:>3}. [{:.3}] {} p.{}",
            view.rank, view.score, view.file, view.page
        );
        if !view.snippet.is_empty() {
            println!("     {}", view.snippet);
        }
    }
    println!("\n{} result(s)", results.len());
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    query: &'a str,
    mode: RetrievalMode,
    rerank: RerankMode,
    result_count: usize,
    results: Vec<ResultView>,
}

/// Format results as JSON output.
pub fn format_json(
    corpus: &Corpus,
    results: &[SearchResult],
    query: &Query,
    request: &SearchRequest,
) -> Result<()> {
    let results = result_views(corpus, results);
    let output = JsonOutput {
        query: &query.text,
        mode: request.mode,
        rerank: request.rerank,
        result_count: results.len(),
        results,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        corpus::{Document, Page, PageRef},
        lexical::Bm25Params,
    };

    fn fixture() -> (Corpus, LexicalIndex) {
        let corpus = Corpus::from_documents(vec![
            Document::new("/lib/a.pdf", vec![
                Page::new(1, "the quick brown fox").with_embedding(vec![0.0, 1.0]),
                Page::new(2, "a lazy dog sleeps"),
            ]),
            Document::new("/lib/b.pdf", vec![
                Page::new(1, "quick quick fox jumps").with_embedding(vec![1.0, 0.0]),
            ]),
        ]);
        let index = LexicalIndex::build(&corpus, Bm25Params::default());
        (corpus, index)
    }

    fn request(mode: RetrievalMode, rerank: RerankMode) -> SearchRequest {
        SearchRequest {
            mode,
            rerank,
            ..SearchRequest::default()
        }
    }

    fn pages(results: &[SearchResult]) -> Vec<PageRef> {
        results.iter().map(|r| r.page).collect()
    }

    #[test]
    fn bm25_ranks_denser_page_first() {
        let (corpus, index) = fixture();
        let results = execute_search(
            &corpus,
            &index,
            &SearchRequest::default(),
            &Query::new("quick fox"),
            None,
        )
        .unwrap();
        assert_eq!(pages(&results), [
            PageRef { doc: 1, page: 0 },
            PageRef { doc: 0, page: 0 },
        ]);
        assert!(!results[0].spans.is_empty());
    }

    #[test]
    fn unmatched_query_is_empty_not_an_error() {
        let (corpus, index) = fixture();
        for mode in [RetrievalMode::Bm25, RetrievalMode::Exact] {
            let results = execute_search(
                &corpus,
                &index,
                &request(mode, RerankMode::None),
                &Query::new("zebra"),
                None,
            )
            .unwrap();
            assert!(results.is_empty());
        }
    }

    #[test]
    fn max_results_caps_output() {
        let (corpus, index) = fixture();
        let results = execute_search(
            &corpus,
            &index,
            &SearchRequest {
                max_results: 1,
                ..SearchRequest::default()
            },
            &Query::new("quick fox"),
            None,
        )
        .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn exact_mode_uses_phrase_policy() {
        let (corpus, index) = fixture();
        let results = execute_search(
            &corpus,
            &index,
            &request(RetrievalMode::Exact, RerankMode::None),
            &Query::new("brown fox"),
            None,
        )
        .unwrap();
        assert_eq!(pages(&results), [PageRef { doc: 0, page: 0 }]);
    }

    #[test]
    fn vector_mode_embeds_query_on_demand() {
        let (corpus, index) = fixture();
        let embedder = |_: &str| -> Result<Vec<f32>> { Ok(vec![1.0, 0.1]) };
        let results = execute_search(
            &corpus,
            &index,
            &request(RetrievalMode::Vector, RerankMode::None),
            &Query::new("anything"),
            Some(&embedder),
        )
        .unwrap();
        assert_eq!(pages(&results), [
            PageRef { doc: 1, page: 0 },
            PageRef { doc: 0, page: 0 },
        ]);
    }

    #[test]
    fn vector_mode_without_query_vector_is_unavailable() {
        let (corpus, index) = fixture();
        let err = execute_search(
            &corpus,
            &index,
            &request(RetrievalMode::Vector, RerankMode::None),
            &Query::new("anything"),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Unavailable { .. }));
    }

    #[test]
    fn reranking_non_lexical_results_is_unavailable() {
        let (corpus, index) = fixture();
        for mode in [RetrievalMode::Exact, RetrievalMode::Vector] {
            let err = execute_search(
                &corpus,
                &index,
                &request(mode, RerankMode::Span),
                &Query::new("quick fox").with_embedding(vec![1.0, 0.0]),
                None,
            )
            .unwrap_err();
            assert!(matches!(err, Error::Unavailable { .. }));
        }
    }

    #[test]
    fn span_rerank_keeps_tighter_page_first() {
        let (corpus, index) = fixture();
        let results = execute_search(
            &corpus,
            &index,
            &request(RetrievalMode::Bm25, RerankMode::Span),
            &Query::new("quick fox"),
            None,
        )
        .unwrap();
        assert_eq!(results[0].page, PageRef { doc: 1, page: 0 });
    }

    #[test]
    fn needs_query_embedding_only_for_vector_paths() {
        assert!(!SearchRequest::default().needs_query_embedding());
        assert!(
            request(RetrievalMode::Vector, RerankMode::None)
                .needs_query_embedding()
        );
        assert!(
            request(RetrievalMode::Bm25, RerankMode::Embedding)
                .needs_query_embedding()
        );
    }

    #[test]
    fn views_are_ranked_and_resolved() {
        let (corpus, index) = fixture();
        let results = execute_search(
            &corpus,
            &index,
            &SearchRequest::default(),
            &Query::new("fox"),
            None,
        )
        .unwrap();
        let views = result_views(&corpus, &results);

        assert_eq!(views.len(), 2);
        assert_eq!(views[0].rank, 1);
        assert_eq!(views[1].rank, 2);
        assert!(views.iter().all(|v| v.file.ends_with(".pdf")));
        assert!(views.iter().all(|v| v.snippet.contains("[fox]")));
    }

    #[test]
    fn query_terms_are_distinct_and_folded() {
        let query = Query::new("Fox fox FOX den");
        assert_eq!(query.terms, ["fox", "den"]);
    }
}

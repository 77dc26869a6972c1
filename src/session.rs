//! One search session: the active corpus generation and its index.
//!
//! A generation is built completely before it replaces the previous one, so
//! a query holding an `Arc<Generation>` always sees a consistent corpus and
//! index even while a reload runs.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        PoisonError,
        RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    corpus::{Corpus, LoadReport},
    embedding::Embedder,
    error::{Error, Result},
    lexical::{Bm25Params, LexicalIndex},
    result::SearchResult,
    search::{self, Query, RetrievalMode, SearchRequest},
};

/// An immutable corpus together with the lexical index built over it.
#[derive(Debug)]
pub struct Generation {
    number: u64,
    corpus: Corpus,
    index: LexicalIndex,
    report: LoadReport,
    degraded: bool,
}

impl Generation {
    /// Build a generation from an already assembled corpus.
    pub fn new(number: u64, corpus: Corpus, params: Bm25Params) -> Self {
        let index = LexicalIndex::build(&corpus, params);
        Self {
            number,
            corpus,
            index,
            report: LoadReport::default(),
            degraded: false,
        }
    }

    /// Load `folders` into a fresh generation.
    ///
    /// When no artifact can be read the generation is the flagged empty
    /// state rather than an error.
    pub fn load(
        number: u64,
        folders: &[PathBuf],
        params: Bm25Params,
    ) -> Result<Self> {
        match Corpus::load(folders) {
            Ok((corpus, report)) => {
                let mut generation = Self::new(number, corpus, params);
                generation.report = report;
                Ok(generation)
            }
            Err(e @ Error::Ingestion { .. }) => {
                warn!("{e}; serving an empty corpus");
                let mut generation =
                    Self::new(number, Corpus::empty(), params);
                generation.degraded = true;
                generation.report.warnings.push(e.to_string());
                Ok(generation)
            }
            Err(e) => Err(e),
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn index(&self) -> &LexicalIndex {
        &self.index
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    /// Whether nothing could be loaded.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn search(
        &self,
        request: &SearchRequest,
        query: &Query,
        embedder: Option<&dyn Embedder>,
    ) -> Result<Vec<SearchResult>> {
        search::execute_search(
            &self.corpus,
            &self.index,
            request,
            query,
            embedder,
        )
    }

    /// Retrieval modes this generation can serve.
    pub fn available_modes(&self) -> Vec<RetrievalMode> {
        let mut modes = vec![RetrievalMode::Bm25, RetrievalMode::Exact];
        if self.corpus.has_embeddings() {
            modes.push(RetrievalMode::Vector);
        }
        modes
    }

    pub fn status(&self) -> Status {
        Status {
            generation: self.number,
            documents: self.corpus.document_count(),
            pages: self.corpus.page_count(),
            embedded_pages: self.corpus.embedded_page_count(),
            dimension: self.corpus.dimension(),
            terms: self.index.term_count(),
            modes: self.available_modes(),
            degraded: self.degraded,
            warnings: self.report.warnings.clone(),
        }
    }
}

/// Summary of the active generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub generation: u64,
    pub documents: usize,
    pub pages: usize,
    pub embedded_pages: usize,
    pub dimension: Option<usize>,
    pub terms: usize,
    pub modes: Vec<RetrievalMode>,
    pub degraded: bool,
    pub warnings: Vec<String>,
}

impl Status {
    pub fn vector_available(&self) -> bool {
        self.modes.contains(&RetrievalMode::Vector)
    }
}

/// Owns the current generation for a folder set.
#[derive(Debug)]
pub struct Session {
    folders: Vec<PathBuf>,
    params: Bm25Params,
    counter: AtomicU64,
    current: RwLock<Arc<Generation>>,
}

impl Session {
    /// Load `folders` and open a session over them.
    pub fn open(folders: Vec<PathBuf>, params: Bm25Params) -> Result<Self> {
        params.validate()?;
        let generation = Generation::load(1, &folders, params)?;
        Ok(Self {
            folders,
            params,
            counter: AtomicU64::new(1),
            current: RwLock::new(Arc::new(generation)),
        })
    }

    /// Open a session over an in-memory corpus. Reloads rescan nothing and
    /// yield the flagged empty state.
    pub fn from_corpus(corpus: Corpus, params: Bm25Params) -> Self {
        Self {
            folders: Vec::new(),
            params,
            counter: AtomicU64::new(1),
            current: RwLock::new(Arc::new(Generation::new(1, corpus, params))),
        }
    }

    pub fn folders(&self) -> &[PathBuf] {
        &self.folders
    }

    /// The active generation. Holding the returned `Arc` pins it for the
    /// duration of a query.
    pub fn current(&self) -> Arc<Generation> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Rescan the folder set and swap in the new generation.
    ///
    /// The old generation stays active until the new one is fully built; on
    /// error it is kept.
    pub fn reload(&self) -> Result<Arc<Generation>> {
        let number = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let generation =
            Arc::new(Generation::load(number, &self.folders, self.params)?);

        let mut current =
            self.current.write().unwrap_or_else(PoisonError::into_inner);
        // A slower concurrent reload must not replace a newer generation.
        if generation.number > current.number {
            *current = Arc::clone(&generation);
            info!(generation = number, "corpus generation swapped in");
        }
        Ok(Arc::clone(&current))
    }

    pub fn search(
        &self,
        request: &SearchRequest,
        query: &Query,
        embedder: Option<&dyn Embedder>,
    ) -> Result<Vec<SearchResult>> {
        self.current().search(request, query, embedder)
    }

    pub fn status(&self) -> Status {
        self.current().status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        artifact::{self, PageTextRecord},
        corpus::{Document, Page},
    };

    fn write_artifact(dir: &std::path::Path, stem: &str, pages: &[&str]) {
        let records: Vec<PageTextRecord> = pages
            .iter()
            .enumerate()
            .map(|(i, text)| PageTextRecord {
                text: text.to_string(),
                page_number: Some(i as u32 + 1),
                filename: format!("{stem}.pdf"),
            })
            .collect();
        artifact::write_new(&dir.join(format!("{stem}.json")), &records)
            .unwrap();
    }

    #[test]
    fn empty_folder_set_is_degraded_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let session =
            Session::open(vec![tmp.path().to_path_buf()], Bm25Params::default())
                .unwrap();

        let status = session.status();
        assert!(status.degraded);
        assert_eq!(status.documents, 0);
        assert!(!status.vector_available());
        assert!(!status.warnings.is_empty());

        let results = session
            .search(&SearchRequest::default(), &Query::new("anything"), None)
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn reload_swaps_generations_and_pins_old_ones() {
        let tmp = tempfile::tempdir().unwrap();
        write_artifact(tmp.path(), "a", &["solar panels on roofs"]);
        let session =
            Session::open(vec![tmp.path().to_path_buf()], Bm25Params::default())
                .unwrap();

        let pinned = session.current();
        assert_eq!(pinned.corpus().document_count(), 1);

        write_artifact(tmp.path(), "b", &["solar farms"]);
        let fresh = session.reload().unwrap();

        assert_eq!(fresh.number(), pinned.number() + 1);
        assert_eq!(fresh.corpus().document_count(), 2);
        // The pinned generation is untouched.
        assert_eq!(pinned.corpus().document_count(), 1);
        assert_eq!(session.status().documents, 2);

        let results = session
            .search(&SearchRequest::default(), &Query::new("solar"), None)
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn opening_does_not_fill_the_token_cache() {
        let tmp = tempfile::tempdir().unwrap();
        write_artifact(tmp.path(), "a", &[
            "solar panels",
            "wind turbines",
            "tidal power",
            "geothermal heat",
            "hydro dams",
        ]);
        let session =
            Session::open(vec![tmp.path().to_path_buf()], Bm25Params::default())
                .unwrap();

        let generation = session.current();
        assert_eq!(generation.corpus().page_count(), 5);
        assert_eq!(generation.corpus().cached_token_pages(), 0);

        let results = generation
            .search(&SearchRequest::default(), &Query::new("tidal"), None)
            .unwrap();
        assert_eq!(results.len(), 1);
        // Only the matched page was tokenized for its spans.
        assert_eq!(generation.corpus().cached_token_pages(), 1);
    }

    #[test]
    fn status_reports_vector_availability() {
        let corpus = Corpus::from_documents(vec![Document::new(
            "/lib/a.pdf",
            vec![
                Page::new(1, "text").with_embedding(vec![1.0, 0.0]),
                Page::new(2, "more text"),
            ],
        )]);
        let session = Session::from_corpus(corpus, Bm25Params::default());
        let status = session.status();

        assert!(status.vector_available());
        assert_eq!(status.pages, 2);
        assert_eq!(status.embedded_pages, 1);
        assert_eq!(status.dimension, Some(2));
        assert!(!status.degraded);
    }

    #[test]
    fn invalid_bm25_params_are_rejected() {
        let params = Bm25Params { k1: 1.2, b: 2.0 };
        assert!(matches!(
            Session::open(Vec::new(), params),
            Err(Error::Config(_))
        ));
    }
}

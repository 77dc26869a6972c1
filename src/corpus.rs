//! In-memory model of every loaded document and page.
//!
//! A [`Corpus`] is built by scanning folders for page-text artifacts and
//! attaching any sibling embedding artifacts. It is immutable once built,
//! apart from the per-page token cache which fills lazily on first use.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};

use rayon::prelude::*;
use tracing::{info, warn};

use crate::{
    artifact::{self, EmbeddingRecord, PageTextRecord},
    error::{Error, Result},
    tokenizer::{Token, tokenize},
    walker,
};

/// Stable handle to one page: the document's position in identity order and
/// the page's position within the document.
///
/// Ordering on `PageRef` is therefore (document identity, page order), the
/// tie-break used by every result list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageRef {
    pub doc: u32,
    pub page: u32,
}

#[derive(Debug, Clone)]
pub struct Page {
    /// 1-based page number.
    pub number: u32,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
}

impl Page {
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    /// Identity: the source PDF path as a string.
    pub id: String,
    /// Path of the source PDF.
    pub path: PathBuf,
    pub pages: Vec<Page>,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>, pages: Vec<Page>) -> Self {
        let path = path.into();
        Self {
            id: path.to_string_lossy().into_owned(),
            path,
            pages,
        }
    }

    /// Source file name without its folder.
    pub fn name(&self) -> String {
        artifact::file_name(&self.path)
    }
}

/// What happened while loading a corpus.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub folders_scanned: usize,
    pub artifacts_loaded: usize,
    pub embedded_pages: usize,
    /// Non-fatal problems: missing folders, malformed artifacts, mismatched
    /// embedding files.
    pub warnings: Vec<String>,
}

impl LoadReport {
    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }
}

#[derive(Debug, Default)]
pub struct Corpus {
    documents: Vec<Document>,
    by_id: HashMap<String, u32>,
    dimension: Option<usize>,
    tokens: RwLock<HashMap<PageRef, Arc<[Token]>>>,
}

impl Corpus {
    /// A corpus with no documents, used as the explicit degraded state when
    /// nothing could be loaded.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a corpus from already-parsed documents.
    ///
    /// Documents are ordered by identity; a later duplicate identity is
    /// dropped. The embedding dimension is taken from the first vector seen
    /// and vectors of any other length are discarded.
    pub fn from_documents(documents: Vec<Document>) -> Self {
        let mut report = LoadReport::default();
        Self::assemble(documents, &mut report)
    }

    fn assemble(mut documents: Vec<Document>, report: &mut LoadReport) -> Self {
        documents.sort_by(|a, b| a.id.cmp(&b.id));

        let mut seen = HashSet::new();
        documents.retain(|doc| {
            let fresh = seen.insert(doc.id.clone());
            if !fresh {
                report.warn(format!(
                    "duplicate document {} ignored",
                    doc.id
                ));
            }
            fresh
        });

        let mut dimension = None;
        for doc in &mut documents {
            for page in &mut doc.pages {
                let Some(vector) = &page.embedding else {
                    continue;
                };
                if vector.is_empty() {
                    page.embedding = None;
                    continue;
                }
                let expected = *dimension.get_or_insert(vector.len());
                if vector.len() != expected {
                    report.warn(format!(
                        "{} page {}: embedding has {} dimensions, expected {}",
                        doc.id,
                        page.number,
                        vector.len(),
                        expected
                    ));
                    page.embedding = None;
                }
            }
        }

        let by_id = documents
            .iter()
            .enumerate()
            .map(|(i, doc)| (doc.id.clone(), i as u32))
            .collect();

        let corpus = Self {
            documents,
            by_id,
            dimension,
            tokens: RwLock::default(),
        };
        report.embedded_pages = corpus.embedded_page_count();
        corpus
    }

    /// Scan `folders` for page-text artifacts and load them.
    ///
    /// Fails with [`Error::Ingestion`] when no artifact in any folder could
    /// be read. Missing folders and malformed artifacts are recorded in the
    /// report and skipped.
    pub fn load(folders: &[PathBuf]) -> Result<(Self, LoadReport)> {
        let mut report = LoadReport::default();
        let mut artifacts = Vec::new();

        for folder in folders {
            if !folder.is_dir() {
                report.warn(format!("folder {} not found", folder.display()));
                continue;
            }
            report.folders_scanned += 1;
            match walker::discover_files(folder, artifact::PAGE_TEXT_EXTENSION)
            {
                Ok(files) => artifacts
                    .extend(files.into_iter().map(|f| f.absolute_path)),
                Err(e) => report.warn(format!(
                    "could not scan {}: {e}",
                    folder.display()
                )),
            }
        }

        let parsed: Vec<_> = artifacts
            .par_iter()
            .map(|path| (path, parse_artifact_pair(path)))
            .collect();

        let mut documents = Vec::with_capacity(parsed.len());
        for (path, result) in parsed {
            match result {
                Ok((document, mismatch)) => {
                    if let Some(message) = mismatch {
                        report.warn(message);
                    }
                    documents.push(document);
                }
                Err(e) => {
                    report.warn(format!("skipping {}: {e}", path.display()))
                }
            }
        }

        if documents.is_empty() {
            return Err(Error::Ingestion {
                folders: folders.len(),
            });
        }

        report.artifacts_loaded = documents.len();
        let corpus = Self::assemble(documents, &mut report);
        info!(
            documents = corpus.document_count(),
            pages = corpus.page_count(),
            embedded = report.embedded_pages,
            "corpus loaded"
        );
        Ok((corpus, report))
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn page_count(&self) -> usize {
        self.documents.iter().map(|d| d.pages.len()).sum()
    }

    pub fn embedded_page_count(&self) -> usize {
        self.pages().filter(|(_, p)| p.embedding.is_some()).count()
    }

    pub fn has_embeddings(&self) -> bool {
        self.pages().any(|(_, p)| p.embedding.is_some())
    }

    /// Dimension shared by every embedding in the corpus.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn document_by_id(&self, id: &str) -> Option<&Document> {
        let idx = *self.by_id.get(id)?;
        self.documents.get(idx as usize)
    }

    pub fn document(&self, page: PageRef) -> Option<&Document> {
        self.documents.get(page.doc as usize)
    }

    pub fn page(&self, page: PageRef) -> Option<&Page> {
        self.document(page)?.pages.get(page.page as usize)
    }

    /// Every page in (document identity, page order).
    pub fn pages(&self) -> impl Iterator<Item = (PageRef, &Page)> {
        self.documents.iter().enumerate().flat_map(|(d, doc)| {
            doc.pages.iter().enumerate().map(move |(p, page)| {
                (
                    PageRef {
                        doc: d as u32,
                        page: p as u32,
                    },
                    page,
                )
            })
        })
    }

    /// Token sequence of a page, tokenized on first request and cached.
    pub fn tokens(&self, page: PageRef) -> Arc<[Token]> {
        if let Some(tokens) = self
            .tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&page)
        {
            return Arc::clone(tokens);
        }

        let tokens: Arc<[Token]> = match self.page(page) {
            Some(p) => tokenize(&p.text).into(),
            None => Arc::from(Vec::new()),
        };

        let mut cache =
            self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(cache.entry(page).or_insert(tokens))
    }

    /// Number of pages whose tokens are currently cached.
    pub fn cached_token_pages(&self) -> usize {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Parse a page-text artifact and its embedding sibling, if present.
///
/// Returns the document plus an optional warning about a page-count
/// mismatch between the two artifacts.
fn parse_artifact_pair(path: &Path) -> Result<(Document, Option<String>)> {
    let records = artifact::read_page_texts(path)?;
    let folder = path.parent().unwrap_or(Path::new("."));
    let source = source_path(path, folder, &records);

    let mut pages: Vec<Page> = records
        .into_iter()
        .enumerate()
        .map(|(i, record)| {
            Page::new(record.page_number.unwrap_or(i as u32 + 1), record.text)
        })
        .collect();

    let emb_path = artifact::embedding_path(path);
    let mut mismatch = None;
    if emb_path.is_file() {
        match artifact::read_embeddings(&emb_path) {
            Ok(vectors) => {
                if vectors.len() != pages.len() {
                    mismatch = Some(format!(
                        "page count mismatch: {} has {} pages, {} has {}",
                        path.display(),
                        pages.len(),
                        emb_path.display(),
                        vectors.len()
                    ));
                }
                attach_embeddings(&mut pages, vectors);
            }
            Err(e) => {
                mismatch = Some(format!(
                    "ignoring embeddings {}: {e}",
                    emb_path.display()
                ));
            }
        }
    }

    Ok((Document::new(source, pages), mismatch))
}

fn attach_embeddings(pages: &mut [Page], vectors: Vec<EmbeddingRecord>) {
    for (page, record) in pages.iter_mut().zip(vectors) {
        page.embedding = record.embedding.filter(|v| !v.is_empty());
    }
}

/// Resolve the source PDF a page-text artifact was extracted from.
///
/// Prefers the `filename` recorded in the artifact (relative names resolve
/// against the artifact's folder) and falls back to `<stem>.pdf`.
fn source_path(
    artifact_path: &Path,
    folder: &Path,
    records: &[PageTextRecord],
) -> PathBuf {
    match records.iter().find(|r| !r.filename.is_empty()) {
        Some(record) => folder.join(&record.filename),
        None => artifact_path.with_extension(artifact::SOURCE_EXTENSION),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::write_new;

    fn write_doc(dir: &Path, stem: &str, pages: &[&str]) -> PathBuf {
        let records: Vec<_> = pages
            .iter()
            .enumerate()
            .map(|(i, text)| PageTextRecord {
                text: text.to_string(),
                page_number: Some(i as u32 + 1),
                filename: format!("{stem}.pdf"),
            })
            .collect();
        let path = dir.join(format!("{stem}.json"));
        write_new(&path, &records).unwrap();
        path
    }

    fn write_emb(dir: &Path, stem: &str, vectors: Vec<Option<Vec<f32>>>) {
        let records: Vec<_> = vectors
            .into_iter()
            .enumerate()
            .map(|(i, embedding)| EmbeddingRecord {
                page_number: Some(i as u32 + 1),
                filename: format!("{stem}.pdf"),
                embedding,
            })
            .collect();
        write_new(&dir.join(format!("{stem}.emb")), &records).unwrap();
    }

    #[test]
    fn loads_documents_in_identity_order() {
        let tmp = tempfile::tempdir().unwrap();
        write_doc(tmp.path(), "zeta", &["last"]);
        write_doc(tmp.path(), "alpha", &["first", "second"]);

        let (corpus, report) = Corpus::load(&[tmp.path().into()]).unwrap();
        assert_eq!(corpus.document_count(), 2);
        assert_eq!(corpus.page_count(), 3);
        assert_eq!(report.artifacts_loaded, 2);
        assert_eq!(corpus.documents()[0].name(), "alpha.pdf");
        assert_eq!(corpus.documents()[1].name(), "zeta.pdf");
    }

    #[test]
    fn page_order_and_numbers_follow_the_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        write_doc(tmp.path(), "doc", &["one", "", "three"]);

        let (corpus, _) = Corpus::load(&[tmp.path().into()]).unwrap();
        let pages: Vec<_> = corpus
            .pages()
            .map(|(_, p)| (p.number, p.text.as_str()))
            .collect();
        assert_eq!(pages, [(1, "one"), (2, ""), (3, "three")]);
    }

    #[test]
    fn missing_page_number_falls_back_to_position() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("doc.json"),
            r#"[{"text": "a"}, {"text": "b", "page_number": null}]"#,
        )
        .unwrap();

        let (corpus, _) = Corpus::load(&[tmp.path().into()]).unwrap();
        let numbers: Vec<_> = corpus.pages().map(|(_, p)| p.number).collect();
        assert_eq!(numbers, [1, 2]);
        assert_eq!(corpus.documents()[0].name(), "doc.pdf");
    }

    #[test]
    fn no_artifacts_is_an_ingestion_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Corpus::load(&[tmp.path().into()]).unwrap_err();
        assert!(matches!(err, Error::Ingestion { folders: 1 }));
    }

    #[test]
    fn malformed_artifact_is_skipped_with_warning() {
        let tmp = tempfile::tempdir().unwrap();
        write_doc(tmp.path(), "good", &["fine"]);
        std::fs::write(tmp.path().join("bad.json"), "{oops").unwrap();

        let (corpus, report) = Corpus::load(&[tmp.path().into()]).unwrap();
        assert_eq!(corpus.document_count(), 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("bad.json"));
    }

    #[test]
    fn only_malformed_artifacts_is_an_ingestion_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("bad.json"), "{oops").unwrap();
        assert!(matches!(
            Corpus::load(&[tmp.path().into()]),
            Err(Error::Ingestion { .. })
        ));
    }

    #[test]
    fn missing_folder_is_a_warning() {
        let tmp = tempfile::tempdir().unwrap();
        write_doc(tmp.path(), "doc", &["text"]);
        let missing = tmp.path().join("nope");

        let (corpus, report) =
            Corpus::load(&[missing, tmp.path().into()]).unwrap();
        assert_eq!(corpus.document_count(), 1);
        assert_eq!(report.folders_scanned, 1);
        assert!(report.warnings[0].contains("not found"));
    }

    #[test]
    fn attaches_embeddings_from_sibling_file() {
        let tmp = tempfile::tempdir().unwrap();
        write_doc(tmp.path(), "doc", &["one", "two"]);
        write_emb(tmp.path(), "doc", vec![Some(vec![1.0, 0.0]), None]);

        let (corpus, report) = Corpus::load(&[tmp.path().into()]).unwrap();
        assert_eq!(report.embedded_pages, 1);
        assert_eq!(corpus.dimension(), Some(2));
        let pages: Vec<_> = corpus.pages().map(|(_, p)| p).collect();
        assert!(pages[0].embedding.is_some());
        assert!(pages[1].embedding.is_none());
    }

    #[test]
    fn embedding_page_count_mismatch_uses_shorter_length() {
        let tmp = tempfile::tempdir().unwrap();
        write_doc(tmp.path(), "doc", &["one", "two", "three"]);
        write_emb(tmp.path(), "doc", vec![Some(vec![1.0]), Some(vec![0.5])]);

        let (corpus, report) = Corpus::load(&[tmp.path().into()]).unwrap();
        assert_eq!(corpus.embedded_page_count(), 2);
        assert!(report.warnings.iter().any(|w| w.contains("mismatch")));
    }

    #[test]
    fn mismatched_dimensions_are_dropped() {
        let corpus = Corpus::from_documents(vec![
            Document::new("/a.pdf", vec![
                Page::new(1, "x").with_embedding(vec![1.0, 0.0]),
            ]),
            Document::new("/b.pdf", vec![
                Page::new(1, "y").with_embedding(vec![1.0, 0.0, 0.0]),
            ]),
        ]);
        assert_eq!(corpus.dimension(), Some(2));
        assert_eq!(corpus.embedded_page_count(), 1);
    }

    #[test]
    fn duplicate_identities_keep_the_first() {
        let corpus = Corpus::from_documents(vec![
            Document::new("/a.pdf", vec![Page::new(1, "first")]),
            Document::new("/a.pdf", vec![Page::new(1, "second")]),
        ]);
        assert_eq!(corpus.document_count(), 1);
        assert!(corpus.document_by_id("/a.pdf").is_some());
    }

    #[test]
    fn tokens_are_cached_lazily() {
        let corpus = Corpus::from_documents(vec![Document::new(
            "/a.pdf",
            vec![Page::new(1, "Hello World"), Page::new(2, "")],
        )]);
        assert_eq!(corpus.cached_token_pages(), 0);

        let page = PageRef { doc: 0, page: 0 };
        let first = corpus.tokens(page);
        assert_eq!(first.len(), 2);
        assert_eq!(corpus.cached_token_pages(), 1);
        assert!(Arc::ptr_eq(&first, &corpus.tokens(page)));

        assert!(corpus.tokens(PageRef { doc: 0, page: 1 }).is_empty());
    }

    #[test]
    fn unknown_page_ref_has_no_tokens() {
        let corpus = Corpus::empty();
        assert!(corpus.is_empty());
        assert!(corpus.tokens(PageRef { doc: 3, page: 9 }).is_empty());
    }
}

//! pdfdex - a local, file-based search index for PDF libraries.
//!
//! pdfdex reads per-document page-text artifacts produced next to each PDF,
//! builds an in-memory BM25 index over every page, and answers queries by
//! keyword, exact phrase, or embedding similarity. BM25 candidates can be
//! reranked by term proximity, verbatim containment, or embeddings. An
//! incremental ingestion pipeline extracts page text and embeddings for
//! PDFs that do not have them yet.
//!
//! # Quick start
//!
//! ```no_run
//! use pdfdex::{
//!     reranker::RerankMode,
//!     search::{Query, SearchRequest},
//!     session::Session,
//!     settings::Settings,
//! };
//!
//! let settings = Settings::load(None).unwrap();
//! let session =
//!     Session::open(settings.active_folders(), settings.bm25).unwrap();
//!
//! let request = SearchRequest {
//!     rerank: RerankMode::Span,
//!     ..SearchRequest::default()
//! };
//! let query = Query::new("quick fox");
//!
//! let generation = session.current();
//! for result in generation.search(&request, &query, None).unwrap() {
//!     let corpus = generation.corpus();
//!     let doc = corpus.document(result.page).unwrap();
//!     let page = corpus.page(result.page).unwrap();
//!     println!("{} p.{} ({:.3})", doc.name(), page.number, result.score);
//! }
//! ```

pub mod artifact;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod exact;
pub mod extraction;
pub mod incremental;
pub mod ingestion;
pub mod lexical;
pub mod reranker;
pub mod result;
pub mod search;
pub mod session;
pub mod settings;
pub mod text_util;
pub mod tokenizer;
pub mod vector;
pub mod walker;

pub use corpus::{Corpus, Document, Page, PageRef};
pub use error::{Error, Result};
pub use lexical::{Bm25Params, LexicalIndex};
pub use result::{SearchResult, Span};
pub use session::Session;
pub use settings::Settings;

//! Incremental ingestion: PDFs to page-text artifacts, page-text artifacts
//! to embedding artifacts.
//!
//! Both stages skip any unit whose artifact already exists, run units on a
//! bounded worker pool, and record per-unit failures in the stage report
//! instead of aborting the batch. Collaborator calls run on a separate
//! thread per unit so a hung unit can be abandoned through its
//! [`CancelToken`]; the artifact is only published by the worker after the
//! collaborator returned, so an abandoned unit never leaves a file behind.

use std::{
    collections::HashSet,
    fmt,
    path::{Path, PathBuf},
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError},
    },
    time::{Duration, Instant},
};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    artifact::{self, EmbeddingRecord, PageTextRecord, WriteOutcome},
    embedding::{Embedder, validate_vector},
    error::{Error, Result},
    incremental::{self, PendingWork, WorkUnit},
};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Turns a PDF into its page texts, in page order.
pub trait Extractor: Send + Sync {
    fn extract_pages(&self, pdf: &Path) -> Result<Vec<String>>;
}

impl<F> Extractor for F
where
    F: Fn(&Path) -> Result<Vec<String>> + Send + Sync,
{
    fn extract_pages(&self, pdf: &Path) -> Result<Vec<String>> {
        self(pdf)
    }
}

/// Cooperative cancellation flag. A child token is cancelled when it or
/// any of its ancestors is.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    parent: Option<CancelToken>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that can be cancelled on its own without affecting `self`.
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self
                .inner
                .parent
                .as_ref()
                .is_some_and(CancelToken::is_cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Text,
    Embedding,
}

impl Stage {
    /// What one unit of this stage reads: a PDF for the text stage, a
    /// page-text artifact for the embedding stage.
    pub fn unit_label(self) -> &'static str {
        match self {
            Self::Text => "pdf",
            Self::Embedding => "page-text file",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Embedding => "embedding",
        })
    }
}

/// How one unit ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// The artifact was published.
    Written { pages: usize },
    /// Another worker or process produced the artifact first.
    Skipped,
    /// The unit failed; the batch goes on.
    Failed(String),
    /// The unit's token was cancelled or it ran out of time.
    Aborted,
    /// The batch was cancelled before the unit started.
    NotStarted,
}

/// Receives ingestion progress. Every method defaults to doing nothing.
pub trait ProgressSink: Send + Sync {
    fn stage_started(&self, _stage: Stage, _units: usize) {}

    /// Called before a unit runs. Cancelling `cancel` abandons that unit
    /// only.
    fn unit_started(&self, _unit: &WorkUnit, _cancel: &CancelToken) {}

    fn unit_finished(&self, _unit: &WorkUnit, _outcome: &UnitOutcome) {}
}

/// A progress sink that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestFailure {
    pub source: PathBuf,
    pub reason: String,
}

/// End-of-stage summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    /// Units that had no artifact when the stage started.
    pub pending: usize,
    pub written: usize,
    /// Pages across all written artifacts.
    pub pages: usize,
    /// Sources that already had an artifact.
    pub up_to_date: usize,
    /// Artifacts older than their source, left untouched.
    pub stale: usize,
    pub skipped: usize,
    pub aborted: usize,
    pub not_started: usize,
    pub failures: Vec<IngestFailure>,
    pub cancelled: bool,
}

impl StageReport {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            pending: 0,
            written: 0,
            pages: 0,
            up_to_date: 0,
            stale: 0,
            skipped: 0,
            aborted: 0,
            not_started: 0,
            failures: Vec::new(),
            cancelled: false,
        }
    }

    fn record(&mut self, unit: WorkUnit, outcome: UnitOutcome) {
        match outcome {
            UnitOutcome::Written { pages } => {
                self.written += 1;
                self.pages += pages;
            }
            UnitOutcome::Skipped => self.skipped += 1,
            UnitOutcome::Aborted => self.aborted += 1,
            UnitOutcome::NotStarted => self.not_started += 1,
            UnitOutcome::Failed(reason) => self.failures.push(IngestFailure {
                source: unit.source,
                reason,
            }),
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Maximum number of units processed at once.
    pub workers: usize,
    /// Cancels the whole batch.
    pub cancel: CancelToken,
    /// Abandon a unit whose collaborator has not returned after this long.
    pub unit_timeout: Option<Duration>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            cancel: CancelToken::new(),
            unit_timeout: None,
        }
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

/// Artifact paths claimed by a worker during this batch.
#[derive(Debug, Default)]
struct ClaimSet(Mutex<HashSet<PathBuf>>);

impl ClaimSet {
    /// True when the caller is the first to claim `artifact`.
    fn claim(&self, artifact: &Path) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(artifact.to_path_buf())
    }
}

/// Extract every PDF under `folders` that has no page-text artifact.
pub fn run_text_stage(
    folders: &[PathBuf],
    extractor: Arc<dyn Extractor>,
    options: &IngestOptions,
    progress: &dyn ProgressSink,
) -> Result<StageReport> {
    run_stage(
        Stage::Text,
        folders,
        incremental::pending_text_units,
        options,
        progress,
        |unit, cancel| {
            let extractor = Arc::clone(&extractor);
            let source = unit.source.clone();
            let pages = run_abortable(
                move |_| extractor.extract_pages(&source),
                cancel,
                options.unit_timeout,
            )?;
            text_records(&unit.source, pages)
        },
    )
}

/// Embed every page-text artifact under `folders` that has no embedding
/// artifact.
pub fn run_embedding_stage(
    folders: &[PathBuf],
    embedder: Arc<dyn Embedder>,
    options: &IngestOptions,
    progress: &dyn ProgressSink,
) -> Result<StageReport> {
    run_stage(
        Stage::Embedding,
        folders,
        incremental::pending_embedding_units,
        options,
        progress,
        |unit, cancel| {
            let records = artifact::read_page_texts(&unit.source)?;
            if records.is_empty() {
                return Err(UnitError::Failed(Error::Extraction {
                    item: unit.source.clone(),
                    reason: "page-text artifact has no pages".into(),
                }));
            }
            let texts: Vec<String> =
                records.iter().map(|r| r.text.clone()).collect();
            let embedder = Arc::clone(&embedder);
            let source = unit.source.clone();
            let vectors = run_abortable(
                move |token| embed_pages(&*embedder, &source, &texts, token),
                cancel,
                options.unit_timeout,
            )?;
            Ok(embedding_records(records, vectors))
        },
    )
}

/// Failure modes of a unit's collaborator call, kept apart from ordinary
/// errors so aborts are reported as such.
enum UnitError {
    Aborted,
    Failed(Error),
}

impl From<Error> for UnitError {
    fn from(e: Error) -> Self {
        Self::Failed(e)
    }
}

fn run_stage<R, F>(
    stage: Stage,
    folders: &[PathBuf],
    scan: fn(&Path) -> Result<PendingWork>,
    options: &IngestOptions,
    progress: &dyn ProgressSink,
    produce: F,
) -> Result<StageReport>
where
    R: Serialize,
    F: Fn(&WorkUnit, &CancelToken) -> std::result::Result<Vec<R>, UnitError>
        + Sync,
{
    let mut report = StageReport::new(stage);
    let mut units = Vec::new();
    for folder in folders {
        match scan(folder) {
            Ok(work) => {
                report.up_to_date += work.up_to_date;
                report.stale += work.stale.len();
                for path in &work.stale {
                    debug!(artifact = %path.display(), "artifact older than its source");
                }
                for path in work.shadowed {
                    warn!(source = %path.display(), "source shares its artifact name with another file");
                }
                units.extend(work.pending);
            }
            Err(e) => {
                warn!(folder = %folder.display(), "cannot scan folder: {e}");
                report.failures.push(IngestFailure {
                    source: folder.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    report.pending = units.len();
    progress.stage_started(stage, units.len());

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers.max(1))
        .thread_name(move |i| format!("pdfdex-{stage}-{i}"))
        .build()
        .map_err(|e| Error::Config(format!("cannot start workers: {e}")))?;

    let claims = ClaimSet::default();
    let outcomes: Vec<(WorkUnit, UnitOutcome)> = pool.install(|| {
        units
            .into_par_iter()
            .map(|unit| {
                let outcome =
                    process_unit(&unit, &claims, options, progress, &produce);
                (unit, outcome)
            })
            .collect()
    });

    for (unit, outcome) in outcomes {
        report.record(unit, outcome);
    }
    report.cancelled = options.cancel.is_cancelled();

    info!(
        %stage,
        written = report.written,
        up_to_date = report.up_to_date,
        failed = report.failures.len(),
        aborted = report.aborted,
        cancelled = report.cancelled,
        "ingestion stage finished"
    );
    Ok(report)
}

fn process_unit<R, F>(
    unit: &WorkUnit,
    claims: &ClaimSet,
    options: &IngestOptions,
    progress: &dyn ProgressSink,
    produce: &F,
) -> UnitOutcome
where
    R: Serialize,
    F: Fn(&WorkUnit, &CancelToken) -> std::result::Result<Vec<R>, UnitError>,
{
    if options.cancel.is_cancelled() {
        return UnitOutcome::NotStarted;
    }
    if !claims.claim(&unit.artifact) || unit.artifact.exists() {
        return UnitOutcome::Skipped;
    }

    let cancel = options.cancel.child();
    progress.unit_started(unit, &cancel);

    let outcome = match produce(unit, &cancel) {
        Ok(records) => match artifact::write_new(&unit.artifact, &records) {
            Ok(WriteOutcome::Written) => UnitOutcome::Written {
                pages: records.len(),
            },
            Ok(WriteOutcome::AlreadyExists) => UnitOutcome::Skipped,
            Err(e) => UnitOutcome::Failed(e.to_string()),
        },
        Err(UnitError::Aborted) => UnitOutcome::Aborted,
        Err(UnitError::Failed(e)) => UnitOutcome::Failed(e.to_string()),
    };

    match &outcome {
        UnitOutcome::Failed(reason) => {
            warn!(source = %unit.source.display(), "ingestion failed: {reason}")
        }
        UnitOutcome::Aborted => {
            warn!(source = %unit.source.display(), "ingestion unit aborted")
        }
        other => debug!(source = %unit.source.display(), ?other, "unit done"),
    }
    progress.unit_finished(unit, &outcome);
    outcome
}

/// Run `work` on its own thread and wait for it, giving up when `cancel`
/// fires or `timeout` elapses. An abandoned thread runs to completion in
/// the background and its result is dropped.
fn run_abortable<T, W>(
    work: W,
    cancel: &CancelToken,
    timeout: Option<Duration>,
) -> std::result::Result<T, UnitError>
where
    T: Send + 'static,
    W: FnOnce(CancelToken) -> Result<T> + Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(UnitError::Aborted);
    }

    let (tx, rx) = mpsc::channel();
    let token = cancel.clone();
    std::thread::Builder::new()
        .name("pdfdex-unit".into())
        .spawn(move || {
            // The receiver may be gone if the unit was abandoned.
            let _ = tx.send(work(token));
        })?;

    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(Error::Cancelled)) => return Err(UnitError::Aborted),
            Ok(Err(e)) => return Err(UnitError::Failed(e)),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(UnitError::Failed(Error::Collaborator(
                    "collaborator thread panicked".into(),
                )));
            }
            Err(RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() {
                    return Err(UnitError::Aborted);
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    cancel.cancel();
                    return Err(UnitError::Aborted);
                }
            }
        }
    }
}

impl From<std::io::Error> for UnitError {
    fn from(e: std::io::Error) -> Self {
        Self::Failed(e.into())
    }
}

fn text_records(
    source: &Path,
    pages: Vec<String>,
) -> std::result::Result<Vec<PageTextRecord>, UnitError> {
    if pages.is_empty() {
        return Err(UnitError::Failed(Error::Extraction {
            item: source.to_path_buf(),
            reason: "no pages extracted".into(),
        }));
    }
    let filename = artifact::file_name(source);
    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageTextRecord {
            text,
            page_number: Some(i as u32 + 1),
            filename: filename.clone(),
        })
        .collect())
}

/// Embed each page in order. Blank pages get no vector; every vector in
/// one artifact must share a dimension.
fn embed_pages(
    embedder: &dyn Embedder,
    source: &Path,
    texts: &[String],
    cancel: CancelToken,
) -> Result<Vec<Option<Vec<f32>>>> {
    let mut dimension = None;
    let mut vectors = Vec::with_capacity(texts.len());

    for (i, text) in texts.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if text.trim().is_empty() {
            vectors.push(None);
            continue;
        }

        let page_error = |reason: String| Error::Extraction {
            item: source.to_path_buf(),
            reason: format!("page {}: {reason}", i + 1),
        };
        let vector = embedder
            .embed(text)
            .and_then(|v| validate_vector(&v).map(|()| v))
            .map_err(|e| page_error(e.to_string()))?;

        let expected = *dimension.get_or_insert(vector.len());
        if vector.len() != expected {
            return Err(page_error(format!(
                "embedding has {} dimensions, expected {expected}",
                vector.len()
            )));
        }
        vectors.push(Some(vector));
    }
    Ok(vectors)
}

fn embedding_records(
    records: Vec<PageTextRecord>,
    vectors: Vec<Option<Vec<f32>>>,
) -> Vec<EmbeddingRecord> {
    records
        .into_iter()
        .zip(vectors)
        .enumerate()
        .map(|(i, (record, embedding))| EmbeddingRecord {
            page_number: record.page_number.or(Some(i as u32 + 1)),
            filename: record.filename,
            embedding,
        })
        .collect()
}

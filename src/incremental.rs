//! Decides which ingestion units still have work to do.
//!
//! The rule shared by both stages: a source whose derived artifact already
//! exists is done. Existing artifacts are never recomputed; one that is older
//! than its source is only reported as stale.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    time::SystemTime,
};

use crate::{
    artifact::{self, PAGE_TEXT_EXTENSION, SOURCE_EXTENSION},
    error::Result,
    walker::{self, DiscoveredFile},
};

/// One unit of ingestion work: read `source`, publish `artifact`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// Source path inside the scanned folder (symlinks are not resolved).
    pub source: PathBuf,
    pub artifact: PathBuf,
}

/// Result of comparing a folder's sources against its artifacts.
#[derive(Debug, Default)]
pub struct PendingWork {
    /// Sources without an artifact, in discovery order.
    pub pending: Vec<WorkUnit>,
    /// Sources whose artifact exists.
    pub up_to_date: usize,
    /// Artifacts older than their source. They are left alone.
    pub stale: Vec<PathBuf>,
    /// Sources that map onto an artifact already claimed by an earlier
    /// source in the same folder, such as `a.pdf` next to `a.PDF`.
    pub shadowed: Vec<PathBuf>,
}

/// PDFs under `folder` that have no page-text artifact yet.
pub fn pending_text_units(folder: &Path) -> Result<PendingWork> {
    diff_folder(folder, SOURCE_EXTENSION, artifact::page_text_path)
}

/// Page-text artifacts under `folder` that have no embedding artifact yet.
pub fn pending_embedding_units(folder: &Path) -> Result<PendingWork> {
    diff_folder(folder, PAGE_TEXT_EXTENSION, artifact::embedding_path)
}

fn diff_folder(
    folder: &Path,
    extension: &str,
    artifact_for: impl Fn(&Path) -> PathBuf,
) -> Result<PendingWork> {
    let root = folder.canonicalize()?;
    let discovered = walker::discover_files(&root, extension)?;

    let mut work = PendingWork::default();
    let mut claimed = HashSet::new();

    for file in discovered {
        // Artifacts live next to the source as seen from the folder, even
        // when the source itself is a symlink.
        let located = root.join(&file.relative_path);
        let artifact = artifact_for(&located);

        if !claimed.insert(artifact.clone()) {
            work.shadowed.push(located);
            continue;
        }

        if artifact.exists() {
            work.up_to_date += 1;
            if is_stale(&file, &artifact) {
                work.stale.push(artifact);
            }
            continue;
        }

        work.pending.push(WorkUnit {
            source: located,
            artifact,
        });
    }

    Ok(work)
}

fn is_stale(source: &DiscoveredFile, artifact: &Path) -> bool {
    mtime_secs(artifact).is_some_and(|mtime| mtime < source.mtime)
}

fn mtime_secs(path: &Path) -> Option<u64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(
        modified
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
    )
}

/// Display name of a unit's source, used in reports.
pub fn unit_name(unit: &WorkUnit) -> String {
    artifact::file_name(&unit.source)
}

//! On-disk derived artifacts.
//!
//! Each source PDF `<stem>.pdf` owns up to two artifacts in the same folder:
//!
//! - `<stem>.json`: the extracted page texts, one record per page.
//! - `<stem>.emb`: the same records with the text removed and a vector
//!   attached.
//!
//! Artifacts are written under a temporary name and moved into place only
//! once complete, and an existing artifact is never replaced.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

pub const PAGE_TEXT_EXTENSION: &str = "json";
pub const EMBEDDING_EXTENSION: &str = "emb";
pub const SOURCE_EXTENSION: &str = "pdf";

/// One page of extracted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageTextRecord {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub page_number: Option<u32>,
    #[serde(default)]
    pub filename: String,
}

/// One page's embedding vector, without its text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    #[serde(default)]
    pub page_number: Option<u32>,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

/// Path of the page-text artifact for a source document.
pub fn page_text_path(source: &Path) -> PathBuf {
    source.with_extension(PAGE_TEXT_EXTENSION)
}

/// Path of the embedding artifact that pairs with a page-text artifact.
pub fn embedding_path(page_text: &Path) -> PathBuf {
    page_text.with_extension(EMBEDDING_EXTENSION)
}

/// Base file name of a path as an owned string.
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path)?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        Error::MalformedArtifact {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })
}

/// Read a page-text artifact.
pub fn read_page_texts(path: &Path) -> Result<Vec<PageTextRecord>> {
    read_records(path)
}

/// Read an embedding artifact.
pub fn read_embeddings(path: &Path) -> Result<Vec<EmbeddingRecord>> {
    read_records(path)
}

/// Outcome of an attempt to publish an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// An artifact already existed under the final name; nothing was touched.
    AlreadyExists,
}

/// Serialize `records` to `dest` without ever exposing a partial file under
/// that name and without overwriting an existing one.
///
/// The records are written to a temporary file in the destination folder,
/// flushed, and then linked into place with no-clobber semantics.
pub fn write_new<T: Serialize>(
    dest: &Path,
    records: &[T],
) -> Result<WriteOutcome> {
    if dest.exists() {
        return Ok(WriteOutcome::AlreadyExists);
    }

    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let tmp = tempfile::Builder::new()
        .prefix(".pdfdex-")
        .suffix(".partial")
        .tempfile_in(dir)?;

    let tmp = write_records(tmp, records)?;

    match tmp.persist_noclobber(dest) {
        Ok(_) => Ok(WriteOutcome::Written),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
            Ok(WriteOutcome::AlreadyExists)
        }
        Err(e) => Err(Error::Io(e.error)),
    }
}

fn write_records<T: Serialize>(
    tmp: NamedTempFile,
    records: &[T],
) -> Result<NamedTempFile> {
    let mut writer = BufWriter::new(tmp);
    serde_json::to_writer(&mut writer, records)?;
    writer.flush()?;
    let tmp = writer
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(text: &str, page: u32) -> PageTextRecord {
        PageTextRecord {
            text: text.to_string(),
            page_number: Some(page),
            filename: "doc.pdf".to_string(),
        }
    }

    #[test]
    fn artifact_paths_share_the_stem() {
        let text = page_text_path(Path::new("/lib/report.v2.pdf"));
        assert_eq!(text, Path::new("/lib/report.v2.json"));
        assert_eq!(embedding_path(&text), Path::new("/lib/report.v2.emb"));
    }

    #[test]
    fn writes_and_reads_page_texts() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("doc.json");
        let records = vec![record("first page", 1), record("", 2)];

        assert_eq!(write_new(&dest, &records).unwrap(), WriteOutcome::Written);
        assert_eq!(read_page_texts(&dest).unwrap(), records);
    }

    #[test]
    fn never_overwrites_existing_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("doc.json");
        std::fs::write(&dest, "[]").unwrap();

        let outcome = write_new(&dest, &[record("new", 1)]).unwrap();
        assert_eq!(outcome, WriteOutcome::AlreadyExists);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "[]");
    }

    #[test]
    fn leaves_no_temporary_files_behind() {
        let tmp = tempfile::tempdir().unwrap();
        write_new(&tmp.path().join("doc.json"), &[record("x", 1)]).unwrap();

        let names: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, ["doc.json"]);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("doc.json");
        std::fs::write(&path, r#"[{"text": "only text"}]"#).unwrap();

        let records = read_page_texts(&path).unwrap();
        assert_eq!(records[0].page_number, None);
        assert!(records[0].filename.is_empty());
    }

    #[test]
    fn malformed_artifact_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = read_page_texts(&path).unwrap_err();
        assert!(matches!(err, Error::MalformedArtifact { .. }));
    }

    #[test]
    fn embedding_records_roundtrip_null_vectors() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("doc.emb");
        let records = vec![
            EmbeddingRecord {
                page_number: Some(1),
                filename: "doc.pdf".to_string(),
                embedding: Some(vec![0.5, -0.25]),
            },
            EmbeddingRecord {
                page_number: Some(2),
                filename: "doc.pdf".to_string(),
                embedding: None,
            },
        ];
        write_new(&path, &records).unwrap();
        assert_eq!(read_embeddings(&path).unwrap(), records);
    }
}

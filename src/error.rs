use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No readable page-text artifact was found in any scanned folder.
    #[error("no readable page-text artifacts found in {folders} folder(s)")]
    Ingestion { folders: usize },

    /// A retrieval or rerank mode lacks the data it needs.
    #[error("{mode} is unavailable: {reason}")]
    Unavailable { mode: &'static str, reason: String },

    /// One source item could not be processed during ingestion.
    #[error("could not process {}: {reason}", item.display())]
    Extraction { item: PathBuf, reason: String },

    /// A derived artifact failed to parse.
    #[error("malformed artifact {}: {reason}", path.display())]
    MalformedArtifact { path: PathBuf, reason: String },

    /// An extraction or embedding collaborator crashed or misbehaved.
    #[error("collaborator failed: {0}")]
    Collaborator(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn unavailable(
        mode: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::Unavailable {
            mode,
            reason: reason.into(),
        }
    }
}

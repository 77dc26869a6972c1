use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{Error, Result},
    ingestion::default_workers,
    lexical::Bm25Params,
    reranker::{DEFAULT_EXACT_BOOST, DEFAULT_RERANK_TOP_K, RerankOptions},
    search::DEFAULT_MAX_RESULTS,
};

pub const CONFIG_ENV: &str = "PDFDEX_CONFIG";
pub const CONFIG_FILE_NAME: &str = "config.json";

/// One entry of the folder set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderEntry {
    pub path: PathBuf,
    /// Only checked folders are scanned.
    #[serde(default = "default_checked")]
    pub checked: bool,
    #[serde(default)]
    pub description: String,
}

fn default_checked() -> bool {
    true
}

impl FolderEntry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            checked: true,
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub folders: Vec<FolderEntry>,
    pub bm25: Bm25Params,
    /// Result cap; BM25 candidates are cut here before reranking.
    pub max_results: usize,
    /// Candidates considered by embedding rerank.
    pub rerank_top_k: usize,
    /// Multiplier for candidates containing the query verbatim.
    pub exact_boost: f32,
    /// Ingestion worker threads. Defaults to the available parallelism.
    pub workers: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            folders: Vec::new(),
            bm25: Bm25Params::default(),
            max_results: DEFAULT_MAX_RESULTS,
            rerank_top_k: DEFAULT_RERANK_TOP_K,
            exact_boost: DEFAULT_EXACT_BOOST,
            workers: None,
        }
    }
}

/// A settings file holds either the full settings object or, as a plain
/// folder list file does, just the array of folders.
#[derive(Deserialize)]
#[serde(untagged)]
enum SettingsFile {
    Folders(Vec<FolderEntry>),
    Full(Settings),
}

impl Settings {
    /// Resolve the settings file from, in order of priority:
    /// 1. An explicit path (from --config)
    /// 2. The PDFDEX_CONFIG environment variable
    /// 3. The XDG config directory (~/.config/pdfdex/config.json)
    ///
    /// A missing file yields the defaults; an explicit path must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let path = match std::env::var_os(CONFIG_ENV) {
            Some(val) => Some(PathBuf::from(val)),
            None => xdg::BaseDirectories::with_prefix("pdfdex")
                .get_config_home()
                .map(|dir| dir.join(CONFIG_FILE_NAME)),
        };

        match path {
            Some(path) if path.exists() => Self::from_file(&path),
            Some(path) => {
                debug!(path = %path.display(), "no settings file, using defaults");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let settings = Self::parse(&raw).map_err(|e| {
            Error::Config(format!("invalid settings in {}: {e}", path.display()))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn parse(raw: &str) -> std::result::Result<Self, serde_json::Error> {
        Ok(match serde_json::from_str(raw)? {
            SettingsFile::Folders(folders) => Self {
                folders,
                ..Self::default()
            },
            SettingsFile::Full(settings) => settings,
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.bm25.validate()?;
        if self.max_results == 0 {
            return Err(Error::Config("max_results must be at least 1".into()));
        }
        if self.rerank_top_k == 0 {
            return Err(Error::Config("rerank_top_k must be at least 1".into()));
        }
        if !self.exact_boost.is_finite() || self.exact_boost < 1.0 {
            return Err(Error::Config(format!(
                "exact_boost must be at least 1, got {}",
                self.exact_boost
            )));
        }
        if self.workers == Some(0) {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        Ok(())
    }

    /// Replace the configured folder set with `folders`, all checked.
    pub fn override_folders(&mut self, folders: Vec<PathBuf>) {
        if !folders.is_empty() {
            self.folders = folders.into_iter().map(FolderEntry::new).collect();
        }
    }

    /// Paths of the checked folders, in configured order.
    pub fn active_folders(&self) -> Vec<PathBuf> {
        self.folders
            .iter()
            .filter(|f| f.checked)
            .map(|f| f.path.clone())
            .collect()
    }

    pub fn workers(&self) -> usize {
        self.workers.unwrap_or_else(default_workers)
    }

    pub fn rerank_options(&self) -> RerankOptions {
        RerankOptions {
            exact_boost: self.exact_boost,
            top_k: self.rerank_top_k,
        }
    }
}

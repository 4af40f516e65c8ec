use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::backfill::DEFAULT_PROGRESS_EVERY;
use crate::classifier::{WatchList, DEFAULT_THERMAL_SOURCES};
use crate::error::{ArchiveError, Result};
use crate::retention::RetentionPolicy;
use crate::store::FsArchive;

pub const DOCS_ROOT_ENV: &str = "GENARY_DOCS_ROOT";
pub const DEFAULT_DOCS_ROOT: &str = "docs";

/// Pipeline settings, read from a JSON file. Every field is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub docs_root: PathBuf,
    pub watch_list: WatchList,
    pub retention: RetentionPolicy,
    pub progress_every: usize,
    /// Worker threads for parallel parsing; 0 means one per CPU.
    pub threads: usize,
    pub thermal_sources: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            docs_root: PathBuf::from(DEFAULT_DOCS_ROOT),
            watch_list: WatchList::default(),
            retention: RetentionPolicy::default(),
            progress_every: DEFAULT_PROGRESS_EVERY,
            threads: 0,
            thermal_sources: DEFAULT_THERMAL_SOURCES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| ArchiveError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| ArchiveError::json(path.display().to_string(), e))
    }

    /// File settings (or defaults), then `GENARY_DOCS_ROOT`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(root) = std::env::var_os(DOCS_ROOT_ENV).filter(|v| !v.is_empty()) {
            config.docs_root = PathBuf::from(root);
        }
        if config.watch_list.is_empty() {
            log::warn!("watch list is empty, no emergency activations will be detected");
        }
        Ok(config)
    }

    pub fn archive(&self) -> FsArchive {
        FsArchive::new(&self.docs_root)
    }
}

use anyhow::{Context, Result};
use genary_core::store::ingest_snapshot;
use genary_core::{FsArchive, PipelineConfig};
use std::path::Path;

pub struct IngestProcessor {
    archive: FsArchive,
}

impl IngestProcessor {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            archive: config.archive(),
        }
    }

    pub fn ingest_file(&mut self, file: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(file)
            .with_context(|| format!("reading snapshot {}", file.display()))?;
        let outcome = ingest_snapshot(&mut self.archive, &raw)
            .with_context(|| format!("archiving {}", file.display()))?;

        if outcome.created {
            println!("📥 Archived snapshot {}", outcome.key.relative_path());
        } else {
            println!("⏭️  Snapshot for {} already archived", outcome.timestamp);
        }
        Ok(())
    }
}

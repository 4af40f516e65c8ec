pub mod aggregator;
pub mod backfill;
pub mod classifier;
pub mod config;
pub mod detector;
pub mod error;
pub mod index;
pub mod logs;
pub mod models;
pub mod retention;
pub mod store;
pub mod trigger;

pub use backfill::{BackfillOrchestrator, BackfillReport};
pub use classifier::{classify, match_emergency, SemanticTag, WatchList, WatchPattern};
pub use config::PipelineConfig;
pub use error::{ArchiveError, Result};
pub use index::{IndexMaintainer, RecordOutcome};
pub use models::{EmergencyActivation, EmergencyRecord, Snapshot, UnitRow};
pub use retention::RetentionPolicy;
pub use store::{ArchiveKey, ArchiveStore, FsArchive, MemoryArchive};

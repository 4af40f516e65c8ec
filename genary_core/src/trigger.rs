//! The per-poll path: inspect `genary.json` right after a fetch.

use crate::classifier::WatchList;
use crate::detector::detect_activations;
use crate::error::{ArchiveError, Result};
use crate::index::{Clock, IndexMaintainer, RecordOutcome};
use crate::models::{EmergencyActivation, Snapshot};
use crate::store::{ArchiveKey, ArchiveStore};

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerOutcome {
    pub timestamp: String,
    pub activations: Vec<EmergencyActivation>,
    pub outcome: RecordOutcome,
}

/// Run detection on the latest snapshot and record any activations.
///
/// A missing or unparseable `genary.json` is an error here, unlike in the
/// bulk walk: there is nothing else for this run to do.
pub fn check_latest<S: ArchiveStore + ?Sized>(
    store: &mut S,
    watch_list: &WatchList,
    clock: Clock,
) -> Result<TriggerOutcome> {
    let origin = ArchiveKey::LatestSnapshot.relative_path();
    let text = store
        .read(&ArchiveKey::LatestSnapshot)?
        .ok_or_else(|| ArchiveError::MissingInput(origin.clone()))?;
    let snapshot = Snapshot::from_json(&origin, &text)?;
    let ts = snapshot
        .embedded_time()
        .ok_or_else(|| ArchiveError::Timestamp(origin.clone()))?;

    let activations = detect_activations(&snapshot, watch_list);
    let timestamp = snapshot.timestamp.unwrap_or_default().trim().to_string();
    let outcome =
        IndexMaintainer::with_clock(store, clock).record(ts, &timestamp, &activations, None)?;

    match outcome {
        RecordOutcome::Created => log::info!(
            "{} emergency generators active at {timestamp}",
            activations.len()
        ),
        RecordOutcome::AlreadyRecorded => log::info!("{timestamp} already recorded"),
        RecordOutcome::NoActivations => log::debug!("no emergency generators at {timestamp}"),
    }

    Ok(TriggerOutcome {
        timestamp,
        activations,
        outcome,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::local_now;
    use crate::store::{ingest_snapshot, MemoryArchive};

    fn feed(ts: &str, output: &str) -> String {
        format!(
            r#"{{"": "{ts}", "aaData": [["燃氣(LNG)", "", "核二Gas1", "560.0", "{output}", "0.6%", ""]]}}"#
        )
    }

    #[test]
    fn test_missing_latest_is_fatal() {
        let mut store = MemoryArchive::new();
        let err = check_latest(&mut store, &WatchList::default(), local_now).unwrap_err();
        assert!(matches!(err, ArchiveError::MissingInput(_)));
    }

    #[test]
    fn test_malformed_latest_is_fatal() {
        let mut store = MemoryArchive::new();
        store.insert_raw("genary.json", "<html>");
        let err = check_latest(&mut store, &WatchList::default(), local_now).unwrap_err();
        assert!(matches!(err, ArchiveError::Json { .. }));
    }

    #[test]
    fn test_records_then_dedups() {
        let mut store = MemoryArchive::new();
        ingest_snapshot(&mut store, &feed("2025-06-11 21:00", "3.4")).unwrap();
        let first = check_latest(&mut store, &WatchList::default(), local_now).unwrap();
        assert_eq!(first.outcome, RecordOutcome::Created);
        assert_eq!(first.activations.len(), 1);
        assert!(store.files().contains_key("emergency/2025/20250611/210000.json"));

        let second = check_latest(&mut store, &WatchList::default(), local_now).unwrap();
        assert_eq!(second.outcome, RecordOutcome::AlreadyRecorded);
    }

    #[test]
    fn test_idle_snapshot_writes_nothing() {
        let mut store = MemoryArchive::new();
        store.insert_raw("genary.json", &feed("2025-06-11 21:00", "0.0"));
        let result = check_latest(&mut store, &WatchList::default(), local_now).unwrap();
        assert_eq!(result.outcome, RecordOutcome::NoActivations);
        assert_eq!(store.files().len(), 1);
    }
}

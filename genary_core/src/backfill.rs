//! Whole-archive rebuilds: emergency records from every stored snapshot,
//! and `pump.json` for every stored day.

use rayon::prelude::*;
use std::time::{Duration, Instant};

use crate::aggregator::{aggregate_stored_day, write_daily_aggregate, DayAggregation};
use crate::classifier::WatchList;
use crate::detector::detect_activations_at;
use crate::error::Result;
use crate::index::{local_now, Clock, IndexMaintainer, RecordOutcome};
use crate::models::{resolve_timestamp, Snapshot, TIMESTAMP_FORMAT};
use crate::store::{ArchiveKey, ArchiveStore, SnapshotKey};

pub const DEFAULT_PROGRESS_EVERY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillProgress {
    pub processed: usize,
    pub total: usize,
    pub events_created: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillReport {
    pub files_processed: usize,
    pub events_created: usize,
    /// Snapshots with activations whose timestamp was already recorded.
    pub already_recorded: usize,
    /// Files that could not be read at all (permissions, invalid UTF-8).
    pub read_errors: usize,
    /// Files that were not valid JSON or lacked the rows array.
    pub parse_errors: usize,
    pub timestamp_failures: usize,
    pub skipped_rows: usize,
    pub elapsed: Duration,
}

impl BackfillReport {
    pub fn files_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.files_processed as f64 / secs
        } else {
            0.0
        }
    }
}

/// Walks every archived snapshot and replays the emergency trigger on it.
pub struct BackfillOrchestrator<'w> {
    watch_list: &'w WatchList,
    progress_every: usize,
    clock: Clock,
}

impl<'w> BackfillOrchestrator<'w> {
    pub fn new(watch_list: &'w WatchList) -> Self {
        Self {
            watch_list,
            progress_every: DEFAULT_PROGRESS_EVERY,
            clock: local_now,
        }
    }

    pub fn with_progress_every(mut self, every: usize) -> Self {
        self.progress_every = every.max(1);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Replay detection over the whole snapshot tree. Unreadable files are
    /// counted and skipped; write failures abort the run.
    pub fn rebuild_all<S, F>(&self, store: &mut S, mut on_progress: F) -> Result<BackfillReport>
    where
        S: ArchiveStore + ?Sized,
        F: FnMut(&BackfillProgress),
    {
        let start = Instant::now();
        let keys = store.list_snapshots()?;
        let total = keys.len();
        log::info!("backfilling emergency records from {total} snapshots");

        let mut report = BackfillReport::default();
        for key in keys {
            report.files_processed += 1;
            self.replay(store, key, &mut report)?;

            if report.files_processed % self.progress_every == 0 {
                log::info!(
                    "processed {}/{} files, {} events created",
                    report.files_processed,
                    total,
                    report.events_created
                );
                on_progress(&BackfillProgress {
                    processed: report.files_processed,
                    total,
                    events_created: report.events_created,
                });
            }
        }
        on_progress(&BackfillProgress {
            processed: report.files_processed,
            total,
            events_created: report.events_created,
        });

        report.elapsed = start.elapsed();
        log::info!(
            "backfill finished: {} files, {} events, {} unreadable, {} parse errors in {:.2?}",
            report.files_processed,
            report.events_created,
            report.read_errors,
            report.parse_errors,
            report.elapsed
        );
        Ok(report)
    }

    fn replay<S: ArchiveStore + ?Sized>(
        &self,
        store: &mut S,
        key: SnapshotKey,
        report: &mut BackfillReport,
    ) -> Result<()> {
        let origin = key.relative_path();
        let text = match store.read(&ArchiveKey::Snapshot(key.clone())) {
            Ok(Some(text)) => text,
            Ok(None) => {
                log::warn!("skipping {origin}: removed during the walk");
                return Ok(());
            }
            Err(e) => {
                log::warn!("skipping {origin}: {e}");
                report.read_errors += 1;
                return Ok(());
            }
        };
        let snapshot = match Snapshot::from_json(&origin, &text) {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_recoverable() => {
                log::warn!("skipping {origin}: {e}");
                report.parse_errors += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        report.skipped_rows += snapshot.skipped_rows;

        let Some(ts) = resolve_timestamp(snapshot.timestamp.as_deref(), &key.day, &key.time) else {
            log::warn!("skipping {origin}: no usable timestamp");
            report.timestamp_failures += 1;
            return Ok(());
        };
        let stamp = match snapshot.embedded_time() {
            Some(_) => snapshot.timestamp.clone().unwrap_or_default().trim().to_string(),
            None => ts.format(TIMESTAMP_FORMAT).to_string(),
        };

        let activations = detect_activations_at(&snapshot, self.watch_list, &stamp);
        let outcome = IndexMaintainer::with_clock(store, self.clock).record(
            ts,
            &stamp,
            &activations,
            Some(origin),
        )?;
        match outcome {
            RecordOutcome::Created => {
                report.events_created += 1;
                let names: Vec<&str> = activations.iter().map(|a| a.name.as_str()).collect();
                log::info!("{stamp}: {}", names.join(", "));
            }
            RecordOutcome::AlreadyRecorded => report.already_recorded += 1,
            RecordOutcome::NoActivations => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DailyRebuildReport {
    pub days: usize,
    pub files_processed: usize,
    pub errors: usize,
    pub units: usize,
}

/// Recompute `pump.json` for every date that holds snapshots.
///
/// Days are parsed in parallel on the current rayon pool; writes happen
/// sequentially afterwards in date order.
pub fn rebuild_all_daily_aggregates<S, F>(store: &mut S, mut on_day: F) -> Result<DailyRebuildReport>
where
    S: ArchiveStore + Sync + ?Sized,
    F: FnMut(&DayAggregation),
{
    let dates = store.list_snapshot_dates()?;
    log::info!("rebuilding daily storage totals for {} days", dates.len());

    let reader: &S = store;
    let days: Vec<Result<DayAggregation>> = dates
        .par_iter()
        .map(|date| aggregate_stored_day(reader, *date))
        .collect();

    let mut report = DailyRebuildReport::default();
    for day in days {
        let day = day?;
        write_daily_aggregate(store, day.date, &day.aggregate)?;
        report.days += 1;
        report.files_processed += day.files_processed;
        report.errors += day.errors;
        report.units += day.aggregate.len();
        on_day(&day);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ReindexReport;
    use crate::models::{
        parse_date_key, parse_embedded_timestamp, DailyAggregate, DayIndexEntry, GlobalIndex,
        MonthIndex, YearMonth,
    };
    use crate::store::{read_json, MemoryArchive};
    use chrono::NaiveDateTime;

    fn fixed_clock() -> NaiveDateTime {
        parse_embedded_timestamp("2025-07-01 00:00").unwrap()
    }

    fn feed(ts: Option<&str>, rows: &[(&str, &str, &str)]) -> String {
        let rows: Vec<serde_json::Value> = rows
            .iter()
            .map(|(category, name, output)| {
                serde_json::json!([category, "", name, "560.0", output, "0.6%", "<b>運轉中</b>"])
            })
            .collect();
        let mut body = serde_json::json!({ "aaData": rows });
        if let Some(ts) = ts {
            body[""] = serde_json::Value::String(ts.to_string());
        }
        body.to_string()
    }

    fn scenario() -> MemoryArchive {
        let mut store = MemoryArchive::new();
        let gas = [("燃氣(LNG)", "核二Gas1", "3.4"), ("燃氣(LNG)", "大潭CC#1", "400.0")];
        store.insert_raw(
            "genary/2025/20250611/210000.json",
            &feed(Some("2025-06-11 21:00"), &gas),
        );
        store.insert_raw(
            "genary/2025/20250611/211000.json",
            &feed(Some("2025-06-11 21:10"), &gas),
        );
        store.insert_raw(
            "genary/2025/20250611/212000.json",
            &feed(Some("2025-06-11 21:20"), &[("燃氣(LNG)", "核二Gas1", "0.0")]),
        );
        store.insert_raw("genary/2025/20250611/list.json", r#"["210000","211000","212000"]"#);
        store
    }

    fn run(store: &mut MemoryArchive) -> BackfillReport {
        BackfillOrchestrator::new(&WatchList::default())
            .with_clock(fixed_clock)
            .rebuild_all(store, |_| {})
            .unwrap()
    }

    fn emergency_files(store: &MemoryArchive) -> Vec<(String, String)> {
        store
            .files()
            .iter()
            .filter(|(path, _)| path.starts_with("emergency/"))
            .map(|(p, c)| (p.clone(), c.clone()))
            .collect()
    }

    #[test]
    fn test_end_to_end_scenario() {
        let mut store = scenario();
        let report = run(&mut store);
        assert_eq!(report.files_processed, 3);
        assert_eq!(report.events_created, 2);
        assert_eq!(report.parse_errors, 0);

        let date = parse_date_key("20250611").unwrap();
        let day: Vec<DayIndexEntry> =
            read_json(&store, &ArchiveKey::DayIndex(date)).unwrap().unwrap();
        let times: Vec<_> = day.iter().map(|e| e.time.as_str()).collect();
        assert_eq!(times, vec!["210000", "211000"]);
        assert!(day.iter().all(|e| e.count == 1));

        let month: MonthIndex = read_json(&store, &ArchiveKey::MonthIndex(YearMonth::of(date)))
            .unwrap()
            .unwrap();
        assert_eq!(month.dates.len(), 1);
        assert_eq!(month.dates[0].date, "20250611");
        assert_eq!(month.dates[0].event_count, 2);
        assert_eq!(
            month.dates[0].unique_generators.iter().collect::<Vec<_>>(),
            vec!["核二Gas1"]
        );

        let global: GlobalIndex = read_json(&store, &ArchiveKey::GlobalIndex).unwrap().unwrap();
        assert_eq!(global.total_months, 1);
        assert_eq!(global.months[0].year_month, "202506");
        assert_eq!(global.months[0].total_days, 1);

        let record: crate::models::EmergencyRecord = read_json(
            &store,
            &ArchiveKey::EmergencyRecord { date, time: "210000".to_string() },
        )
        .unwrap()
        .unwrap();
        assert_eq!(record.timestamp, "2025-06-11 21:00");
        assert_eq!(record.source_file.as_deref(), Some("genary/2025/20250611/210000.json"));
    }

    #[test]
    fn test_second_run_changes_nothing() {
        let mut store = scenario();
        run(&mut store);
        let before = emergency_files(&store);

        let report = run(&mut store);
        assert_eq!(report.events_created, 0);
        assert_eq!(report.already_recorded, 2);
        assert_eq!(emergency_files(&store), before);
    }

    #[test]
    fn test_backfill_agrees_with_reindex() {
        let mut store = scenario();
        run(&mut store);
        let before = emergency_files(&store);

        let report = IndexMaintainer::with_clock(&mut store, fixed_clock)
            .rebuild_indexes()
            .unwrap();
        assert_eq!(
            report,
            ReindexReport { records: 2, days: 1, months: 1, removed_months: 0 }
        );
        assert_eq!(emergency_files(&store), before);
    }

    #[test]
    fn test_bad_inputs_are_counted_not_fatal() {
        let mut store = scenario();
        store.insert_raw("genary/2025/20250612/000000.json", "{truncated");
        store.insert_raw("genary/2025/20250612/001000.json", r#"{"": "2025-06-12 00:10"}"#);
        store.insert_raw(
            "genary/2025/misc/latest.json",
            &feed(None, &[("燃氣(LNG)", "核二Gas1", "3.4")]),
        );
        store.insert_raw(
            "genary/2025/20250612/002000.json",
            r#"{"": "2025-06-12 00:20", "aaData": [["燃氣(LNG)", "", "核二Gas1"]]}"#,
        );

        let report = run(&mut store);
        assert_eq!(report.files_processed, 7);
        assert_eq!(report.parse_errors, 2);
        assert_eq!(report.timestamp_failures, 1);
        assert_eq!(report.skipped_rows, 1);
        assert_eq!(report.events_created, 2);
    }

    #[test]
    fn test_location_fallback_stamp() {
        let mut store = MemoryArchive::new();
        store.insert_raw(
            "genary/2025/20250611/213000.json",
            &feed(None, &[("燃氣(LNG)", "核三Gas2", "12.0")]),
        );
        run(&mut store);
        let date = parse_date_key("20250611").unwrap();
        let record: crate::models::EmergencyRecord = read_json(
            &store,
            &ArchiveKey::EmergencyRecord { date, time: "213000".to_string() },
        )
        .unwrap()
        .unwrap();
        assert_eq!(record.timestamp, "2025-06-11 21:30");
        assert_eq!(record.active_emergency_generators[0].timestamp, "2025-06-11 21:30");
    }

    #[test]
    fn test_progress_callback_cadence() {
        let mut store = scenario();
        let mut seen = Vec::new();
        BackfillOrchestrator::new(&WatchList::default())
            .with_progress_every(2)
            .with_clock(fixed_clock)
            .rebuild_all(&mut store, |p| seen.push(p.processed))
            .unwrap();
        assert_eq!(seen, vec![2, 3]);
    }

    #[test]
    fn test_daily_rebuild_covers_every_day() {
        let mut store = MemoryArchive::new();
        let ess = "儲能(Energy Storage System)";
        store.insert_raw(
            "genary/2025/20250611/210000.json",
            &feed(Some("2025-06-11 21:00"), &[(ess, "A", "10.0")]),
        );
        store.insert_raw(
            "genary/2025/20250611/211000.json",
            &feed(Some("2025-06-11 21:10"), &[(ess, "A", "15.5")]),
        );
        store.insert_raw(
            "genary/2025/20250612/000000.json",
            &feed(Some("2025-06-12 00:00"), &[(ess, "B", "1.0")]),
        );
        store.insert_raw("genary/2025/20250612/001000.json", "not json");

        let mut seen = 0;
        let report = rebuild_all_daily_aggregates(&mut store, |_| seen += 1).unwrap();
        assert_eq!(seen, 2);
        assert_eq!(report.days, 2);
        assert_eq!(report.files_processed, 4);
        assert_eq!(report.errors, 1);

        let d1: DailyAggregate = read_json(
            &store,
            &ArchiveKey::DailyStorage(parse_date_key("20250611").unwrap()),
        )
        .unwrap()
        .unwrap();
        assert_eq!(d1["A"].storage_sum, 25.5);
        assert_eq!(d1["A"].storage_count, 2);
    }

    #[test]
    fn test_unreadable_file_does_not_stop_the_walk() {
        let dir = tempfile::TempDir::new().unwrap();
        let day_dir = dir.path().join("genary/2025/20250611");
        std::fs::create_dir_all(&day_dir).unwrap();
        std::fs::write(day_dir.join("205000.json"), [0xff, 0xfe, 0x00]).unwrap();
        std::fs::write(
            day_dir.join("210000.json"),
            feed(Some("2025-06-11 21:00"), &[("燃氣(LNG)", "核二Gas1", "3.4")]),
        )
        .unwrap();

        let mut store = crate::store::FsArchive::new(dir.path());
        let report = BackfillOrchestrator::new(&WatchList::default())
            .with_clock(fixed_clock)
            .rebuild_all(&mut store, |_| {})
            .unwrap();
        assert_eq!(report.files_processed, 2);
        assert_eq!(report.read_errors, 1);
        assert_eq!(report.events_created, 1);
        assert!(dir.path().join("emergency/2025/20250611/210000.json").is_file());
    }
}

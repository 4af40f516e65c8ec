//! Day → month → global activation indexes.
//!
//! The free functions are the pure merge rules; [`IndexMaintainer`] applies
//! them against an [`ArchiveStore`]. The live trigger and the historical
//! backfill both go through [`IndexMaintainer::record`].

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ArchiveError, Result};
use crate::models::{
    date_key, time_key, DayIndexEntry, EmergencyActivation, EmergencyRecord, GlobalIndex,
    GlobalIndexEntry, MonthIndex, MonthIndexEntry, YearMonth, GENERATED_AT_FORMAT,
};
use crate::store::{read_json, write_json, ArchiveKey, ArchiveStore};

pub type Clock = fn() -> NaiveDateTime;

pub fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

pub fn day_entry_for(time: &str, activations: &[EmergencyActivation]) -> DayIndexEntry {
    DayIndexEntry {
        time: time.to_string(),
        generators: activations.iter().map(|a| a.name.clone()).collect(),
        count: activations.len(),
    }
}

/// Insert `entry` unless its time is already indexed. Keeps `entries`
/// sorted by time. Returns whether anything was inserted.
pub fn merge_day_entry(entries: &mut Vec<DayIndexEntry>, entry: DayIndexEntry) -> bool {
    let inserted = if entries.iter().any(|e| e.time == entry.time) {
        false
    } else {
        entries.push(entry);
        true
    };
    entries.sort_by(|a, b| a.time.cmp(&b.time));
    inserted
}

/// Month-level summary of one day's index.
pub fn summarize_day(date: NaiveDate, entries: &[DayIndexEntry]) -> MonthIndexEntry {
    let mut times: Vec<String> = entries.iter().map(|e| e.time.clone()).collect();
    times.sort();
    let unique_generators: BTreeSet<String> = entries
        .iter()
        .flat_map(|e| e.generators.iter().cloned())
        .collect();
    MonthIndexEntry {
        date: date_key(date),
        formatted_date: date.format("%Y-%m-%d").to_string(),
        event_count: entries.len(),
        times,
        total_generator_activations: entries.iter().map(|e| e.count).sum(),
        unique_generators,
    }
}

/// Replace or insert the entry for `entry.date`, keeping `dates` sorted.
/// Returns whether the month changed.
pub fn merge_month_entry(dates: &mut Vec<MonthIndexEntry>, entry: MonthIndexEntry) -> bool {
    let changed = match dates.iter_mut().find(|e| e.date == entry.date) {
        Some(existing) if *existing == entry => false,
        Some(existing) => {
            *existing = entry;
            true
        }
        None => {
            dates.push(entry);
            true
        }
    };
    dates.sort_by(|a, b| a.date.cmp(&b.date));
    changed
}

pub fn month_index(ym: YearMonth, mut dates: Vec<MonthIndexEntry>, generated_at: String) -> MonthIndex {
    dates.sort_by(|a, b| a.date.cmp(&b.date));
    dates.dedup_by(|a, b| a.date == b.date);
    MonthIndex {
        year_month: ym.key(),
        year: format!("{:04}", ym.year),
        month: format!("{:02}", ym.month),
        total_days: dates.len(),
        dates,
        generated_at,
    }
}

pub fn global_index(mut months: Vec<GlobalIndexEntry>, generated_at: String) -> GlobalIndex {
    months.sort_by(|a, b| a.year_month.cmp(&b.year_month));
    months.dedup_by(|a, b| a.year_month == b.year_month);
    GlobalIndex {
        total_months: months.len(),
        months,
        generated_at,
    }
}

// Month files written by older tooling may lack `total_days`; fall back to
// counting its dates.
fn month_total_days(month: &Value) -> usize {
    month
        .get("total_days")
        .and_then(Value::as_u64)
        .map(|n| n as usize)
        .or_else(|| month.get("dates").and_then(Value::as_array).map(Vec::len))
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Created,
    /// A record for this exact timestamp exists; nothing was written.
    AlreadyRecorded,
    NoActivations,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReindexReport {
    pub records: usize,
    pub days: usize,
    pub months: usize,
    pub removed_months: usize,
}

pub struct IndexMaintainer<'a, S: ArchiveStore + ?Sized> {
    store: &'a mut S,
    clock: Clock,
}

impl<'a, S: ArchiveStore + ?Sized> IndexMaintainer<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self::with_clock(store, local_now)
    }

    pub fn with_clock(store: &'a mut S, clock: Clock) -> Self {
        Self { store, clock }
    }

    fn now_label(&self) -> String {
        (self.clock)().format(GENERATED_AT_FORMAT).to_string()
    }

    /// Persist the activations seen at `ts` and propagate them through the
    /// day, month and global levels.
    ///
    /// At most once per timestamp: an existing record file short-circuits
    /// the whole update.
    pub fn record(
        &mut self,
        ts: NaiveDateTime,
        stamp: &str,
        activations: &[EmergencyActivation],
        source_file: Option<String>,
    ) -> Result<RecordOutcome> {
        if activations.is_empty() {
            return Ok(RecordOutcome::NoActivations);
        }
        let date = ts.date();
        let time = time_key(ts);
        let record_key = ArchiveKey::EmergencyRecord {
            date,
            time: time.clone(),
        };
        if self.store.exists(&record_key) {
            return Ok(RecordOutcome::AlreadyRecorded);
        }

        let mut entries = self.load_day_index(date)?;
        if merge_day_entry(&mut entries, day_entry_for(&time, activations)) {
            write_json(self.store, &ArchiveKey::DayIndex(date), &entries)?;
        }
        if self.refresh_month(date, &entries)? {
            self.rebuild_global()?;
        }

        // The record goes last: if an index write fails, the next run sees no
        // record and retries the whole update.
        let record = EmergencyRecord {
            timestamp: stamp.to_string(),
            active_emergency_generators: activations.to_vec(),
            total_count: activations.len(),
            created_at: self.now_label(),
            source_file,
        };
        write_json(self.store, &record_key, &record)?;
        Ok(RecordOutcome::Created)
    }

    /// Day index for `date`; missing reads as empty, malformed is re-derived
    /// from the date's records.
    pub fn load_day_index(&self, date: NaiveDate) -> Result<Vec<DayIndexEntry>> {
        let key = ArchiveKey::DayIndex(date);
        let mut entries = match read_json::<Vec<DayIndexEntry>, S>(&*self.store, &key) {
            Ok(Some(entries)) => entries,
            Ok(None) => Vec::new(),
            Err(ArchiveError::Json { path, source }) => {
                log::warn!("day index {path} is unreadable ({source}), re-deriving from records");
                self.day_entries_from_records(date)?
            }
            Err(e) => return Err(e),
        };
        entries.sort_by(|a, b| a.time.cmp(&b.time));
        Ok(entries)
    }

    /// Day index entries rebuilt from the per-timestamp record files.
    pub fn day_entries_from_records(&self, date: NaiveDate) -> Result<Vec<DayIndexEntry>> {
        let mut entries = Vec::new();
        for time in self.store.list_record_times(date)? {
            let key = ArchiveKey::EmergencyRecord {
                date,
                time: time.clone(),
            };
            match read_json::<EmergencyRecord, S>(&*self.store, &key) {
                Ok(Some(record)) => entries.push(day_entry_for(&time, &record.active_emergency_generators)),
                Ok(None) => {}
                Err(e @ ArchiveError::Json { .. }) => log::warn!("skipping record: {e}"),
                Err(e) => return Err(e),
            }
        }
        entries.sort_by(|a, b| a.time.cmp(&b.time));
        Ok(entries)
    }

    fn load_month_dates(&self, ym: YearMonth) -> Result<Vec<MonthIndexEntry>> {
        let key = ArchiveKey::MonthIndex(ym);
        match read_json::<MonthIndex, S>(&*self.store, &key) {
            Ok(Some(month)) => Ok(month.dates),
            Ok(None) => Ok(Vec::new()),
            Err(ArchiveError::Json { path, source }) => {
                log::warn!("month index {path} is unreadable ({source}), re-deriving from day indexes");
                self.month_entries_from_days(ym)
            }
            Err(e) => Err(e),
        }
    }

    fn month_entries_from_days(&self, ym: YearMonth) -> Result<Vec<MonthIndexEntry>> {
        let mut dates = Vec::new();
        for date in self.store.list_emergency_dates()? {
            if YearMonth::of(date) != ym {
                continue;
            }
            let entries = self.load_day_index(date)?;
            if !entries.is_empty() {
                dates.push(summarize_day(date, &entries));
            }
        }
        Ok(dates)
    }

    /// Re-derive `date`'s month entry from its day index. Returns whether the
    /// month file was rewritten.
    fn refresh_month(&mut self, date: NaiveDate, entries: &[DayIndexEntry]) -> Result<bool> {
        if entries.is_empty() {
            return Ok(false);
        }
        let ym = YearMonth::of(date);
        let mut dates = self.load_month_dates(ym)?;
        if !merge_month_entry(&mut dates, summarize_day(date, entries))
            && self.store.exists(&ArchiveKey::MonthIndex(ym))
        {
            return Ok(false);
        }
        let month = month_index(ym, dates, self.now_label());
        write_json(self.store, &ArchiveKey::MonthIndex(ym), &month)?;
        Ok(true)
    }

    /// Rescan every month file and rewrite the global index from scratch.
    pub fn rebuild_global(&mut self) -> Result<GlobalIndex> {
        let mut months = Vec::new();
        for ym in self.store.list_month_indexes()? {
            let key = ArchiveKey::MonthIndex(ym);
            let total_days = match read_json::<Value, S>(&*self.store, &key) {
                Ok(Some(month)) => month_total_days(&month),
                Ok(None) => continue,
                Err(e @ ArchiveError::Json { .. }) => {
                    log::warn!("counting month as empty: {e}");
                    0
                }
                Err(e) => return Err(e),
            };
            months.push(GlobalIndexEntry {
                year_month: ym.key(),
                year: format!("{:04}", ym.year),
                month: format!("{:02}", ym.month),
                total_days,
                file_reference: key.relative_path(),
            });
        }
        let global = global_index(months, self.now_label());
        write_json(self.store, &ArchiveKey::GlobalIndex, &global)?;
        log::info!("global index rebuilt with {} months", global.total_months);
        Ok(global)
    }

    /// Regenerate every index level purely from the per-timestamp records.
    /// Month files left without any dated record are removed.
    pub fn rebuild_indexes(&mut self) -> Result<ReindexReport> {
        let mut report = ReindexReport::default();
        let mut months: BTreeMap<YearMonth, Vec<MonthIndexEntry>> = BTreeMap::new();

        for date in self.store.list_emergency_dates()? {
            let entries = self.day_entries_from_records(date)?;
            let key = ArchiveKey::DayIndex(date);
            if entries.is_empty() {
                self.store.remove(&key)?;
                continue;
            }
            report.records += entries.len();
            report.days += 1;
            write_json(self.store, &key, &entries)?;
            months
                .entry(YearMonth::of(date))
                .or_default()
                .push(summarize_day(date, &entries));
        }

        for ym in self.store.list_month_indexes()? {
            if !months.contains_key(&ym) && self.store.remove(&ArchiveKey::MonthIndex(ym))? {
                report.removed_months += 1;
            }
        }

        let generated_at = self.now_label();
        for (ym, dates) in months {
            let month = month_index(ym, dates, generated_at.clone());
            write_json(self.store, &ArchiveKey::MonthIndex(ym), &month)?;
            report.months += 1;
        }

        self.rebuild_global()?;
        Ok(report)
    }
}

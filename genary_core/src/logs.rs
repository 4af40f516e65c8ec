//! Read-side views over the emergency archive.

use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;

use crate::error::{ArchiveError, Result};
use crate::models::EmergencyRecord;
use crate::store::{read_json, ArchiveKey, ArchiveStore};

pub const DEFAULT_LOG_DAYS: u32 = 7;

fn records_of<S: ArchiveStore + ?Sized>(store: &S, date: NaiveDate) -> Result<Vec<EmergencyRecord>> {
    let mut records = Vec::new();
    for time in store.list_record_times(date)? {
        match read_json::<EmergencyRecord, S>(store, &ArchiveKey::EmergencyRecord { date, time }) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(e @ ArchiveError::Json { .. }) => log::warn!("skipping record: {e}"),
            Err(e) => return Err(e),
        }
    }
    Ok(records)
}

/// Records from the last `days` calendar days up to and including `today`,
/// oldest first.
pub fn recent_records<S: ArchiveStore + ?Sized>(
    store: &S,
    today: NaiveDate,
    days: u32,
) -> Result<Vec<EmergencyRecord>> {
    // A window reaching past the calendar's range has no lower bound.
    let cutoff = today.checked_sub_signed(Duration::days(i64::from(days)));
    let mut records = Vec::new();
    for date in store.list_emergency_dates()? {
        if cutoff.map_or(true, |c| date > c) && date <= today {
            records.extend(records_of(store, date)?);
        }
    }
    records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    Ok(records)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationSummary {
    pub total_events: usize,
    /// `(generator, events)` most frequent first.
    pub by_generator: Vec<(String, usize)>,
    /// Events per `YYYY-MM`.
    pub by_month: BTreeMap<String, usize>,
}

pub fn summarize(records: &[EmergencyRecord]) -> ActivationSummary {
    let mut generators: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_month: BTreeMap<String, usize> = BTreeMap::new();
    for record in records {
        for activation in &record.active_emergency_generators {
            *generators.entry(activation.name.clone()).or_default() += 1;
        }
        if let Some(month) = record.timestamp.get(..7) {
            *by_month.entry(month.to_string()).or_default() += 1;
        }
    }
    let mut by_generator: Vec<(String, usize)> = generators.into_iter().collect();
    by_generator.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    ActivationSummary {
        total_events: records.len(),
        by_generator,
        by_month,
    }
}

/// Summary over every record in the archive.
pub fn summarize_archive<S: ArchiveStore + ?Sized>(store: &S) -> Result<ActivationSummary> {
    let mut records = Vec::new();
    for date in store.list_emergency_dates()? {
        records.extend(records_of(store, date)?);
    }
    Ok(summarize(&records))
}

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::{Clock, IndexMaintainer, ReindexReport};
use crate::store::{ArchiveKey, ArchiveStore};

/// How long per-timestamp emergency records are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum RetentionPolicy {
    #[default]
    RetainForever,
    RetainDays { days: u32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub removed_days: usize,
    pub removed_records: usize,
    pub reindex: Option<ReindexReport>,
}

impl RetentionPolicy {
    /// First date that is kept, if the policy expires anything. A window
    /// reaching past the calendar's range expires nothing.
    pub fn cutoff(&self, today: NaiveDate) -> Option<NaiveDate> {
        match self {
            RetentionPolicy::RetainForever => None,
            RetentionPolicy::RetainDays { days } => {
                today.checked_sub_signed(Duration::days(i64::from(*days)))
            }
        }
    }

    /// Remove expired emergency dates and re-derive the month and global
    /// levels from what is left.
    pub fn apply<S: ArchiveStore + ?Sized>(
        &self,
        store: &mut S,
        today: NaiveDate,
        clock: Clock,
    ) -> Result<RetentionReport> {
        let mut report = RetentionReport::default();
        let Some(cutoff) = self.cutoff(today) else {
            log::info!("retention policy {self:?} expires nothing, keeping all records");
            return Ok(report);
        };

        for date in store.list_emergency_dates()? {
            if date >= cutoff {
                continue;
            }
            for time in store.list_record_times(date)? {
                if store.remove(&ArchiveKey::EmergencyRecord { date, time })? {
                    report.removed_records += 1;
                }
            }
            store.remove(&ArchiveKey::DayIndex(date))?;
            report.removed_days += 1;
        }

        if report.removed_days > 0 {
            log::info!(
                "expired {} emergency days older than {cutoff}",
                report.removed_days
            );
            report.reindex = Some(IndexMaintainer::with_clock(store, clock).rebuild_indexes()?);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::local_now;
    use crate::models::{parse_date_key, GlobalIndex};
    use crate::store::{read_json, MemoryArchive};

    fn seeded() -> MemoryArchive {
        let mut store = MemoryArchive::new();
        let record = r#"{"timestamp": "x", "active_emergency_generators": [], "total_count": 0, "created_at": "x"}"#;
        store.insert_raw("emergency/2025/20250601/210000.json", record);
        store.insert_raw("emergency/2025/20250601/index.json", "[]");
        store.insert_raw("emergency/2025/20250620/080000.json", record);
        store.insert_raw("emergency/2025/20250620/index.json", "[]");
        store
    }

    #[test]
    fn test_retain_forever_touches_nothing() {
        let mut store = seeded();
        let before = store.files().clone();
        let report = RetentionPolicy::default()
            .apply(&mut store, parse_date_key("20260101").unwrap(), local_now)
            .unwrap();
        assert_eq!(report, RetentionReport::default());
        assert_eq!(store.files(), &before);
    }

    #[test]
    fn test_retain_days_expires_old_dates() {
        let mut store = seeded();
        let policy = RetentionPolicy::RetainDays { days: 10 };
        let report = policy
            .apply(&mut store, parse_date_key("20250625").unwrap(), local_now)
            .unwrap();
        assert_eq!(report.removed_days, 1);
        assert_eq!(report.removed_records, 1);
        assert!(!store.files().contains_key("emergency/2025/20250601/index.json"));
        assert!(store.files().contains_key("emergency/2025/20250620/080000.json"));

        let global: GlobalIndex = read_json(&store, &ArchiveKey::GlobalIndex).unwrap().unwrap();
        assert_eq!(global.total_months, 1);
        assert_eq!(global.months[0].total_days, 1);
    }

    #[test]
    fn test_huge_window_expires_nothing() {
        let mut store = seeded();
        let before = store.files().clone();
        let report = RetentionPolicy::RetainDays { days: u32::MAX }
            .apply(&mut store, parse_date_key("20250625").unwrap(), local_now)
            .unwrap();
        assert_eq!(report.removed_days, 0);
        assert_eq!(store.files(), &before);
    }

    #[test]
    fn test_policy_config_shape() {
        let policy: RetentionPolicy =
            serde_json::from_str(r#"{"policy": "retain-days", "days": 30}"#).unwrap();
        assert_eq!(policy, RetentionPolicy::RetainDays { days: 30 });
        let policy: RetentionPolicy = serde_json::from_str(r#"{"policy": "retain-forever"}"#).unwrap();
        assert_eq!(policy, RetentionPolicy::RetainForever);
    }
}

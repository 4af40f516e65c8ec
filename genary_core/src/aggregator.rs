use chrono::NaiveDate;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::classifier::{classify, classify_with, SemanticTag, SUBTOTAL_MARKER};
use crate::error::Result;
use crate::models::{DailyAggregate, Snapshot, UnitDailyTotals};
use crate::store::{read_day_snapshots, write_json, ArchiveKey, ArchiveStore, SnapshotKey};

static SHARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\s*([-+]?\d+(?:\.\d+)?)\s*%\s*\)").expect("valid regex"));

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Default)]
struct UnitAccumulator {
    storage_sum: f64,
    storage_count: usize,
    load_sum: f64,
    load_count: usize,
}

/// Fold every snapshot of one day into per-unit storage totals.
///
/// Every contributing row is counted, including zero and absent outputs
/// (which add nothing to the sum). Load values are summed by magnitude.
pub fn aggregate_day<'a, I>(snapshots: I) -> DailyAggregate
where
    I: IntoIterator<Item = &'a Snapshot>,
{
    let mut units: BTreeMap<String, UnitAccumulator> = BTreeMap::new();

    for snapshot in snapshots {
        for row in &snapshot.rows {
            let name = row.clean_name();
            if name.is_empty() || name == SUBTOTAL_MARKER {
                continue;
            }
            let value = row.output_value().or_zero();
            match classify(&row.category_raw, &name) {
                SemanticTag::StorageGeneration => {
                    let bucket = units.entry(name).or_default();
                    bucket.storage_sum += value;
                    bucket.storage_count += 1;
                }
                SemanticTag::StorageLoad => {
                    let bucket = units.entry(name).or_default();
                    bucket.load_sum += value.abs();
                    bucket.load_count += 1;
                }
                _ => {}
            }
        }
    }

    units
        .into_iter()
        .map(|(name, acc)| {
            (
                name,
                UnitDailyTotals {
                    storage_sum: round2(acc.storage_sum),
                    storage_count: acc.storage_count,
                    load_sum: round2(acc.load_sum),
                    load_count: acc.load_count,
                },
            )
        })
        .collect()
}

/// Total solar output (MW) reported in one snapshot.
pub fn solar_total(snapshot: &Snapshot) -> f64 {
    snapshot
        .rows
        .iter()
        .filter(|row| classify(&row.category_raw, &row.unit_name) == SemanticTag::Solar)
        .map(|row| row.output_value().or_zero())
        .sum()
}

/// Sum of the share percentages printed on thermal-source subtotal rows,
/// e.g. `"8123.4(35.2%)"`.
pub fn thermal_share<S: AsRef<str>>(snapshot: &Snapshot, thermal_sources: &[S]) -> f64 {
    snapshot
        .rows
        .iter()
        .filter(|row| {
            classify_with(&row.category_raw, &row.unit_name, thermal_sources)
                == SemanticTag::ThermalSubtotal
        })
        .filter_map(|row| {
            SHARE
                .captures(&row.output)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<f64>().ok())
        })
        .sum()
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayAggregation {
    pub date: NaiveDate,
    pub aggregate: DailyAggregate,
    pub files_processed: usize,
    pub errors: usize,
}

/// Read and fold every stored snapshot of `date`.
pub fn aggregate_stored_day<S: ArchiveStore + ?Sized>(
    store: &S,
    date: NaiveDate,
) -> Result<DayAggregation> {
    let day = read_day_snapshots(store, date)?;
    Ok(DayAggregation {
        date,
        aggregate: aggregate_day(&day.snapshots),
        files_processed: day.files,
        errors: day.errors,
    })
}

/// Overwrite the day's `pump.json`.
pub fn write_daily_aggregate<S: ArchiveStore + ?Sized>(
    store: &mut S,
    date: NaiveDate,
    aggregate: &DailyAggregate,
) -> Result<()> {
    write_json(store, &ArchiveKey::DailyStorage(date), aggregate)
}

/// One day's solar output summed over every readable snapshot. Days with
/// no readable snapshot are left out.
pub fn solar_daily_sums<S: ArchiveStore + ?Sized>(
    store: &S,
    dates: &[NaiveDate],
) -> Result<Vec<(NaiveDate, f64)>> {
    let mut sums = Vec::new();
    for date in dates {
        let day = read_day_snapshots(store, *date)?;
        if day.snapshots.is_empty() {
            continue;
        }
        let total: f64 = day.snapshots.iter().map(solar_total).sum();
        sums.push((*date, round2(total)));
    }
    Ok(sums)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThermalPeak {
    pub key: SnapshotKey,
    pub timestamp: Option<String>,
    pub share: f64,
}

/// Snapshots whose thermal subtotal shares add up to more than `threshold`
/// percent. Unreadable snapshots are skipped.
pub fn find_thermal_peaks<S, T>(store: &S, thermal_sources: &[T], threshold: f64) -> Result<Vec<ThermalPeak>>
where
    S: ArchiveStore + ?Sized,
    T: AsRef<str>,
{
    let mut peaks = Vec::new();
    for key in store.list_snapshots()? {
        let origin = key.relative_path();
        let text = match store.read(&ArchiveKey::Snapshot(key.clone())) {
            Ok(Some(text)) => text,
            Ok(None) => continue,
            Err(e) => {
                log::warn!("skipping {origin}: {e}");
                continue;
            }
        };
        let snapshot = match Snapshot::from_json(&origin, &text) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::debug!("skipping {origin}: {e}");
                continue;
            }
        };
        let share = thermal_share(&snapshot, thermal_sources);
        if share > threshold {
            peaks.push(ThermalPeak {
                key,
                timestamp: snapshot.timestamp,
                share: round2(share),
            });
        }
    }
    Ok(peaks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UnitRow;

    fn row(category: &str, name: &str, output: &str) -> UnitRow {
        UnitRow {
            category_raw: category.to_string(),
            unit_type: String::new(),
            unit_name: name.to_string(),
            capacity: "100.0".to_string(),
            output: output.to_string(),
            percentage: String::new(),
            status: String::new(),
        }
    }

    fn snapshot(rows: Vec<UnitRow>) -> Snapshot {
        Snapshot {
            timestamp: None,
            rows,
            skipped_rows: 0,
        }
    }

    const ESS: &str = "<b>儲能(Energy Storage System)</b>";
    const ESS_LOAD: &str = "儲能負載(Energy Storage Load)";

    #[test]
    fn test_storage_sums_across_snapshots() {
        let day = vec![
            snapshot(vec![row(ESS, "A", "10.0")]),
            snapshot(vec![row(ESS, "A", "15.5")]),
        ];
        let aggregate = aggregate_day(&day);
        let a = aggregate["A"];
        assert_eq!(a.storage_sum, 25.5);
        assert_eq!(a.storage_count, 2);
        assert_eq!(a.load_count, 0);
    }

    #[test]
    fn test_load_uses_magnitude_and_counts_zero_rows() {
        let day = vec![
            snapshot(vec![row(ESS_LOAD, "B", "-4.25")]),
            snapshot(vec![row(ESS_LOAD, "B", "-")]),
            snapshot(vec![row(ESS_LOAD, "B", "0.0")]),
        ];
        let b = aggregate_day(&day)["B"];
        assert_eq!(b.load_sum, 4.25);
        assert_eq!(b.load_count, 3);
    }

    #[test]
    fn test_subtotal_and_blank_rows_are_skipped() {
        let day = vec![snapshot(vec![
            row(ESS, "小計", "99.0"),
            row(ESS, "  ", "1.0"),
            row("燃氣(LNG)", "大潭CC#1", "500.0"),
        ])];
        assert!(aggregate_day(&day).is_empty());
    }

    #[test]
    fn test_sums_round_to_two_decimals() {
        let day = vec![snapshot(vec![
            row(ESS, "C", "0.1"),
            row(ESS, "C", "0.2"),
            row(ESS, "C", "0.004"),
        ])];
        assert_eq!(aggregate_day(&day)["C"].storage_sum, 0.3);
    }

    #[test]
    fn test_solar_total_ignores_non_numeric() {
        let snap = snapshot(vec![
            row("<A NAME='solar'></A>太陽能(Solar)", "太陽能購電", "1200.5"),
            row("太陽能(Solar)", "小計", "1200.5(10.2%)"),
            row("風力(Wind)", "離岸一期", "300.0"),
        ]);
        assert_eq!(solar_total(&snap), 1200.5);
    }

    #[test]
    fn test_thermal_share_reads_subtotal_percentages() {
        let snap = snapshot(vec![
            row("燃煤(Coal)", "小計", "8000.0(35.5%)"),
            row("燃氣(LNG)", "<b>小計</b>", "12000.0(50.25%)"),
            row("核能(Nuclear)", "小計", "900.0(4.0%)"),
            row("燃氣(LNG)", "大潭CC#1", "500.0"),
        ]);
        let share = thermal_share(&snap, crate::classifier::DEFAULT_THERMAL_SOURCES);
        assert!((share - 85.75).abs() < 1e-9);
    }

    fn feed(rows: &str) -> String {
        format!(r#"{{"": "2025-06-11 12:00", "aaData": [{rows}]}}"#)
    }

    #[test]
    fn test_solar_daily_sums_skip_empty_days() {
        let mut store = crate::store::MemoryArchive::new();
        let solar = r#"["太陽能(Solar)", "", "太陽能購電", "0", "1000.25", "", ""]"#;
        store.insert_raw("genary/2025/20250611/120000.json", &feed(solar));
        store.insert_raw("genary/2025/20250611/121000.json", &feed(solar));
        store.insert_raw("genary/2025/20250612/120000.json", "broken");
        let dates: Vec<NaiveDate> = ["20250611", "20250612", "20250613"]
            .iter()
            .filter_map(|d| crate::models::parse_date_key(d))
            .collect();
        let sums = solar_daily_sums(&store, &dates).unwrap();
        assert_eq!(sums, vec![(dates[0], 2000.5)]);
    }

    #[test]
    fn test_thermal_peaks_above_threshold() {
        let mut store = crate::store::MemoryArchive::new();
        store.insert_raw(
            "genary/2025/20250611/120000.json",
            &feed(r#"["燃煤(Coal)", "", "小計", "0", "9000(60.0%)", "", ""], ["燃氣(LNG)", "", "小計", "0", "9000(45.5%)", "", ""]"#),
        );
        store.insert_raw(
            "genary/2025/20250611/121000.json",
            &feed(r#"["燃煤(Coal)", "", "小計", "0", "9000(60.0%)", "", ""]"#),
        );
        let peaks = find_thermal_peaks(&store, crate::classifier::DEFAULT_THERMAL_SOURCES, 100.0).unwrap();
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].key.time, "120000");
        assert_eq!(peaks[0].share, 105.5);
    }

    #[test]
    fn test_thermal_scan_skips_unreadable_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let day_dir = dir.path().join("genary/2025/20250611");
        std::fs::create_dir_all(&day_dir).unwrap();
        std::fs::write(day_dir.join("115000.json"), [0xff, 0xfe, 0x00]).unwrap();
        std::fs::write(
            day_dir.join("120000.json"),
            feed(r#"["燃煤(Coal)", "", "小計", "0", "9000(101.0%)", "", ""]"#),
        )
        .unwrap();
        let store = crate::store::FsArchive::new(dir.path());
        let peaks = find_thermal_peaks(&store, crate::classifier::DEFAULT_THERMAL_SOURCES, 100.0).unwrap();
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].key.time, "120000");
    }
}

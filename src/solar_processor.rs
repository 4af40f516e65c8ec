use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate};
use genary_core::aggregator::solar_daily_sums;
use genary_core::models::date_key;
use genary_core::{ArchiveStore, FsArchive, PipelineConfig};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_SOLAR_DAYS: u32 = 60;
const OUTPUT_FILE: &str = "solar.csv";

#[derive(Debug, Serialize)]
struct SolarRow {
    date: String,
    sum_mw: f64,
}

pub struct SolarProcessor {
    archive: FsArchive,
    output: PathBuf,
}

impl SolarProcessor {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            archive: config.archive(),
            output: config.archive().root().join(OUTPUT_FILE),
        }
    }

    pub fn write_daily_sums(&self, days: u32) -> Result<()> {
        self.write_window(Local::now().date_naive(), days)
    }

    /// Sums for the `days` dates ending yesterday.
    pub fn write_window(&self, today: NaiveDate, days: u32) -> Result<()> {
        println!("\n☀️  Solar daily sums, last {days} days");
        println!("{}", "=".repeat(60));

        // Only archived dates are visited, however wide the window.
        let first = today.checked_sub_signed(Duration::days(i64::from(days)));
        let dates: Vec<NaiveDate> = self
            .archive
            .list_snapshot_dates()?
            .into_iter()
            .filter(|date| *date < today && first.map_or(true, |f| *date >= f))
            .collect();
        let sums = solar_daily_sums(&self.archive, &dates)?;
        write_csv(&self.output, &sums)?;

        if sums.is_empty() {
            println!("No solar data found.");
            return Ok(());
        }
        let values: Vec<f64> = sums.iter().map(|(_, v)| *v).collect();
        let total: f64 = values.iter().sum();
        let max = values.iter().cloned().fold(f64::MIN, f64::max);
        let min = values.iter().cloned().fold(f64::MAX, f64::min);
        println!("  Days with data: {}", sums.len());
        println!("  Total: {:.2} MW", total);
        println!("  Average: {:.2} MW", total / values.len() as f64);
        println!("  Max: {:.2} MW", max);
        println!("  Min: {:.2} MW", min);
        println!("💾 Saved to {}", self.output.display());
        Ok(())
    }
}

fn write_csv(path: &Path, sums: &[(NaiveDate, f64)]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    for (date, sum) in sums {
        writer.serialize(SolarRow {
            date: date_key(*date),
            sum_mw: *sum,
        })?;
    }
    writer.flush()?;
    Ok(())
}

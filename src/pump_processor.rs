use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use genary_core::aggregator::{aggregate_stored_day, write_daily_aggregate, DayAggregation};
use genary_core::backfill::rebuild_all_daily_aggregates;
use genary_core::models::date_key;
use genary_core::{ArchiveError, ArchiveStore, FsArchive, PipelineConfig};
use indicatif::{ProgressBar, ProgressStyle};

pub struct PumpProcessor {
    archive: FsArchive,
}

impl PumpProcessor {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            archive: config.archive(),
        }
    }

    pub fn process_today(&mut self) -> Result<()> {
        self.process_day(Local::now().date_naive())
    }

    pub fn process_day(&mut self, date: NaiveDate) -> Result<()> {
        println!("\n🔋 Energy storage totals for {}", date_key(date));
        println!("{}", "=".repeat(60));

        if self.archive.list_day_snapshots(date)?.is_empty() {
            return Err(ArchiveError::MissingInput(format!(
                "no snapshots archived for {}",
                date_key(date)
            ))
            .into());
        }

        let day = aggregate_stored_day(&self.archive, date)?;
        write_daily_aggregate(&mut self.archive, date, &day.aggregate)
            .with_context(|| format!("writing storage totals for {}", date_key(date)))?;
        print_day(&day);
        Ok(())
    }

    pub fn process_all(&mut self) -> Result<()> {
        println!("\n🔋 Rebuilding energy storage totals for every day");
        println!("{}", "=".repeat(60));

        let days = self.archive.list_snapshot_dates()?.len();
        let pb = ProgressBar::new(days as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({msg})")?,
        );

        let report = rebuild_all_daily_aggregates(&mut self.archive, |day| {
            pb.inc(1);
            pb.set_message(date_key(day.date));
        })?;
        pb.finish_with_message(format!("{} days written", report.days));

        println!("\n📊 Summary:");
        println!("  Days: {}", report.days);
        println!("  Files processed: {}", report.files_processed);
        println!("  Unreadable files: {}", report.errors);
        println!("  Unit-day totals: {}", report.units);
        Ok(())
    }
}

fn print_day(day: &DayAggregation) {
    println!("  Files processed: {}", day.files_processed);
    if day.errors > 0 {
        println!("  ⚠️  Unreadable files: {}", day.errors);
    }
    println!("  Storage units: {}", day.aggregate.len());
    for (name, totals) in &day.aggregate {
        println!(
            "    {:<24} gen {:>10.2} MW ({:>3}) load {:>10.2} MW ({:>3})",
            name, totals.storage_sum, totals.storage_count, totals.load_sum, totals.load_count
        );
    }
}

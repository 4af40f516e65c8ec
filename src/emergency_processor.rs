use anyhow::{Context, Result};
use chrono::Local;
use genary_core::index::local_now;
use genary_core::logs::{recent_records, summarize_archive, ActivationSummary};
use genary_core::trigger;
use genary_core::{
    BackfillOrchestrator, FsArchive, IndexMaintainer, PipelineConfig, RecordOutcome,
};
use indicatif::{ProgressBar, ProgressStyle};

pub struct EmergencyProcessor {
    config: PipelineConfig,
    archive: FsArchive,
}

impl EmergencyProcessor {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            config: config.clone(),
            archive: config.archive(),
        }
    }

    /// Incremental run after each fetch.
    pub fn check_latest(&mut self) -> Result<()> {
        println!("\n🚨 Emergency generator check");
        println!("{}", "=".repeat(60));

        let result = trigger::check_latest(&mut self.archive, &self.config.watch_list, local_now)
            .context("checking latest snapshot")?;
        match result.outcome {
            RecordOutcome::Created => {
                println!("⚠️  {} emergency units running at {}", result.activations.len(), result.timestamp);
                for a in &result.activations {
                    println!("    {:<20} {:>8} MW  {:>6}  {}", a.name, a.output, a.percentage, a.status);
                }
            }
            RecordOutcome::AlreadyRecorded => println!("⏭️  {} already recorded", result.timestamp),
            RecordOutcome::NoActivations => println!("✅ No emergency units running at {}", result.timestamp),
        }

        let retention = self
            .config
            .retention
            .apply(&mut self.archive, Local::now().date_naive(), local_now)
            .context("applying retention")?;
        if retention.removed_days > 0 {
            println!(
                "🧹 Expired {} days ({} records)",
                retention.removed_days, retention.removed_records
            );
        }
        Ok(())
    }

    pub fn backfill(&mut self) -> Result<()> {
        println!("\n🕰️  Rebuilding emergency history from archived snapshots");
        println!("{}", "=".repeat(60));

        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({msg})")?,
        );

        let report = BackfillOrchestrator::new(&self.config.watch_list)
            .with_progress_every(self.config.progress_every)
            .rebuild_all(&mut self.archive, |progress| {
                pb.set_length(progress.total as u64);
                pb.set_position(progress.processed as u64);
                pb.set_message(format!("{} events", progress.events_created));
            })
            .context("emergency backfill")?;
        pb.finish_with_message(format!("{} events created", report.events_created));

        println!("\n📊 Backfill summary:");
        println!("  Files processed: {}", report.files_processed);
        println!("  Events created: {}", report.events_created);
        println!("  Already recorded: {}", report.already_recorded);
        println!("  Unreadable files: {}", report.read_errors);
        println!("  Parse errors: {}", report.parse_errors);
        println!("  Timestamp failures: {}", report.timestamp_failures);
        println!("  Undersized rows skipped: {}", report.skipped_rows);
        println!(
            "  Elapsed: {:.2?} ({:.1} files/s)",
            report.elapsed,
            report.files_per_second()
        );

        let summary = summarize_archive(&self.archive)?;
        print_summary(&summary);
        Ok(())
    }

    pub fn reindex(&mut self) -> Result<()> {
        println!("\n🗂️  Regenerating emergency indexes from records");
        println!("{}", "=".repeat(60));

        let report = IndexMaintainer::new(&mut self.archive)
            .rebuild_indexes()
            .context("rebuilding indexes")?;
        println!("  Records: {}", report.records);
        println!("  Days: {}", report.days);
        println!("  Months: {}", report.months);
        if report.removed_months > 0 {
            println!("  Removed stale months: {}", report.removed_months);
        }
        Ok(())
    }

    pub fn show_logs(&self, days: u32) -> Result<()> {
        println!("\n📜 Emergency activations, last {days} days");
        println!("{}", "=".repeat(60));

        let records = recent_records(&self.archive, Local::now().date_naive(), days)?;
        if records.is_empty() {
            println!("No emergency activations recorded.");
            return Ok(());
        }
        for record in &records {
            println!("\n{} ({} units)", record.timestamp, record.total_count);
            for a in &record.active_emergency_generators {
                println!("    {:<20} {:>8} MW  {:>6}  {}", a.name, a.output, a.percentage, a.status);
            }
        }
        println!("\nTotal: {} records", records.len());
        Ok(())
    }
}

fn print_summary(summary: &ActivationSummary) {
    println!("\n📈 Activation statistics:");
    println!("  Total events: {}", summary.total_events);
    if !summary.by_generator.is_empty() {
        println!("  By generator:");
        for (name, count) in &summary.by_generator {
            println!("    {:<20} {:>6}", name, count);
        }
    }
    if !summary.by_month.is_empty() {
        println!("  By month:");
        for (month, count) in &summary.by_month {
            println!("    {month}  {count:>6}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FEED: &str = r#"{"": "2025-06-11 21:00", "aaData": [["燃氣(LNG)", "", "核二Gas1", "560.0", "3.4", "0.6%", ""]]}"#;

    fn processor(dir: &TempDir) -> EmergencyProcessor {
        EmergencyProcessor::new(&PipelineConfig {
            docs_root: dir.path().to_path_buf(),
            ..PipelineConfig::default()
        })
    }

    #[test]
    fn test_check_latest_requires_genary_json() {
        let dir = TempDir::new().unwrap();
        assert!(processor(&dir).check_latest().is_err());
    }

    #[test]
    fn test_check_latest_then_backfill_agree() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("genary.json"), FEED).unwrap();
        let day_dir = dir.path().join("genary/2025/20250611");
        std::fs::create_dir_all(&day_dir).unwrap();
        std::fs::write(day_dir.join("210000.json"), FEED).unwrap();

        let mut p = processor(&dir);
        p.check_latest().unwrap();
        let record = dir.path().join("emergency/2025/20250611/210000.json");
        assert!(record.is_file());
        let first = std::fs::read_to_string(&record).unwrap();

        p.backfill().unwrap();
        assert_eq!(std::fs::read_to_string(&record).unwrap(), first);
        assert!(dir.path().join("emergency/monthly_index.json").is_file());

        p.reindex().unwrap();
        p.show_logs(10_000).unwrap();
    }
}

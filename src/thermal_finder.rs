use anyhow::Result;
use genary_core::aggregator::{find_thermal_peaks, ThermalPeak};
use genary_core::{FsArchive, PipelineConfig};

pub const DEFAULT_THRESHOLD: f64 = 100.0;

pub struct ThermalFinder {
    archive: FsArchive,
    thermal_sources: Vec<String>,
}

impl ThermalFinder {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            archive: config.archive(),
            thermal_sources: config.thermal_sources.clone(),
        }
    }

    pub fn find(&self, threshold: f64) -> Result<Vec<ThermalPeak>> {
        Ok(find_thermal_peaks(&self.archive, &self.thermal_sources, threshold)?)
    }

    pub fn report(&self, threshold: f64) -> Result<()> {
        println!("\n🔥 Snapshots with thermal share above {threshold}%");
        println!("{}", "=".repeat(60));

        let peaks = self.find(threshold)?;
        for peak in &peaks {
            println!(
                "  {:<40} {:>8.2}%  {}",
                peak.key.relative_path(),
                peak.share,
                peak.timestamp.as_deref().unwrap_or("-")
            );
        }
        println!("\nFound {} snapshots", peaks.len());
        Ok(())
    }
}

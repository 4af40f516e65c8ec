use crate::classifier::{match_emergency, strip_markup, WatchList};
use crate::models::{EmergencyActivation, Snapshot, UnitRow};

/// Output strings the feed uses for an idle unit.
const IDLE_OUTPUTS: &[&str] = &["", "0", "0.0", "-"];

fn is_running(output: &str) -> bool {
    !IDLE_OUTPUTS.contains(&output)
}

/// Watch-listed units with a present, non-zero output, stamped with the
/// snapshot's embedded timestamp.
pub fn detect_activations(snapshot: &Snapshot, watch_list: &WatchList) -> Vec<EmergencyActivation> {
    let stamp = snapshot.timestamp.as_deref().unwrap_or("unknown");
    detect_activations_at(snapshot, watch_list, stamp)
}

/// Same as [`detect_activations`] with an explicit timestamp label, used
/// when the timestamp had to be inferred from the storage location.
pub fn detect_activations_at(
    snapshot: &Snapshot,
    watch_list: &WatchList,
    stamp: &str,
) -> Vec<EmergencyActivation> {
    snapshot
        .rows
        .iter()
        .filter_map(|row| activation_for(row, watch_list, stamp))
        .collect()
}

fn activation_for(row: &UnitRow, watch_list: &WatchList, stamp: &str) -> Option<EmergencyActivation> {
    let name = row.clean_name();
    let pattern = match_emergency(&name, watch_list)?;
    let output = row.output.trim();
    if !is_running(output) {
        return None;
    }
    Some(EmergencyActivation {
        name,
        pattern: pattern.pattern.clone(),
        output: output.to_string(),
        percentage: row.percentage.trim().to_string(),
        status: strip_markup(&row.status).trim().to_string(),
        timestamp: stamp.to_string(),
    })
}

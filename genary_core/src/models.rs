use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::classifier::strip_markup;
use crate::error::{ArchiveError, Result};

/// Minimum positional fields a feed row must carry to be usable.
pub const MIN_ROW_FIELDS: usize = 7;

/// Key of the row array inside a snapshot blob.
pub const ROWS_FIELD: &str = "aaData";

/// Minute-precision timestamp embedded by the feed.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Format used for `generated_at` / `created_at` bookkeeping fields.
pub const GENERATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq)]
pub struct UnitRow {
    pub category_raw: String,
    pub unit_type: String,
    pub unit_name: String,
    pub capacity: String,
    pub output: String,
    pub percentage: String,
    pub status: String,
}

impl UnitRow {
    /// Build a row from the feed's positional cells. Returns `None` for
    /// undersized rows.
    pub fn from_cells(cells: &[Value]) -> Option<Self> {
        if cells.len() < MIN_ROW_FIELDS {
            return None;
        }
        Some(Self {
            category_raw: cell_text(&cells[0]),
            unit_type: cell_text(&cells[1]),
            unit_name: cell_text(&cells[2]),
            capacity: cell_text(&cells[3]),
            output: cell_text(&cells[4]),
            percentage: cell_text(&cells[5]),
            status: cell_text(&cells[6]),
        })
    }

    /// Unit name with markup removed and whitespace trimmed.
    pub fn clean_name(&self) -> String {
        strip_markup(&self.unit_name).trim().to_string()
    }

    pub fn clean_category(&self) -> String {
        strip_markup(&self.category_raw).trim().to_string()
    }

    pub fn output_value(&self) -> OutputValue {
        OutputValue::parse(&self.output)
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parsed output column. Absent and zero stay distinct until summation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputValue {
    Absent,
    Value(f64),
}

impl OutputValue {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "-" {
            return OutputValue::Absent;
        }
        match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() => OutputValue::Value(v),
            _ => OutputValue::Absent,
        }
    }

    pub fn or_zero(self) -> f64 {
        match self {
            OutputValue::Absent => 0.0,
            OutputValue::Value(v) => v,
        }
    }
}

/// One poll of the generation feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Timestamp text exactly as embedded by the feed, if any.
    pub timestamp: Option<String>,
    pub rows: Vec<UnitRow>,
    /// Rows dropped for having fewer than `MIN_ROW_FIELDS` cells.
    pub skipped_rows: usize,
}

impl Snapshot {
    pub fn from_json(origin: &str, text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ArchiveError::json(origin, e))?;
        Self::from_value(origin, &value)
    }

    pub fn from_value(origin: &str, value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| ArchiveError::Shape(format!("{origin}: top level is not an object")))?;
        let rows_value = object
            .get(ROWS_FIELD)
            .and_then(Value::as_array)
            .ok_or_else(|| ArchiveError::Shape(format!("{origin}: missing '{ROWS_FIELD}' array")))?;

        let mut rows = Vec::with_capacity(rows_value.len());
        let mut skipped_rows = 0;
        for cells in rows_value {
            match cells.as_array().and_then(|c| UnitRow::from_cells(c)) {
                Some(row) => rows.push(row),
                None => skipped_rows += 1,
            }
        }

        Ok(Self {
            timestamp: embedded_timestamp(object),
            rows,
            skipped_rows,
        })
    }

    /// Timestamp parsed from the embedded field only.
    pub fn embedded_time(&self) -> Option<NaiveDateTime> {
        self.timestamp.as_deref().and_then(parse_embedded_timestamp)
    }
}

// The feed keys its timestamp with an empty string; older captures used a
// named key, so fall back to the first string value that parses.
fn embedded_timestamp(object: &serde_json::Map<String, Value>) -> Option<String> {
    if let Some(ts) = object.get("").and_then(Value::as_str) {
        return Some(ts.to_string());
    }
    object
        .iter()
        .filter(|(key, _)| key.as_str() != ROWS_FIELD)
        .filter_map(|(_, value)| value.as_str())
        .find(|s| parse_embedded_timestamp(s).is_some())
        .map(str::to_string)
}

pub fn parse_embedded_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    NaiveDateTime::parse_from_str(trimmed, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, GENERATED_AT_FORMAT))
        .ok()
}

/// Timestamp implied by `{YYYYMMDD}/{HHMMSS}.json`.
pub fn timestamp_from_location(day_dir: &str, time_stem: &str) -> Option<NaiveDateTime> {
    let all_digits = |s: &str, len: usize| s.len() == len && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(day_dir, 8) || !all_digits(time_stem, 6) {
        return None;
    }
    NaiveDateTime::parse_from_str(&format!("{day_dir}{time_stem}"), "%Y%m%d%H%M%S").ok()
}

/// Embedded field first, storage location second.
pub fn resolve_timestamp(
    embedded: Option<&str>,
    day_dir: &str,
    time_stem: &str,
) -> Option<NaiveDateTime> {
    embedded
        .and_then(parse_embedded_timestamp)
        .or_else(|| timestamp_from_location(day_dir, time_stem))
}

pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

pub fn time_key(ts: NaiveDateTime) -> String {
    ts.format("%H%M%S").to_string()
}

pub fn parse_date_key(key: &str) -> Option<NaiveDate> {
    if key.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(key, "%Y%m%d").ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// `YYYYMM`
    pub fn key(&self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }

    pub fn parse(key: &str) -> Option<Self> {
        if key.len() != 6 || !key.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let year = key.get(0..4)?.parse().ok()?;
        let month = key.get(4..6)?.parse().ok()?;
        (1..=12).contains(&month).then_some(Self { year, month })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyActivation {
    /// Name as it appears in the feed, annotations included.
    pub name: String,
    pub pattern: String,
    pub output: String,
    pub percentage: String,
    pub status: String,
    pub timestamp: String,
}

/// Per-timestamp activation file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyRecord {
    pub timestamp: String,
    pub active_emergency_generators: Vec<EmergencyActivation>,
    pub total_count: usize,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayIndexEntry {
    pub time: String,
    #[serde(default)]
    pub generators: BTreeSet<String>,
    #[serde(default)]
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthIndexEntry {
    pub date: String,
    pub formatted_date: String,
    #[serde(rename = "events", default)]
    pub event_count: usize,
    #[serde(default)]
    pub times: Vec<String>,
    #[serde(rename = "total_generators", default)]
    pub total_generator_activations: usize,
    #[serde(default)]
    pub unique_generators: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthIndex {
    pub year_month: String,
    pub year: String,
    pub month: String,
    pub total_days: usize,
    pub dates: Vec<MonthIndexEntry>,
    pub generated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalIndexEntry {
    pub year_month: String,
    pub year: String,
    pub month: String,
    pub total_days: usize,
    #[serde(rename = "file")]
    pub file_reference: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalIndex {
    pub total_months: usize,
    pub months: Vec<GlobalIndexEntry>,
    pub generated_at: String,
}

/// Storage totals for one unit over one day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitDailyTotals {
    #[serde(rename = "energy_storage_sum")]
    pub storage_sum: f64,
    #[serde(rename = "energy_storage_count")]
    pub storage_count: usize,
    #[serde(rename = "energy_storage_load_sum")]
    pub load_sum: f64,
    #[serde(rename = "energy_storage_load_count")]
    pub load_count: usize,
}

/// Unit name -> totals, for one calendar date.
pub type DailyAggregate = BTreeMap<String, UnitDailyTotals>;

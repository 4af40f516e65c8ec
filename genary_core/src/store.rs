//! Date-partitioned archive persistence.
//!
//! Everything the engine reads or writes is addressed by an [`ArchiveKey`];
//! the key decides the relative path, so the filesystem store and the
//! in-memory store share one layout.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::error::{ArchiveError, Result};
use crate::models::{date_key, parse_date_key, time_key, Snapshot, YearMonth};

pub const SNAPSHOT_DIR: &str = "genary";
pub const EMERGENCY_DIR: &str = "emergency";
const LIST_FILE: &str = "list";
const PUMP_FILE: &str = "pump";
const DAY_INDEX_FILE: &str = "index";

/// Storage location of one raw snapshot, kept as the literal directory and
/// file names so undated files can still be visited.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotKey {
    pub year: String,
    pub day: String,
    pub time: String,
}

impl SnapshotKey {
    pub fn at(ts: NaiveDateTime) -> Self {
        Self {
            year: format!("{:04}", ts.year()),
            day: date_key(ts.date()),
            time: time_key(ts),
        }
    }

    pub fn relative_path(&self) -> String {
        format!("{SNAPSHOT_DIR}/{}/{}/{}.json", self.year, self.day, self.time)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveKey {
    /// The most recent fetch, `genary.json`.
    LatestSnapshot,
    Snapshot(SnapshotKey),
    SnapshotList(NaiveDate),
    DailyStorage(NaiveDate),
    EmergencyRecord { date: NaiveDate, time: String },
    DayIndex(NaiveDate),
    MonthIndex(YearMonth),
    GlobalIndex,
}

impl ArchiveKey {
    pub fn relative_path(&self) -> String {
        match self {
            ArchiveKey::LatestSnapshot => format!("{SNAPSHOT_DIR}.json"),
            ArchiveKey::Snapshot(key) => key.relative_path(),
            ArchiveKey::SnapshotList(date) => day_file(SNAPSHOT_DIR, *date, LIST_FILE),
            ArchiveKey::DailyStorage(date) => day_file(SNAPSHOT_DIR, *date, PUMP_FILE),
            ArchiveKey::EmergencyRecord { date, time } => day_file(EMERGENCY_DIR, *date, time),
            ArchiveKey::DayIndex(date) => day_file(EMERGENCY_DIR, *date, DAY_INDEX_FILE),
            ArchiveKey::MonthIndex(ym) => {
                format!("{EMERGENCY_DIR}/{:04}/{}.json", ym.year, ym.key())
            }
            ArchiveKey::GlobalIndex => format!("{EMERGENCY_DIR}/monthly_index.json"),
        }
    }
}

fn day_file(top: &str, date: NaiveDate, stem: &str) -> String {
    format!("{top}/{:04}/{}/{stem}.json", date.year(), date_key(date))
}

fn is_time_stem(stem: &str) -> bool {
    stem.len() == 6 && stem.bytes().all(|b| b.is_ascii_digit())
}

fn is_snapshot_stem(stem: &str) -> bool {
    !stem.is_empty() && stem != LIST_FILE && stem != PUMP_FILE
}

/// Narrow persistence interface the engine is written against.
///
/// Reads of missing entries return `Ok(None)`; writes replace the whole
/// entry.
pub trait ArchiveStore {
    fn read(&self, key: &ArchiveKey) -> Result<Option<String>>;

    fn write(&mut self, key: &ArchiveKey, contents: &str) -> Result<()>;

    fn exists(&self, key: &ArchiveKey) -> bool;

    /// Returns whether something was removed.
    fn remove(&mut self, key: &ArchiveKey) -> Result<bool>;

    /// Every raw snapshot in the archive, sorted by location.
    fn list_snapshots(&self) -> Result<Vec<SnapshotKey>>;

    /// Raw snapshots stored under one date directory, sorted by time.
    fn list_day_snapshots(&self, date: NaiveDate) -> Result<Vec<SnapshotKey>>;

    /// Dates that have an emergency directory, ascending.
    fn list_emergency_dates(&self) -> Result<Vec<NaiveDate>>;

    /// `HHMMSS` stems of the per-timestamp records of one date, ascending.
    fn list_record_times(&self, date: NaiveDate) -> Result<Vec<String>>;

    /// Month index files present, ascending.
    fn list_month_indexes(&self) -> Result<Vec<YearMonth>>;

    /// Distinct calendar dates that hold at least one raw snapshot.
    fn list_snapshot_dates(&self) -> Result<Vec<NaiveDate>> {
        let dates: BTreeSet<NaiveDate> = self
            .list_snapshots()?
            .iter()
            .filter_map(|key| parse_date_key(&key.day))
            .collect();
        Ok(dates.into_iter().collect())
    }
}

pub fn read_json<T, S>(store: &S, key: &ArchiveKey) -> Result<Option<T>>
where
    T: DeserializeOwned,
    S: ArchiveStore + ?Sized,
{
    match store.read(key)? {
        Some(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| ArchiveError::json(key.relative_path(), e)),
        None => Ok(None),
    }
}

pub fn write_json<T, S>(store: &mut S, key: &ArchiveKey, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
    S: ArchiveStore + ?Sized,
{
    let text =
        serde_json::to_string_pretty(value).map_err(|e| ArchiveError::json(key.relative_path(), e))?;
    store.write(key, &text)
}

/// Parsed snapshots of one date plus the bookkeeping of what failed.
#[derive(Debug, Default)]
pub struct DaySnapshots {
    pub snapshots: Vec<Snapshot>,
    pub files: usize,
    pub errors: usize,
}

pub fn read_day_snapshots<S: ArchiveStore + ?Sized>(store: &S, date: NaiveDate) -> Result<DaySnapshots> {
    let mut day = DaySnapshots::default();
    for key in store.list_day_snapshots(date)? {
        day.files += 1;
        let origin = key.relative_path();
        let parsed = store
            .read(&ArchiveKey::Snapshot(key))
            .and_then(|text| text.ok_or_else(|| ArchiveError::MissingInput(origin.clone())))
            .and_then(|text| Snapshot::from_json(&origin, &text));
        match parsed {
            Ok(snapshot) => day.snapshots.push(snapshot),
            Err(e) => {
                log::warn!("skipping {origin}: {e}");
                day.errors += 1;
            }
        }
    }
    Ok(day)
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub key: SnapshotKey,
    pub timestamp: NaiveDateTime,
    /// False when a snapshot for the same minute was already archived.
    pub created: bool,
}

/// Archive one fetched feed blob: refresh `genary.json`, store the
/// per-time snapshot once, and merge the time into the day's `list.json`.
pub fn ingest_snapshot<S: ArchiveStore + ?Sized>(store: &mut S, raw: &str) -> Result<IngestOutcome> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| ArchiveError::json("fetched snapshot", e))?;
    let snapshot = Snapshot::from_value("fetched snapshot", &value)?;
    let timestamp = snapshot
        .embedded_time()
        .ok_or_else(|| ArchiveError::Timestamp("fetched snapshot".to_string()))?;

    write_json(store, &ArchiveKey::LatestSnapshot, &value)?;

    let key = SnapshotKey::at(timestamp);
    let snapshot_key = ArchiveKey::Snapshot(key.clone());
    let created = !store.exists(&snapshot_key);
    if created {
        write_json(store, &snapshot_key, &value)?;
    }

    let list_key = ArchiveKey::SnapshotList(timestamp.date());
    let mut times: Vec<String> = read_json(&*store, &list_key)?.unwrap_or_default();
    if !times.contains(&key.time) {
        times.push(key.time.clone());
        times.sort();
        write_json(store, &list_key, &times)?;
    }

    Ok(IngestOutcome {
        key,
        timestamp,
        created,
    })
}

/// Archive rooted at a docs directory on disk.
#[derive(Debug, Clone)]
pub struct FsArchive {
    root: PathBuf,
}

impl FsArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, key: &ArchiveKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    fn read_dir_names(&self, dir: &Path, want_dirs: bool) -> Result<Vec<String>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ArchiveError::io(dir, e)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ArchiveError::io(dir, e))?;
            let path = entry.path();
            if path.is_dir() != want_dirs {
                continue;
            }
            let name = if want_dirs {
                path.file_name()
            } else if path.extension().and_then(|s| s.to_str()) == Some("json") {
                path.file_stem()
            } else {
                None
            };
            if let Some(name) = name.and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

impl ArchiveStore for FsArchive {
    fn read(&self, key: &ArchiveKey) -> Result<Option<String>> {
        let path = self.path_of(key);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ArchiveError::io(path, e)),
        }
    }

    fn write(&mut self, key: &ArchiveKey, contents: &str) -> Result<()> {
        let path = self.path_of(key);
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&parent).map_err(|e| ArchiveError::io(&parent, e))?;

        // Write next to the target and rename over it so readers never see a
        // truncated file.
        let mut tmp = NamedTempFile::new_in(&parent).map_err(|e| ArchiveError::io(&parent, e))?;
        tmp.write_all(contents.as_bytes())
            .map_err(|e| ArchiveError::io(tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| ArchiveError::io(&path, e.error))?;
        Ok(())
    }

    fn exists(&self, key: &ArchiveKey) -> bool {
        self.path_of(key).is_file()
    }

    fn remove(&mut self, key: &ArchiveKey) -> Result<bool> {
        let path = self.path_of(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                if let Some(parent) = path.parent() {
                    // Only succeeds once the directory is empty.
                    let _ = fs::remove_dir(parent);
                }
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ArchiveError::io(path, e)),
        }
    }

    fn list_snapshots(&self) -> Result<Vec<SnapshotKey>> {
        let base = self.root.join(SNAPSHOT_DIR);
        if !base.is_dir() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in WalkDir::new(&base).min_depth(3).max_depth(3) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| base.clone());
                ArchiveError::io(path, e.into())
            })?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|s| s.to_str()) != Some("json")
            {
                continue;
            }
            let stem = path.file_stem().and_then(|s| s.to_str());
            let day = path.parent().and_then(Path::file_name).and_then(|s| s.to_str());
            let year = path
                .parent()
                .and_then(Path::parent)
                .and_then(Path::file_name)
                .and_then(|s| s.to_str());
            if let (Some(year), Some(day), Some(stem)) = (year, day, stem) {
                if is_snapshot_stem(stem) {
                    keys.push(SnapshotKey {
                        year: year.to_string(),
                        day: day.to_string(),
                        time: stem.to_string(),
                    });
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn list_day_snapshots(&self, date: NaiveDate) -> Result<Vec<SnapshotKey>> {
        let year = format!("{:04}", date.year());
        let day = date_key(date);
        let dir = self.root.join(SNAPSHOT_DIR).join(&year).join(&day);
        Ok(self
            .read_dir_names(&dir, false)?
            .into_iter()
            .filter(|stem| is_snapshot_stem(stem))
            .map(|time| SnapshotKey {
                year: year.clone(),
                day: day.clone(),
                time,
            })
            .collect())
    }

    fn list_emergency_dates(&self) -> Result<Vec<NaiveDate>> {
        let base = self.root.join(EMERGENCY_DIR);
        let mut dates = Vec::new();
        for year in self.read_dir_names(&base, true)? {
            for day in self.read_dir_names(&base.join(&year), true)? {
                if let Some(date) = parse_date_key(&day) {
                    dates.push(date);
                }
            }
        }
        dates.sort();
        Ok(dates)
    }

    fn list_record_times(&self, date: NaiveDate) -> Result<Vec<String>> {
        let dir = self
            .root
            .join(EMERGENCY_DIR)
            .join(format!("{:04}", date.year()))
            .join(date_key(date));
        Ok(self
            .read_dir_names(&dir, false)?
            .into_iter()
            .filter(|stem| is_time_stem(stem))
            .collect())
    }

    fn list_month_indexes(&self) -> Result<Vec<YearMonth>> {
        let base = self.root.join(EMERGENCY_DIR);
        let pattern = format!(
            "{}/[0-9][0-9][0-9][0-9]/[0-9][0-9][0-9][0-9][0-9][0-9].json",
            glob::Pattern::escape(&base.to_string_lossy())
        );
        let paths = glob::glob(&pattern).map_err(|e| {
            ArchiveError::io(&base, std::io::Error::new(ErrorKind::InvalidInput, e))
        })?;
        let mut months: Vec<YearMonth> = paths
            .filter_map(|p| p.ok())
            .filter_map(|p| {
                p.file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(YearMonth::parse)
            })
            .collect();
        months.sort();
        months.dedup();
        Ok(months)
    }
}

/// In-memory archive keyed by relative path. Used by tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    files: BTreeMap<String, String>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place arbitrary contents at a relative path, bypassing key typing.
    pub fn insert_raw(&mut self, relative_path: &str, contents: &str) {
        self.files
            .insert(relative_path.to_string(), contents.to_string());
    }

    pub fn files(&self) -> &BTreeMap<String, String> {
        &self.files
    }

    fn split(path: &str) -> Vec<&str> {
        path.split('/').collect()
    }
}

impl ArchiveStore for MemoryArchive {
    fn read(&self, key: &ArchiveKey) -> Result<Option<String>> {
        Ok(self.files.get(&key.relative_path()).cloned())
    }

    fn write(&mut self, key: &ArchiveKey, contents: &str) -> Result<()> {
        self.files.insert(key.relative_path(), contents.to_string());
        Ok(())
    }

    fn exists(&self, key: &ArchiveKey) -> bool {
        self.files.contains_key(&key.relative_path())
    }

    fn remove(&mut self, key: &ArchiveKey) -> Result<bool> {
        Ok(self.files.remove(&key.relative_path()).is_some())
    }

    fn list_snapshots(&self) -> Result<Vec<SnapshotKey>> {
        let mut keys: Vec<SnapshotKey> = self
            .files
            .keys()
            .filter_map(|path| match Self::split(path).as_slice() {
                [SNAPSHOT_DIR, year, day, file] => file
                    .strip_suffix(".json")
                    .filter(|stem| is_snapshot_stem(stem))
                    .map(|stem| SnapshotKey {
                        year: year.to_string(),
                        day: day.to_string(),
                        time: stem.to_string(),
                    }),
                _ => None,
            })
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn list_day_snapshots(&self, date: NaiveDate) -> Result<Vec<SnapshotKey>> {
        let day = date_key(date);
        let year = format!("{:04}", date.year());
        Ok(self
            .list_snapshots()?
            .into_iter()
            .filter(|key| key.day == day && key.year == year)
            .collect())
    }

    fn list_emergency_dates(&self) -> Result<Vec<NaiveDate>> {
        let dates: BTreeSet<NaiveDate> = self
            .files
            .keys()
            .filter_map(|path| match Self::split(path).as_slice() {
                [EMERGENCY_DIR, _year, day, _file] => parse_date_key(day),
                _ => None,
            })
            .collect();
        Ok(dates.into_iter().collect())
    }

    fn list_record_times(&self, date: NaiveDate) -> Result<Vec<String>> {
        let day = date_key(date);
        let mut times: Vec<String> = self
            .files
            .keys()
            .filter_map(|path| match Self::split(path).as_slice() {
                [EMERGENCY_DIR, _year, d, file] if *d == day => file
                    .strip_suffix(".json")
                    .filter(|stem| is_time_stem(stem))
                    .map(str::to_string),
                _ => None,
            })
            .collect();
        times.sort();
        Ok(times)
    }

    fn list_month_indexes(&self) -> Result<Vec<YearMonth>> {
        let months: BTreeSet<YearMonth> = self
            .files
            .keys()
            .filter_map(|path| match Self::split(path).as_slice() {
                [EMERGENCY_DIR, year, file] if year.len() == 4 => {
                    file.strip_suffix(".json").and_then(YearMonth::parse)
                }
                _ => None,
            })
            .collect();
        Ok(months.into_iter().collect())
    }
}

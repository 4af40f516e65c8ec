use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::LazyLock;

pub const STORAGE_GENERATION_LABEL: &str = "儲能(Energy Storage System)";
pub const STORAGE_LOAD_LABEL: &str = "儲能負載(Energy Storage Load)";
pub const SUBTOTAL_MARKER: &str = "小計";
const SOLAR_LABEL: &str = "太陽能";

pub const DEFAULT_THERMAL_SOURCES: &[&str] = &[
    "燃煤(Coal)",
    "汽電共生(Co-Gen)",
    "民營電廠-燃煤(IPP-Coal)",
    "燃氣(LNG)",
    "民營電廠-燃氣(IPP-LNG)",
    "燃油(Oil)",
    "輕油(Diesel)",
];

static MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// Remove HTML tags the feed embeds in category and name cells.
pub fn strip_markup(raw: &str) -> Cow<'_, str> {
    MARKUP.replace_all(raw, "")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticTag {
    StorageGeneration,
    StorageLoad,
    ThermalSubtotal,
    Solar,
    Other,
}

/// Classification against the default thermal source list.
pub fn classify(category_raw: &str, unit_name: &str) -> SemanticTag {
    classify_with(category_raw, unit_name, DEFAULT_THERMAL_SOURCES)
}

pub fn classify_with<S: AsRef<str>>(
    category_raw: &str,
    unit_name: &str,
    thermal_sources: &[S],
) -> SemanticTag {
    let category = strip_markup(category_raw);
    let category = category.trim();

    if category.contains(STORAGE_GENERATION_LABEL) {
        return SemanticTag::StorageGeneration;
    }
    if category.contains(STORAGE_LOAD_LABEL) {
        return SemanticTag::StorageLoad;
    }
    if unit_name.contains(SUBTOTAL_MARKER)
        && thermal_sources.iter().any(|s| s.as_ref() == category)
    {
        return SemanticTag::ThermalSubtotal;
    }
    // The feed tags solar rows in markup, so look at the raw cell too.
    if category_raw.to_lowercase().contains("solar") || category.contains(SOLAR_LABEL) {
        return SemanticTag::Solar;
    }
    SemanticTag::Other
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategy {
    /// Numbered unit family; annotations after the number are allowed.
    Prefix,
    Exact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchPattern {
    pub pattern: String,
    #[serde(rename = "match", default = "default_strategy")]
    pub strategy: MatchStrategy,
}

fn default_strategy() -> MatchStrategy {
    MatchStrategy::Exact
}

impl WatchPattern {
    pub fn exact(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            strategy: MatchStrategy::Exact,
        }
    }

    pub fn prefix(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            strategy: MatchStrategy::Prefix,
        }
    }

    /// `candidate` must already be trimmed and markup-free.
    pub fn matches(&self, candidate: &str) -> bool {
        match self.strategy {
            MatchStrategy::Exact => candidate == self.pattern,
            MatchStrategy::Prefix => match candidate.strip_prefix(self.pattern.as_str()) {
                // "#3" must not claim "#31".
                Some(rest) => !rest.starts_with(|c: char| c.is_ascii_digit()),
                None => false,
            },
        }
    }
}

/// Ordered list of reserve/peaking units monitored for activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchList(pub Vec<WatchPattern>);

impl Default for WatchList {
    fn default() -> Self {
        WatchList(vec![
            WatchPattern::exact("核二Gas1"),
            WatchPattern::exact("核二Gas2"),
            WatchPattern::exact("核三Gas1"),
            WatchPattern::exact("核三Gas2"),
            WatchPattern::exact("台中Gas1&amp;2"),
            WatchPattern::exact("台中Gas3&amp;4"),
            WatchPattern::prefix("興達#1"),
            WatchPattern::prefix("興達#2"),
            WatchPattern::prefix("興達#3"),
            WatchPattern::prefix("興達#4"),
            WatchPattern::exact("大林#5"),
        ])
    }
}

impl WatchList {
    pub fn patterns(&self) -> &[WatchPattern] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// First watch-list entry matching `name`, in list order.
pub fn match_emergency<'a>(name: &str, watch_list: &'a WatchList) -> Option<&'a WatchPattern> {
    let cleaned = strip_markup(name);
    let candidate = cleaned.trim();
    if candidate.is_empty() {
        return None;
    }
    watch_list.patterns().iter().find(|p| p.matches(candidate))
}

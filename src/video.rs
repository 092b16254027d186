//! Discovered video records and duration budget trimming

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// One candidate video returned by a source search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    /// Unique within `source`
    pub id: String,
    pub source: String,
    /// Remote location, or a local path once the record is a chunk
    pub url: String,
    /// Seconds; `None` until the source reports it or a default is applied
    pub duration: Option<f64>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    /// Lowercase extension without the dot
    #[serde(default)]
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_local: bool,
    /// Id of the record this chunk was cut from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Source-specific fields not used by control flow
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VideoRecord {
    pub fn new(source: &str, id: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        let format = extension_of(&url).unwrap_or_default();
        Self {
            id: id.into(),
            source: source.to_string(),
            url,
            format,
            ..Default::default()
        }
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Assign `default` when the duration is unknown and clamp negatives to zero
    pub fn ensure_duration(&mut self, default: f64) {
        self.duration = match self.duration {
            Some(d) if d.is_finite() => Some(d.max(0.0)),
            _ => Some(default.max(0.0)),
        };
    }

    pub fn seconds(&self) -> f64 {
        self.duration.unwrap_or(0.0)
    }

    pub fn extension(&self) -> String {
        if !self.format.is_empty() {
            return self.format.trim_start_matches('.').to_ascii_lowercase();
        }
        extension_of(&self.url).unwrap_or_else(|| "mp4".to_string())
    }

    /// Local file name for the downloaded copy
    pub fn file_name(&self) -> String {
        format!("{}_{}.{}", self.source, self.id, self.extension())
    }

    pub fn is_chunk(&self) -> bool {
        self.parent_id.is_some() || self.id.contains("_chunk_")
    }

    pub fn key(&self) -> (String, String) {
        (self.source.clone(), self.id.clone())
    }

    /// Flat metadata handed to validators and uploaders
    pub fn metadata(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Lowercase extension of a URL or path, ignoring any query string
pub fn extension_of(location: &str) -> Option<String> {
    let without_query = location.split(['?', '#']).next().unwrap_or(location);
    let last_segment = without_query.rsplit('/').next().unwrap_or(without_query);
    Path::new(last_segment)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 5)
        .map(|e| e.to_ascii_lowercase())
}

/// What to do with a first record that alone exceeds the budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overshoot {
    /// Total duration never exceeds the budget
    Forbid,
    /// Keep the first record even if it alone exceeds the budget
    AllowFirst,
}

/// Greedy first-fit: accept records in order until the next one would exceed
/// `budget_secs`, then stop
pub fn trim_to_budget(
    records: Vec<VideoRecord>,
    budget_secs: f64,
    overshoot: Overshoot,
) -> Vec<VideoRecord> {
    split_at_budget(records, budget_secs, overshoot).0
}

/// [`trim_to_budget`] that also hands back the records it cut, in order
pub fn split_at_budget(
    mut records: Vec<VideoRecord>,
    budget_secs: f64,
    overshoot: Overshoot,
) -> (Vec<VideoRecord>, Vec<VideoRecord>) {
    let mut total = 0.0;
    let mut kept = 0;

    for record in &records {
        let seconds = record.seconds();
        let fits = total + seconds <= budget_secs + f64::EPSILON * budget_secs.abs().max(1.0);
        if fits || (kept == 0 && overshoot == Overshoot::AllowFirst) {
            total += seconds;
            kept += 1;
        } else {
            break;
        }
    }

    let rest = records.split_off(kept);
    (records, rest)
}

pub fn total_seconds(records: &[VideoRecord]) -> f64 {
    records.iter().map(VideoRecord::seconds).sum()
}

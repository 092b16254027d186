use super::{SourceContext, VideoSource};
use crate::config::SourceSettings;
use crate::error::{CollectorError, Result};
use crate::video::VideoRecord;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, warn};

const BASE_URL: &str = "https://archive.org";
const MIN_PIXELS: u64 = 512 * 512;
const SEARCH_FIELDS: &str =
    "identifier,title,description,creator,date,subject,mediatype,collection,downloads,format";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchResponse {
    response: SearchDocs,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchDocs {
    docs: Vec<Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ItemMetadata {
    metadata: Map<String, Value>,
    files: Vec<Map<String, Value>>,
}

/// Best mp4 rendition of an item
struct ItemFile {
    name: String,
    width: u32,
    height: u32,
    length: Option<f64>,
}

/// Internet Archive movies collection via the advanced search API
pub struct InternetArchiveSource {
    ctx: SourceContext,
    base_url: String,
    per_page: u32,
}

impl InternetArchiveSource {
    pub fn new(ctx: SourceContext, settings: &SourceSettings) -> Self {
        Self {
            ctx,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            per_page: settings.per_page.unwrap_or(50).max(1),
        }
    }

    async fn item_metadata(&self, identifier: &str) -> Result<ItemMetadata> {
        let url = format!("{}/metadata/{}", self.base_url, identifier);
        self.ctx.client.get_json(&url, &[], None).await
    }

    async fn to_record(&self, doc: Map<String, Value>) -> Option<VideoRecord> {
        if first_string(doc.get("mediatype")).as_deref() != Some("movies") {
            return None;
        }
        let identifier = first_string(doc.get("identifier"))?;

        let item = match self.item_metadata(&identifier).await {
            Ok(item) => item,
            Err(e) => {
                warn!("Internet Archive metadata for {} failed: {}", identifier, e);
                return None;
            }
        };
        let Some(best) = best_mp4(&item.files) else {
            debug!("Internet Archive {} has no mp4 of at least 512x512", identifier);
            return None;
        };

        let url = format!("{}/download/{}/{}", self.base_url, identifier, best.name);
        let mut record = VideoRecord::new("internet_archive", identifier.clone(), url)
            .with_resolution(best.width, best.height);
        record.duration = first_string(item.metadata.get("runtime"))
            .and_then(|r| parse_runtime(&r))
            .or(best.length);
        record.title = first_string(doc.get("title"));
        record.thumbnail = Some(self.thumbnail(&identifier, &item.files));
        record.license = first_string(item.metadata.get("licenseurl"))
            .or_else(|| first_string(item.metadata.get("license")));
        record.tags = strings(doc.get("subject"));

        for key in ["description", "date"] {
            if let Some(value) = first_string(doc.get(key)) {
                record.extra.insert(key.to_string(), Value::String(value));
            }
        }
        record.extra.insert(
            "user".to_string(),
            Value::String(first_string(doc.get("creator")).unwrap_or_else(|| "Unknown".to_string())),
        );
        record.extra.insert(
            "collection".to_string(),
            Value::from(strings(doc.get("collection"))),
        );
        if let Some(downloads) = doc.get("downloads").and_then(number) {
            record.extra.insert("downloads".to_string(), Value::from(downloads));
        }
        record.extra.insert(
            "original_url".to_string(),
            Value::String(format!("https://archive.org/details/{}", identifier)),
        );
        Some(record)
    }

    fn thumbnail(&self, identifier: &str, files: &[Map<String, Value>]) -> String {
        files
            .iter()
            .filter_map(|f| first_string(f.get("name")))
            .find(|name| {
                let lower = name.to_ascii_lowercase();
                lower.contains("thumb")
                    && [".jpg", ".jpeg", ".png"].iter().any(|ext| lower.ends_with(ext))
            })
            .map(|name| format!("{}/download/{}/{}", self.base_url, identifier, name))
            .unwrap_or_else(|| format!("{}/services/img/{}", self.base_url, identifier))
    }
}

/// Highest resolution mp4 that meets the minimum size
fn best_mp4(files: &[Map<String, Value>]) -> Option<ItemFile> {
    files
        .iter()
        .filter_map(|file| {
            let name = first_string(file.get("name"))?;
            if !name.to_ascii_lowercase().ends_with(".mp4") {
                return None;
            }
            let dimension = |key: &str| file.get(key).and_then(number).unwrap_or(0.0) as u32;
            Some(ItemFile {
                width: dimension("width"),
                height: dimension("height"),
                length: first_string(file.get("length")).and_then(|l| parse_runtime(&l)),
                name,
            })
        })
        .filter(|f| u64::from(f.width) * u64::from(f.height) >= MIN_PIXELS)
        .max_by_key(|f| u64::from(f.width) * u64::from(f.height))
}

/// Seconds from "12 min", "mm:ss", "h:mm:ss" or a plain number of seconds
fn parse_runtime(runtime: &str) -> Option<f64> {
    let runtime = runtime.trim().to_ascii_lowercase();
    if let Some((minutes, _)) = runtime.split_once("min") {
        return minutes.trim().parse::<f64>().ok().map(|m| m * 60.0);
    }
    if runtime.contains(':') {
        let parts: Vec<f64> = runtime
            .split(':')
            .map(|p| p.trim().parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .ok()?;
        return match parts.as_slice() {
            [m, s] => Some(m * 60.0 + s),
            [h, m, s] => Some(h * 3600.0 + m * 60.0 + s),
            _ => None,
        };
    }
    runtime.parse::<f64>().ok().filter(|s| s.is_finite() && *s >= 0.0)
}

/// Archive fields arrive as a scalar or a list; take the first string
fn first_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items.iter().find_map(|v| first_string(Some(v))),
        _ => None,
    }
}

fn strings(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(|v| first_string(Some(v))).collect(),
        Some(Value::String(s)) => s
            .split(';')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl VideoSource for InternetArchiveSource {
    fn name(&self) -> &str {
        "internet_archive"
    }

    async fn search(&self, query: &str, page: u32) -> Result<Vec<VideoRecord>> {
        let params = [
            ("q", format!("{} AND mediatype:movies AND format:MP4", query)),
            ("fl[]", SEARCH_FIELDS.to_string()),
            ("sort[]", "downloads desc".to_string()),
            ("rows", self.per_page.to_string()),
            ("page", page.to_string()),
            ("output", "json".to_string()),
        ];
        let url = format!("{}/advancedsearch.php", self.base_url);
        let response: SearchResponse = self
            .ctx
            .client
            .get_json(&url, &params, None)
            .await
            .map_err(|e| CollectorError::SearchFailed {
                source_name: "internet_archive".to_string(),
                message: e.to_string(),
            })?;

        let mut records = Vec::new();
        for doc in response.response.docs {
            if let Some(record) = self.to_record(doc).await {
                records.push(record);
            }
        }
        debug!(
            "Internet Archive '{}' page {}: {} videos",
            query,
            page,
            records.len()
        );
        Ok(records)
    }

    async fn download(&self, url: &str, destination: &Path) -> Result<()> {
        self.ctx.download(url, destination).await
    }
}

use super::{SourceContext, VideoSource};
use crate::config::SourceSettings;
use crate::error::{CollectorError, Result};
use crate::video::VideoRecord;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

const BASE_URL: &str = "https://pixabay.com/api/videos/";
const RENDITIONS: [&str; 4] = ["large", "medium", "small", "tiny"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchResponse {
    #[serde(rename = "totalHits")]
    total_hits: u64,
    hits: Vec<Hit>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Hit {
    id: u64,
    #[serde(rename = "pageURL")]
    page_url: String,
    tags: String,
    duration: Option<f64>,
    user: String,
    #[serde(rename = "userImageURL")]
    user_image_url: String,
    videos: HashMap<String, Rendition>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Rendition {
    url: String,
    width: u32,
    height: u32,
    size: u64,
}

/// Pixabay video API
pub struct PixabaySource {
    ctx: SourceContext,
    api_key: String,
    base_url: String,
    per_page: u32,
}

impl PixabaySource {
    pub fn new(ctx: SourceContext, api_key: String, settings: &SourceSettings) -> Self {
        Self {
            ctx,
            api_key,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| BASE_URL.to_string()),
            per_page: settings.per_page.unwrap_or(20).clamp(3, 200),
        }
    }

    fn to_record(hit: Hit) -> Option<VideoRecord> {
        let Hit {
            id,
            page_url,
            tags,
            duration,
            user,
            user_image_url,
            mut videos,
        } = hit;

        // Largest rendition that actually has a URL
        let best = RENDITIONS
            .iter()
            .filter_map(|name| videos.remove(*name))
            .find(|r| !r.url.is_empty())?;

        let mut record = VideoRecord::new("pixabay", id.to_string(), best.url)
            .with_resolution(best.width, best.height);
        record.duration = duration;
        if record.format.is_empty() {
            record.format = "mp4".to_string();
        }
        record.tags = tags
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        record.title = Some(record.tags.join(" ")).filter(|t| !t.is_empty());
        record.thumbnail = Some(user_image_url).filter(|t| !t.is_empty());
        record.license = Some("Pixabay License".to_string());
        record.extra.insert("user".to_string(), Value::String(user));
        record
            .extra
            .insert("page_url".to_string(), Value::String(page_url));
        record
            .extra
            .insert("size_bytes".to_string(), Value::from(best.size));
        Some(record)
    }
}

#[async_trait]
impl VideoSource for PixabaySource {
    fn name(&self) -> &str {
        "pixabay"
    }

    async fn search(&self, query: &str, page: u32) -> Result<Vec<VideoRecord>> {
        let params = [
            ("key", self.api_key.clone()),
            ("q", query.to_string()),
            ("page", page.to_string()),
            ("per_page", self.per_page.to_string()),
            ("safesearch", "true".to_string()),
            ("min_width", "512".to_string()),
            ("min_height", "512".to_string()),
        ];
        let response: SearchResponse = self
            .ctx
            .client
            .get_json(&self.base_url, &params, None)
            .await
            .map_err(|e| CollectorError::SearchFailed {
                source_name: "pixabay".to_string(),
                message: e.to_string(),
            })?;

        let total_hits = response.total_hits;
        let records: Vec<_> = response
            .hits
            .into_iter()
            .filter_map(Self::to_record)
            .collect();
        debug!(
            "Pixabay '{}' page {}: {} videos ({} total hits)",
            query,
            page,
            records.len(),
            total_hits
        );
        Ok(records)
    }

    async fn download(&self, url: &str, destination: &Path) -> Result<()> {
        self.ctx.download(url, destination).await
    }
}

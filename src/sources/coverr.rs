use super::{SourceContext, VideoSource};
use crate::config::SourceSettings;
use crate::error::Result;
use crate::extractor::PageExtractor;
use crate::video::VideoRecord;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

const BASE_URL: &str = "https://coverr.co";

/// Coverr, scraped from its HTML search and video pages
pub struct CoverrSource {
    ctx: SourceContext,
    base_url: String,
    per_page: u32,
    extractor: PageExtractor,
}

impl CoverrSource {
    pub fn new(ctx: SourceContext, settings: &SourceSettings) -> Result<Self> {
        Ok(Self {
            ctx,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            per_page: settings.per_page.unwrap_or(20),
            extractor: PageExtractor::new()?,
        })
    }

    async fn video_details(&self, page_url: &str) -> Result<Option<VideoRecord>> {
        let html = self.ctx.client.get_text(page_url, &[]).await?;
        let Some(video) = self.extractor.extract_page_video(&html, page_url) else {
            return Ok(None);
        };

        let id = page_url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(page_url)
            .to_string();

        let mut record = VideoRecord::new("coverr", id, video.url);
        record.duration = video.duration_secs;
        record.width = video.width.unwrap_or(0);
        record.height = video.height.unwrap_or(0);
        if let Some(format) = video.format {
            record.format = format;
        }
        record.title = video.title;
        record.thumbnail = video.thumbnail_url;
        record.tags = video.tags;
        record.license = Some("Coverr License".to_string());
        record
            .extra
            .insert("original_url".to_string(), Value::String(page_url.to_string()));
        if let Some(description) = video.description {
            record
                .extra
                .insert("description".to_string(), Value::String(description));
        }
        Ok(Some(record))
    }
}

#[async_trait]
impl VideoSource for CoverrSource {
    fn name(&self) -> &str {
        "coverr"
    }

    async fn search(&self, query: &str, page: u32) -> Result<Vec<VideoRecord>> {
        let search_url = format!("{}/search/{}", self.base_url, query.trim().replace(' ', "-"));
        let params = if page > 1 {
            vec![("page", page.to_string())]
        } else {
            Vec::new()
        };
        let html = self.ctx.client.get_text(&search_url, &params).await?;

        let links = self.extractor.extract_links(&html, &search_url, "/videos/");
        let mut records = Vec::new();
        for link in links.into_iter().take(self.per_page as usize) {
            match self.video_details(&link).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => debug!("No video found on {}", link),
                Err(e) => warn!("Failed to read Coverr page {}: {}", link, e),
            }
        }

        debug!("Coverr '{}' page {}: {} videos", query, page, records.len());
        Ok(records)
    }

    async fn download(&self, url: &str, destination: &Path) -> Result<()> {
        self.ctx.download(url, destination).await
    }
}

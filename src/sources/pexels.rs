use super::{SourceContext, VideoSource};
use crate::config::SourceSettings;
use crate::error::{CollectorError, Result};
use crate::video::VideoRecord;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

const BASE_URL: &str = "https://api.pexels.com/videos";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchResponse {
    videos: Vec<PexelsVideo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PexelsVideo {
    id: u64,
    url: String,
    image: String,
    duration: Option<f64>,
    user: PexelsUser,
    video_files: Vec<PexelsFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PexelsUser {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PexelsFile {
    link: String,
    width: Option<u32>,
    height: Option<u32>,
    file_type: String,
    fps: Option<f64>,
}

/// Pexels video search API
pub struct PexelsSource {
    ctx: SourceContext,
    api_key: String,
    base_url: String,
    per_page: u32,
}

impl PexelsSource {
    pub fn new(ctx: SourceContext, api_key: String, settings: &SourceSettings) -> Self {
        let base_url = settings
            .base_url
            .clone()
            .unwrap_or_else(|| BASE_URL.to_string());
        Self {
            ctx,
            api_key,
            base_url: base_url
                .trim_end_matches('/')
                .trim_end_matches("/search")
                .to_string(),
            per_page: settings.per_page.unwrap_or(80),
        }
    }

    fn to_record(&self, video: PexelsVideo) -> Option<VideoRecord> {
        // Highest resolution rendition
        let best = video
            .video_files
            .into_iter()
            .filter(|f| !f.link.is_empty())
            .max_by_key(|f| f.width.unwrap_or(0) as u64 * f.height.unwrap_or(0) as u64)?;

        let mut record = VideoRecord::new("pexels", video.id.to_string(), best.link)
            .with_resolution(best.width.unwrap_or(0), best.height.unwrap_or(0));
        record.duration = video.duration;
        if let Some(format) = best.file_type.rsplit('/').next().filter(|f| !f.is_empty()) {
            record.format = format.to_ascii_lowercase();
        }
        record.title = video
            .url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .map(|slug| slug.replace('-', " "))
            .filter(|t| !t.is_empty());
        record.thumbnail = Some(video.image).filter(|t| !t.is_empty());
        record.license = Some("Pexels License".to_string());
        record
            .extra
            .insert("user".to_string(), Value::String(video.user.name));
        record
            .extra
            .insert("original_url".to_string(), Value::String(video.url));
        if let Some(fps) = best.fps {
            record.extra.insert("fps".to_string(), Value::from(fps));
        }
        Some(record)
    }
}

#[async_trait]
impl VideoSource for PexelsSource {
    fn name(&self) -> &str {
        "pexels"
    }

    async fn search(&self, query: &str, page: u32) -> Result<Vec<VideoRecord>> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&self.api_key)
            .map_err(|e| CollectorError::ConfigError(format!("Invalid Pexels API key: {}", e)))?;
        headers.insert(AUTHORIZATION, auth);

        let url = format!("{}/search", self.base_url);
        let params = [
            ("query", query.to_string()),
            ("page", page.to_string()),
            ("per_page", self.per_page.to_string()),
        ];
        let response: SearchResponse = self
            .ctx
            .client
            .get_json(&url, &params, Some(headers))
            .await
            .map_err(|e| CollectorError::SearchFailed {
                source_name: "pexels".to_string(),
                message: e.to_string(),
            })?;

        let records: Vec<_> = response
            .videos
            .into_iter()
            .filter_map(|v| self.to_record(v))
            .collect();
        debug!("Pexels '{}' page {}: {} videos", query, page, records.len());
        Ok(records)
    }

    async fn download(&self, url: &str, destination: &Path) -> Result<()> {
        self.ctx.download(url, destination).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollectorError;
    use crate::sources::test_context;
    use serde_json::json;
    use tempfile::tempdir;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer) -> SourceSettings {
        SourceSettings {
            base_url: Some(format!("{}/videos", server.uri())),
            per_page: None,
        }
    }

    #[tokio::test]
    async fn test_search_picks_largest_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/videos/search"))
            .and(header("authorization", "secret"))
            .and(query_param("query", "ocean"))
            .and(query_param("page", "2"))
            .and(query_param("per_page", "80"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "videos": [
                    {
                        "id": 123,
                        "url": "https://www.pexels.com/video/ocean-waves-123/",
                        "image": "https://images.test/123.jpg",
                        "duration": 14,
                        "user": {"name": "Ana"},
                        "video_files": [
                            {"link": "https://cdn.test/123-sd.mp4", "width": 640, "height": 360, "file_type": "video/mp4"},
                            {"link": "https://cdn.test/123-uhd.mp4", "width": 3840, "height": 2160, "file_type": "video/mp4", "fps": 25.0},
                            {"link": "https://cdn.test/123-hd.mp4", "width": 1920, "height": 1080, "file_type": "video/mp4"}
                        ]
                    },
                    {"id": 124, "url": "https://www.pexels.com/video/empty-124/", "video_files": []}
                ]
            })))
            .mount(&server)
            .await;

        let source = PexelsSource::new(test_context(), "secret".to_string(), &settings(&server));
        let records = source.search("ocean", 2).await.unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id, "123");
        assert_eq!(record.source, "pexels");
        assert_eq!(record.url, "https://cdn.test/123-uhd.mp4");
        assert_eq!((record.width, record.height), (3840, 2160));
        assert_eq!(record.duration, Some(14.0));
        assert_eq!(record.format, "mp4");
        assert_eq!(record.title.as_deref(), Some("ocean waves 123"));
        assert_eq!(record.extra["user"], "Ana");
        assert_eq!(record.extra["fps"], 25.0);
    }

    #[tokio::test]
    async fn test_search_error_is_reported_per_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/videos/search"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let source = PexelsSource::new(test_context(), "secret".to_string(), &settings(&server));
        let err = source.search("ocean", 1).await.unwrap_err();
        assert!(matches!(err, CollectorError::SearchFailed { ref source_name, .. } if source_name == "pexels"));
    }

    #[tokio::test]
    async fn test_download_writes_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/123.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fake video bytes".to_vec()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let destination = dir.path().join("nested").join("pexels_123.mp4");
        let source = PexelsSource::new(test_context(), "secret".to_string(), &settings(&server));
        source
            .download(&format!("{}/files/123.mp4", server.uri()), &destination)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&destination).unwrap(), b"fake video bytes");
    }
}

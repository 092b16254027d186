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

const API_URL: &str = "https://commons.wikimedia.org/w/api.php";
const MIN_DIMENSION: u32 = 512;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QueryResponse {
    query: Option<QueryPages>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QueryPages {
    pages: HashMap<String, Page>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Page {
    title: String,
    index: u32,
    imageinfo: Vec<ImageInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImageInfo {
    url: String,
    width: u32,
    height: u32,
    mime: String,
    thumburl: String,
    user: String,
    duration: Option<f64>,
    metadata: Vec<MetadataEntry>,
    extmetadata: HashMap<String, ExtValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MetadataEntry {
    name: String,
    value: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExtValue {
    value: Value,
}

/// Wikimedia Commons file search, restricted to video files
pub struct WikimediaSource {
    ctx: SourceContext,
    api_url: String,
    per_page: u32,
}

impl WikimediaSource {
    pub fn new(ctx: SourceContext, settings: &SourceSettings) -> Self {
        Self {
            ctx,
            api_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| API_URL.to_string()),
            per_page: settings.per_page.unwrap_or(50),
        }
    }

    fn to_record(page: Page) -> Option<VideoRecord> {
        let file_name = page.title.strip_prefix("File:")?.to_string();
        let info = page.imageinfo.into_iter().next()?;

        if !info.mime.starts_with("video/")
            || info.width < MIN_DIMENSION
            || info.height < MIN_DIMENSION
        {
            return None;
        }

        let duration = info.duration.or_else(|| {
            info.metadata
                .iter()
                .find(|m| m.name == "length")
                .and_then(|m| number(&m.value))
        });
        let license = info
            .extmetadata
            .get("LicenseShortName")
            .or_else(|| info.extmetadata.get("License"))
            .and_then(|v| v.value.as_str())
            .map(str::to_string);
        let categories: Vec<String> = info
            .extmetadata
            .get("Categories")
            .and_then(|v| v.value.as_str())
            .map(|s| {
                s.split('|')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let mut record = VideoRecord::new("wikimedia", file_name.clone(), info.url)
            .with_resolution(info.width, info.height);
        record.duration = duration;
        if let Some(format) = info.mime.rsplit('/').next() {
            record.format = format.to_ascii_lowercase();
        }
        record.title = Some(file_name.clone());
        record.thumbnail = Some(info.thumburl).filter(|t| !t.is_empty());
        record.license = license;
        record.tags = categories;
        record.extra.insert("user".to_string(), Value::String(info.user));
        record.extra.insert(
            "original_url".to_string(),
            Value::String(format!(
                "https://commons.wikimedia.org/wiki/File:{}",
                file_name.replace(' ', "_")
            )),
        );
        Some(record)
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl VideoSource for WikimediaSource {
    fn name(&self) -> &str {
        "wikimedia"
    }

    async fn search(&self, query: &str, page: u32) -> Result<Vec<VideoRecord>> {
        let offset = page.saturating_sub(1) * self.per_page;
        let params = [
            ("action", "query".to_string()),
            ("format", "json".to_string()),
            ("generator", "search".to_string()),
            ("gsrsearch", format!("{} filetype:video", query)),
            ("gsrnamespace", "6".to_string()),
            ("gsrlimit", self.per_page.to_string()),
            ("gsroffset", offset.to_string()),
            ("prop", "imageinfo".to_string()),
            (
                "iiprop",
                "url|size|mime|metadata|extmetadata|user".to_string(),
            ),
            ("iiurlwidth", "800".to_string()),
        ];
        let response: QueryResponse = self
            .ctx
            .client
            .get_json(&self.api_url, &params, None)
            .await
            .map_err(|e| CollectorError::SearchFailed {
                source_name: "wikimedia".to_string(),
                message: e.to_string(),
            })?;

        // No "query" key means the search ran past the last result
        let Some(query_pages) = response.query else {
            return Ok(Vec::new());
        };

        let mut pages: Vec<Page> = query_pages.pages.into_values().collect();
        pages.sort_by_key(|p| p.index);
        let records: Vec<_> = pages.into_iter().filter_map(Self::to_record).collect();
        debug!("Wikimedia '{}' page {}: {} videos", query, page, records.len());
        Ok(records)
    }

    async fn download(&self, url: &str, destination: &Path) -> Result<()> {
        self.ctx.download(url, destination).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::test_context;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_search_keeps_large_video_files_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/w/api.php"))
            .and(query_param("gsrsearch", "ocean filetype:video"))
            .and(query_param("gsroffset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "query": {"pages": {
                    "200": {
                        "title": "File:Waves.webm",
                        "index": 2,
                        "imageinfo": [{
                            "url": "https://upload.test/Waves.webm",
                            "width": 1920, "height": 1080,
                            "mime": "video/webm",
                            "duration": 12.5
                        }]
                    },
                    "100": {
                        "title": "File:Beach.ogv",
                        "index": 1,
                        "imageinfo": [{
                            "url": "https://upload.test/Beach.ogv",
                            "width": 1280, "height": 720,
                            "mime": "video/ogg",
                            "metadata": [{"name": "length", "value": "30.0"}],
                            "extmetadata": {
                                "LicenseShortName": {"value": "CC BY-SA 4.0"},
                                "Categories": {"value": "Beaches|Sea"}
                            }
                        }]
                    },
                    "300": {
                        "title": "File:Tiny.webm",
                        "index": 3,
                        "imageinfo": [{"url": "https://upload.test/Tiny.webm", "width": 320, "height": 240, "mime": "video/webm"}]
                    },
                    "400": {
                        "title": "File:Photo.jpg",
                        "index": 4,
                        "imageinfo": [{"url": "https://upload.test/Photo.jpg", "width": 4000, "height": 3000, "mime": "image/jpeg"}]
                    }
                }}
            })))
            .mount(&server)
            .await;

        let settings = SourceSettings {
            base_url: Some(format!("{}/w/api.php", server.uri())),
            per_page: None,
        };
        let source = WikimediaSource::new(test_context(), &settings);
        let records = source.search("ocean", 1).await.unwrap();

        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["Beach.ogv", "Waves.webm"]);

        let beach = &records[0];
        assert_eq!(beach.duration, Some(30.0));
        assert_eq!(beach.format, "ogg");
        assert_eq!(beach.license.as_deref(), Some("CC BY-SA 4.0"));
        assert_eq!(beach.tags, vec!["Beaches", "Sea"]);
        assert_eq!(records[1].duration, Some(12.5));
    }

    #[tokio::test]
    async fn test_search_past_last_result_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/w/api.php"))
            .and(query_param("gsroffset", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"batchcomplete": ""})))
            .mount(&server)
            .await;

        let settings = SourceSettings {
            base_url: Some(format!("{}/w/api.php", server.uri())),
            per_page: Some(10),
        };
        let source = WikimediaSource::new(test_context(), &settings);
        assert!(source.search("ocean", 3).await.unwrap().is_empty());
    }
}

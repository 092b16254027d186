use super::{SourceContext, VideoSource};
use crate::config::SourceSettings;
use crate::error::{CollectorError, Result};
use crate::video::VideoRecord;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

const BASE_URL: &str = "https://images-api.nasa.gov";

#[derive(Debug, Deserialize)]
struct CollectionResponse<T> {
    #[serde(default)]
    collection: Collection<T>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Collection<T> {
    items: Vec<T>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchItem {
    href: String,
    data: Vec<ItemData>,
    links: Vec<Link>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ItemData {
    nasa_id: String,
    title: String,
    media_type: String,
    description: String,
    keywords: Vec<String>,
    photographer: Option<String>,
    center: String,
    date_created: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Link {
    href: String,
    rel: String,
    render: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Asset {
    href: String,
}

/// NASA Image and Video Library. Public domain, no key required.
pub struct NasaSource {
    ctx: SourceContext,
    base_url: String,
    per_page: u32,
}

impl NasaSource {
    pub fn new(ctx: SourceContext, settings: &SourceSettings) -> Self {
        Self {
            ctx,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            per_page: settings.per_page.unwrap_or(100).max(1),
        }
    }

    /// Original or high quality mp4 when listed, else the first mp4
    async fn video_url(&self, nasa_id: &str) -> Result<Option<String>> {
        let url = format!("{}/asset/{}", self.base_url, nasa_id);
        let assets: CollectionResponse<Asset> = self.ctx.client.get_json(&url, &[], None).await?;

        let mp4s: Vec<String> = assets
            .collection
            .items
            .into_iter()
            .map(|a| a.href)
            .filter(|href| href.to_ascii_lowercase().ends_with(".mp4"))
            .collect();
        let preferred = mp4s.iter().position(|href| {
            let href = href.to_ascii_lowercase();
            href.contains("orig") || href.contains("high")
        });
        Ok(mp4s.into_iter().nth(preferred.unwrap_or(0)))
    }

    async fn to_record(&self, item: SearchItem) -> Option<VideoRecord> {
        let SearchItem { href, data, links } = item;
        let data = data.into_iter().next()?;
        if !data.media_type.eq_ignore_ascii_case("video") || data.nasa_id.is_empty() {
            return None;
        }

        let url = match self.video_url(&data.nasa_id).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                debug!("NASA {} has no mp4 asset", data.nasa_id);
                return None;
            }
            Err(e) => {
                warn!("NASA asset lookup for {} failed: {}", data.nasa_id, e);
                return None;
            }
        };

        let mut record = VideoRecord::new("nasa", data.nasa_id.clone(), url);
        record.title = Some(data.title).filter(|t| !t.is_empty());
        record.thumbnail = links
            .into_iter()
            .find(|l| l.rel == "preview" && l.render.contains("image"))
            .map(|l| l.href);
        record.license = Some("Public Domain".to_string());
        record.tags = data.keywords;

        let user = data.photographer.unwrap_or_else(|| "NASA".to_string());
        for (key, value) in [
            ("user", user),
            ("description", data.description),
            ("center", data.center),
            ("date_created", data.date_created),
            ("original_url", href),
        ] {
            record.extra.insert(key.to_string(), Value::String(value));
        }
        Some(record)
    }
}

#[async_trait]
impl VideoSource for NasaSource {
    fn name(&self) -> &str {
        "nasa"
    }

    async fn search(&self, query: &str, page: u32) -> Result<Vec<VideoRecord>> {
        let params = [
            ("q", query.to_string()),
            ("media_type", "video".to_string()),
            ("page", page.to_string()),
            ("page_size", self.per_page.to_string()),
        ];
        let url = format!("{}/search", self.base_url);
        let response: CollectionResponse<SearchItem> = self
            .ctx
            .client
            .get_json(&url, &params, None)
            .await
            .map_err(|e| CollectorError::SearchFailed {
                source_name: "nasa".to_string(),
                message: e.to_string(),
            })?;

        let mut records = Vec::new();
        for item in response.collection.items {
            if let Some(record) = self.to_record(item).await {
                records.push(record);
            }
        }
        debug!("NASA '{}' page {}: {} videos", query, page, records.len());
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

    fn item(nasa_id: &str, media_type: &str) -> Value {
        json!({
            "href": format!("https://images-assets.nasa.gov/video/{}/collection.json", nasa_id),
            "data": [{
                "nasa_id": nasa_id,
                "title": format!("{} launch", nasa_id),
                "media_type": media_type,
                "keywords": ["launch", "rocket"],
                "center": "KSC",
                "date_created": "2021-05-01T00:00:00Z"
            }],
            "links": [
                {"href": "https://images-assets.nasa.gov/video/captions.srt", "rel": "captions"},
                {"href": format!("https://images-assets.nasa.gov/{}~thumb.jpg", nasa_id), "rel": "preview", "render": "image"}
            ]
        })
    }

    #[tokio::test]
    async fn test_search_resolves_assets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "launch"))
            .and(query_param("media_type", "video"))
            .and(query_param("page", "2"))
            .and(query_param("page_size", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "collection": {"items": [
                    item("KSC-1", "video"),
                    item("KSC-IMG", "image"),
                    item("KSC-2", "video"),
                    item("KSC-3", "video")
                ]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/asset/KSC-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "collection": {"items": [
                    {"href": "https://images-assets.nasa.gov/video/KSC-1/KSC-1~small.mp4"},
                    {"href": "https://images-assets.nasa.gov/video/KSC-1/KSC-1~orig.mp4"},
                    {"href": "https://images-assets.nasa.gov/video/KSC-1/KSC-1.srt"}
                ]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/asset/KSC-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "collection": {"items": [
                    {"href": "https://images-assets.nasa.gov/video/KSC-2/KSC-2~mobile.MP4"},
                    {"href": "https://images-assets.nasa.gov/video/KSC-2/KSC-2~preview.mp4"}
                ]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/asset/KSC-3"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let settings = SourceSettings {
            base_url: Some(server.uri()),
            per_page: None,
        };
        let source = NasaSource::new(test_context(), &settings);
        let records = source.search("launch", 2).await.unwrap();

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["KSC-1", "KSC-2"]);

        let first = &records[0];
        assert_eq!(first.url, "https://images-assets.nasa.gov/video/KSC-1/KSC-1~orig.mp4");
        assert_eq!(first.format, "mp4");
        assert_eq!(first.duration, None);
        assert_eq!(first.license.as_deref(), Some("Public Domain"));
        assert_eq!(
            first.thumbnail.as_deref(),
            Some("https://images-assets.nasa.gov/KSC-1~thumb.jpg")
        );
        assert_eq!(first.tags, vec!["launch", "rocket"]);
        assert_eq!(first.extra["user"], "NASA");
        assert_eq!(first.extra["center"], "KSC");

        assert_eq!(
            records[1].url,
            "https://images-assets.nasa.gov/video/KSC-2/KSC-2~mobile.MP4"
        );
    }

    #[tokio::test]
    async fn test_empty_collection_ends_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"collection": {"items": []}})))
            .mount(&server)
            .await;

        let settings = SourceSettings {
            base_url: Some(format!("{}/", server.uri())),
            per_page: Some(10),
        };
        let source = NasaSource::new(test_context(), &settings);
        assert!(source.search("nothing", 1).await.unwrap().is_empty());
    }
}

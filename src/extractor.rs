//! Video metadata extraction from HTML pages

use crate::error::{CollectorError, Result};
use crate::video::extension_of;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;
use url::Url;

/// Video described by a detail page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageVideo {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub duration_secs: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<String>,
    pub thumbnail_url: Option<String>,
    pub tags: Vec<String>,
}

struct Selectors {
    title: Selector,
    h1: Selector,
    video: Selector,
    source: Selector,
    link: Selector,
    meta: Selector,
    json_ld: Selector,
    duration: Selector,
    tag: Selector,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css)
        .map_err(|e| CollectorError::ExtractionFailed(format!("Bad selector {}: {:?}", css, e)))
}

fn regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| CollectorError::ExtractionFailed(e.to_string()))
}

/// Pulls video links and video metadata out of listing and detail pages
pub struct PageExtractor {
    selectors: Selectors,
    video_extensions: Vec<&'static str>,
    video_patterns: Vec<Regex>,
    iso_duration: Regex,
    clock_duration: Regex,
}

impl PageExtractor {
    pub fn new() -> Result<Self> {
        let video_patterns = vec![
            // Direct video file URLs
            regex(r#"https?://[^\s"'<>]+\.(mp4|webm|mkv|mov|m4v)(\?[^\s"'<>]*)?"#)?,
            // Video source assignments in inline scripts
            regex(
                r#"(?:src|source|file|url|video_url|videoUrl|video-url)["']?\s*[:=]\s*["']?(https?://[^\s"'<>]+\.(mp4|webm))"#,
            )?,
        ];

        Ok(Self {
            selectors: Selectors {
                title: selector("title")?,
                h1: selector("h1")?,
                video: selector("video")?,
                source: selector("source")?,
                link: selector("a[href]")?,
                meta: selector("meta")?,
                json_ld: selector(r#"script[type="application/ld+json"]"#)?,
                duration: selector(".video-duration")?,
                tag: selector(".tag")?,
            },
            video_extensions: vec!["mp4", "webm", "mkv", "mov", "m4v"],
            video_patterns,
            iso_duration: regex(r"^PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+(?:\.\d+)?)S)?$")?,
            clock_duration: regex(r"^(?:(\d+):)?(\d{1,2}):(\d{2})$")?,
        })
    }

    /// Absolute links whose path contains `path_marker`, in page order, de-duplicated
    pub fn extract_links(&self, html: &str, base_url: &str, path_marker: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for link in document.select(&self.selectors.link) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let Ok(resolved) = resolve_url(href, base_url) else {
                continue;
            };
            let path_matches = Url::parse(&resolved)
                .map(|u| u.path().contains(path_marker))
                .unwrap_or(false);
            if path_matches && seen.insert(resolved.clone()) {
                links.push(resolved);
            }
        }

        debug!("Found {} links under {} on {}", links.len(), path_marker, base_url);
        links
    }

    /// Best description of the page's video, from JSON-LD when present and
    /// from markup otherwise
    pub fn extract_page_video(&self, html: &str, page_url: &str) -> Option<PageVideo> {
        let document = Html::parse_document(html);

        let mut video = self
            .from_json_ld(&document, page_url)
            .or_else(|| self.from_markup(&document, html, page_url))?;

        if video.title.is_none() {
            video.title = first_text(&document, &self.selectors.h1)
                .or_else(|| first_text(&document, &self.selectors.title));
        }
        if video.duration_secs.is_none() {
            video.duration_secs = first_text(&document, &self.selectors.duration)
                .and_then(|text| self.parse_duration(&text));
        }
        if video.tags.is_empty() {
            video.tags = document
                .select(&self.selectors.tag)
                .map(element_text)
                .filter(|t| !t.is_empty())
                .collect();
        }
        if video.format.is_none() {
            video.format = extension_of(&video.url);
        }
        Some(video)
    }

    fn from_json_ld(&self, document: &Html, page_url: &str) -> Option<PageVideo> {
        for script in document.select(&self.selectors.json_ld) {
            let text: String = script.text().collect();
            let Ok(value) = serde_json::from_str::<Value>(&text) else {
                continue;
            };
            let candidates = match value {
                Value::Array(items) => items,
                Value::Object(ref map) if map.contains_key("@graph") => {
                    map["@graph"].as_array().cloned().unwrap_or_default()
                }
                other => vec![other],
            };

            for item in candidates {
                let Some(content_url) = item.get("contentUrl").and_then(Value::as_str) else {
                    continue;
                };
                let Ok(url) = resolve_url(content_url, page_url) else {
                    continue;
                };

                return Some(PageVideo {
                    url,
                    title: string_field(&item, "name"),
                    description: string_field(&item, "description"),
                    duration_secs: string_field(&item, "duration")
                        .and_then(|d| self.parse_duration(&d)),
                    width: number_field(&item, "width"),
                    height: number_field(&item, "height"),
                    format: string_field(&item, "encodingFormat")
                        .map(|f| f.rsplit('/').next().unwrap_or(&f).to_ascii_lowercase()),
                    thumbnail_url: string_field(&item, "thumbnailUrl"),
                    tags: string_field(&item, "keywords")
                        .map(|k| {
                            k.split(',')
                                .map(|t| t.trim().to_string())
                                .filter(|t| !t.is_empty())
                                .collect()
                        })
                        .unwrap_or_default(),
                });
            }
        }
        None
    }

    fn from_markup(&self, document: &Html, html: &str, page_url: &str) -> Option<PageVideo> {
        // <video src> and <source> children
        for video_el in document.select(&self.selectors.video) {
            let thumbnail_url = video_el
                .value()
                .attr("poster")
                .and_then(|p| resolve_url(p, page_url).ok());
            let width = video_el.value().attr("width").and_then(|w| w.parse().ok());
            let height = video_el.value().attr("height").and_then(|h| h.parse().ok());

            let src = video_el.value().attr("src").or_else(|| {
                video_el
                    .select(&self.selectors.source)
                    .find_map(|s| s.value().attr("src"))
            });
            if let Some(url) = src.and_then(|s| resolve_url(s, page_url).ok()) {
                return Some(PageVideo {
                    url,
                    thumbnail_url,
                    width,
                    height,
                    ..Default::default()
                });
            }
        }

        // og:video meta tags
        for meta in document.select(&self.selectors.meta) {
            let property = meta
                .value()
                .attr("property")
                .or_else(|| meta.value().attr("name"));
            if let (Some(prop), Some(content)) = (property, meta.value().attr("content")) {
                if matches!(prop, "og:video" | "og:video:url" | "og:video:secure_url") {
                    if let Ok(url) = resolve_url(content, page_url) {
                        return Some(PageVideo {
                            url,
                            ..Default::default()
                        });
                    }
                }
            }
        }

        // Download links, then raw URLs in scripts
        for link in document.select(&self.selectors.link) {
            if let Some(href) = link.value().attr("href") {
                if self.is_video_url(href) {
                    if let Ok(url) = resolve_url(href, page_url) {
                        return Some(PageVideo {
                            url,
                            ..Default::default()
                        });
                    }
                }
            }
        }

        self.video_patterns.iter().find_map(|pattern| {
            pattern.captures_iter(html).find_map(|cap| {
                let url = cap.get(1).filter(|m| m.as_str().starts_with("http")).or_else(|| cap.get(0))?;
                Some(PageVideo {
                    url: url.as_str().to_string(),
                    ..Default::default()
                })
            })
        })
    }

    fn is_video_url(&self, url: &str) -> bool {
        extension_of(url)
            .map(|ext| self.video_extensions.contains(&ext.as_str()))
            .unwrap_or(false)
    }

    /// Seconds from "PT1M30S", "1:30" / "01:02:03" or a bare number
    pub fn parse_duration(&self, text: &str) -> Option<f64> {
        let text = text.trim();
        if let Ok(seconds) = text.parse::<f64>() {
            return Some(seconds);
        }

        if let Some(cap) = self.iso_duration.captures(text) {
            let part = |i: usize| {
                cap.get(i)
                    .and_then(|m| m.as_str().parse::<f64>().ok())
                    .unwrap_or(0.0)
            };
            if cap.get(1).is_some() || cap.get(2).is_some() || cap.get(3).is_some() {
                return Some(part(1) * 3600.0 + part(2) * 60.0 + part(3));
            }
        }

        let cap = self.clock_duration.captures(text)?;
        let part = |i: usize| {
            cap.get(i)
                .and_then(|m| m.as_str().parse::<f64>().ok())
                .unwrap_or(0.0)
        };
        Some(part(1) * 3600.0 + part(2) * 60.0 + part(3))
    }
}

/// Absolute URL for `url` relative to the page it appeared on
pub fn resolve_url(url: &str, base: &str) -> Result<String> {
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(url.to_string());
    }

    if url.starts_with("//") {
        return Ok(format!("https:{}", url));
    }

    let base_url = Url::parse(base)?;
    Ok(base_url.join(url)?.to_string())
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}

fn string_field(item: &Value, key: &str) -> Option<String> {
    match item.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(values) => {
            let joined = values
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(",");
            (!joined.is_empty()).then_some(joined)
        }
        _ => None,
    }
}

fn number_field(item: &Value, key: &str) -> Option<u32> {
    match item.get(key)? {
        Value::Number(n) => n.as_u64().map(|v| v as u32),
        Value::String(s) => s.trim_end_matches("px").trim().parse().ok(),
        Value::Object(map) => map.get("value").and_then(|v| match v {
            Value::Number(n) => n.as_u64().map(|v| v as u32),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }),
        _ => None,
    }
}

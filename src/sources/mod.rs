//! Video sources: a uniform search/download interface over each provider

mod coverr;
mod internet_archive;
mod nasa;
mod pexels;
mod pixabay;
mod wikimedia;

pub use coverr::CoverrSource;
pub use internet_archive::InternetArchiveSource;
pub use nasa::NasaSource;
pub use pexels::PexelsSource;
pub use pixabay::PixabaySource;
pub use wikimedia::WikimediaSource;

use crate::client::HttpClient;
use crate::config::AppConfig;
use crate::downloader::Downloader;
use crate::error::Result;
use crate::video::VideoRecord;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// One external video provider.
///
/// An empty search page means the query is exhausted. A single instance is never
/// searched by two tasks at once.
#[async_trait]
pub trait VideoSource: Send + Sync {
    fn name(&self) -> &str;

    /// One page of results, 1-based
    async fn search(&self, query: &str, page: u32) -> Result<Vec<VideoRecord>>;

    /// Fetch `url` to `destination`
    async fn download(&self, url: &str, destination: &Path) -> Result<()>;
}

/// Shared HTTP plumbing for the built-in sources
#[derive(Clone)]
pub struct SourceContext {
    pub client: Arc<HttpClient>,
    pub downloader: Downloader,
}

impl SourceContext {
    pub fn new(client: Arc<HttpClient>) -> Self {
        Self {
            downloader: Downloader::new(client.clone()),
            client,
        }
    }

    pub async fn download(&self, url: &str, destination: &Path) -> Result<()> {
        self.downloader.download(url, destination).await.map(|_| ())
    }
}

/// Every built-in source that can run with the current environment.
///
/// Pexels and Pixabay need `PEXELS_API_KEY` / `PIXABAY_API_KEY`; they are skipped
/// with a warning when the key is missing.
pub fn default_sources(config: &AppConfig) -> Result<Vec<Arc<dyn VideoSource>>> {
    let ctx = SourceContext::new(Arc::new(HttpClient::new(&config.http)?));
    let mut sources: Vec<Arc<dyn VideoSource>> = Vec::new();

    match std::env::var("PEXELS_API_KEY") {
        Ok(key) if !key.is_empty() => {
            sources.push(Arc::new(PexelsSource::new(ctx.clone(), key, &config.source("pexels"))))
        }
        _ => warn!("PEXELS_API_KEY not set, skipping pexels"),
    }

    match std::env::var("PIXABAY_API_KEY") {
        Ok(key) if !key.is_empty() => sources.push(Arc::new(PixabaySource::new(
            ctx.clone(),
            key,
            &config.source("pixabay"),
        ))),
        _ => warn!("PIXABAY_API_KEY not set, skipping pixabay"),
    }

    sources.push(Arc::new(WikimediaSource::new(
        ctx.clone(),
        &config.source("wikimedia"),
    )));
    sources.push(Arc::new(NasaSource::new(ctx.clone(), &config.source("nasa"))));
    sources.push(Arc::new(InternetArchiveSource::new(
        ctx.clone(),
        &config.source("internet_archive"),
    )));
    sources.push(Arc::new(CoverrSource::new(ctx, &config.source("coverr"))?));

    info!(
        "Built-in sources: {}",
        sources.iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
    );
    Ok(sources)
}

/// Context with a fast, single-attempt client for mock-server tests
#[cfg(test)]
pub(crate) fn test_context() -> SourceContext {
    use crate::config::HttpConfig;

    let client = HttpClient::new(&HttpConfig {
        max_retries: 1,
        retry_delay_ms: 1,
        rate_limit_per_second: 1000.0,
        ..Default::default()
    })
    .expect("test client");
    SourceContext::new(Arc::new(client))
}

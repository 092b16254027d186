//! HTTP client with connection pooling, per-domain rate limiting and retries

use crate::config::HttpConfig;
use crate::error::{CollectorError, Result};
use dashmap::DashMap;
use governor::{Quota, RateLimiter};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, USER_AGENT},
    Client, Response, StatusCode,
};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

type DomainRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// HTTP client shared by every source
pub struct HttpClient {
    client: Client,
    config: HttpConfig,
    rate_limiters: Arc<DashMap<String, Arc<DomainRateLimiter>>>,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let user_agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|e| CollectorError::ConfigError(format!("Invalid user agent: {}", e)))?;
        headers.insert(USER_AGENT, user_agent);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "application/json,text/html,application/xhtml+xml,video/*;q=0.9,*/*;q=0.8",
            ),
        );
        if config.enable_compression {
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate, br"));
        }

        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(config.pool_size_per_host)
            .pool_idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .gzip(config.enable_compression)
            .brotli(config.enable_compression)
            .deflate(config.enable_compression);

        if let Some(ref proxy_url) = config.proxy_url {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| CollectorError::ConfigError(format!("Invalid proxy URL: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        Ok(Self {
            client: builder.build()?,
            config: config.clone(),
            rate_limiters: Arc::new(DashMap::new()),
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn get_rate_limiter(&self, domain: &str) -> Arc<DomainRateLimiter> {
        if let Some(limiter) = self.rate_limiters.get(domain) {
            return limiter.clone();
        }

        let rate = self.config.rate_limit_per_second;
        let quota = if rate >= 1.0 {
            Quota::per_second(nonzero(rate as u32))
        } else {
            // Sub-1/s rates become a per-minute quota
            Quota::per_minute(nonzero((rate * 60.0).max(1.0) as u32))
        };

        self.rate_limiters
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::direct(quota)))
            .clone()
    }

    fn get_domain(url: &str) -> Result<String> {
        let parsed = Url::parse(url)?;
        Ok(parsed.host_str().unwrap_or("unknown").to_string())
    }

    async fn wait_for_rate_limit(&self, url: &str) -> Result<()> {
        let domain = Self::get_domain(url)?;
        self.get_rate_limiter(&domain).until_ready().await;
        Ok(())
    }

    /// GET with automatic retries
    pub async fn get(&self, url: &str) -> Result<Response> {
        self.get_with_query(url, &[], None).await
    }

    /// GET with query parameters and extra headers, retrying 5xx, 429 and
    /// network failures
    pub async fn get_with_query(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: Option<HeaderMap>,
    ) -> Result<Response> {
        self.wait_for_rate_limit(url).await?;

        let max_retries = self.config.max_retries.max(1);
        let base_delay = Duration::from_millis(self.config.retry_delay_ms);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!("HTTP GET attempt {}/{}: {}", attempt, max_retries, url);

            let mut request = self.client.get(url);
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(ref h) = headers {
                request = request.headers(h.clone());
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = response
                            .headers()
                            .get("Retry-After")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(60);

                        if attempt >= max_retries {
                            return Err(CollectorError::RateLimited {
                                retry_after_secs: retry_after,
                            });
                        }

                        warn!("Rate limited on {}, waiting {} seconds", url, retry_after);
                        sleep(Duration::from_secs(retry_after)).await;
                        continue;
                    }

                    if status == StatusCode::NOT_FOUND {
                        return Err(CollectorError::NotFound(url.to_string()));
                    }

                    if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
                        return Err(CollectorError::AccessDenied(url.to_string()));
                    }

                    if status.is_server_error() && attempt < max_retries {
                        let delay = base_delay * 2u32.pow(attempt - 1);
                        warn!("Server error {} on {}, retrying in {:?}", status, url, delay);
                        sleep(delay).await;
                        continue;
                    }

                    return match response.error_for_status() {
                        Err(e) => Err(e.into()),
                        Ok(_) => Err(CollectorError::DownloadFailed {
                            attempts: attempt,
                            message: format!("Unexpected status {} from {}", status, url),
                        }),
                    };
                }
                Err(e) => {
                    if attempt >= max_retries {
                        return Err(CollectorError::DownloadFailed {
                            attempts: attempt,
                            message: e.to_string(),
                        });
                    }

                    let delay = base_delay * 2u32.pow(attempt - 1);
                    warn!("Request to {} failed: {}, retrying in {:?}", url, e, delay);
                    sleep(delay).await;
                }
            }
        }
    }

    /// GET and decode a JSON body
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        headers: Option<HeaderMap>,
    ) -> Result<T> {
        let response = self.get_with_query(url, query, headers).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(Into::into)
    }

    /// GET and return the body as text
    pub async fn get_text(&self, url: &str, query: &[(&str, String)]) -> Result<String> {
        let response = self.get_with_query(url, query, None).await?;
        Ok(response.text().await?)
    }
}

fn nonzero(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN)
}

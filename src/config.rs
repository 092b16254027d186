//! Configuration types for the video collection pipeline

use crate::error::{CollectorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const USER_AGENT: &str = "VideoCollector/0.1.0 (Rust; +https://github.com/videocollector)";

/// Where validated videos end up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputDestination {
    /// Move into the processed directory
    #[default]
    Local,
    /// Hand to the upload capability
    Cloud,
}

impl fmt::Display for OutputDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputDestination::Local => f.write_str("local"),
            OutputDestination::Cloud => f.write_str("cloud"),
        }
    }
}

impl FromStr for OutputDestination {
    type Err = CollectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(OutputDestination::Local),
            "cloud" => Ok(OutputDestination::Cloud),
            other => Err(CollectorError::ConfigError(format!(
                "Unknown output destination: {} (expected 'local' or 'cloud')",
                other
            ))),
        }
    }
}

/// Batch orchestration and parallel scraping settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Videos per processing slice
    pub batch_size: usize,

    /// Concurrent download/validate/upload tasks per slice
    pub max_workers: usize,

    /// Concurrent per-source scraping tasks
    pub max_scrapers: usize,

    /// Cap on videos one source task collects in a single run
    pub max_videos_per_scraper: usize,

    /// Target hours of accepted video
    pub target_hours: f64,

    /// Duration assigned to records whose source does not report one (seconds)
    pub estimated_video_length: f64,

    /// Minimum interval between any two search requests, across all sources
    pub global_rate_limit_secs: f64,

    /// Sleep before rechecking host health when a scraping task is paused
    pub resource_pause_secs: f64,

    /// Minimum free bytes on the download volume
    pub disk_space_threshold: u64,

    /// Wait before the single disk space retry
    pub disk_retry_delay_secs: f64,

    /// Host memory usage ceiling (percent)
    pub memory_threshold: f64,

    /// Host CPU usage ceiling (percent)
    pub cpu_threshold: f64,

    pub output_destination: OutputDestination,

    /// Assumed per-video duration used for the slice overshoot allowance
    pub assumed_video_secs: f64,

    /// Sources whose URLs are accepted without the extension check
    pub trusted_sources: Vec<String>,

    /// Extension every URL from an untrusted source must end with
    pub required_extension: String,

    /// Split downloads longer than this into chunks (disabled when unset)
    pub chunk_duration_secs: Option<f64>,

    /// Keep a copy of cloud-uploaded (non-chunk) videos in the processed directory
    pub keep_uploaded_copies: bool,

    pub download_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub failed_dir: PathBuf,
    pub temp_dir: PathBuf,

    /// Persisted batch state document
    pub state_file: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_workers: 4,
            max_scrapers: 3,
            max_videos_per_scraper: 100,
            target_hours: 1000.0,
            estimated_video_length: 20.0,
            global_rate_limit_secs: 1.0,
            resource_pause_secs: 5.0,
            disk_space_threshold: 1024 * 1024 * 1024, // 1GB
            disk_retry_delay_secs: 10.0,
            memory_threshold: 80.0,
            cpu_threshold: 80.0,
            output_destination: OutputDestination::Local,
            assumed_video_secs: 60.0,
            trusted_sources: vec!["coverr".to_string(), "wikimedia".to_string()],
            required_extension: ".mp4".to_string(),
            chunk_duration_secs: None,
            keep_uploaded_copies: false,
            download_dir: PathBuf::from("downloads"),
            processed_dir: PathBuf::from("processed"),
            failed_dir: PathBuf::from("failed"),
            temp_dir: PathBuf::from("temp"),
            state_file: PathBuf::from("logs/batch_state.json"),
        }
    }
}

impl PipelineConfig {
    /// Place every staging directory and the state file under `root`
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            download_dir: root.join("downloads"),
            processed_dir: root.join("processed"),
            failed_dir: root.join("failed"),
            temp_dir: root.join("temp"),
            state_file: root.join("logs").join("batch_state.json"),
            ..Default::default()
        }
    }

    pub fn target_seconds(&self) -> f64 {
        self.target_hours * 3600.0
    }

    pub fn global_rate_limit(&self) -> Duration {
        secs(self.global_rate_limit_secs)
    }

    pub fn resource_pause(&self) -> Duration {
        secs(self.resource_pause_secs)
    }

    pub fn disk_retry_delay(&self) -> Duration {
        secs(self.disk_retry_delay_secs)
    }

    /// Seconds a slice may carry the running total past the target
    pub fn allowed_overshoot_secs(&self) -> f64 {
        self.batch_size as f64 * self.assumed_video_secs
    }

    /// Copy of this config with per-call overrides applied
    pub fn with_overrides(&self, overrides: &BatchOverrides) -> Self {
        let mut config = self.clone();
        if let Some(batch_size) = overrides.batch_size {
            config.batch_size = batch_size.max(1);
        }
        if let Some(target_hours) = overrides.target_hours {
            config.target_hours = target_hours;
        }
        if let Some(destination) = overrides.output_destination {
            config.output_destination = destination;
        }
        if let Some(threshold) = overrides.disk_space_threshold {
            config.disk_space_threshold = threshold;
        }
        if let Some(max_workers) = overrides.max_workers {
            config.max_workers = max_workers.max(1);
        }
        config
    }
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

/// Per-call overrides for `process_batch`; never persisted into the base config
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOverrides {
    pub batch_size: Option<usize>,
    pub target_hours: Option<f64>,
    pub output_destination: Option<OutputDestination>,
    pub disk_space_threshold: Option<u64>,
    pub max_workers: Option<usize>,
}

/// HTTP client configuration shared by every source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,

    /// Maximum retry attempts
    pub max_retries: u32,

    /// Base delay between retries in milliseconds
    pub retry_delay_ms: u64,

    /// User agent string
    pub user_agent: String,

    /// Rate limit: requests per second per domain
    pub rate_limit_per_second: f64,

    /// Maximum file size to download (0 = unlimited)
    pub max_file_size_bytes: u64,

    /// Proxy URL (optional)
    pub proxy_url: Option<String>,

    /// Enable compression for requests
    pub enable_compression: bool,

    /// Connection pool size per host
    pub pool_size_per_host: usize,

    /// Idle connection timeout in seconds
    pub idle_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 300,
            connect_timeout_secs: 30,
            max_retries: 3,
            retry_delay_ms: 1000,
            user_agent: USER_AGENT.to_string(),
            rate_limit_per_second: 2.0,
            max_file_size_bytes: 0,
            proxy_url: None,
            enable_compression: true,
            pool_size_per_host: 16,
            idle_timeout_secs: 90,
        }
    }
}

impl HttpConfig {
    /// Higher per-domain rate and more retries for large runs
    pub fn high_performance() -> Self {
        Self {
            request_timeout_secs: 600,
            max_retries: 10,
            retry_delay_ms: 500,
            rate_limit_per_second: 50.0,
            pool_size_per_host: 32,
            idle_timeout_secs: 120,
            ..Default::default()
        }
    }

    /// Configuration that stays well inside public API limits
    pub fn conservative() -> Self {
        Self {
            request_timeout_secs: 120,
            max_retries: 3,
            retry_delay_ms: 2000,
            rate_limit_per_second: 0.5,
            pool_size_per_host: 8,
            idle_timeout_secs: 60,
            ..Default::default()
        }
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend type: "local", "s3"
    pub backend: String,

    /// Local storage path (for local backend)
    pub local_path: String,

    /// S3 bucket name
    pub s3_bucket: Option<String>,

    /// S3 region
    pub s3_region: Option<String>,

    /// S3 endpoint (for S3-compatible storage)
    pub s3_endpoint: Option<String>,

    /// Key prefix for uploaded objects
    pub key_prefix: String,

    /// Upload history used to skip already-uploaded files
    pub upload_history_file: PathBuf,

    /// Upload attempts before giving up
    pub max_retries: u32,

    /// Base delay between upload retries in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "local".to_string(),
            local_path: "./uploads".to_string(),
            s3_bucket: None,
            s3_region: Some("us-east-1".to_string()),
            s3_endpoint: None,
            key_prefix: "videos/".to_string(),
            upload_history_file: PathBuf::from("logs/upload_history.json"),
            max_retries: 3,
            retry_delay_ms: 2000,
        }
    }
}

impl StorageConfig {
    /// Create local storage configuration
    pub fn local(path: &str) -> Self {
        Self {
            backend: "local".to_string(),
            local_path: path.to_string(),
            ..Default::default()
        }
    }

    /// Create S3 storage configuration
    pub fn s3(
        bucket: &str,
        region: Option<&str>,
        endpoint: Option<&str>,
        key_prefix: Option<&str>,
    ) -> Self {
        Self {
            backend: "s3".to_string(),
            s3_bucket: Some(bucket.to_string()),
            s3_region: region.map(|s| s.to_string()),
            s3_endpoint: endpoint.map(|s| s.to_string()),
            key_prefix: key_prefix.unwrap_or("videos/").to_string(),
            ..Default::default()
        }
    }
}

/// Per-source overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Replaces the source's built-in endpoint
    pub base_url: Option<String>,

    /// Results requested per search page
    pub per_page: Option<u32>,
}

/// Limits applied by the built-in validators
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_width: u32,
    pub min_height: u32,
    pub allowed_formats: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_width: 512,
            min_height: 512,
            allowed_formats: vec![
                "mp4".to_string(),
                "webm".to_string(),
                "mkv".to_string(),
                "mov".to_string(),
            ],
        }
    }
}

/// Whole application configuration, as read from the JSON config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub http: HttpConfig,
    pub storage: StorageConfig,
    pub validation: ValidationConfig,
    pub sources: BTreeMap<String, SourceSettings>,
}

impl AppConfig {
    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CollectorError::ConfigError(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Load from JSON string
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| CollectorError::ConfigError(format!("Deserialization failed: {}", e)))
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(Into::into)
    }

    pub fn source(&self, name: &str) -> SourceSettings {
        self.sources.get(name).cloned().unwrap_or_default()
    }

    /// One pipeline worker per core and aggressive HTTP settings
    pub fn high_performance() -> Self {
        Self {
            pipeline: PipelineConfig {
                batch_size: 20,
                max_workers: num_cpus::get().max(4),
                max_scrapers: 8,
                global_rate_limit_secs: 0.25,
                ..Default::default()
            },
            http: HttpConfig::high_performance(),
            ..Default::default()
        }
    }

    /// Few workers and slow request pacing
    pub fn conservative() -> Self {
        Self {
            pipeline: PipelineConfig {
                batch_size: 5,
                max_workers: 2,
                max_scrapers: 2,
                global_rate_limit_secs: 2.0,
                ..Default::default()
            },
            http: HttpConfig::conservative(),
            ..Default::default()
        }
    }
}

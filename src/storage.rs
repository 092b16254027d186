//! Storage backends and the upload capability built on them

use crate::config::StorageConfig;
use crate::error::{CollectorError, Result};
use crate::video::VideoRecord;
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Metadata for stored objects
#[derive(Debug, Clone)]
pub struct ObjectMetadata {
    pub key: String,
    pub location: String,
    pub size_bytes: u64,
    pub last_modified: Option<String>,
}

/// Storage backend trait
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store a local file at the given key
    async fn put_file(&self, key: &str, local_path: &Path) -> Result<ObjectMetadata>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete an object
    async fn delete(&self, key: &str) -> Result<()>;

    /// Get the backend type name
    fn backend_type(&self) -> &str;
}

/// Local filesystem storage backend
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn get_full_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn put_file(&self, key: &str, local_path: &Path) -> Result<ObjectMetadata> {
        let dest_path = self.get_full_path(key);

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::copy(local_path, &dest_path).await?;
        let metadata = fs::metadata(&dest_path).await?;
        info!("Stored {} bytes to local path: {:?}", metadata.len(), dest_path);

        Ok(ObjectMetadata {
            key: key.to_string(),
            location: dest_path.to_string_lossy().to_string(),
            size_bytes: metadata.len(),
            last_modified: Some(chrono::Utc::now().to_rfc3339()),
        })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(fs::try_exists(self.get_full_path(key)).await.unwrap_or(false))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.get_full_path(key);
        if path.exists() {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    fn backend_type(&self) -> &str {
        "local"
    }
}

/// AWS S3 storage backend (requires 's3' feature)
#[cfg(feature = "s3")]
pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
}

#[cfg(feature = "s3")]
impl S3Storage {
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let bucket = config
            .s3_bucket
            .clone()
            .ok_or_else(|| CollectorError::ConfigError("S3 bucket name required".to_string()))?;

        let mut aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(ref region) = config.s3_region {
            aws_config = aws_config.region(aws_config::Region::new(region.clone()));
        }
        let sdk_config = aws_config.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(ref endpoint) = config.s3_endpoint {
            s3_config = s3_config.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(s3_config.build()),
            bucket,
        })
    }
}

#[cfg(feature = "s3")]
#[async_trait]
impl StorageBackend for S3Storage {
    async fn put_file(&self, key: &str, local_path: &Path) -> Result<ObjectMetadata> {
        let data = bytes::Bytes::from(fs::read(local_path).await?);
        let size = data.len() as u64;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("video/mp4")
            .body(data.into())
            .send()
            .await
            .map_err(|e| CollectorError::S3Error(e.to_string()))?;

        info!("Stored {} bytes to S3: s3://{}/{}", size, self.bucket, key);

        Ok(ObjectMetadata {
            key: key.to_string(),
            location: format!("s3://{}/{}", self.bucket, key),
            size_bytes: size,
            last_modified: Some(chrono::Utc::now().to_rfc3339()),
        })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| CollectorError::S3Error(e.to_string()))?;
        Ok(())
    }

    fn backend_type(&self) -> &str {
        "s3"
    }
}

/// Backend selected by `config.backend`
pub async fn create_backend(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config.backend.as_str() {
        "local" => Arc::new(LocalStorage::new(&config.local_path)),
        #[cfg(feature = "s3")]
        "s3" => Arc::new(S3Storage::new(config).await?),
        #[cfg(not(feature = "s3"))]
        "s3" => {
            return Err(CollectorError::ConfigError(
                "S3 storage requires the 's3' feature to be enabled".to_string(),
            ))
        }
        _ => {
            return Err(CollectorError::ConfigError(format!(
                "Unknown storage backend: {}",
                config.backend
            )))
        }
    };
    Ok(backend)
}

/// Result of handing a file to the upload capability
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Stored { location: String },
    /// Upload history or the backend already holds this file
    AlreadyStored { location: String },
    Rejected { reason: String },
}

impl UploadOutcome {
    pub fn accepted(&self) -> bool {
        !matches!(self, UploadOutcome::Rejected { .. })
    }
}

/// Upload capability consumed by the pipeline
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, path: &Path, record: &VideoRecord) -> Result<UploadOutcome>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UploadRecord {
    local_path: String,
    key: String,
    location: String,
    upload_time: String,
    source: String,
    video_id: String,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

/// Uploads to a storage backend with retries, skipping files already uploaded
pub struct CloudUploader {
    backend: Arc<dyn StorageBackend>,
    key_prefix: String,
    history_file: PathBuf,
    history: Mutex<HashMap<String, UploadRecord>>,
    max_retries: u32,
    retry_delay: Duration,
}

impl CloudUploader {
    pub async fn new(backend: Arc<dyn StorageBackend>, config: &StorageConfig) -> Self {
        let mut key_prefix = config.key_prefix.clone();
        if !key_prefix.is_empty() && !key_prefix.ends_with('/') {
            key_prefix.push('/');
        }
        let history = load_history(&config.upload_history_file).await;

        Self {
            backend,
            key_prefix,
            history_file: config.upload_history_file.clone(),
            history: Mutex::new(history),
            max_retries: config.max_retries.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    pub fn key_for(&self, path: &Path) -> String {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        format!("{}{}", self.key_prefix, file_name)
    }

    async fn put_with_retry(&self, key: &str, path: &Path) -> Result<ObjectMetadata> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry_delay)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build();
        let attempts = &AtomicU32::new(0);

        backoff::future::retry(policy, move || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match self.backend.put_file(key, path).await {
                Ok(meta) => Ok(meta),
                Err(e) if attempt >= self.max_retries => {
                    warn!("Upload of {} failed after {} attempts: {}", key, attempt, e);
                    Err(backoff::Error::permanent(e))
                }
                Err(e) => {
                    warn!(
                        "Upload attempt {}/{} of {} failed: {}",
                        attempt, self.max_retries, key, e
                    );
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await
    }

    async fn record_upload(&self, hash: String, record: UploadRecord) {
        let mut history = self.history.lock().await;
        history.insert(hash, record);
        if let Err(e) = save_history(&self.history_file, &history).await {
            warn!("Error recording upload history: {}", e);
        }
    }
}

#[async_trait]
impl Uploader for CloudUploader {
    async fn upload(&self, path: &Path, record: &VideoRecord) -> Result<UploadOutcome> {
        if !path.exists() {
            return Ok(UploadOutcome::Rejected {
                reason: format!("File not found: {}", path.display()),
            });
        }

        let key = self.key_for(path);
        let hash = file_fingerprint(path).await?;

        if let Some(previous) = self.history.lock().await.get(&hash) {
            info!("File {} already uploaded as {}", path.display(), previous.key);
            return Ok(UploadOutcome::AlreadyStored {
                location: previous.location.clone(),
            });
        }
        if self.backend.exists(&key).await.unwrap_or(false) {
            info!("Key {} already present in {}", key, self.backend.backend_type());
            return Ok(UploadOutcome::AlreadyStored { location: key });
        }

        let stored = match self.put_with_retry(&key, path).await {
            Ok(meta) => meta,
            Err(e) => {
                return Ok(UploadOutcome::Rejected {
                    reason: e.to_string(),
                })
            }
        };

        self.record_upload(
            hash,
            UploadRecord {
                local_path: path.to_string_lossy().to_string(),
                key: key.clone(),
                location: stored.location.clone(),
                upload_time: chrono::Utc::now().to_rfc3339(),
                source: record.source.clone(),
                video_id: record.id.clone(),
                metadata: record.metadata(),
            },
        )
        .await;

        info!(
            "Uploaded {} to {} ({} bytes)",
            path.display(),
            stored.location,
            stored.size_bytes
        );
        Ok(UploadOutcome::Stored {
            location: stored.location,
        })
    }
}

/// Identity of a local file: path, size and modification time
async fn file_fingerprint(path: &Path) -> Result<String> {
    let metadata = fs::metadata(path).await?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    let identity = format!("{}:{}:{}", path.display(), metadata.len(), mtime);
    Ok(hex::encode(Sha256::digest(identity.as_bytes())))
}

async fn load_history(path: &Path) -> HashMap<String, UploadRecord> {
    match fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Ignoring unreadable upload history {}: {}", path.display(), e);
            HashMap::new()
        }),
        Err(_) => HashMap::new(),
    }
}

async fn save_history(path: &Path, history: &HashMap<String, UploadRecord>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(history)?).await?;
    fs::rename(&tmp, path).await?;
    debug!("Saved upload history ({} entries)", history.len());
    Ok(())
}

//! Streaming downloads into the staging area

use crate::client::HttpClient;
use crate::error::{CollectorError, Result};
use futures::stream::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Result of a completed download
#[derive(Debug, Clone)]
pub struct DownloadResult {
    pub url: String,
    pub output_path: PathBuf,
    pub size_bytes: u64,
    pub sha256_hash: String,
    pub duration_secs: f64,
    pub avg_speed_bytes_per_sec: f64,
}

/// Downloads a URL to a `.part` file, hashing as it streams, and renames it into
/// place once complete. A failed download never leaves a file at the destination.
#[derive(Clone)]
pub struct Downloader {
    client: Arc<HttpClient>,
    max_file_size_bytes: u64,
    active_downloads: Arc<AtomicU64>,
}

impl Downloader {
    pub fn new(client: Arc<HttpClient>) -> Self {
        let max_file_size_bytes = client.config().max_file_size_bytes;
        Self {
            client,
            max_file_size_bytes,
            active_downloads: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn download(&self, url: &str, output_path: &Path) -> Result<DownloadResult> {
        self.active_downloads.fetch_add(1, Ordering::SeqCst);
        let part_path = part_path(output_path);
        let result = self.download_internal(url, output_path, &part_path).await;
        self.active_downloads.fetch_sub(1, Ordering::SeqCst);

        if result.is_err() {
            let _ = fs::remove_file(&part_path).await;
        }
        result
    }

    async fn download_internal(
        &self,
        url: &str,
        output_path: &Path,
        part_path: &Path,
    ) -> Result<DownloadResult> {
        let start_time = std::time::Instant::now();

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let response = self.client.get(url).await?;
        if let Some(length) = response.content_length() {
            self.check_size(url, length)?;
        }

        let mut file = File::create(part_path).await?;
        let mut hasher = Sha256::new();
        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk?;
            downloaded += bytes.len() as u64;
            self.check_size(url, downloaded)?;
            file.write_all(&bytes).await?;
            hasher.update(&bytes);
        }

        file.flush().await?;
        drop(file);

        if downloaded == 0 {
            return Err(CollectorError::DownloadFailed {
                attempts: 1,
                message: format!("Empty response body from {}", url),
            });
        }

        fs::rename(part_path, output_path).await?;

        let duration = start_time.elapsed().as_secs_f64();
        let result = DownloadResult {
            url: url.to_string(),
            output_path: output_path.to_path_buf(),
            size_bytes: downloaded,
            sha256_hash: hex::encode(hasher.finalize()),
            duration_secs: duration,
            avg_speed_bytes_per_sec: if duration > 0.0 {
                downloaded as f64 / duration
            } else {
                0.0
            },
        };

        info!(
            "Downloaded {} ({} bytes) to {}",
            url,
            result.size_bytes,
            output_path.display()
        );
        Ok(result)
    }

    fn check_size(&self, url: &str, size: u64) -> Result<()> {
        if self.max_file_size_bytes > 0 && size > self.max_file_size_bytes {
            warn!(
                "File too large: {} bytes (max {}) for {}",
                size, self.max_file_size_bytes, url
            );
            return Err(CollectorError::DownloadFailed {
                attempts: 1,
                message: format!(
                    "File exceeds size limit: {} > {}",
                    size, self.max_file_size_bytes
                ),
            });
        }
        Ok(())
    }

    pub fn active_downloads(&self) -> u64 {
        self.active_downloads.load(Ordering::SeqCst)
    }
}

fn part_path(output_path: &Path) -> PathBuf {
    let mut name = output_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    output_path.with_file_name(name)
}

/// SHA-256 of a file on disk, read in blocks
pub async fn sha256_file(path: &Path) -> Result<String> {
    use tokio::io::AsyncReadExt;

    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    debug!("Hashed {}", path.display());
    Ok(hex::encode(hasher.finalize()))
}

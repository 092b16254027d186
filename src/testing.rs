//! Stub collaborators shared by unit tests

use crate::chunker::{chunk_plan, Chunker};
use crate::error::{CollectorError, Result};
use crate::monitor::ResourceMonitor;
use crate::sources::VideoSource;
use crate::storage::{UploadOutcome, Uploader};
use crate::validation::{ValidationReport, Validator};
use crate::video::VideoRecord;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// `n` records with ids `{source}_{i}`
pub fn stub_records(source: &str, n: usize, duration: f64) -> Vec<VideoRecord> {
    stub_records_from(source, 0, n, duration)
}

/// `n` records with ids `{source}_{start}` onwards
pub fn stub_records_from(source: &str, start: usize, n: usize, duration: f64) -> Vec<VideoRecord> {
    (start..start + n)
        .map(|i| {
            let id = format!("{}_{}", source, i);
            VideoRecord::new(source, id.clone(), format!("https://{}.test/videos/{}.mp4", source, id))
                .with_duration(duration)
                .with_resolution(1920, 1080)
        })
        .collect()
}

/// Source serving fixed pages and writing a small file per download
pub struct StubSource {
    name: String,
    pages: Vec<Vec<VideoRecord>>,
    fail_search: bool,
    fail_downloads: HashSet<String>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StubSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            pages: Vec::new(),
            fail_search: false,
            fail_downloads: HashSet::new(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_pages(mut self, pages: Vec<Vec<VideoRecord>>) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_search(mut self) -> Self {
        self.fail_search = true;
        self
    }

    pub fn failing_download(mut self, url: &str) -> Self {
        self.fail_downloads.insert(url.to_string());
        self
    }

    pub fn search_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoSource for StubSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _query: &str, page: u32) -> Result<Vec<VideoRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_search {
            return Err(CollectorError::SearchFailed {
                source_name: self.name.clone(),
                message: "stub failure".to_string(),
            });
        }
        let index = page.saturating_sub(1) as usize;
        Ok(self.pages.get(index).cloned().unwrap_or_default())
    }

    async fn download(&self, url: &str, destination: &Path) -> Result<()> {
        if self.fail_downloads.contains(url) {
            return Err(CollectorError::DownloadFailed {
                attempts: 1,
                message: format!("stub refused {}", url),
            });
        }
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(destination, format!("video:{}", url)).await?;
        Ok(())
    }
}

/// Accepts everything except the listed record ids
pub struct StubValidator {
    reject: HashSet<String>,
    calls: AtomicUsize,
}

impl StubValidator {
    pub fn accept_all() -> Self {
        Self::rejecting(&[])
    }

    pub fn rejecting(ids: &[&str]) -> Self {
        Self {
            reject: ids.iter().map(|id| id.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Validator for StubValidator {
    fn name(&self) -> &str {
        "stub"
    }

    async fn validate(&self, path: &Path, record: &VideoRecord) -> Result<ValidationReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.reject.contains(&record.id) {
            return Ok(ValidationReport::reject(format!("{} is on the reject list", record.id)));
        }
        Ok(ValidationReport::accept(json!({ "path": path.display().to_string() })))
    }
}

/// Records uploaded ids in order; rejects the listed ids
pub struct StubUploader {
    reject: HashSet<String>,
    uploaded: Mutex<Vec<String>>,
}

impl StubUploader {
    pub fn accept_all() -> Self {
        Self::rejecting(&[])
    }

    pub fn rejecting(ids: &[&str]) -> Self {
        Self {
            reject: ids.iter().map(|id| id.to_string()).collect(),
            uploaded: Mutex::new(Vec::new()),
        }
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploaded.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Uploader for StubUploader {
    async fn upload(&self, path: &Path, record: &VideoRecord) -> Result<UploadOutcome> {
        if self.reject.contains(&record.id) {
            return Ok(UploadOutcome::Rejected {
                reason: "stub rejection".to_string(),
            });
        }
        if let Ok(mut uploaded) = self.uploaded.lock() {
            uploaded.push(record.id.clone());
        }
        Ok(UploadOutcome::Stored {
            location: format!("stub://{}", path.display()),
        })
    }
}

/// Writes one small file per planned chunk of the given length
pub struct StubChunker(pub f64);

#[async_trait]
impl Chunker for StubChunker {
    async fn split(&self, path: &Path, record: &VideoRecord, out_dir: &Path) -> Result<Vec<PathBuf>> {
        let plan = chunk_plan(record.seconds(), self.0);
        if plan.is_empty() {
            return Ok(Vec::new());
        }
        tokio::fs::create_dir_all(out_dir).await?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| record.id.clone());

        let mut chunks = Vec::new();
        for (index, _) in plan.iter().enumerate() {
            let chunk = out_dir.join(format!("{}_chunk_{}.{}", stem, index, record.extension()));
            tokio::fs::write(&chunk, format!("chunk {} of {}", index, record.id)).await?;
            chunks.push(chunk);
        }
        Ok(chunks)
    }
}

/// Health that can be flipped mid-test, and a disk that fills up after a
/// number of free-space checks
pub struct ScriptedMonitor {
    healthy: AtomicBool,
    health_checks: AtomicUsize,
    disk_checks: AtomicUsize,
    disk_full_after: Option<usize>,
}

impl ScriptedMonitor {
    pub fn unhealthy() -> Self {
        Self {
            healthy: AtomicBool::new(false),
            health_checks: AtomicUsize::new(0),
            disk_checks: AtomicUsize::new(0),
            disk_full_after: None,
        }
    }

    /// Healthy, with plenty of space for the first `checks` lookups and none after
    pub fn disk_fills_after(checks: usize) -> Self {
        Self {
            healthy: AtomicBool::new(true),
            disk_full_after: Some(checks),
            ..Self::unhealthy()
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    pub fn disk_checks(&self) -> usize {
        self.disk_checks.load(Ordering::SeqCst)
    }
}

impl ResourceMonitor for ScriptedMonitor {
    fn healthy(&self) -> bool {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        self.healthy.load(Ordering::SeqCst)
    }

    fn free_disk_space(&self, _path: &Path) -> Option<u64> {
        let check = self.disk_checks.fetch_add(1, Ordering::SeqCst);
        match self.disk_full_after {
            Some(limit) if check >= limit => Some(0),
            _ => Some(u64::MAX),
        }
    }
}

//! Per-video download → validate → upload pipeline

use crate::chunker::{chunk_plan, chunk_record, Chunker};
use crate::config::{OutputDestination, PipelineConfig};
use crate::error::{CollectorError, Result};
use crate::manager::ScraperManager;
use crate::storage::{UploadOutcome, Uploader};
use crate::validation::Validator;
use crate::video::VideoRecord;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info, warn};

/// Counts produced by one slice (or one video)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SliceTally {
    pub downloaded: u64,
    pub validated: u64,
    pub uploaded: u64,
    pub failed: u64,
    pub video_seconds: f64,
}

impl SliceTally {
    fn failure() -> Self {
        Self {
            failed: 1,
            ..Default::default()
        }
    }
}

impl AddAssign<&SliceTally> for SliceTally {
    fn add_assign(&mut self, other: &SliceTally) {
        self.downloaded += other.downloaded;
        self.validated += other.validated;
        self.uploaded += other.uploaded;
        self.failed += other.failed;
        self.video_seconds += other.video_seconds;
    }
}

/// Run-wide counters shared by concurrent pipeline tasks.
///
/// Seconds are kept as integer milliseconds so every update is a single atomic add.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    downloaded: AtomicU64,
    validated: AtomicU64,
    uploaded: AtomicU64,
    failed: AtomicU64,
    video_millis: AtomicU64,
}

impl PipelineCounters {
    pub fn add(&self, tally: &SliceTally) {
        self.downloaded.fetch_add(tally.downloaded, Ordering::SeqCst);
        self.validated.fetch_add(tally.validated, Ordering::SeqCst);
        self.uploaded.fetch_add(tally.uploaded, Ordering::SeqCst);
        self.failed.fetch_add(tally.failed, Ordering::SeqCst);
        self.video_millis
            .fetch_add(to_millis(tally.video_seconds), Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.downloaded.store(0, Ordering::SeqCst);
        self.validated.store(0, Ordering::SeqCst);
        self.uploaded.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
        self.video_millis.store(0, Ordering::SeqCst);
    }

    pub fn video_seconds(&self) -> f64 {
        self.video_millis.load(Ordering::SeqCst) as f64 / 1000.0
    }

    pub fn snapshot(&self) -> SliceTally {
        SliceTally {
            downloaded: self.downloaded.load(Ordering::SeqCst),
            validated: self.validated.load(Ordering::SeqCst),
            uploaded: self.uploaded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            video_seconds: self.video_seconds(),
        }
    }
}

fn to_millis(seconds: f64) -> u64 {
    (seconds.max(0.0) * 1000.0).round() as u64
}

/// Runs slices of records through download, validation and storage with at
/// most `max_workers` videos in flight. One video's failure never affects another.
pub struct VideoPipeline {
    config: PipelineConfig,
    manager: Arc<ScraperManager>,
    validator: Arc<dyn Validator>,
    uploader: Option<Arc<dyn Uploader>>,
    chunker: Option<Arc<dyn Chunker>>,
    counters: Arc<PipelineCounters>,
}

impl VideoPipeline {
    pub fn new(
        config: PipelineConfig,
        manager: Arc<ScraperManager>,
        validator: Arc<dyn Validator>,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        Self {
            config,
            manager,
            validator,
            uploader: None,
            chunker: None,
            counters,
        }
    }

    pub fn with_uploader(mut self, uploader: Option<Arc<dyn Uploader>>) -> Self {
        self.uploader = uploader;
        self
    }

    pub fn with_chunker(mut self, chunker: Option<Arc<dyn Chunker>>) -> Self {
        self.chunker = chunker;
        self
    }

    /// Process one slice; returns what this slice contributed
    pub async fn process_slice(&self, records: Vec<VideoRecord>) -> SliceTally {
        let count = records.len();
        let concurrency = self.config.max_workers.max(1);
        info!("Processing slice of {} videos with {} workers", count, concurrency);

        let tallies: Vec<SliceTally> = stream::iter(records)
            .map(|record| async move {
                let tally = self.process_video(record).await;
                self.counters.add(&tally);
                tally
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut total = SliceTally::default();
        for tally in &tallies {
            total += tally;
        }

        info!(
            "Slice done: {} downloaded, {} validated, {} uploaded, {} failed, {:.1}s of video",
            total.downloaded, total.validated, total.uploaded, total.failed, total.video_seconds
        );
        total
    }

    async fn process_video(&self, record: VideoRecord) -> SliceTally {
        let path = match self.download(&record).await {
            Ok(path) => path,
            Err(e) => {
                warn!("Download failed for {}:{}: {}", record.source, record.id, e);
                return SliceTally::failure();
            }
        };

        if let Some(chunks) = self.split(&record, &path).await {
            // The parent download only exists to feed its chunks
            let _ = fs::remove_file(&path).await;
            let mut tally = SliceTally::default();
            for chunk in chunks {
                tally += &self.process_chunk(chunk).await;
            }
            return tally;
        }

        let mut tally = SliceTally {
            downloaded: 1,
            ..Default::default()
        };
        tally += &self.validate_and_store(&record, &path).await;
        tally
    }

    async fn process_chunk(&self, chunk: VideoRecord) -> SliceTally {
        let path = match self.download(&chunk).await {
            Ok(path) => path,
            Err(e) => {
                warn!("Cannot stage chunk {}: {}", chunk.id, e);
                let _ = fs::remove_file(&chunk.url).await;
                return SliceTally::failure();
            }
        };
        let _ = fs::remove_file(&chunk.url).await;

        let mut tally = SliceTally {
            downloaded: 1,
            ..Default::default()
        };
        tally += &self.validate_and_store(&chunk, &path).await;
        tally
    }

    /// Chunk records replacing `record`, or `None` to process it whole
    async fn split(&self, record: &VideoRecord, path: &Path) -> Option<Vec<VideoRecord>> {
        let chunker = self.chunker.as_ref()?;
        let chunk_secs = self.config.chunk_duration_secs?;
        if record.is_chunk() {
            return None;
        }

        let chunk_dir = self.config.temp_dir.join("chunks");
        let pieces = match chunker.split(path, record, &chunk_dir).await {
            Ok(pieces) if !pieces.is_empty() => pieces,
            Ok(_) => return None,
            Err(e) => {
                warn!("Chunking failed for {}, processing whole video: {}", record.id, e);
                return None;
            }
        };

        let lengths: Vec<f64> = chunk_plan(record.seconds(), chunk_secs)
            .into_iter()
            .map(|(_, length)| length)
            .collect();
        let chunks = pieces
            .iter()
            .enumerate()
            .map(|(i, piece)| {
                let length = lengths.get(i).copied().unwrap_or(chunk_secs);
                chunk_record(record, i, piece, length)
            })
            .collect::<Vec<_>>();
        info!("Video {} replaced by {} chunks", record.id, chunks.len());
        Some(chunks)
    }

    /// Stage the video in the download directory
    async fn download(&self, record: &VideoRecord) -> Result<PathBuf> {
        if record.url.is_empty() {
            return Err(CollectorError::DownloadFailed {
                attempts: 0,
                message: format!("No URL for video {}", record.id),
            });
        }

        fs::create_dir_all(&self.config.download_dir).await?;
        let destination = self.config.download_dir.join(record.file_name());

        if is_local_path(record) {
            fs::copy(&record.url, &destination).await?;
            debug!("Copied local video {} to {}", record.url, destination.display());
            return Ok(destination);
        }

        let source = self.manager.scraper(&record.source).ok_or_else(|| {
            CollectorError::DownloadFailed {
                attempts: 0,
                message: format!("No scraper registered for source {}", record.source),
            }
        })?;

        source.download(&record.url, &destination).await?;
        if !fs::try_exists(&destination).await.unwrap_or(false) {
            return Err(CollectorError::DownloadFailed {
                attempts: 1,
                message: format!("{} reported success but wrote no file", record.source),
            });
        }
        Ok(destination)
    }

    async fn validate_and_store(&self, record: &VideoRecord, path: &Path) -> SliceTally {
        let report = match self.validator.validate(path, record).await {
            Ok(report) => report,
            Err(e) => {
                warn!("Validation errored for {}: {}", record.id, e);
                crate::validation::ValidationReport::reject(e.to_string())
            }
        };

        if !report.accepted {
            info!("Video {} rejected: {}", record.id, report.details);
            if let Err(e) = move_into(path, &self.config.failed_dir).await {
                error!("Cannot move {} to failed area: {}", path.display(), e);
                let _ = fs::remove_file(path).await;
            }
            return SliceTally::failure();
        }

        let mut tally = SliceTally {
            validated: 1,
            video_seconds: record.seconds(),
            ..Default::default()
        };

        match self.config.output_destination {
            OutputDestination::Cloud => tally += &self.upload(record, path).await,
            OutputDestination::Local => match move_into(path, &self.config.processed_dir).await {
                Ok(dest) => {
                    debug!("Stored {} at {}", record.id, dest.display());
                    tally.uploaded += 1;
                }
                Err(e) => {
                    error!("Cannot move {} to processed area: {}", path.display(), e);
                    let _ = fs::remove_file(path).await;
                    tally.failed += 1;
                }
            },
        }
        tally
    }

    async fn upload(&self, record: &VideoRecord, path: &Path) -> SliceTally {
        let outcome = match &self.uploader {
            Some(uploader) => uploader.upload(path, record).await,
            None => Err(CollectorError::MissingCollaborator("Uploader")),
        };

        match outcome {
            Ok(outcome) if outcome.accepted() => {
                if let UploadOutcome::Stored { location } | UploadOutcome::AlreadyStored { location } =
                    &outcome
                {
                    info!("Video {} uploaded to {}", record.id, location);
                }
                if self.config.keep_uploaded_copies && !record.is_chunk() {
                    if move_into(path, &self.config.processed_dir).await.is_err() {
                        let _ = fs::remove_file(path).await;
                    }
                } else {
                    let _ = fs::remove_file(path).await;
                }
                SliceTally {
                    uploaded: 1,
                    ..Default::default()
                }
            }
            Ok(outcome) => {
                warn!("Upload rejected for {}: {:?}", record.id, outcome);
                let _ = fs::remove_file(path).await;
                SliceTally::failure()
            }
            Err(e) => {
                warn!("Upload failed for {}: {}", record.id, e);
                let _ = fs::remove_file(path).await;
                SliceTally::failure()
            }
        }
    }
}

fn is_local_path(record: &VideoRecord) -> bool {
    if record.is_local {
        return true;
    }
    let url = record.url.as_str();
    !url.starts_with("http://") && !url.starts_with("https://") && Path::new(url).is_file()
}

/// Move `path` into `dir`, falling back to copy+delete across filesystems
pub async fn move_into(path: &Path, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).await?;
    let file_name = path.file_name().ok_or_else(|| {
        CollectorError::StorageError(format!("No file name in {}", path.display()))
    })?;
    let dest = dir.join(file_name);
    if fs::rename(path, &dest).await.is_err() {
        fs::copy(path, &dest).await?;
        fs::remove_file(path).await?;
    }
    Ok(dest)
}

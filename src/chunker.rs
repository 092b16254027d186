//! Optional split of long downloads into fixed-length chunks

use crate::error::{CollectorError, Result};
use crate::video::VideoRecord;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// Splits a downloaded video into independent pieces. Returns no paths when the
/// video needs no splitting.
#[async_trait]
pub trait Chunker: Send + Sync {
    async fn split(&self, path: &Path, record: &VideoRecord, out_dir: &Path) -> Result<Vec<PathBuf>>;
}

/// (start, length) in seconds of each chunk of a `duration`-second video
pub fn chunk_plan(duration: f64, chunk_secs: f64) -> Vec<(f64, f64)> {
    if chunk_secs <= 0.0 || duration <= chunk_secs {
        return Vec::new();
    }
    let mut plan = Vec::new();
    let mut start = 0.0;
    while start < duration {
        let length = chunk_secs.min(duration - start);
        // Drop slivers shorter than a second
        if length >= 1.0 {
            plan.push((start, length));
        }
        start += chunk_secs;
    }
    plan
}

/// Record for the `index`-th chunk of `parent`, pointing at a local file
pub fn chunk_record(parent: &VideoRecord, index: usize, path: &Path, duration: f64) -> VideoRecord {
    let mut chunk = parent.clone();
    chunk.id = format!("{}_chunk_{}", parent.id, index);
    chunk.url = path.to_string_lossy().to_string();
    chunk.duration = Some(duration);
    chunk.is_local = true;
    chunk.parent_id = Some(parent.id.clone());
    chunk
}

/// Cuts chunks with `ffmpeg -c copy`
pub struct FfmpegChunker {
    chunk_secs: f64,
    ffmpeg: PathBuf,
}

impl FfmpegChunker {
    pub fn new(chunk_secs: f64) -> Self {
        Self {
            chunk_secs,
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }

    pub fn with_binary(mut self, ffmpeg: impl Into<PathBuf>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self
    }

    pub fn chunk_secs(&self) -> f64 {
        self.chunk_secs
    }
}

#[async_trait]
impl Chunker for FfmpegChunker {
    async fn split(&self, path: &Path, record: &VideoRecord, out_dir: &Path) -> Result<Vec<PathBuf>> {
        let plan = chunk_plan(record.seconds(), self.chunk_secs);
        if plan.is_empty() {
            return Ok(Vec::new());
        }

        tokio::fs::create_dir_all(out_dir).await?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| record.id.clone());
        let extension = record.extension();

        let mut chunks = Vec::with_capacity(plan.len());
        for (index, (start, length)) in plan.into_iter().enumerate() {
            let output = out_dir.join(format!("{}_chunk_{}.{}", stem, index, extension));
            debug!("Cutting {} [{:.1}s +{:.1}s] to {}", path.display(), start, length, output.display());

            let result = Command::new(&self.ffmpeg)
                .arg("-y")
                .arg("-loglevel")
                .arg("error")
                .arg("-ss")
                .arg(format!("{:.3}", start))
                .arg("-i")
                .arg(path)
                .arg("-t")
                .arg(format!("{:.3}", length))
                .arg("-c")
                .arg("copy")
                .arg(&output)
                .output()
                .await
                .map_err(|e| CollectorError::ChunkingFailed(format!("Cannot run ffmpeg: {}", e)))?;

            if !result.status.success() {
                for done in &chunks {
                    let _ = tokio::fs::remove_file(done).await;
                }
                return Err(CollectorError::ChunkingFailed(format!(
                    "ffmpeg exited with {} on {}: {}",
                    result.status,
                    path.display(),
                    String::from_utf8_lossy(&result.stderr).trim()
                )));
            }
            chunks.push(output);
        }

        info!("Split {} into {} chunks", record.id, chunks.len());
        Ok(chunks)
    }
}

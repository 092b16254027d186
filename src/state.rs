//! Durable, resumable batch state

use crate::config::OutputDestination;
use crate::error::{CollectorError, Result};
use crate::pipeline::SliceTally;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Running,
    Completed,
    Failed,
}

/// Monotonic progress counters of one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchCounters {
    pub videos_found: u64,
    pub videos_downloaded: u64,
    pub videos_validated: u64,
    pub videos_uploaded: u64,
    pub videos_failed: u64,
    pub video_seconds: f64,
}

impl BatchCounters {
    pub fn absorb(&mut self, tally: &SliceTally) {
        self.videos_downloaded += tally.downloaded;
        self.videos_validated += tally.validated;
        self.videos_uploaded += tally.uploaded;
        self.videos_failed += tally.failed;
        self.video_seconds += tally.video_seconds;
    }

    pub fn video_hours(&self) -> f64 {
        self.video_seconds / 3600.0
    }
}

/// One batch run, as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchState {
    pub id: String,
    pub sources: Vec<String>,
    /// Source name to search query
    pub queries: BTreeMap<String, String>,
    pub batch_size: usize,
    pub target_hours: f64,
    pub output_destination: OutputDestination,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub counters: BatchCounters,
    pub status: BatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchState {
    pub fn new(
        id: String,
        queries: BTreeMap<String, String>,
        batch_size: usize,
        target_hours: f64,
        output_destination: OutputDestination,
    ) -> Self {
        Self {
            id,
            sources: queries.keys().cloned().collect(),
            queries,
            batch_size,
            target_hours,
            output_destination,
            start_time: Utc::now(),
            end_time: None,
            counters: BatchCounters::default(),
            status: BatchStatus::Running,
            error: None,
        }
    }

    pub fn complete(&mut self) {
        self.status = BatchStatus::Completed;
        self.end_time = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = BatchStatus::Failed;
        self.error = Some(error.into());
        self.end_time = Some(Utc::now());
    }

    pub fn duration_secs(&self) -> f64 {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).num_milliseconds().max(0) as f64 / 1000.0
    }
}

/// The whole state document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub batches: BTreeMap<String, BatchState>,
    pub last_batch_id: Option<String>,
    pub total_videos_processed: u64,
    pub total_videos_validated: u64,
    pub total_videos_uploaded: u64,
    pub total_videos_failed: u64,
    pub total_video_seconds: f64,
}

/// File-backed state; every mutation is flushed before returning
pub struct StateStore {
    path: PathBuf,
    state: PersistedState,
}

impl StateStore {
    /// A missing or unreadable file yields empty state
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<PersistedState>(&bytes) {
                Ok(state) => {
                    debug!(
                        "Loaded batch state from {} ({} batches)",
                        path.display(),
                        state.batches.len()
                    );
                    state
                }
                Err(e) => {
                    warn!("Ignoring corrupt batch state {}: {}", path.display(), e);
                    PersistedState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(e) => {
                warn!("Cannot read batch state {}: {}", path.display(), e);
                PersistedState::default()
            }
        };
        Self { path, state }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &PersistedState {
        &self.state
    }

    pub fn batch(&self, id: &str) -> Option<&BatchState> {
        self.state.batches.get(id)
    }

    /// Write the document to a sibling temp file, then rename over the target
    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(&self.state)?;
        fs::write(&tmp, content).await.map_err(|e| {
            CollectorError::StateError(format!("Cannot write {}: {}", tmp.display(), e))
        })?;
        fs::rename(&tmp, &self.path).await.map_err(|e| {
            CollectorError::StateError(format!("Cannot replace {}: {}", self.path.display(), e))
        })?;
        Ok(())
    }

    pub async fn insert_batch(&mut self, batch: BatchState) -> Result<()> {
        self.state.last_batch_id = Some(batch.id.clone());
        self.state.batches.insert(batch.id.clone(), batch);
        self.save().await
    }

    pub async fn put_batch(&mut self, batch: &BatchState) -> Result<()> {
        self.state.batches.insert(batch.id.clone(), batch.clone());
        self.save().await
    }

    /// Running totals of the current run
    pub async fn set_totals(&mut self, totals: &SliceTally) -> Result<()> {
        self.state.total_videos_processed = totals.downloaded;
        self.state.total_videos_validated = totals.validated;
        self.state.total_videos_uploaded = totals.uploaded;
        self.state.total_videos_failed = totals.failed;
        self.state.total_video_seconds = totals.video_seconds;
        self.save().await
    }
}

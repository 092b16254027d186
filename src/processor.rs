//! Batch orchestration: scraping rounds, slicing, and durable progress

use crate::chunker::Chunker;
use crate::config::{BatchOverrides, OutputDestination, PipelineConfig};
use crate::error::{CollectorError, Result};
use crate::manager::{ManagerStatus, ScraperManager};
use crate::monitor::ResourceMonitor;
use crate::pipeline::{PipelineCounters, SliceTally, VideoPipeline};
use crate::sources::VideoSource;
use crate::state::{BatchCounters, BatchState, BatchStatus, PersistedState, StateStore};
use crate::storage::Uploader;
use crate::validation::Validator;
use crate::video::{split_at_budget, total_seconds, Overshoot, VideoRecord};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Summary returned by [`BatchProcessor::process_batch`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub success: bool,
    pub batch_id: Option<String>,
    #[serde(flatten)]
    pub counters: BatchCounters,
    pub video_hours: f64,
    #[serde(rename = "duration")]
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchReport {
    fn rejected(error: CollectorError) -> Self {
        Self {
            success: false,
            batch_id: None,
            counters: BatchCounters::default(),
            video_hours: 0.0,
            duration_secs: 0.0,
            error: Some(error.to_string()),
        }
    }

    fn from_batch(batch: &BatchState) -> Self {
        Self {
            success: batch.status == BatchStatus::Completed,
            batch_id: Some(batch.id.clone()),
            counters: batch.counters.clone(),
            video_hours: batch.counters.video_hours(),
            duration_secs: batch.duration_secs(),
            error: batch.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessorStatus {
    pub running: bool,
    pub current_batch: Option<String>,
    pub last_batch_id: Option<String>,
    pub totals: SliceTally,
    pub video_hours: f64,
    pub scrapers: ManagerStatus,
}

/// Untrusted sources must link straight to a file with the required extension
pub fn filter_records(config: &PipelineConfig, records: Vec<VideoRecord>) -> Vec<VideoRecord> {
    let extension = config.required_extension.to_ascii_lowercase();
    records
        .into_iter()
        .filter(|record| {
            config
                .trusted_sources
                .iter()
                .any(|trusted| trusted.eq_ignore_ascii_case(&record.source))
                || record.url.to_ascii_lowercase().ends_with(&extension)
        })
        .collect()
}

pub struct BatchProcessor {
    config: PipelineConfig,
    manager: Arc<ScraperManager>,
    monitor: Arc<dyn ResourceMonitor>,
    validator: Option<Arc<dyn Validator>>,
    uploader: Option<Arc<dyn Uploader>>,
    chunker: Option<Arc<dyn Chunker>>,
    state: Mutex<StateStore>,
    counters: Arc<PipelineCounters>,
    run_lock: Mutex<()>,
    stop_requested: AtomicBool,
    current_batch: StdMutex<Option<String>>,
}

impl BatchProcessor {
    /// Loads persisted state from `config.state_file`
    pub async fn new(config: PipelineConfig, monitor: Arc<dyn ResourceMonitor>) -> Self {
        let state = StateStore::load(&config.state_file).await;
        let manager = Arc::new(ScraperManager::new(config.clone(), monitor.clone()));
        Self {
            config,
            manager,
            monitor,
            validator: None,
            uploader: None,
            chunker: None,
            state: Mutex::new(state),
            counters: Arc::new(PipelineCounters::default()),
            run_lock: Mutex::new(()),
            stop_requested: AtomicBool::new(false),
            current_batch: StdMutex::new(None),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ScraperManager> {
        &self.manager
    }

    pub fn register_scraper(&self, source: Arc<dyn VideoSource>) {
        self.manager.register(source);
    }

    pub fn set_validator(&mut self, validator: Arc<dyn Validator>) {
        self.validator = Some(validator);
    }

    pub fn set_uploader(&mut self, uploader: Arc<dyn Uploader>) {
        self.uploader = Some(uploader);
    }

    pub fn set_chunker(&mut self, chunker: Arc<dyn Chunker>) {
        self.chunker = Some(chunker);
    }

    /// Collect, validate and store videos from `queries` (source name to
    /// query) until the target duration is reached or the sources run dry.
    pub async fn process_batch(
        &self,
        queries: BTreeMap<String, String>,
        overrides: BatchOverrides,
    ) -> BatchReport {
        let _run = self.run_lock.lock().await;
        self.run(None, queries, overrides).await
    }

    /// Re-run a batch that never completed, with its original parameters
    pub async fn resume_batch(&self, batch_id: &str) -> BatchReport {
        let _run = self.run_lock.lock().await;

        let previous = self.state.lock().await.batch(batch_id).cloned();
        let Some(previous) = previous else {
            return BatchReport::rejected(CollectorError::BatchNotFound(batch_id.to_string()));
        };
        if previous.status == BatchStatus::Completed {
            return BatchReport::rejected(CollectorError::BatchAlreadyCompleted(
                batch_id.to_string(),
            ));
        }

        info!("Resuming batch {} ({:?})", batch_id, previous.status);
        let overrides = BatchOverrides {
            batch_size: Some(previous.batch_size),
            target_hours: Some(previous.target_hours),
            output_destination: Some(previous.output_destination),
            ..Default::default()
        };
        self.run(Some(previous.id), previous.queries, overrides).await
    }

    /// Stop scraping and skip remaining slices; the running batch completes
    /// with what it has processed. The request is cleared when that batch
    /// ends, so a stop issued while a batch is starting up is not lost.
    pub fn stop_batch(&self) {
        info!("Stopping batch processing");
        self.stop_requested.store(true, Ordering::SeqCst);
        self.manager.stop_all();
    }

    /// Stop any running batch and clear the temp and failed areas
    pub async fn cleanup(&self) {
        self.stop_batch();
        purge_staging(&self.config, true).await;
    }

    pub async fn status(&self) -> ProcessorStatus {
        let totals = self.counters.snapshot();
        let current_batch = self
            .current_batch
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default();
        ProcessorStatus {
            running: current_batch.is_some(),
            current_batch,
            last_batch_id: self.state.lock().await.state().last_batch_id.clone(),
            video_hours: totals.video_seconds / 3600.0,
            totals,
            scrapers: self.manager.status(),
        }
    }

    pub async fn state_snapshot(&self) -> PersistedState {
        self.state.lock().await.state().clone()
    }

    fn stopped(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn set_current(&self, batch_id: Option<String>) {
        if let Ok(mut current) = self.current_batch.lock() {
            *current = batch_id;
        }
    }

    async fn run(
        &self,
        batch_id: Option<String>,
        queries: BTreeMap<String, String>,
        overrides: BatchOverrides,
    ) -> BatchReport {
        let config = self.config.with_overrides(&overrides);

        let Some(validator) = self.validator.clone() else {
            return BatchReport::rejected(CollectorError::MissingCollaborator("Validator"));
        };
        if config.output_destination == OutputDestination::Cloud && self.uploader.is_none() {
            return BatchReport::rejected(CollectorError::MissingCollaborator("Uploader"));
        }
        let queries: BTreeMap<String, String> = queries
            .into_iter()
            .filter(|(name, _)| {
                let known = self.manager.has_source(name);
                if !known {
                    warn!(
                        "Ignoring unregistered source {} (registered: {})",
                        name,
                        self.manager.source_names().join(", ")
                    );
                }
                known
            })
            .collect();
        if queries.is_empty() {
            return BatchReport::rejected(CollectorError::NoValidSources);
        }

        let batch_id = batch_id.unwrap_or_else(new_batch_id);
        let mut batch = BatchState::new(
            batch_id.clone(),
            queries.clone(),
            config.batch_size,
            config.target_hours,
            config.output_destination,
        );
        if let Err(e) = self.state.lock().await.insert_batch(batch.clone()).await {
            error!("Cannot record batch {}: {}", batch_id, e);
            return BatchReport::rejected(e);
        }

        info!(
            "Starting batch {}: {} sources, batch size {}, target {:.2} hours, output {}",
            batch_id,
            queries.len(),
            config.batch_size,
            config.target_hours,
            config.output_destination
        );

        self.counters.reset();
        self.manager.reset_cursors();
        self.set_current(Some(batch_id.clone()));

        let pipeline = VideoPipeline::new(
            config.clone(),
            self.manager.clone(),
            validator,
            self.counters.clone(),
        )
        .with_uploader(self.uploader.clone())
        .with_chunker(self.chunker.clone());

        let outcome = self.execute(&config, &queries, &pipeline, &mut batch).await;
        match &outcome {
            Ok(()) => {
                batch.complete();
                info!(
                    "Batch {} completed: {} validated, {} uploaded, {} failed, {:.2} hours",
                    batch.id,
                    batch.counters.videos_validated,
                    batch.counters.videos_uploaded,
                    batch.counters.videos_failed,
                    batch.counters.video_hours()
                );
            }
            Err(e) => {
                error!("Batch {} failed: {}", batch.id, e);
                batch.fail(e.to_string());
            }
        }

        if let Err(e) = self.state.lock().await.put_batch(&batch).await {
            error!("Cannot record final state of batch {}: {}", batch.id, e);
        }
        purge_staging(&config, false).await;
        self.set_current(None);
        self.stop_requested.store(false, Ordering::SeqCst);
        BatchReport::from_batch(&batch)
    }

    async fn execute(
        &self,
        config: &PipelineConfig,
        queries: &BTreeMap<String, String>,
        pipeline: &VideoPipeline,
        batch: &mut BatchState,
    ) -> Result<()> {
        self.ensure_disk_space(config).await?;

        let target_secs = config.target_seconds();
        let allowance = config.allowed_overshoot_secs();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        // Trimmed off a slice and handed back to the manager
        let mut returned: HashSet<(String, String)> = HashSet::new();
        let mut round = 0;

        while self.counters.video_seconds() < target_secs && !self.stopped() {
            round += 1;
            info!("Batch {}: scraping round {}", batch.id, round);

            let found = self
                .manager
                .run_scrapers_until_target(queries, config.target_hours)
                .await;
            let found_count = found.len();
            let mut accepted = Vec::new();
            let mut discovered = 0u64;
            for record in filter_records(config, found) {
                let key = record.key();
                if seen.insert(key.clone()) {
                    discovered += 1;
                    accepted.push(record);
                } else if returned.remove(&key) {
                    accepted.push(record);
                }
            }
            info!(
                "Round {}: {} of {} videos accepted ({} new)",
                round,
                accepted.len(),
                found_count,
                discovered
            );
            if accepted.is_empty() {
                info!("No new videos available from scrapers");
                break;
            }
            batch.counters.videos_found += discovered;

            let slice_count = accepted.len().div_ceil(config.batch_size.max(1));
            for (index, slice) in accepted.chunks(config.batch_size.max(1)).enumerate() {
                if self.stopped() {
                    info!("Stop requested, skipping remaining slices");
                    break;
                }
                if self.counters.video_seconds() >= target_secs {
                    break;
                }
                if let Err(e) = self.ensure_disk_space(config).await {
                    warn!("{}; retrying in {:?}", e, config.disk_retry_delay());
                    tokio::time::sleep(config.disk_retry_delay()).await;
                    // Still short after cleanup and one retry: the whole batch
                    // fails rather than just this round. Its flushed progress
                    // stays and resume_batch picks it up once space is freed.
                    self.ensure_disk_space(config).await?;
                }

                let collected = self.counters.video_seconds();
                let mut slice = slice.to_vec();
                if collected + total_seconds(&slice) > target_secs + allowance {
                    let budget = target_secs + allowance - collected;
                    let (kept, cut) = split_at_budget(slice, budget, Overshoot::Forbid);
                    warn!(
                        "Slice would overshoot the target, trimmed to {} videos",
                        kept.len()
                    );
                    if kept.is_empty() {
                        // Nothing here fits the remaining budget, now or later
                        break;
                    }
                    // Offered again next round if this slice falls short
                    returned.extend(cut.iter().map(VideoRecord::key));
                    self.manager.return_unused(cut);
                    slice = kept;
                }

                info!(
                    "Batch {}: slice {}/{} ({} videos)",
                    batch.id,
                    index + 1,
                    slice_count,
                    slice.len()
                );
                let tally = pipeline.process_slice(slice).await;
                batch.counters.absorb(&tally);

                let totals = self.counters.snapshot();
                {
                    let mut state = self.state.lock().await;
                    state.put_batch(batch).await?;
                    state.set_totals(&totals).await?;
                }
                purge_staging(config, false).await;
            }
        }

        if self.counters.video_seconds() >= target_secs {
            info!("Batch {} reached its target of {:.2} hours", batch.id, config.target_hours);
        }
        Ok(())
    }

    /// Free space check on the download volume, with one cleanup pass before
    /// giving up. Unknown free space passes.
    async fn ensure_disk_space(&self, config: &PipelineConfig) -> Result<()> {
        fs::create_dir_all(&config.download_dir).await?;
        let required = config.disk_space_threshold;

        let Some(available) = self.monitor.free_disk_space(&config.download_dir) else {
            warn!("Cannot determine free space for {}", config.download_dir.display());
            return Ok(());
        };
        if available >= required {
            return Ok(());
        }

        warn!("Low disk space: {} bytes < {} bytes", available, required);
        purge_staging(config, true).await;

        match self.monitor.free_disk_space(&config.download_dir) {
            Some(available) if available < required => {
                Err(CollectorError::InsufficientDiskSpace { available, required })
            }
            _ => Ok(()),
        }
    }
}

fn new_batch_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("batch_{}_{}", chrono::Utc::now().timestamp(), &suffix[..8])
}

/// Empty the temp area, and the failed area too under disk pressure
async fn purge_staging(config: &PipelineConfig, include_failed: bool) {
    let mut removed = purge_dir(&config.temp_dir).await;
    if include_failed {
        removed += purge_dir(&config.failed_dir).await;
    }
    if removed > 0 {
        info!("Removed {} staged files", removed);
    }
}

async fn purge_dir(dir: &Path) -> usize {
    let mut removed = 0;
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let Ok(mut entries) = fs::read_dir(&current).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            match entry.file_type().await {
                Ok(kind) if kind.is_dir() => pending.push(path),
                Ok(_) => match fs::remove_file(&path).await {
                    Ok(()) => {
                        debug!("Removed {}", path.display());
                        removed += 1;
                    }
                    Err(e) => warn!("Error removing {}: {}", path.display(), e),
                },
                Err(_) => {}
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::StaticMonitor;
    use crate::testing::{
        stub_records_from, ScriptedMonitor, StubSource, StubUploader, StubValidator,
    };
    use std::time::Duration;

    fn config(root: &Path) -> PipelineConfig {
        PipelineConfig {
            global_rate_limit_secs: 0.0,
            disk_retry_delay_secs: 0.0,
            batch_size: 4,
            ..PipelineConfig::rooted_at(root)
        }
    }

    async fn processor(config: PipelineConfig) -> BatchProcessor {
        let mut processor = BatchProcessor::new(config, Arc::new(StaticMonitor::healthy())).await;
        processor.set_validator(Arc::new(StubValidator::accept_all()));
        processor
    }

    fn queries(names: &[&str]) -> BTreeMap<String, String> {
        names
            .iter()
            .map(|n| (n.to_string(), "ocean".to_string()))
            .collect()
    }

    fn hours(secs: f64) -> BatchOverrides {
        BatchOverrides {
            target_hours: Some(secs / 3600.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_filter_policy() {
        let config = PipelineConfig::default();
        let records = vec![
            VideoRecord::new("coverr", "c", "https://coverr.test/videos/ocean"),
            VideoRecord::new("wikimedia", "w", "https://upload.test/File:Sea.webm"),
            VideoRecord::new("pexels", "ok", "https://cdn.test/ok.MP4"),
            VideoRecord::new("pexels", "bad", "https://cdn.test/bad.webm"),
        ];
        let kept: Vec<String> = filter_records(&config, records)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(kept, vec!["c", "w", "ok"]);
    }

    #[tokio::test]
    async fn test_preconditions_fail_fast() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        let bare = BatchProcessor::new(config.clone(), Arc::new(StaticMonitor::healthy())).await;
        bare.register_scraper(Arc::new(StubSource::new("pexels")));
        let report = bare.process_batch(queries(&["pexels"]), BatchOverrides::default()).await;
        assert!(!report.success);
        assert_eq!(report.error.as_deref(), Some("Validator not set"));

        let processor = processor(config.clone()).await;
        processor.register_scraper(Arc::new(StubSource::new("pexels")));
        let cloud = BatchOverrides {
            output_destination: Some(OutputDestination::Cloud),
            ..Default::default()
        };
        let report = processor.process_batch(queries(&["pexels"]), cloud).await;
        assert_eq!(report.error.as_deref(), Some("Uploader not set"));

        let report = processor
            .process_batch(queries(&["nasa"]), BatchOverrides::default())
            .await;
        assert!(!report.success);
        assert!(report.batch_id.is_none());

        // Nothing was recorded
        assert!(processor.state_snapshot().await.batches.is_empty());
        assert!(!config.state_file.exists());
    }

    #[tokio::test]
    async fn test_insufficient_disk_fails_batch() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = StaticMonitor {
            healthy: true,
            free_space: Some(10),
        };
        let mut processor = BatchProcessor::new(config(dir.path()), Arc::new(monitor)).await;
        processor.set_validator(Arc::new(StubValidator::accept_all()));
        processor.register_scraper(Arc::new(StubSource::new("pexels")));

        let report = processor
            .process_batch(queries(&["pexels"]), BatchOverrides::default())
            .await;
        assert!(!report.success);
        assert!(report.error.unwrap().contains("Insufficient disk space"));

        let state = processor.state_snapshot().await;
        let batch = &state.batches[report.batch_id.as_deref().unwrap()];
        assert_eq!(batch.status, BatchStatus::Failed);
        assert!(batch.end_time.is_some());
    }

    #[tokio::test]
    async fn test_local_batch_until_sources_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let processor = processor(config.clone()).await;

        processor.register_scraper(Arc::new(StubSource::new("pexels").with_pages(vec![
            stub_records_from("pexels", 0, 5, 20.0),
            stub_records_from("pexels", 5, 5, 20.0),
        ])));
        let mut pixabay = stub_records_from("pixabay", 0, 3, 20.0);
        pixabay[1].url = "https://pixabay.test/videos/preview.webm".to_string();
        processor.register_scraper(Arc::new(StubSource::new("pixabay").with_pages(vec![pixabay])));

        let report = processor
            .process_batch(queries(&["pexels", "pixabay"]), hours(3600.0))
            .await;

        assert!(report.success, "{:?}", report.error);
        assert_eq!(report.counters.videos_found, 12);
        assert_eq!(report.counters.videos_downloaded, 12);
        assert_eq!(report.counters.videos_validated, 12);
        assert_eq!(report.counters.videos_uploaded, 12);
        assert_eq!(report.counters.videos_failed, 0);
        assert_eq!(report.counters.video_seconds, 240.0);
        assert_eq!(std::fs::read_dir(&config.processed_dir).unwrap().count(), 12);

        let reloaded = StateStore::load(&config.state_file).await;
        let batch_id = report.batch_id.unwrap();
        assert_eq!(reloaded.state().last_batch_id.as_deref(), Some(batch_id.as_str()));
        assert_eq!(reloaded.batch(&batch_id).unwrap().status, BatchStatus::Completed);
        assert_eq!(reloaded.state().total_videos_uploaded, 12);
        assert_eq!(reloaded.state().total_video_seconds, 240.0);
    }

    #[tokio::test]
    async fn test_batch_stops_at_target() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor(config(dir.path())).await;
        processor.register_scraper(Arc::new(
            StubSource::new("pexels").with_pages(vec![stub_records_from("pexels", 0, 10, 20.0)]),
        ));

        let report = processor
            .process_batch(queries(&["pexels"]), hours(100.0))
            .await;
        assert!(report.success);
        assert_eq!(report.counters.videos_validated, 5);
        assert_eq!(report.counters.video_seconds, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slice_trimmed_to_remaining_budget() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            batch_size: 10,
            assumed_video_secs: 0.0,
            ..config(dir.path())
        };
        let mut processor = processor(config).await;
        processor.set_validator(Arc::new(StubValidator::rejecting(&["pexels_1"])));
        processor.register_scraper(Arc::new(
            StubSource::new("pexels")
                .with_pages(vec![
                    stub_records_from("pexels", 0, 3, 20.0),
                    stub_records_from("pexels", 3, 3, 20.0),
                ])
                .with_delay(Duration::from_millis(100)),
        ));

        let report = processor
            .process_batch(queries(&["pexels"]), hours(60.0))
            .await;

        assert!(report.success);
        // Round 2 only needs one more 20s video
        assert_eq!(report.counters.videos_found, 6);
        assert_eq!(report.counters.videos_downloaded, 4);
        assert_eq!(report.counters.videos_validated, 3);
        assert_eq!(report.counters.videos_failed, 1);
        assert_eq!(report.counters.video_seconds, 60.0);
    }

    #[tokio::test]
    async fn test_records_cut_at_target_are_processed_after_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let mut processor = processor(config(dir.path())).await;
        processor.set_validator(Arc::new(StubValidator::rejecting(&["pexels_0"])));
        let source = Arc::new(
            StubSource::new("pexels").with_pages(vec![stub_records_from("pexels", 0, 3, 20.0)]),
        );
        processor.register_scraper(source.clone());

        let report = processor
            .process_batch(queries(&["pexels"]), hours(40.0))
            .await;

        assert!(report.success);
        assert_eq!(report.counters.videos_found, 3);
        assert_eq!(report.counters.videos_downloaded, 3);
        assert_eq!(report.counters.videos_validated, 2);
        assert_eq!(report.counters.videos_failed, 1);
        assert_eq!(report.counters.video_seconds, 40.0);
    }

    #[tokio::test]
    async fn test_disk_filling_mid_batch_fails_after_first_slice() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        // Start-up check and first slice see free space; the second slice does not
        let monitor = Arc::new(ScriptedMonitor::disk_fills_after(2));
        let mut processor = BatchProcessor::new(config.clone(), monitor.clone()).await;
        processor.set_validator(Arc::new(StubValidator::accept_all()));
        processor.register_scraper(Arc::new(
            StubSource::new("pexels").with_pages(vec![stub_records_from("pexels", 0, 8, 20.0)]),
        ));

        let report = processor
            .process_batch(queries(&["pexels"]), BatchOverrides::default())
            .await;

        assert!(!report.success);
        assert!(report.error.as_deref().unwrap().contains("Insufficient disk space"));
        assert_eq!(report.counters.videos_found, 8);
        assert_eq!(report.counters.videos_validated, 4);
        // Cleanup recheck, then the retry and its own recheck
        assert_eq!(monitor.disk_checks(), 6);

        let reloaded = StateStore::load(&config.state_file).await;
        let batch = reloaded.batch(report.batch_id.as_deref().unwrap()).unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
        assert_eq!(batch.counters.videos_validated, 4);
        assert_eq!(batch.counters.video_seconds, 80.0);
        assert_eq!(std::fs::read_dir(&config.processed_dir).unwrap().count(), 4);
    }

    #[tokio::test]
    async fn test_stop_requested_before_start_is_honoured() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor(config(dir.path())).await;
        let source = Arc::new(
            StubSource::new("pexels").with_pages(vec![stub_records_from("pexels", 0, 5, 20.0)]),
        );
        processor.register_scraper(source.clone());

        processor.stop_batch();
        let stopped = processor
            .process_batch(queries(&["pexels"]), BatchOverrides::default())
            .await;
        assert!(stopped.success);
        assert_eq!(stopped.counters.videos_found, 0);
        assert_eq!(source.search_calls(), 0);

        // The request ended with that batch
        let next = processor
            .process_batch(queries(&["pexels"]), BatchOverrides::default())
            .await;
        assert!(next.success);
        assert_eq!(next.counters.videos_found, 5);
    }

    #[tokio::test]
    async fn test_report_json_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor(config(dir.path())).await;
        processor.register_scraper(Arc::new(
            StubSource::new("pexels").with_pages(vec![stub_records_from("pexels", 0, 2, 20.0)]),
        ));

        let report = processor
            .process_batch(queries(&["pexels"]), BatchOverrides::default())
            .await;
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("duration").is_some());
        assert!(json.get("duration_secs").is_none());
        assert_eq!(json["videos_validated"], 2);
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn test_cloud_batch_uses_uploader() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let mut processor = processor(config.clone()).await;
        let uploader = Arc::new(StubUploader::rejecting(&["pexels_2"]));
        processor.set_uploader(uploader.clone());
        processor.register_scraper(Arc::new(
            StubSource::new("pexels").with_pages(vec![stub_records_from("pexels", 0, 4, 20.0)]),
        ));

        let report = processor
            .process_batch(
                queries(&["pexels"]),
                BatchOverrides {
                    output_destination: Some(OutputDestination::Cloud),
                    ..Default::default()
                },
            )
            .await;

        assert!(report.success);
        assert_eq!(report.counters.videos_uploaded, 3);
        assert_eq!(report.counters.videos_failed, 1);
        assert_eq!(uploader.uploaded().len(), 3);
        // Overrides do not leak into the base configuration
        assert_eq!(processor.config().output_destination, OutputDestination::Local);
    }

    #[tokio::test]
    async fn test_resume_interrupted_batch() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        // A run that died after its first slice was flushed
        {
            let mut store = StateStore::load(&config.state_file).await;
            let mut batch = BatchState::new(
                "batch_interrupted".to_string(),
                queries(&["pexels"]),
                2,
                40.0 / 3600.0,
                OutputDestination::Local,
            );
            batch.counters.videos_downloaded = 2;
            store.insert_batch(batch).await.unwrap();
        }

        let processor = processor(config.clone()).await;
        let restored = processor.state_snapshot().await;
        assert_eq!(restored.batches["batch_interrupted"].status, BatchStatus::Running);
        assert_eq!(restored.batches["batch_interrupted"].counters.videos_downloaded, 2);

        processor.register_scraper(Arc::new(
            StubSource::new("pexels").with_pages(vec![stub_records_from("pexels", 0, 5, 20.0)]),
        ));
        let report = processor.resume_batch("batch_interrupted").await;
        assert!(report.success, "{:?}", report.error);
        assert_eq!(report.batch_id.as_deref(), Some("batch_interrupted"));
        assert_eq!(report.counters.videos_validated, 2);

        let state = processor.state_snapshot().await;
        let batch = &state.batches["batch_interrupted"];
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.batch_size, 2);

        let again = processor.resume_batch("batch_interrupted").await;
        assert_eq!(again.error.as_deref(), Some("Batch batch_interrupted already completed"));
        let missing = processor.resume_batch("nope").await;
        assert_eq!(missing.error.as_deref(), Some("Batch not found: nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_batch_keeps_partial_progress() {
        let dir = tempfile::tempdir().unwrap();
        let processor = Arc::new(processor(config(dir.path())).await);
        let pages = (0..20)
            .map(|page| stub_records_from("pexels", page * 5, 5, 20.0))
            .collect();
        processor.register_scraper(Arc::new(
            StubSource::new("pexels")
                .with_pages(pages)
                .with_delay(Duration::from_millis(100)),
        ));

        let runner = processor.clone();
        let handle = tokio::spawn(async move {
            runner
                .process_batch(queries(&["pexels"]), BatchOverrides::default())
                .await
        });

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(processor.status().await.running);
        processor.stop_batch();

        let report = handle.await.unwrap();
        assert!(report.success);
        assert!(report.counters.videos_found > 0);
        assert!(report.counters.videos_found < 100);
        assert!(!processor.status().await.running);
    }

    #[tokio::test]
    async fn test_purge_dir_removes_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("chunks");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("a.tmp"), b"a").unwrap();
        std::fs::write(nested.join("b.mp4"), b"b").unwrap();

        assert_eq!(purge_dir(dir.path()).await, 2);
        assert_eq!(purge_dir(&dir.path().join("missing")).await, 0);
    }
}

//! Parallel scraper pool: one task per source, bounded by a duration target

use crate::config::PipelineConfig;
use crate::monitor::ResourceMonitor;
use crate::sources::VideoSource;
use crate::throttle::GlobalRateLimiter;
use crate::video::{split_at_budget, total_seconds, Overshoot, VideoRecord};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Consecutive search failures after which a source task gives up
pub const MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Per-source progress, written only by the task scraping that source
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScraperStatus {
    pub active: bool,
    pub videos_found: u64,
    pub current_query: Option<String>,
    pub current_page: u32,
    pub error_count: u32,
    pub last_active: Option<DateTime<Utc>>,
}

/// Snapshot returned by [`ScraperManager::status`]
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub registered: usize,
    pub active_scrapers: Vec<String>,
    pub total_videos_found: u64,
    pub scrapers: BTreeMap<String, ScraperStatus>,
}

struct Registration {
    source: Arc<dyn VideoSource>,
    /// Held by whichever task is currently searching this source
    lease: Arc<Mutex<()>>,
}

pub struct ScraperManager {
    config: PipelineConfig,
    monitor: Arc<dyn ResourceMonitor>,
    limiter: Arc<GlobalRateLimiter>,
    scrapers: DashMap<String, Registration>,
    statuses: Arc<DashMap<String, ScraperStatus>>,
    /// Next page per (source, query)
    cursors: Arc<DashMap<(String, String), u32>>,
    shutdown: StdMutex<Arc<AtomicBool>>,
    /// Fetched but cut by the last trim
    carried: StdMutex<Vec<VideoRecord>>,
    /// (source, id) of every record handed out since the last cursor reset
    delivered: StdMutex<HashSet<(String, String)>>,
}

impl ScraperManager {
    pub fn new(config: PipelineConfig, monitor: Arc<dyn ResourceMonitor>) -> Self {
        let limiter = Arc::new(GlobalRateLimiter::new(config.global_rate_limit()));
        Self {
            config,
            monitor,
            limiter,
            scrapers: DashMap::new(),
            statuses: Arc::new(DashMap::new()),
            cursors: Arc::new(DashMap::new()),
            shutdown: StdMutex::new(Arc::new(AtomicBool::new(false))),
            carried: StdMutex::new(Vec::new()),
            delivered: StdMutex::new(HashSet::new()),
        }
    }

    /// Register `source` under its name. Registering a name again replaces the
    /// capability but keeps its status entry.
    pub fn register(&self, source: Arc<dyn VideoSource>) {
        let name = source.name().to_string();
        if self.scrapers.contains_key(&name) {
            debug!("Scraper {} already registered, replacing", name);
        } else {
            info!("Registered scraper: {}", name);
        }
        self.scrapers.insert(
            name.clone(),
            Registration {
                source,
                lease: Arc::new(Mutex::new(())),
            },
        );
        self.statuses.entry(name).or_default();
    }

    pub fn scraper(&self, name: &str) -> Option<Arc<dyn VideoSource>> {
        self.scrapers.get(name).map(|r| r.source.clone())
    }

    pub fn has_source(&self, name: &str) -> bool {
        self.scrapers.contains_key(name)
    }

    pub fn source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scrapers.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Forget pagination and carried-over records so the next run starts
    /// every query at page 1
    pub fn reset_cursors(&self) {
        self.cursors.clear();
        self.lock_delivered().clear();
        self.carried
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    /// Ask every running source task to stop at its next loop iteration
    pub fn stop_all(&self) {
        let flag = self
            .shutdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if !flag.swap(true, Ordering::SeqCst) {
            info!("Stopping all scrapers");
        }
    }

    pub fn status(&self) -> ManagerStatus {
        let scrapers: BTreeMap<String, ScraperStatus> = self
            .statuses
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        ManagerStatus {
            registered: self.scrapers.len(),
            active_scrapers: scrapers
                .iter()
                .filter(|(_, s)| s.active)
                .map(|(name, _)| name.clone())
                .collect(),
            total_videos_found: scrapers.values().map(|s| s.videos_found).sum(),
            scrapers,
        }
    }

    /// Run one task per queried source until every source is exhausted or the
    /// collected duration reaches `target_hours`. The result is trimmed greedily
    /// to the target; the first record is always kept. Records cut by the trim
    /// are served first by the next run.
    pub async fn run_scrapers_until_target(
        &self,
        queries: &BTreeMap<String, String>,
        target_hours: f64,
    ) -> Vec<VideoRecord> {
        let target_secs = target_hours * 3600.0;
        let shutdown = Arc::new(AtomicBool::new(false));
        *self
            .shutdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = shutdown.clone();

        let mut collected = self.take_carried(queries);
        let carried = collected.len();
        let mut reached = false;
        if carried > 0 {
            let carried_secs = total_seconds(&collected);
            info!(
                "Reusing {} videos ({:.1}s) left over from the previous run",
                carried, carried_secs
            );
            reached = carried_secs >= target_secs;
        }
        if !reached {
            reached = self
                .scrape(queries, target_secs, &shutdown, &mut collected)
                .await;
        }

        let found = collected.len();
        let (trimmed, rest) = split_at_budget(collected, target_secs, Overshoot::AllowFirst);
        if !rest.is_empty() {
            debug!("Carrying {} videos over to the next run", rest.len());
            self.return_unused(rest);
        }

        let trimmed_secs = total_seconds(&trimmed);
        if reached {
            info!(
                "Target of {:.2} hours reached: keeping {} of {} videos ({:.1}s)",
                target_hours,
                trimmed.len(),
                found,
                trimmed_secs
            );
        } else {
            info!(
                "Sources exhausted before target: {} videos, {:.2} of {:.2} hours",
                trimmed.len(),
                trimmed_secs / 3600.0,
                target_hours
            );
        }
        trimmed
    }

    /// Hand records back so the next run serves them before scraping
    pub fn return_unused(&self, records: Vec<VideoRecord>) {
        self.carried
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(records);
    }

    fn take_carried(&self, queries: &BTreeMap<String, String>) -> Vec<VideoRecord> {
        let mut carried = self
            .carried
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (taken, kept): (Vec<VideoRecord>, Vec<VideoRecord>) = std::mem::take(&mut *carried)
            .into_iter()
            .partition(|record| queries.contains_key(&record.source));
        *carried = kept;
        taken
    }

    /// Scrape into `collected` until the target is reached (true) or every
    /// task has ended (false). Records already delivered since the last
    /// [`reset_cursors`](Self::reset_cursors) are dropped.
    async fn scrape(
        &self,
        queries: &BTreeMap<String, String>,
        target_secs: f64,
        shutdown: &Arc<AtomicBool>,
        collected: &mut Vec<VideoRecord>,
    ) -> bool {
        let (sender, receiver) = async_channel::unbounded();
        let mut tasks = Vec::new();
        for (name, query) in queries {
            let Some(registration) = self.scrapers.get(name) else {
                warn!("No scraper registered for source {}, skipping", name);
                continue;
            };
            tasks.push(SourceTask {
                name: name.clone(),
                query: query.clone(),
                source: registration.source.clone(),
                lease: registration.lease.clone(),
                limiter: self.limiter.clone(),
                monitor: self.monitor.clone(),
                statuses: self.statuses.clone(),
                cursors: self.cursors.clone(),
                shutdown: shutdown.clone(),
                results: sender.clone(),
                estimated_length: self.config.estimated_video_length,
                max_videos: self.config.max_videos_per_scraper,
                resource_pause: self.config.resource_pause(),
            });
        }
        drop(sender);

        if tasks.is_empty() {
            warn!("No runnable scrapers for this run");
            return false;
        }

        let concurrency = self.config.max_scrapers.max(1).min(tasks.len());
        info!(
            "Starting {} scraper tasks ({} concurrent), target {:.2} hours",
            tasks.len(),
            concurrency,
            target_secs / 3600.0
        );

        let permits = Arc::new(Semaphore::new(concurrency));
        let mut running = JoinSet::new();
        for task in tasks {
            let permits = permits.clone();
            running.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                if !task.shutdown.load(Ordering::SeqCst) {
                    task.run().await;
                }
            });
        }

        let mut total = total_seconds(collected);
        let mut reached = false;
        loop {
            tokio::select! {
                record = receiver.recv() => match record {
                    Ok(record) => {
                        if self.first_delivery(&record) {
                            total += record.seconds();
                            collected.push(record);
                            if total >= target_secs {
                                reached = true;
                                shutdown.store(true, Ordering::SeqCst);
                                break;
                            }
                        }
                    }
                    // Every task has finished and the queue is empty
                    Err(_) => break,
                },
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = joined {
                        error!("Scraper task failed: {}", e);
                    }
                }
            }
        }

        // Late tasks observe the flag and finish on their own. Closing first
        // makes their sends fail, so nothing lands after the drain.
        running.detach_all();
        receiver.close();
        while let Ok(record) = receiver.try_recv() {
            if self.first_delivery(&record) {
                collected.push(record);
            }
        }
        reached
    }

    fn first_delivery(&self, record: &VideoRecord) -> bool {
        self.lock_delivered().insert(record.key())
    }

    fn lock_delivered(&self) -> std::sync::MutexGuard<'_, HashSet<(String, String)>> {
        self.delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Everything one source task needs, detached from the manager's lifetime
struct SourceTask {
    name: String,
    query: String,
    source: Arc<dyn VideoSource>,
    lease: Arc<Mutex<()>>,
    limiter: Arc<GlobalRateLimiter>,
    monitor: Arc<dyn ResourceMonitor>,
    statuses: Arc<DashMap<String, ScraperStatus>>,
    cursors: Arc<DashMap<(String, String), u32>>,
    shutdown: Arc<AtomicBool>,
    results: async_channel::Sender<VideoRecord>,
    estimated_length: f64,
    max_videos: usize,
    resource_pause: Duration,
}

impl SourceTask {
    fn update_status(&self, f: impl FnOnce(&mut ScraperStatus)) {
        let mut status = self.statuses.entry(self.name.clone()).or_default();
        f(&mut status);
    }

    fn stopped(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    async fn run(self) {
        let _lease = self.lease.lock().await;
        let cursor_key = (self.name.clone(), self.query.clone());
        let mut page = self.cursors.get(&cursor_key).map(|p| *p).unwrap_or(1);
        let mut consecutive_errors = 0u32;
        let mut found = 0usize;

        self.update_status(|s| {
            s.active = true;
            s.current_query = Some(self.query.clone());
            s.current_page = page;
            s.last_active = Some(Utc::now());
        });
        info!("Scraper {} started: query {:?} from page {}", self.name, self.query, page);

        loop {
            if self.stopped() {
                debug!("Scraper {} stopping on shutdown", self.name);
                break;
            }
            if found >= self.max_videos {
                info!("Scraper {} reached its limit of {} videos", self.name, self.max_videos);
                break;
            }
            if !self.monitor.healthy() {
                warn!(
                    "Resources constrained, pausing {} for {:?}",
                    self.name, self.resource_pause
                );
                tokio::time::sleep(self.resource_pause).await;
                continue;
            }

            self.limiter.acquire().await;
            if self.stopped() {
                break;
            }
            self.update_status(|s| s.current_page = page);

            match self.source.search(&self.query, page).await {
                Ok(records) if records.is_empty() => {
                    info!("Scraper {} exhausted at page {}", self.name, page);
                    break;
                }
                Ok(records) => {
                    consecutive_errors = 0;
                    let mut sent = 0u64;
                    let mut closed = false;
                    for mut record in records {
                        if found >= self.max_videos {
                            break;
                        }
                        record.ensure_duration(self.estimated_length);
                        if record.source.is_empty() {
                            record.source = self.name.clone();
                        }
                        if self.results.send(record).await.is_err() {
                            closed = true;
                            break;
                        }
                        found += 1;
                        sent += 1;
                    }
                    debug!("Scraper {} page {}: {} videos", self.name, page, sent);

                    self.update_status(|s| {
                        s.videos_found += sent;
                        s.last_active = Some(Utc::now());
                    });
                    if closed {
                        // The page is fetched again by the next run; records
                        // already delivered are skipped there
                        debug!("Result queue closed, {} stopping", self.name);
                        break;
                    }
                    page += 1;
                    self.cursors.insert(cursor_key.clone(), page);
                }
                Err(e) => {
                    consecutive_errors += 1;
                    self.update_status(|s| {
                        s.error_count += 1;
                        s.last_active = Some(Utc::now());
                    });
                    error!(
                        "Scraper {} failed on page {} ({}/{}): {}",
                        self.name, page, consecutive_errors, MAX_CONSECUTIVE_ERRORS, e
                    );
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        error!(
                            "Scraper {} giving up after {} consecutive errors",
                            self.name, consecutive_errors
                        );
                        break;
                    }
                    page += 1;
                    self.cursors.insert(cursor_key.clone(), page);
                }
            }
        }

        self.update_status(|s| s.active = false);
        info!("Scraper {} finished with {} videos", self.name, found);
    }
}

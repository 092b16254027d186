//! VideoCollector - duration-bounded stock footage collection
//!
//! Scrapes several video sources in parallel until a target number of hours
//! has been found, then downloads, validates and stores every video with
//! bounded concurrency, recording resumable progress after each slice.
//!
//! # Features
//!
//! - **Parallel scraping**: one task per source under a shared global rate limit
//! - **Duration target**: collection stops once enough video has been found
//! - **Failure isolation**: one bad video or one broken source never stops a batch
//! - **Resumable batches**: progress is flushed to a JSON state file after every slice
//! - **Local or cloud output**: processed directory, local bucket or S3 (`s3` feature)
//!
//! # Usage
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use videocollector::{AppConfig, BatchOverrides, BatchProcessor, SystemMonitor, ValidationPipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::default();
//!     let monitor = Arc::new(SystemMonitor::new(
//!         config.pipeline.memory_threshold,
//!         config.pipeline.cpu_threshold,
//!     ));
//!
//!     let mut processor = BatchProcessor::new(config.pipeline.clone(), monitor).await;
//!     processor.set_validator(Arc::new(ValidationPipeline::standard(&config.validation)));
//!     for source in videocollector::sources::default_sources(&config)? {
//!         processor.register_scraper(source);
//!     }
//!
//!     let queries = BTreeMap::from([("wikimedia".to_string(), "ocean waves".to_string())]);
//!     let report = processor.process_batch(queries, BatchOverrides::default()).await;
//!     println!("{:.2} hours collected", report.video_hours);
//!     Ok(())
//! }
//! ```

pub mod chunker;
pub mod client;
pub mod config;
pub mod downloader;
pub mod error;
pub mod extractor;
pub mod manager;
pub mod monitor;
pub mod pipeline;
pub mod processor;
pub mod sources;
pub mod state;
pub mod storage;
pub mod throttle;
pub mod validation;
pub mod video;

#[cfg(test)]
mod testing;

pub use chunker::{Chunker, FfmpegChunker};
pub use client::HttpClient;
pub use config::{
    AppConfig, BatchOverrides, HttpConfig, OutputDestination, PipelineConfig, StorageConfig,
};
pub use downloader::{DownloadResult, Downloader};
pub use error::{CollectorError, Result};
pub use manager::{ManagerStatus, ScraperManager, ScraperStatus};
pub use monitor::{ResourceMonitor, StaticMonitor, SystemMonitor};
pub use pipeline::{PipelineCounters, SliceTally, VideoPipeline};
pub use processor::{BatchProcessor, BatchReport, ProcessorStatus};
pub use sources::VideoSource;
pub use state::{BatchState, BatchStatus, StateStore};
pub use storage::{CloudUploader, StorageBackend, UploadOutcome, Uploader};
pub use validation::{ValidationPipeline, ValidationReport, Validator};
pub use video::VideoRecord;

use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber: `RUST_LOG` plus `videocollector=<level>`,
/// JSON lines when `json` is set. Later calls are no-ops.
pub fn init_tracing(level: &str, json: bool) {
    let mut filter = EnvFilter::from_default_env();
    match format!("videocollector={}", level).parse::<Directive>() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("Invalid log level {:?}: {}", level, e),
    }

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

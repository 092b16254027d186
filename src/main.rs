use anyhow::{bail, Context};
use clap::Parser;
use dotenv::dotenv;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use videocollector::sources::default_sources;
use videocollector::storage::create_backend;
use videocollector::{
    AppConfig, BatchOverrides, BatchProcessor, BatchState, CloudUploader, FfmpegChunker, OutputDestination,
    SystemMonitor, ValidationPipeline,
};

/// Collect stock footage from several sources until a target duration is reached
#[derive(Parser, Debug)]
#[command(name = "videocollector", version, about)]
struct Cli {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Source/query pairs, e.g. "pexels:nature;coverr:ocean"
    #[arg(long = "source", value_name = "SOURCE:QUERY")]
    sources: Option<String>,

    /// Resume an unfinished batch instead of starting a new one
    #[arg(long)]
    batch_id: Option<String>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    target_hours: Option<f64>,

    /// local or cloud
    #[arg(long)]
    output_destination: Option<OutputDestination>,

    #[arg(long)]
    max_workers: Option<usize>,

    #[arg(long)]
    max_scrapers: Option<usize>,

    /// Minimum free bytes on the download volume
    #[arg(long)]
    disk_space_threshold: Option<u64>,

    /// Split videos longer than this many seconds with ffmpeg
    #[arg(long)]
    chunk_duration: Option<f64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    videocollector::init_tracing(&cli.log_level, cli.json_logs);

    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(max_scrapers) = cli.max_scrapers {
        config.pipeline.max_scrapers = max_scrapers.max(1);
    }
    if let Some(chunk_secs) = cli.chunk_duration {
        config.pipeline.chunk_duration_secs = Some(chunk_secs);
    }

    let overrides = BatchOverrides {
        batch_size: cli.batch_size,
        target_hours: cli.target_hours,
        output_destination: cli.output_destination,
        disk_space_threshold: cli.disk_space_threshold,
        max_workers: cli.max_workers,
    };
    let monitor = Arc::new(SystemMonitor::new(
        config.pipeline.memory_threshold,
        config.pipeline.cpu_threshold,
    ));
    let mut processor = BatchProcessor::new(config.pipeline.clone(), monitor).await;
    processor.set_validator(Arc::new(ValidationPipeline::standard(&config.validation)));

    let state = processor.state_snapshot().await;
    let resumed = cli.batch_id.as_deref().and_then(|id| state.batches.get(id));
    let destination = output_destination(
        overrides.output_destination,
        resumed,
        config.pipeline.output_destination,
    );
    if destination == OutputDestination::Cloud {
        let backend = create_backend(&config.storage).await?;
        info!("Uploading to {} storage", backend.backend_type());
        processor.set_uploader(Arc::new(CloudUploader::new(backend, &config.storage).await));
    }
    if let Some(chunk_secs) = config.pipeline.chunk_duration_secs {
        processor.set_chunker(Arc::new(FfmpegChunker::new(chunk_secs)));
    }
    for source in default_sources(&config)? {
        processor.register_scraper(source);
    }

    let processor = Arc::new(processor);
    let stopper = processor.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing the current slice");
            stopper.stop_batch();
        }
    });

    let report = match (&cli.batch_id, &cli.sources) {
        (Some(batch_id), _) => processor.resume_batch(batch_id).await,
        (None, Some(sources)) => {
            processor
                .process_batch(parse_sources(sources)?, overrides)
                .await
        }
        (None, None) => bail!("either --source or --batch-id is required"),
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.success {
        let reason = report.error.unwrap_or_else(|| "unknown error".to_string());
        error!("Batch failed: {}", reason);
        bail!("batch failed: {}", reason);
    }

    info!(
        "Collected {:.2} hours in {:.0}s ({} uploaded, {} failed)",
        report.video_hours,
        report.duration_secs,
        report.counters.videos_uploaded,
        report.counters.videos_failed
    );
    Ok(())
}

/// A resumed batch keeps the destination it was started with
fn output_destination(
    requested: Option<OutputDestination>,
    resumed: Option<&BatchState>,
    default: OutputDestination,
) -> OutputDestination {
    match resumed {
        Some(batch) => batch.output_destination,
        None => requested.unwrap_or(default),
    }
}

/// `source:query` pairs separated by `;` or `,`
fn parse_sources(arg: &str) -> anyhow::Result<BTreeMap<String, String>> {
    let mut queries = BTreeMap::new();
    for pair in arg.split([';', ',']).map(str::trim).filter(|p| !p.is_empty()) {
        let (source, query) = pair
            .split_once(':')
            .with_context(|| format!("expected source:query, got {:?}", pair))?;
        let (source, query) = (source.trim().to_ascii_lowercase(), query.trim());
        if source.is_empty() || query.is_empty() {
            bail!("empty source or query in {:?}", pair);
        }
        queries.insert(source, query.to_string());
    }
    if queries.is_empty() {
        bail!("no sources given");
    }
    Ok(queries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sources() {
        let queries = parse_sources("Pexels:nature; coverr:ocean waves,wikimedia:city").unwrap();
        assert_eq!(queries.len(), 3);
        assert_eq!(queries["pexels"], "nature");
        assert_eq!(queries["coverr"], "ocean waves");
        assert_eq!(queries["wikimedia"], "city");
    }

    #[test]
    fn test_parse_sources_rejects_malformed() {
        assert!(parse_sources("pexels").is_err());
        assert!(parse_sources("pexels:").is_err());
        assert!(parse_sources(" ; ").is_err());
    }

    #[test]
    fn test_resumed_batch_keeps_its_destination() {
        let queries = parse_sources("pexels:nature").unwrap();
        let cloud = BatchState::new(
            "batch_1".to_string(),
            queries,
            10,
            1.0,
            OutputDestination::Cloud,
        );

        let destination = output_destination(None, Some(&cloud), OutputDestination::Local);
        assert_eq!(destination, OutputDestination::Cloud);
        let destination = output_destination(
            Some(OutputDestination::Local),
            Some(&cloud),
            OutputDestination::Local,
        );
        assert_eq!(destination, OutputDestination::Cloud);

        assert_eq!(
            output_destination(None, None, OutputDestination::Local),
            OutputDestination::Local
        );
        assert_eq!(
            output_destination(Some(OutputDestination::Cloud), None, OutputDestination::Local),
            OutputDestination::Cloud
        );
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from([
            "videocollector",
            "--source",
            "pexels:nature",
            "--target-hours",
            "2.5",
            "--output-destination",
            "cloud",
        ]);
        assert_eq!(cli.target_hours, Some(2.5));
        assert_eq!(cli.output_destination, Some(OutputDestination::Cloud));
        assert!(cli.batch_id.is_none());
    }
}

//! Error types for the video collection pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parsing failed: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("JSON parsing failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Rate limit exceeded, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Download failed after {attempts} attempts: {message}")]
    DownloadFailed { attempts: u32, message: String },

    #[error("Search failed on {source_name}: {message}")]
    SearchFailed { source_name: String, message: String },

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Chunking failed: {0}")]
    ChunkingFailed(String),

    #[error("{0} not set")]
    MissingCollaborator(&'static str),

    #[error("No valid sources provided")]
    NoValidSources,

    #[error("Insufficient disk space: {available} bytes free, {required} bytes required")]
    InsufficientDiskSpace { available: u64, required: u64 },

    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    #[error("Batch {0} already completed")]
    BatchAlreadyCompleted(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("AWS S3 error: {0}")]
    S3Error(String),
}

pub type Result<T> = std::result::Result<T, CollectorError>;

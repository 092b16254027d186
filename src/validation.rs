//! Content validation applied to every downloaded video

use crate::config::ValidationConfig;
use crate::error::Result;
use crate::video::{extension_of, VideoRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of validating one file; `details` is opaque to the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub accepted: bool,
    pub details: Value,
}

impl ValidationReport {
    pub fn accept(details: Value) -> Self {
        Self {
            accepted: true,
            details,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            details: json!({ "reason": reason.into() }),
        }
    }
}

#[async_trait]
pub trait Validator: Send + Sync {
    fn name(&self) -> &str;

    async fn validate(&self, path: &Path, record: &VideoRecord) -> Result<ValidationReport>;
}

/// File exists, is non-empty and has an allowed container extension
pub struct FileCheckValidator {
    allowed_formats: Vec<String>,
}

impl FileCheckValidator {
    pub fn new(allowed_formats: Vec<String>) -> Self {
        Self {
            allowed_formats: allowed_formats
                .into_iter()
                .map(|f| f.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }
}

#[async_trait]
impl Validator for FileCheckValidator {
    fn name(&self) -> &str {
        "file_check"
    }

    async fn validate(&self, path: &Path, _record: &VideoRecord) -> Result<ValidationReport> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(_) => {
                return Ok(ValidationReport::reject(format!(
                    "Video file not found: {}",
                    path.display()
                )))
            }
        };

        if metadata.len() == 0 {
            return Ok(ValidationReport::reject("Video file is empty"));
        }

        let extension = extension_of(&path.to_string_lossy()).unwrap_or_default();
        if !self.allowed_formats.is_empty() && !self.allowed_formats.contains(&extension) {
            return Ok(ValidationReport::reject(format!(
                "Unsupported container: {:?}",
                extension
            )));
        }

        Ok(ValidationReport::accept(json!({
            "size_bytes": metadata.len(),
            "format": extension,
        })))
    }
}

/// Minimum width/height, taken from the record's reported resolution
pub struct ResolutionValidator {
    min_width: u32,
    min_height: u32,
}

impl ResolutionValidator {
    pub fn new(min_width: u32, min_height: u32) -> Self {
        Self {
            min_width,
            min_height,
        }
    }
}

#[async_trait]
impl Validator for ResolutionValidator {
    fn name(&self) -> &str {
        "resolution"
    }

    async fn validate(&self, _path: &Path, record: &VideoRecord) -> Result<ValidationReport> {
        let details = json!({
            "width": record.width,
            "height": record.height,
            "min_width": self.min_width,
            "min_height": self.min_height,
        });

        // Sources that report no resolution are not penalised
        if record.width == 0 && record.height == 0 {
            debug!("No resolution reported for {}", record.id);
            return Ok(ValidationReport::accept(details));
        }

        if record.width >= self.min_width && record.height >= self.min_height {
            Ok(ValidationReport::accept(details))
        } else {
            Ok(ValidationReport {
                accepted: false,
                details: json!({
                    "reason": format!(
                        "Resolution {}x{} does not meet minimum requirements of {}x{}",
                        record.width, record.height, self.min_width, self.min_height
                    ),
                    "measurements": details,
                }),
            })
        }
    }
}

/// Runs every validator; accepts only if all of them accept
pub struct ValidationPipeline {
    validators: Vec<Arc<dyn Validator>>,
}

impl ValidationPipeline {
    pub fn new(validators: Vec<Arc<dyn Validator>>) -> Self {
        Self { validators }
    }

    /// File and resolution checks configured from `config`
    pub fn standard(config: &ValidationConfig) -> Self {
        Self::new(vec![
            Arc::new(FileCheckValidator::new(config.allowed_formats.clone())),
            Arc::new(ResolutionValidator::new(config.min_width, config.min_height)),
        ])
    }

    pub fn with(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validators.push(validator);
        self
    }
}

#[async_trait]
impl Validator for ValidationPipeline {
    fn name(&self) -> &str {
        "pipeline"
    }

    async fn validate(&self, path: &Path, record: &VideoRecord) -> Result<ValidationReport> {
        let mut results = Map::new();
        let mut failed = Vec::new();

        for validator in &self.validators {
            let report = match validator.validate(path, record).await {
                Ok(report) => report,
                Err(e) => {
                    warn!("Validator {} errored on {}: {}", validator.name(), record.id, e);
                    ValidationReport::reject(e.to_string())
                }
            };
            if !report.accepted {
                failed.push(validator.name().to_string());
            }
            results.insert(validator.name().to_string(), serde_json::to_value(&report)?);
        }

        let accepted = failed.is_empty();
        if accepted {
            info!("Video {} passed validation", record.id);
        } else {
            info!("Video {} failed validation: {}", record.id, failed.join(", "));
        }

        Ok(ValidationReport {
            accepted,
            details: json!({
                "video_path": path.display().to_string(),
                "validators": results,
                "failed_validators": failed,
            }),
        })
    }
}

// Job Configuration - validated value object describing source, cadence and options

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;
use thiserror::Error;

pub const PRIORITY_RANGE: RangeInclusive<u8> = 1..=5;
pub const MAX_RETRIES_RANGE: RangeInclusive<u32> = 1..=10;
pub const PARALLEL_WORKERS_RANGE: RangeInclusive<u32> = 1..=50;
/// Starts per rolling minute; the top is 1000 per second
pub const RATE_LIMIT_RANGE: RangeInclusive<u32> = 1..=60_000;

/// Upper bound for a single retry delay setting (one day)
pub const MAX_RETRY_DELAY_SECONDS: u64 = 86_400;

/// Where candidate items come from. One closed variant per source kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    Folder {
        path: String,
        #[serde(default)]
        recursive: bool,
        /// Lower-case extensions without the dot; empty means every file
        #[serde(default)]
        file_types: Vec<String>,
    },
    Database {
        connection: String,
        table: String,
        id_column: String,
        #[serde(default)]
        filter: Option<String>,
    },
    Cloud {
        provider: CloudProvider,
        folder_id: String,
        #[serde(default)]
        credentials_ref: Option<String>,
    },
}

impl SourceConfig {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceConfig::Folder { .. } => SourceKind::Folder,
            SourceConfig::Database { .. } => SourceKind::Database,
            SourceConfig::Cloud { .. } => SourceKind::Cloud,
        }
    }

    fn collect_violations(&self, out: &mut Vec<FieldViolation>) {
        match self {
            SourceConfig::Folder {
                path, file_types, ..
            } => {
                if path.trim().is_empty() {
                    out.push(FieldViolation::new("source.path", "must not be empty"));
                }
                if file_types.iter().any(|t| t.trim().is_empty()) {
                    out.push(FieldViolation::new(
                        "source.file_types",
                        "must not contain empty entries",
                    ));
                }
            }
            SourceConfig::Database {
                connection,
                table,
                id_column,
                ..
            } => {
                if connection.trim().is_empty() {
                    out.push(FieldViolation::new("source.connection", "must not be empty"));
                }
                if table.trim().is_empty() {
                    out.push(FieldViolation::new("source.table", "must not be empty"));
                }
                if id_column.trim().is_empty() {
                    out.push(FieldViolation::new("source.id_column", "must not be empty"));
                }
            }
            SourceConfig::Cloud { folder_id, .. } => {
                if folder_id.trim().is_empty() {
                    out.push(FieldViolation::new("source.folder_id", "must not be empty"));
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Folder,
    Database,
    Cloud,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Folder => write!(f, "folder"),
            SourceKind::Database => write!(f, "database"),
            SourceKind::Cloud => write!(f, "cloud"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudProvider {
    GoogleDrive,
    Dropbox,
    OneDrive,
    S3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Scan until the source is exhausted, then finish
    Once,
    /// Re-scan on a fixed interval for the life of the job
    Continuous,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub mode: ProcessingMode,
    /// Items requested per discovery cycle (independent of worker concurrency)
    pub batch_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    pub priority: u8,
    pub max_retries: u32,
    pub parallel_workers: u32,
    pub rate_limit_per_minute: Option<u32>,
    pub retry_delay_seconds: u64,
    pub exponential_backoff: bool,
    pub send_to_review_after_max_retries: bool,
    pub processing_timeout_seconds: Option<u64>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: 3,
            max_retries: 3,
            parallel_workers: 5,
            rate_limit_per_minute: None,
            retry_delay_seconds: 5,
            exponential_backoff: true,
            send_to_review_after_max_retries: true,
            processing_timeout_seconds: None,
        }
    }
}

impl JobOptions {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }

    pub fn processing_timeout(&self) -> Option<Duration> {
        self.processing_timeout_seconds.map(Duration::from_secs)
    }

    fn collect_violations(&self, out: &mut Vec<FieldViolation>) {
        if !PRIORITY_RANGE.contains(&self.priority) {
            out.push(FieldViolation::new(
                "options.priority",
                format!(
                    "must be between {} and {} (got {})",
                    PRIORITY_RANGE.start(),
                    PRIORITY_RANGE.end(),
                    self.priority
                ),
            ));
        }
        if !MAX_RETRIES_RANGE.contains(&self.max_retries) {
            out.push(FieldViolation::new(
                "options.max_retries",
                format!(
                    "must be between {} and {} (got {})",
                    MAX_RETRIES_RANGE.start(),
                    MAX_RETRIES_RANGE.end(),
                    self.max_retries
                ),
            ));
        }
        if !PARALLEL_WORKERS_RANGE.contains(&self.parallel_workers) {
            out.push(FieldViolation::new(
                "options.parallel_workers",
                format!(
                    "must be between {} and {} (got {})",
                    PARALLEL_WORKERS_RANGE.start(),
                    PARALLEL_WORKERS_RANGE.end(),
                    self.parallel_workers
                ),
            ));
        }
        if let Some(limit) = self
            .rate_limit_per_minute
            .filter(|l| !RATE_LIMIT_RANGE.contains(l))
        {
            out.push(FieldViolation::new(
                "options.rate_limit_per_minute",
                format!(
                    "must be between {} and {} when set (got {})",
                    RATE_LIMIT_RANGE.start(),
                    RATE_LIMIT_RANGE.end(),
                    limit
                ),
            ));
        }
        if self.retry_delay_seconds > MAX_RETRY_DELAY_SECONDS {
            out.push(FieldViolation::new(
                "options.retry_delay_seconds",
                format!("must not exceed {}", MAX_RETRY_DELAY_SECONDS),
            ));
        }
        if self.processing_timeout_seconds == Some(0) {
            out.push(FieldViolation::new(
                "options.processing_timeout_seconds",
                "must be at least 1 when set",
            ));
        }
    }
}

/// Delivery preferences. Carried with the job, never interpreted by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub on_complete: bool,
    pub on_failure: bool,
    pub recipients: Vec<String>,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub source: SourceConfig,
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub options: JobOptions,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl JobConfig {
    /// Check every structural invariant and report all violations at once
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut violations = Vec::new();

        if self.name.trim().is_empty() {
            violations.push(FieldViolation::new("name", "must not be empty"));
        }

        self.source.collect_violations(&mut violations);

        if self.processing.batch_size < 1 {
            violations.push(FieldViolation::new(
                "processing.batch_size",
                "must be at least 1",
            ));
        }

        self.options.collect_violations(&mut violations);

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations })
        }
    }

    pub fn is_continuous(&self) -> bool {
        self.processing.mode == ProcessingMode::Continuous
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Rejected job configuration, listing every violated field
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("invalid job configuration: {}", join_violations(.violations))]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn fields(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.field.as_str()).collect()
    }
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{} {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder_config() -> JobConfig {
        JobConfig {
            name: "invoices".to_string(),
            source: SourceConfig::Folder {
                path: "/data/inbox".to_string(),
                recursive: false,
                file_types: vec!["pdf".to_string()],
            },
            processing: ProcessingConfig {
                mode: ProcessingMode::Once,
                batch_size: 10,
            },
            options: JobOptions::default(),
            notifications: NotificationConfig::default(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(folder_config().validate().is_ok());
    }

    #[test]
    fn test_validation_reports_every_violation() {
        let mut config = folder_config();
        config.source = SourceConfig::Folder {
            path: "  ".to_string(),
            recursive: true,
            file_types: vec![],
        };
        config.processing.batch_size = 0;
        config.options.parallel_workers = 0;
        config.options.priority = 9;
        config.options.max_retries = 11;

        let err = config.validate().unwrap_err();
        let fields = err.fields();

        assert_eq!(err.violations.len(), 5);
        assert!(fields.contains(&"source.path"));
        assert!(fields.contains(&"processing.batch_size"));
        assert!(fields.contains(&"options.parallel_workers"));
        assert!(fields.contains(&"options.priority"));
        assert!(fields.contains(&"options.max_retries"));
        assert!(err.to_string().contains("options.priority must be between 1 and 5"));
    }

    #[test]
    fn test_incomplete_database_source() {
        let mut config = folder_config();
        config.source = SourceConfig::Database {
            connection: "warehouse".to_string(),
            table: String::new(),
            id_column: String::new(),
            filter: None,
        };

        let err = config.validate().unwrap_err();
        assert_eq!(err.fields(), vec!["source.table", "source.id_column"]);
    }

    #[test]
    fn test_zero_rate_limit_rejected() {
        let mut config = folder_config();
        config.options.rate_limit_per_minute = Some(0);
        config.options.processing_timeout_seconds = Some(0);

        let err = config.validate().unwrap_err();
        assert_eq!(
            err.fields(),
            vec![
                "options.rate_limit_per_minute",
                "options.processing_timeout_seconds"
            ]
        );
    }

    #[test]
    fn test_rate_limit_upper_edge() {
        let mut config = folder_config();
        config.options.rate_limit_per_minute = Some(*RATE_LIMIT_RANGE.end());
        assert!(config.validate().is_ok());

        config.options.rate_limit_per_minute = Some(u32::MAX);
        let err = config.validate().unwrap_err();
        assert_eq!(err.fields(), vec!["options.rate_limit_per_minute"]);
    }

    #[test]
    fn test_deserialize_with_default_options() {
        let json = serde_json::json!({
            "name": "scans",
            "source": { "type": "cloud", "provider": "google_drive", "folder_id": "abc" },
            "processing": { "mode": "continuous", "batch_size": 25 }
        });

        let config: JobConfig = serde_json::from_value(json).unwrap();
        assert!(config.is_continuous());
        assert_eq!(config.source.kind(), SourceKind::Cloud);
        assert_eq!(config.options, JobOptions::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_source_type_rejected_at_parse() {
        let json = serde_json::json!({
            "name": "scans",
            "source": { "type": "ftp", "host": "example.org" },
            "processing": { "mode": "once", "batch_size": 1 }
        });

        assert!(serde_json::from_value::<JobConfig>(json).is_err());
    }
}

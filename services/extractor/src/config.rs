use crate::naming::DatasetScope;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// S3 rejects multipart parts smaller than this (except the last one).
const MIN_PART_SIZE_BYTES: usize = 5 * 1024 * 1024;

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid dataset argument '{0}', expected PATH=SUFFIX")]
    InvalidDatasetArg(String),
}

/// Main configuration for the extractor service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration
    #[serde(default)]
    pub s3: S3Config,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Local output configuration
    #[serde(default)]
    pub output: OutputConfig,
    /// Datasets processed in order by a single run
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Prometheus exporter port; no exporter when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket holding every dataset namespace
    #[serde(default)]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    #[serde(default)]
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

/// Local mirror configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory under which `extracted_images_{suffix}` folders are created
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    /// Log progress every N rows
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
}

/// One dataset to extract
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DatasetConfig {
    /// Location of the CSV export
    pub path: PathBuf,
    /// Logical dataset name scoping every storage artifact
    pub suffix: String,
}

impl DatasetConfig {
    /// Parse a `PATH=SUFFIX` command-line argument
    pub fn parse_arg(arg: &str) -> Result<Self, ConfigError> {
        match arg.rsplit_once('=') {
            Some((path, suffix)) if !path.is_empty() && !suffix.is_empty() => Ok(Self {
                path: PathBuf::from(path),
                suffix: suffix.to_string(),
            }),
            _ => Err(ConfigError::InvalidDatasetArg(arg.to_string())),
        }
    }
}

// Default value functions
fn default_service_name() -> String {
    "image-extractor".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_max_connections() -> u32 {
    4
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_progress_every() -> u64 {
    50
}

impl Config {
    /// Load configuration from config files and environment.
    ///
    /// An explicit `path` is layered on top of the well-known locations and
    /// must exist; `EXTRACTOR__S3__BUCKET` style variables override all files.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("service.name", "image-extractor")?
            .set_default("service.log_level", "info")?
            .add_source(config::File::with_name("config/extractor").required(false))
            .add_source(config::File::with_name("/etc/extractor/extractor").required(false));

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let config = builder
            // EXTRACTOR__DATABASE__URL -> database.url
            .add_source(
                config::Environment::with_prefix("EXTRACTOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Check values that deserialize fine but cannot work at runtime.
    ///
    /// A dry run never touches S3 or PostgreSQL, so their settings are only
    /// checked when `dry_run` is false.
    pub fn validate(&self, dry_run: bool) -> Result<(), ConfigError> {
        if self.output.progress_every == 0 {
            return Err(ConfigError::InvalidValue {
                key: "output.progress_every".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        for (i, dataset) in self.datasets.iter().enumerate() {
            if let Err(e) = DatasetScope::new(dataset.suffix.as_str()) {
                return Err(ConfigError::InvalidValue {
                    key: format!("datasets[{}].suffix", i),
                    message: e.to_string(),
                });
            }
        }

        if dry_run {
            return Ok(());
        }

        if self.s3.bucket.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "s3.bucket".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        if self.s3.part_size_bytes < MIN_PART_SIZE_BYTES {
            return Err(ConfigError::InvalidValue {
                key: "s3.part_size_bytes".to_string(),
                message: format!("must be at least {} bytes", MIN_PART_SIZE_BYTES),
            });
        }

        if self.database.url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "database.url".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: None,
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            multipart_threshold_bytes: default_multipart_threshold(),
            part_size_bytes: default_part_size(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            progress_every: default_progress_every(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            service: ServiceConfig::default(),
            s3: S3Config {
                bucket: "frames".to_string(),
                ..Default::default()
            },
            database: DatabaseConfig {
                url: "postgres://localhost/frames".to_string(),
                ..Default::default()
            },
            output: OutputConfig::default(),
            datasets: vec![],
        }
    }

    #[test]
    fn test_default_values() {
        assert_eq!(default_progress_every(), 50);
        assert_eq!(default_part_size(), MIN_PART_SIZE_BYTES);
        assert_eq!(OutputConfig::default().base_dir, PathBuf::from("."));
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(test_config().validate(false).is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_progress_cadence() {
        let mut config = test_config();
        config.output.progress_every = 0;

        assert!(matches!(
            config.validate(true),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "output.progress_every"
        ));
    }

    #[test]
    fn test_validate_skips_backends_on_dry_run() {
        let mut config = test_config();
        config.database.url.clear();
        config.s3.bucket.clear();

        assert!(config.validate(true).is_ok());
        assert!(config.validate(false).is_err());
    }

    #[test]
    fn test_validate_rejects_unusable_suffix() {
        let mut config = test_config();
        config.datasets = vec![
            DatasetConfig::parse_arg("d.csv=D").unwrap(),
            DatasetConfig::parse_arg("h.csv=H.2").unwrap(),
        ];

        assert!(matches!(
            config.validate(true),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "datasets[1].suffix"
        ));
    }

    #[test]
    fn test_validate_rejects_small_parts() {
        let mut config = test_config();
        config.s3.part_size_bytes = 1024;

        assert!(matches!(
            config.validate(false),
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "s3.part_size_bytes"
        ));
    }

    #[test]
    fn test_deserialize_empty_config_for_dry_run() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(config.s3.bucket.is_empty());
        assert!(config.validate(true).is_ok());
        assert!(config.validate(false).is_err());
    }

    #[test]
    fn test_parse_dataset_arg() {
        let dataset = DatasetConfig::parse_arg("data/D/images.csv=D").unwrap();
        assert_eq!(dataset.path, PathBuf::from("data/D/images.csv"));
        assert_eq!(dataset.suffix, "D");

        // Only the last '=' separates the suffix
        let dataset = DatasetConfig::parse_arg("a=b.csv=H").unwrap();
        assert_eq!(dataset.path, PathBuf::from("a=b.csv"));
        assert_eq!(dataset.suffix, "H");

        assert!(DatasetConfig::parse_arg("images.csv").is_err());
        assert!(DatasetConfig::parse_arg("images.csv=").is_err());
        assert!(DatasetConfig::parse_arg("=D").is_err());
    }

    #[test]
    fn test_deserialize_minimal_config() {
        let raw = r#"{
            "s3": { "bucket": "frames" },
            "database": { "url": "postgres://db/frames" },
            "datasets": [{ "path": "d.csv", "suffix": "D" }]
        }"#;

        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.service.name, "image-extractor");
        assert_eq!(config.s3.region, "us-east-1");
        assert_eq!(config.output.progress_every, 50);
        assert_eq!(config.datasets.len(), 1);
        assert_eq!(config.datasets[0].suffix, "D");
    }
}

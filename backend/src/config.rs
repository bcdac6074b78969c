//! Configuration management for the Harara heatwave pipeline
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with HARARA_ prefix

use chrono::{FixedOffset, Offset, Utc};
use config::{ConfigError, Environment, File};
use serde::Deserialize;
use shared::SeverityBands;
use validator::Validate;

use crate::error::{AppError, AppResult};

/// Main pipeline configuration
#[derive(Debug, Deserialize, Clone, Validate)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Relational store configuration
    #[validate]
    pub database: DatabaseConfig,

    /// Geospatial provider configuration
    #[validate]
    pub provider: ProviderConfig,

    /// Remote document store configuration
    #[validate]
    pub document_store: DocumentStoreConfig,

    /// Pretrained artifact location
    pub artifacts: ArtifactConfig,

    /// Pipeline tuning
    #[validate]
    pub pipeline: PipelineConfig,

    /// Severity banding for published predictions
    #[validate]
    pub severity: SeverityConfig,

    /// Log output format
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; absent selects the in-memory store
    pub url: Option<String>,

    /// Maximum number of connections in the pool
    #[validate(range(min = 1))]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct ProviderConfig {
    /// Base URL of the reduction service (`POST {endpoint}/reduce`)
    #[validate(url)]
    pub endpoint: String,

    /// Service account key file used to authorize provider requests
    pub credentials_path: Option<String>,

    /// Per-call timeout in seconds
    #[validate(range(min = 1, max = 600))]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct DocumentStoreConfig {
    /// Firestore project id; absent disables the remote mirror
    pub project_id: Option<String>,

    /// Service account key file
    pub credentials_path: Option<String>,

    /// Firestore REST base URL
    #[validate(url)]
    pub base_url: String,

    /// Per-request timeout in seconds, token exchange included
    #[validate(range(min = 1, max = 600))]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArtifactConfig {
    /// Directory holding threshold.json, scaler.json and model.json
    pub dir: String,
}

/// How short tables are padded to the lookback length
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PadPolicy {
    /// Prepend zero rows
    #[default]
    Zeros,
    /// Prepend copies of the earliest available row
    RepeatEarliest,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct PipelineConfig {
    /// Hours east of UTC for run dates (Africa/Kigali is +2, no DST)
    #[validate(range(min = -12, max = 14))]
    pub timezone_offset_hours: i32,

    pub pad_policy: PadPolicy,

    /// Standard deviation of the last-resort variation nudge
    #[validate(range(min = 0.0, max = 1.0))]
    pub nudge_std: f64,

    /// Column standard deviation below which a column counts as flat
    #[validate(range(min = 0.0))]
    pub degeneracy_tolerance: f64,

    /// Share of flat columns that makes a window degenerate
    #[validate(range(min = 0.0, max = 1.0))]
    pub degeneracy_ratio: f64,
}

#[derive(Debug, Deserialize, Clone, Validate)]
pub struct SeverityConfig {
    #[validate(range(min = 0.0, max = 1.0))]
    pub moderate: f64,

    #[validate(range(min = 0.0, max = 1.0))]
    pub high: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("HARARA_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("database.max_connections", 5)?
            .set_default("database.min_connections", 1)?
            .set_default("provider.endpoint", "http://localhost:8085/v1")?
            .set_default("provider.timeout_secs", 60)?
            .set_default("document_store.base_url", "https://firestore.googleapis.com/v1")?
            .set_default("document_store.timeout_secs", 30)?
            .set_default("artifacts.dir", "harara_artifacts")?
            .set_default("pipeline.timezone_offset_hours", 2)?
            .set_default("pipeline.pad_policy", "zeros")?
            .set_default("pipeline.nudge_std", 0.02)?
            .set_default("pipeline.degeneracy_tolerance", 1e-6)?
            .set_default("pipeline.degeneracy_ratio", 0.8)?
            .set_default("severity.moderate", 0.70)?
            .set_default("severity.high", 0.75)?
            .set_default("logging.json", false)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (HARARA_ prefix)
            .add_source(
                Environment::with_prefix("HARARA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load and validate, mapping failures onto [`AppError::Configuration`]
    pub fn load_validated() -> AppResult<Self> {
        let config = Self::load().map_err(|e| AppError::Configuration(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Field validation plus cross-field rules
    pub fn check(&self) -> AppResult<()> {
        self.validate()
            .map_err(|e| AppError::Configuration(e.to_string()))?;
        shared::validate_severity_bands(&self.severity.bands())
            .map_err(|e| AppError::Configuration(e.to_string()))?;
        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::Configuration(
                "database.min_connections exceeds database.max_connections".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl PipelineConfig {
    pub fn timezone(&self) -> FixedOffset {
        FixedOffset::east_opt(self.timezone_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }
}

impl SeverityConfig {
    pub fn bands(&self) -> SeverityBands {
        SeverityBands {
            moderate: self.moderate,
            high: self.high,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timezone_offset_hours: 2,
            pad_policy: PadPolicy::Zeros,
            nudge_std: 0.02,
            degeneracy_tolerance: 1e-6,
            degeneracy_ratio: 0.8,
        }
    }
}

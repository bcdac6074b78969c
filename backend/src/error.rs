//! Error handling for the Harara heatwave pipeline
//!
//! Recoverable conditions (source outages, gaps, degenerate windows, invalid
//! model output) never surface here; these variants are the failures that end
//! a run or prevent start-up.

use thiserror::Error;

/// Pipeline error types
#[derive(Error, Debug)]
pub enum AppError {
    // Start-up errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to load artifact {artifact}: {message}")]
    ArtifactLoad { artifact: String, message: String },

    #[error("Scaler expects {actual} features but the pipeline produces {expected}")]
    ScalerWidthMismatch { expected: usize, actual: usize },

    // External service errors
    #[error("Geospatial provider error: {0}")]
    Provider(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Document store error: {0}")]
    DocumentStore(String),

    // Run errors
    #[error("No data for any town")]
    NoUsableTowns,

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Validation error: {0}")]
    Validation(#[from] shared::ValidationError),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    pub fn artifact(artifact: impl Into<String>, message: impl std::fmt::Display) -> Self {
        AppError::ArtifactLoad {
            artifact: artifact.into(),
            message: message.to_string(),
        }
    }

    /// Short machine-readable code for logs and run reports
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::ArtifactLoad { .. } => "ARTIFACT_LOAD_ERROR",
            AppError::ScalerWidthMismatch { .. } => "SCALER_WIDTH_MISMATCH",
            AppError::Provider(_) => "PROVIDER_ERROR",
            AppError::Authentication(_) => "AUTHENTICATION_ERROR",
            AppError::DocumentStore(_) => "DOCUMENT_STORE_ERROR",
            AppError::NoUsableTowns => "NO_USABLE_TOWNS",
            AppError::Inference(_) => "INFERENCE_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::Migration(_) => "MIGRATION_ERROR",
            AppError::Internal(_) | AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for pipeline operations
pub type AppResult<T> = Result<T, AppError>;

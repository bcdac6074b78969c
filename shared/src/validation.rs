//! Validation utilities for pipeline inputs and artifacts

use chrono::NaiveDate;
use thiserror::Error;

use crate::models::SeverityBands;

/// Structural validation failures of domain values
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Unknown town: {0}")]
    UnknownTown(String),

    #[error("Invalid date range: {start} is after {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("Window has {rows} rows and {dates} dates, expected {expected}")]
    WindowShape {
        rows: usize,
        dates: usize,
        expected: usize,
    },

    #[error("Window dates are not contiguous")]
    NonContiguousDates,

    #[error("Window has a missing value on day {day}")]
    MissingValue { day: usize },
}

// ============================================================================
// Artifact Validations
// ============================================================================

/// Validate a probability or threshold lies in [0, 1]
pub fn validate_probability(value: f64) -> Result<(), &'static str> {
    if !value.is_finite() {
        return Err("Probability must be a finite number");
    }
    if !(0.0..=1.0).contains(&value) {
        return Err("Probability must be between 0 and 1");
    }
    Ok(())
}

/// Validate severity cut-offs are probabilities in ascending order
pub fn validate_severity_bands(bands: &SeverityBands) -> Result<(), &'static str> {
    validate_probability(bands.moderate)?;
    validate_probability(bands.high)?;
    if bands.moderate > bands.high {
        return Err("Moderate band must not exceed the high band");
    }
    Ok(())
}

/// Validate scaler parameters: expected width, finite values, non-negative scales
pub fn validate_scaler_params(
    mean: &[f64],
    scale: &[f64],
    expected_width: usize,
) -> Result<(), &'static str> {
    if mean.len() != expected_width || scale.len() != expected_width {
        return Err("Scaler width does not match the feature count");
    }
    if mean.iter().chain(scale.iter()).any(|v| !v.is_finite()) {
        return Err("Scaler parameters must be finite");
    }
    if scale.iter().any(|s| *s < 0.0) {
        return Err("Scaler scales cannot be negative");
    }
    Ok(())
}

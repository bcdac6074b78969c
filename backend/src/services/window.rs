//! Window assembly and scaling
//!
//! Assembles the last [`LOOKBACK_DAYS`] days of a gated table into a fixed
//! `[LOOKBACK_DAYS, N_FEATURES]` matrix, then standardizes it with the
//! pretrained scaler and a global re-normalization.

use chrono::{Duration, NaiveDate};
use ndarray::{Array2, Array3, Axis};
use rand::Rng;
use serde::Deserialize;
use shared::ValidationError;

use crate::config::PadPolicy;
use crate::error::{AppError, AppResult};
use crate::models::{
    DailyTable, FeatureRow, FeatureWindow, Provenance, Town, FEATURE_COLS, LOOKBACK_DAYS,
    N_FEATURES,
};
use crate::services::quality_gate::{variation_nudge, GatedTable};

/// Added to the global standard deviation during re-normalization
pub const RENORM_EPSILON: f64 = 1e-6;

/// The [`LOOKBACK_DAYS`] contiguous dates ending at `end`
pub fn window_dates(end: NaiveDate) -> Vec<NaiveDate> {
    (0..LOOKBACK_DAYS as i64)
        .rev()
        .map(|back| end - Duration::days(back))
        .collect()
}

/// Builds classifier windows from gated tables
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowBuilder {
    pad_policy: PadPolicy,
}

impl WindowBuilder {
    pub fn new(pad_policy: PadPolicy) -> Self {
        Self { pad_policy }
    }

    /// Matrix of the last [`LOOKBACK_DAYS`] rows in feature order, padded at
    /// the front and with missing cells set to zero
    pub fn assemble(&self, table: &DailyTable) -> Vec<FeatureRow> {
        let tail = table.tail(LOOKBACK_DAYS);
        let mut rows: Vec<[Option<f64>; N_FEATURES]> = (0..tail.len())
            .map(|row| {
                let mut values = [None; N_FEATURES];
                for (j, field) in FEATURE_COLS.iter().enumerate() {
                    values[j] = tail.value(*field, row);
                }
                values
            })
            .collect();

        let missing = LOOKBACK_DAYS - rows.len();
        if missing > 0 {
            let pad = match (self.pad_policy, rows.first()) {
                (PadPolicy::RepeatEarliest, Some(earliest)) => *earliest,
                _ => [Some(0.0); N_FEATURES],
            };
            let mut padded = vec![pad; missing];
            padded.append(&mut rows);
            rows = padded;
        }

        rows.into_iter()
            .map(|row| row.map(|v| v.filter(|x| x.is_finite()).unwrap_or(0.0)))
            .collect()
    }

    /// Assemble, nudge when the gate asked for it, and validate the window
    pub fn build<R: Rng + ?Sized>(
        &self,
        town: Town,
        gated: &GatedTable,
        end: NaiveDate,
        nudge_std: f64,
        rng: &mut R,
    ) -> Result<FeatureWindow, ValidationError> {
        let mut rows = self.assemble(&gated.table);
        if gated.provenance == Provenance::Nudged {
            variation_nudge(&mut rows, nudge_std, rng);
        }
        FeatureWindow::new(town, window_dates(end), rows, gated.provenance)
    }
}

/// Pretrained per-feature standardization
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeatureScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl FeatureScaler {
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> AppResult<Self> {
        let scaler = Self { mean, scale };
        scaler.validate()?;
        Ok(scaler)
    }

    /// Parse `scaler.json` (`{"mean": [...], "scale": [...]}`)
    pub fn from_json(json: &str) -> AppResult<Self> {
        let scaler: Self =
            serde_json::from_str(json).map_err(|e| AppError::artifact("scaler.json", e))?;
        scaler.validate()?;
        Ok(scaler)
    }

    fn validate(&self) -> AppResult<()> {
        for width in [self.mean.len(), self.scale.len()] {
            if width != N_FEATURES {
                return Err(AppError::ScalerWidthMismatch {
                    expected: N_FEATURES,
                    actual: width,
                });
            }
        }
        shared::validate_scaler_params(&self.mean, &self.scale, N_FEATURES)
            .map_err(|e| AppError::artifact("scaler.json", e))
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    /// `(x - mean) / scale` per column; a zero scale divides by one
    pub fn transform(&self, window: &FeatureWindow) -> Array2<f64> {
        Array2::from_shape_fn((LOOKBACK_DAYS, N_FEATURES), |(i, j)| {
            let scale = if self.scale[j] == 0.0 { 1.0 } else { self.scale[j] };
            (window.rows()[i][j] - self.mean[j]) / scale
        })
    }
}

/// Global `(z - mean) / (std + eps)` over every cell
pub fn renormalize(z: &mut Array2<f64>) {
    let mean = z.mean().unwrap_or(0.0);
    let std = z.std(0.0);
    z.mapv_inplace(|v| (v - mean) / (std + RENORM_EPSILON));
}

/// Scaled, re-normalized `[1, LOOKBACK_DAYS, N_FEATURES]` classifier input
pub fn model_input(window: &FeatureWindow, scaler: &FeatureScaler) -> Array3<f64> {
    let mut z = scaler.transform(window);
    renormalize(&mut z);
    z.insert_axis(Axis(0))
}

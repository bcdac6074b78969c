//! Immutable run context
//!
//! Holds the pretrained artifacts, region registry and pipeline tuning. Built
//! once at start-up and shared by reference with every run.

use std::path::Path;
use std::sync::Arc;

use chrono::FixedOffset;
use serde::Deserialize;

use crate::config::{Config, PipelineConfig};
use crate::error::{AppError, AppResult};
use crate::models::{RegionRegistry, SeverityBands};
use crate::services::classifier::{DenseSequenceModel, RiskClassifier, SequenceClassifier};
use crate::services::quality_gate::QualityGate;
use crate::services::window::{FeatureScaler, WindowBuilder};

pub const THRESHOLD_FILE: &str = "threshold.json";
pub const SCALER_FILE: &str = "scaler.json";
pub const MODEL_FILE: &str = "model.json";

#[derive(Debug, Deserialize)]
struct ThresholdArtifact {
    threshold: f64,
}

/// Parse `threshold.json` (`{"threshold": f}`)
pub fn parse_threshold(json: &str) -> AppResult<f64> {
    let artifact: ThresholdArtifact =
        serde_json::from_str(json).map_err(|e| AppError::artifact(THRESHOLD_FILE, e))?;
    shared::validate_probability(artifact.threshold)
        .map_err(|e| AppError::artifact(THRESHOLD_FILE, e))?;
    Ok(artifact.threshold)
}

async fn read_artifact(dir: &Path, name: &str) -> AppResult<String> {
    tokio::fs::read_to_string(dir.join(name))
        .await
        .map_err(|e| AppError::artifact(name, e))
}

/// Everything a run needs that does not change between runs
#[derive(Clone)]
pub struct PipelineContext {
    classifier: RiskClassifier,
    scaler: FeatureScaler,
    registry: RegionRegistry,
    gate: QualityGate,
    window_builder: WindowBuilder,
    timezone: FixedOffset,
    nudge_seed: Option<u64>,
}

impl PipelineContext {
    pub fn new(
        model: Arc<dyn SequenceClassifier>,
        scaler: FeatureScaler,
        threshold: f64,
        bands: SeverityBands,
        pipeline: &PipelineConfig,
        registry: RegionRegistry,
    ) -> Self {
        Self {
            classifier: RiskClassifier::new(model, threshold, bands),
            scaler,
            registry,
            gate: QualityGate::from_config(pipeline),
            window_builder: WindowBuilder::new(pipeline.pad_policy),
            timezone: pipeline.timezone(),
            nudge_seed: None,
        }
    }

    /// Load the artifacts from the configured directory.
    ///
    /// Any missing or malformed artifact is an error.
    pub async fn load(config: &Config) -> AppResult<Self> {
        let dir = Path::new(&config.artifacts.dir);

        let threshold = parse_threshold(&read_artifact(dir, THRESHOLD_FILE).await?)?;
        let scaler = FeatureScaler::from_json(&read_artifact(dir, SCALER_FILE).await?)?;
        let model = DenseSequenceModel::from_json(&read_artifact(dir, MODEL_FILE).await?)?;

        tracing::info!(
            dir = %dir.display(),
            threshold,
            model = model.name(),
            "Loaded pretrained artifacts"
        );

        Ok(Self::new(
            Arc::new(model),
            scaler,
            threshold,
            config.severity.bands(),
            &config.pipeline,
            RegionRegistry::south_sudan(),
        ))
    }

    /// Make the variation nudge reproducible
    pub fn with_nudge_seed(mut self, seed: u64) -> Self {
        self.nudge_seed = Some(seed);
        self
    }

    pub fn classifier(&self) -> &RiskClassifier {
        &self.classifier
    }

    pub fn threshold(&self) -> f64 {
        self.classifier.threshold()
    }

    pub fn scaler(&self) -> &FeatureScaler {
        &self.scaler
    }

    pub fn registry(&self) -> &RegionRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &QualityGate {
        &self.gate
    }

    pub fn window_builder(&self) -> &WindowBuilder {
        &self.window_builder
    }

    pub fn timezone(&self) -> FixedOffset {
        self.timezone
    }

    pub fn nudge_seed(&self) -> Option<u64> {
        self.nudge_seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_threshold() {
        assert_eq!(parse_threshold(r#"{"threshold": 0.62}"#).unwrap(), 0.62);
    }

    #[test]
    fn test_threshold_out_of_range_is_rejected() {
        assert!(matches!(
            parse_threshold(r#"{"threshold": 1.5}"#),
            Err(AppError::ArtifactLoad { .. })
        ));
        assert!(parse_threshold(r#"{"value": 0.5}"#).is_err());
    }

    #[tokio::test]
    async fn test_missing_artifact_dir_fails() {
        let result = read_artifact(Path::new("/nonexistent/harara"), THRESHOLD_FILE).await;
        assert!(matches!(result, Err(AppError::ArtifactLoad { artifact, .. }) if artifact == THRESHOLD_FILE));
    }
}

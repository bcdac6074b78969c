//! Risk classification
//!
//! The pretrained model is consumed through [`SequenceClassifier`]. The
//! bundled backend is a dense network exported as JSON and evaluated with
//! `ndarray` over the row-major flattened window. [`RiskClassifier`] turns
//! the raw model output into a probability, an alert decision and a
//! severity band.

use std::sync::Arc;

use ndarray::{Array1, Array2, Array3};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::models::{is_alert, Severity, SeverityBands, Town, LOOKBACK_DAYS, N_FEATURES};

/// A model mapping a `[1, LOOKBACK_DAYS, N_FEATURES]` window to one score
pub trait SequenceClassifier: Send + Sync {
    fn name(&self) -> &str;

    /// Raw model output for one window; may be outside [0, 1] or NaN
    fn predict(&self, input: &Array3<f64>) -> AppResult<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Sigmoid,
    Tanh,
    Linear,
}

impl Activation {
    fn apply(&self, x: f64) -> f64 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Tanh => x.tanh(),
            Activation::Linear => x,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LayerSpec {
    /// `[inputs][units]`
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
    activation: Activation,
}

#[derive(Debug, Deserialize)]
struct ModelSpec {
    input_shape: [usize; 2],
    layers: Vec<LayerSpec>,
}

#[derive(Debug, Clone)]
struct DenseLayer {
    weights: Array2<f64>,
    bias: Array1<f64>,
    activation: Activation,
}

impl DenseLayer {
    fn forward(&self, x: &Array1<f64>) -> Array1<f64> {
        let mut y = x.dot(&self.weights) + &self.bias;
        y.mapv_inplace(|v| self.activation.apply(v));
        y
    }
}

/// Feed-forward network over the flattened window
#[derive(Debug, Clone)]
pub struct DenseSequenceModel {
    layers: Vec<DenseLayer>,
}

impl DenseSequenceModel {
    /// Parse and shape-check `model.json`
    pub fn from_json(json: &str) -> AppResult<Self> {
        let spec: ModelSpec =
            serde_json::from_str(json).map_err(|e| AppError::artifact("model.json", e))?;

        if spec.input_shape != [LOOKBACK_DAYS, N_FEATURES] {
            return Err(AppError::artifact(
                "model.json",
                format!(
                    "input shape {:?} does not match [{}, {}]",
                    spec.input_shape, LOOKBACK_DAYS, N_FEATURES
                ),
            ));
        }
        if spec.layers.is_empty() {
            return Err(AppError::artifact("model.json", "model has no layers"));
        }

        let mut width = LOOKBACK_DAYS * N_FEATURES;
        let mut layers = Vec::with_capacity(spec.layers.len());
        for (index, layer) in spec.layers.into_iter().enumerate() {
            let units = layer.bias.len();
            if layer.weights.len() != width || layer.weights.iter().any(|r| r.len() != units) {
                return Err(AppError::artifact(
                    "model.json",
                    format!("layer {} weights are not {}x{}", index, width, units),
                ));
            }
            let flat: Vec<f64> = layer.weights.into_iter().flatten().collect();
            let weights = Array2::from_shape_vec((width, units), flat)
                .map_err(|e| AppError::artifact("model.json", e))?;
            layers.push(DenseLayer {
                weights,
                bias: Array1::from(layer.bias),
                activation: layer.activation,
            });
            width = units;
        }

        if width != 1 {
            return Err(AppError::artifact(
                "model.json",
                format!("final layer has {} units, expected 1", width),
            ));
        }

        Ok(Self { layers })
    }
}

impl SequenceClassifier for DenseSequenceModel {
    fn name(&self) -> &str {
        "dense-json"
    }

    fn predict(&self, input: &Array3<f64>) -> AppResult<f64> {
        if input.shape() != [1, LOOKBACK_DAYS, N_FEATURES] {
            return Err(AppError::Inference(format!(
                "unexpected input shape {:?}",
                input.shape()
            )));
        }

        let x: Array1<f64> = input.iter().copied().collect();
        let out = self
            .layers
            .iter()
            .fold(x, |activations, layer| layer.forward(&activations));
        out.get(0)
            .copied()
            .ok_or_else(|| AppError::Inference("model produced no output".to_string()))
    }
}

/// Classifier output for one town
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskAssessment {
    pub probability: f64,
    pub alert: bool,
    pub severity: Severity,
}

/// Wraps a model with threshold and severity banding
#[derive(Clone)]
pub struct RiskClassifier {
    model: Arc<dyn SequenceClassifier>,
    threshold: f64,
    bands: SeverityBands,
}

impl RiskClassifier {
    pub fn new(model: Arc<dyn SequenceClassifier>, threshold: f64, bands: SeverityBands) -> Self {
        Self {
            model,
            threshold,
            bands,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn bands(&self) -> &SeverityBands {
        &self.bands
    }

    pub fn score(&self, town: Town, input: &Array3<f64>) -> AppResult<RiskAssessment> {
        let raw = self.model.predict(input)?;
        let probability = sanitize_probability(town, raw);

        Ok(RiskAssessment {
            probability,
            alert: is_alert(probability, self.threshold),
            severity: self.bands.classify(probability),
        })
    }
}

/// NaN becomes 0.0; everything else is clamped into [0, 1]
pub fn sanitize_probability(town: Town, raw: f64) -> f64 {
    if raw.is_nan() {
        tracing::warn!(town = %town, "Model returned NaN, using probability 0.0");
        return 0.0;
    }
    raw.clamp(0.0, 1.0)
}

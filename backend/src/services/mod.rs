//! Pipeline services for the Harara heatwave risk pipeline

pub mod classifier;
pub mod collector;
pub mod context;
pub mod imputation;
pub mod orchestrator;
pub mod persistence;
pub mod quality_gate;
pub mod reconciler;
pub mod window;

pub use classifier::{DenseSequenceModel, RiskClassifier, SequenceClassifier};
pub use collector::{SignalFamily, SourceCollector, SourceOutcome};
pub use context::PipelineContext;
pub use orchestrator::{CollectedRun, RunOrchestrator, RunReport, RunSchedule, RunStage};
pub use persistence::{
    DocumentStore, InMemoryDocumentStore, InMemoryPredictionStore, PgPredictionStore,
    PredictionMirror, PredictionStore,
};
pub use quality_gate::QualityGate;
pub use window::{FeatureScaler, WindowBuilder};

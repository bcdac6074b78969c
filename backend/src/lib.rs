//! Harara heatwave risk pipeline
//!
//! Collects daily environmental signals per town, reconciles and imputes
//! them into fixed-shape windows, scores the windows with a pretrained
//! sequence classifier and persists one prediction per town per run.

pub mod config;
pub mod error;
pub mod external;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AppError, AppResult};

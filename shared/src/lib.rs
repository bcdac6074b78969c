//! Shared types and models for the Harara heatwave risk pipeline
//!
//! This crate contains the domain model shared by the pipeline backend and
//! any downstream consumer of its predictions (dashboards, alert dispatchers).

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;

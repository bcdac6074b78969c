//! Domain models for the Harara heatwave risk pipeline

mod features;
mod prediction;
mod region;
mod window;

pub use features::*;
pub use prediction::*;
pub use region::*;
pub use window::*;

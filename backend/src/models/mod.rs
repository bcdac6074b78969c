//! Pipeline models
//!
//! Re-exports the domain model from the shared crate and adds the daily
//! table that flows between collection and window assembly.

mod table;

pub use shared::models::*;
pub use table::DailyTable;

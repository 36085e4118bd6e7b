//! Input/output helpers.
//!
//! - config JSON + probe CSV ingest with validation (`ingest`)
//! - result exports (CSV/JSON) (`export`)

pub mod export;
pub mod ingest;

pub use export::*;
pub use ingest::*;

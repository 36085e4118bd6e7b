//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the config document and its pieces (`ConfigDoc`, `Variable`, `ShapeMap`, ...)
//! - bin identity types (`BinDescriptor`, `BinCoord`)
//! - efficiency outputs (`EfficiencyRecord`, `FitStatus`)

pub mod types;

pub use types::*;

//! Synthetic data sources.
//!
//! - seeded tag-and-probe sample generation (`sample`)

pub mod sample;

pub use sample::*;

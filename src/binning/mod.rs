//! Bin partition layer.
//!
//! Responsibilities:
//!
//! - cross product of binned-variable and category axes
//! - row-to-bin assignment with an unmapped bucket
//! - per-bin shape-label resolution and covariate summaries

pub mod partition;

pub use partition::*;

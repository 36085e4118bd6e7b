//! Probe dataset layer.
//!
//! Responsibilities:
//!
//! - variable/category declarations (`registry`)
//! - formula compilation for derived columns (`expr`)
//! - probe-table construction: derived columns, thresholds, window filter (`build`)

pub mod build;
pub mod expr;
pub mod registry;

pub use build::*;
pub use expr::*;
pub use registry::*;

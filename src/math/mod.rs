//! Mathematical utilities: bounded minimization, profile intervals and
//! exact binomial bounds.

pub mod optimize;
pub mod profile;
pub mod stats;
pub mod transform;

pub use optimize::*;
pub use profile::*;
pub use stats::*;
pub use transform::*;

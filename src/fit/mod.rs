//! Per-bin efficiency estimation.
//!
//! Responsibilities:
//!
//! - extended pass/fail mixture assembly and the joint likelihood (`model`)
//! - the fit state machine: degeneracy shortcut, nuisance policies, profile
//!   errors, post-fit overrides (`engine`)
//! - the independent counting estimator (`counting`)

pub mod counting;
pub mod engine;
pub mod model;

pub use counting::*;
pub use engine::*;
pub use model::*;

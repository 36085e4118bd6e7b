//! Result collection and terminal reporting.
//!
//! Responsibilities:
//!
//! - ordered per-estimator efficiency tables with duplicate-bin rejection
//!   (`collect`)
//! - run-summary and table formatting for the terminal (`format`)

pub mod collect;
pub mod format;

pub use collect::*;
pub use format::*;

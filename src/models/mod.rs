//! Shape density implementations.
//!
//! Shapes are implemented as small, pure functions so that model assembly and
//! fitting code can stay generic.

pub mod shape;

pub use shape::*;

//! Counting estimator.
//!
//! The binomial ratio with its exact Clopper-Pearson interval, computed in
//! every bin regardless of how the likelihood fit went. Completely
//! independent of the model layer.

use crate::error::AppError;
use crate::math::clopper_pearson;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CountedEfficiency {
    /// `pass / (pass + fail)`, with the empty bin defined as `0`.
    pub value: f64,
    /// Signed distance to the interval's lower edge (`<= 0`).
    pub err_lo: f64,
    /// Signed distance to the interval's upper edge (`>= 0`).
    pub err_hi: f64,
}

/// Count one bin from its weighted pass/fail totals.
///
/// Negative weighted totals (possible with signed event weights) are
/// clamped to zero so the result stays inside the physical interval.
pub fn count_bin(pass_sum: f64, fail_sum: f64) -> Result<CountedEfficiency, AppError> {
    let pass = pass_sum.max(0.0);
    let fail = fail_sum.max(0.0);
    let total = pass + fail;
    let value = if total > 0.0 { pass / total } else { 0.0 };
    let (lower, upper) = clopper_pearson(pass, fail)?;
    Ok(CountedEfficiency {
        value,
        err_lo: lower - value,
        err_hi: upper - value,
    })
}

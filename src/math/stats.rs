//! Exact binomial interval support.
//!
//! Clopper-Pearson bounds are Beta-distribution quantiles:
//!
//! - lower = `Q(alpha; pass, fail + 1)` (0 when `pass == 0`)
//! - upper = `Q(1 - alpha; pass + 1, fail)` (1 when `fail == 0`)
//!
//! Totals may be non-integer because datasets are weighted; the Beta
//! quantile is well defined for any positive shape parameters.

use statrs::distribution::{Beta, ContinuousCDF};

use crate::error::AppError;

/// Central confidence level shared by every interval in the engine.
///
/// This is the two-sided coverage of one Gaussian sigma.
pub const ONE_SIGMA_LEVEL: f64 = 0.68540158589942957;

/// Tail probability on each side at [`ONE_SIGMA_LEVEL`].
pub fn one_sigma_alpha() -> f64 {
    (1.0 - ONE_SIGMA_LEVEL) / 2.0
}

/// Quantile of `Beta(a, b)` at probability `p`.
///
/// Errors when the shape parameters are out of domain (both must be
/// positive and finite).
pub fn beta_quantile(p: f64, a: f64, b: f64) -> Result<f64, AppError> {
    let dist = Beta::new(a, b)
        .map_err(|e| AppError::numeric(format!("beta quantile ({a}, {b}): {e}")))?;
    Ok(dist.inverse_cdf(p.clamp(0.0, 1.0)))
}

/// Exact Clopper-Pearson interval for `pass` passing and `fail` failing
/// (weighted) totals at the one-sigma level.
///
/// `(0, 1)` degenerates gracefully: an empty sample yields the full
/// physical interval.
pub fn clopper_pearson(pass: f64, fail: f64) -> Result<(f64, f64), AppError> {
    let alpha = one_sigma_alpha();
    let lower = if pass <= 0.0 {
        0.0
    } else {
        beta_quantile(alpha, pass, fail + 1.0)?
    };
    let upper = if fail <= 0.0 {
        1.0
    } else {
        beta_quantile(1.0 - alpha, pass + 1.0, fail)?
    };
    Ok((lower, upper))
}

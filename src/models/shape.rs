//! Probe-spectrum shape densities.
//!
//! Shapes are small pure functions of `(x, params)` so the model assembly and
//! fitting code can stay generic. Every density is normalized analytically
//! over the fit window, which keeps extended-likelihood yields interpretable.
//!
//! Families:
//!
//! - `Gaussian`: mean, sigma
//! - `Exponential`: slope
//! - `Chebyshev`: 1-2 coefficients over the window mapped to `[-1, 1]`
//! - `Uniform`: no parameters

use statrs::function::erf::erf;

use crate::domain::ShapeFamily;

/// Slopes below this behave as a flat density (series limit of `expm1`).
const SLOPE_EPS: f64 = 1e-12;
/// Floor returned where a polynomial density would be non-positive, so the
/// likelihood penalizes instead of taking `ln` of zero.
const DENSITY_FLOOR: f64 = 1e-12;

/// A shape bound to its slots in the model parameter vector.
#[derive(Debug, Clone)]
pub struct CompiledShape {
    family: ShapeFamily,
    /// Indices into the parameter vector, in family order.
    param_idx: Vec<usize>,
    lo: f64,
    hi: f64,
}

impl CompiledShape {
    /// # Panics
    /// Panics if `param_idx` does not match the family's parameter count;
    /// model assembly validates counts before compiling.
    pub fn new(family: ShapeFamily, param_idx: Vec<usize>, window: (f64, f64)) -> Self {
        assert!(param_count_ok(family, param_idx.len()));
        Self {
            family,
            param_idx,
            lo: window.0,
            hi: window.1,
        }
    }

    pub fn family(&self) -> ShapeFamily {
        self.family
    }

    /// Normalized density at `x`, reading parameter values out of `theta`.
    ///
    /// Out-of-domain parameter values (for example a non-positive sigma)
    /// yield `0.0`, which the likelihood treats as maximally unlikely.
    pub fn density(&self, x: f64, theta: &[f64]) -> f64 {
        let (lo, hi) = (self.lo, self.hi);
        let span = hi - lo;
        match self.family {
            ShapeFamily::Uniform => 1.0 / span,
            ShapeFamily::Gaussian => {
                let mean = theta[self.param_idx[0]];
                let sigma = theta[self.param_idx[1]];
                if sigma <= 0.0 {
                    return 0.0;
                }
                let rt2 = std::f64::consts::SQRT_2;
                let window_mass = 0.5
                    * (erf((hi - mean) / (sigma * rt2)) - erf((lo - mean) / (sigma * rt2)));
                if window_mass <= DENSITY_FLOOR {
                    return 0.0;
                }
                let z = (x - mean) / sigma;
                let full = (-0.5 * z * z).exp() / (sigma * (2.0 * std::f64::consts::PI).sqrt());
                full / window_mass
            }
            ShapeFamily::Exponential => {
                let k = theta[self.param_idx[0]];
                if k.abs() < SLOPE_EPS {
                    return 1.0 / span;
                }
                // exp(k x) scaled so the window integrates to one; factored
                // through expm1 to stay stable for small |k * span|.
                let norm = f64::exp_m1(k * span) / k;
                let d = (k * (x - lo)).exp() / norm;
                if d.is_finite() && d > 0.0 { d } else { 0.0 }
            }
            ShapeFamily::Chebyshev => {
                let u = 2.0 * (x - lo) / span - 1.0;
                let c1 = theta[self.param_idx[0]];
                let (p, integral_u) = if self.param_idx.len() == 2 {
                    let c2 = theta[self.param_idx[1]];
                    (
                        1.0 + c1 * u + c2 * (2.0 * u * u - 1.0),
                        2.0 - c2 * (2.0 / 3.0),
                    )
                } else {
                    (1.0 + c1 * u, 2.0)
                };
                let norm = integral_u * span / 2.0;
                if norm <= DENSITY_FLOOR {
                    return 0.0;
                }
                (p / norm).max(DENSITY_FLOOR)
            }
        }
    }
}

/// Expected parameter count check for a family.
pub fn param_count_ok(family: ShapeFamily, n: usize) -> bool {
    match family {
        ShapeFamily::Gaussian => n == 2,
        ShapeFamily::Exponential => n == 1,
        ShapeFamily::Chebyshev => n == 1 || n == 2,
        ShapeFamily::Uniform => n == 0,
    }
}

/// Human-readable parameter-count expectation, for error messages.
pub fn param_count_hint(family: ShapeFamily) -> &'static str {
    match family {
        ShapeFamily::Gaussian => "2 (mean, sigma)",
        ShapeFamily::Exponential => "1 (slope)",
        ShapeFamily::Chebyshev => "1-2 (coefficients)",
        ShapeFamily::Uniform => "0",
    }
}

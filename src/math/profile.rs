//! Profile-likelihood intervals.
//!
//! The one-sigma interval on a parameter of interest is the region where the
//! profiled objective (nuisances re-minimized at every trial point) rises by
//! `delta = 1/2` above its minimum. Crossings are located by bisection; when
//! no crossing exists before a box edge, the interval extends to the edge
//! itself.

use crate::domain::Strategy;
use crate::math::optimize::{Objective, MinimizeOptions, minimize};

#[derive(Debug, Clone, Copy)]
pub struct ProfileOptions {
    /// Objective rise defining the interval (1/2 for one sigma).
    pub delta: f64,
    /// Bisection steps per side.
    pub bisections: usize,
}

impl ProfileOptions {
    pub fn for_strategy(strategy: Strategy) -> Self {
        let bisections = match strategy {
            Strategy::Fast => 24,
            Strategy::Standard => 32,
            Strategy::Thorough => 40,
        };
        Self { delta: 0.5, bisections }
    }
}

/// Signed one-sigma interval `(err_lo <= 0, err_hi >= 0)` around
/// `theta_hat[poi]`.
///
/// `nll_min` is the objective value at `theta_hat`. Each profiled evaluation
/// re-minimizes the non-frozen parameters with the parameter of interest
/// pinned, warm-starting from the previous evaluation on the same side.
pub fn profile_interval(
    f: &dyn Objective,
    theta_hat: &[f64],
    bounds: &[(f64, f64)],
    frozen: &[bool],
    poi: usize,
    nll_min: f64,
    popts: &ProfileOptions,
    mopts: &MinimizeOptions,
) -> (f64, f64) {
    let hat = theta_hat[poi];
    let (lo_b, hi_b) = bounds[poi];
    let target = nll_min + popts.delta;

    let profiled = |x: f64, carry: &mut Vec<f64>| -> f64 {
        let mut init = carry.clone();
        init[poi] = x;
        let mut fro = frozen.to_vec();
        fro[poi] = true;
        let res = minimize(f, &init, bounds, &fro, mopts);
        *carry = res.theta;
        res.value
    };

    let err_hi = if hi_b <= hat {
        0.0
    } else {
        let mut carry = theta_hat.to_vec();
        if profiled(hi_b, &mut carry) <= target {
            hi_b - hat
        } else {
            // Invariant: profiled(a) <= target < profiled(b).
            let (mut a, mut b) = (hat, hi_b);
            let mut carry = theta_hat.to_vec();
            for _ in 0..popts.bisections {
                let mid = 0.5 * (a + b);
                if profiled(mid, &mut carry) <= target {
                    a = mid;
                } else {
                    b = mid;
                }
            }
            0.5 * (a + b) - hat
        }
    };

    let err_lo = if lo_b >= hat {
        0.0
    } else {
        let mut carry = theta_hat.to_vec();
        if profiled(lo_b, &mut carry) <= target {
            lo_b - hat
        } else {
            let (mut a, mut b) = (hat, lo_b);
            let mut carry = theta_hat.to_vec();
            for _ in 0..popts.bisections {
                let mid = 0.5 * (a + b);
                if profiled(mid, &mut carry) <= target {
                    a = mid;
                } else {
                    b = mid;
                }
            }
            0.5 * (a + b) - hat
        }
    };

    (err_lo, err_hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mopts() -> MinimizeOptions {
        MinimizeOptions::for_strategy(Strategy::Standard)
    }

    fn popts() -> ProfileOptions {
        ProfileOptions::for_strategy(Strategy::Standard)
    }

    #[test]
    fn gaussian_profile_recovers_sigma() {
        // Independent quadratic: the x interval is exactly +-0.2.
        let f = |t: &[f64]| {
            0.5 * ((t[0] - 1.0) / 0.2).powi(2) + 0.5 * ((t[1] - 3.0) / 0.5).powi(2)
        };
        let hat = [1.0, 3.0];
        let bounds = [(0.0, 2.0), (0.0, 6.0)];
        let (lo, hi) = profile_interval(&f, &hat, &bounds, &[false, false], 0, 0.0, &popts(), &mopts());
        assert!((hi - 0.2).abs() < 2e-3, "hi = {hi}");
        assert!((lo + 0.2).abs() < 2e-3, "lo = {lo}");
    }

    #[test]
    fn interval_extends_to_box_edge_without_crossing() {
        let f = |t: &[f64]| 0.5 * ((t[0] - 1.0) / 0.2).powi(2);
        let bounds = [(0.9, 1.05)];
        let (lo, hi) = profile_interval(&f, &[1.0], &bounds, &[false], 0, 0.0, &popts(), &mopts());
        assert!((hi - 0.05).abs() < 1e-9, "hi = {hi}");
        assert!((lo + 0.1).abs() < 1e-9, "lo = {lo}");
    }

    #[test]
    fn correlated_nuisance_widens_the_interval() {
        // With correlation, profiling y must widen x's interval relative to
        // slicing at y = 0.
        let f = |t: &[f64]| 0.5 * (t[0].powi(2) + t[1].powi(2) + 1.6 * t[0] * t[1]);
        let bounds = [(-3.0, 3.0), (-3.0, 3.0)];
        let (lo, hi) = profile_interval(&f, &[0.0, 0.0], &bounds, &[false, false], 0, 0.0, &popts(), &mopts());
        // Profiled curvature is 1 - 0.8^2 = 0.36, so sigma = 1/0.6.
        assert!((hi - 1.0 / 0.6).abs() < 0.01, "hi = {hi}");
        assert!((lo + 1.0 / 0.6).abs() < 0.01, "lo = {lo}");
    }
}

//! Box-bound parameter transforms.
//!
//! The optimizer works in an unconstrained space; each bounded parameter is
//! mapped through a logit so that every unconstrained value decodes to a
//! point strictly inside its box. Two primitives:
//!
//! - `to_unbounded(x, lo, hi)`: logit of the box fraction
//! - `to_bounded(u, lo, hi)`: stable sigmoid back into `(lo, hi)`

/// Fraction clamp applied before the logit so edge values stay finite.
const FRACTION_EPS: f64 = 1e-12;

/// Map a bounded value into the unconstrained space.
///
/// Values at (or beyond) the box edges are clamped just inside first, so the
/// result is always finite.
pub fn to_unbounded(x: f64, lo: f64, hi: f64) -> f64 {
    let span = hi - lo;
    let f = ((x - lo) / span).clamp(FRACTION_EPS, 1.0 - FRACTION_EPS);
    (f / (1.0 - f)).ln()
}

/// Map an unconstrained value back into `(lo, hi)`.
pub fn to_bounded(u: f64, lo: f64, hi: f64) -> f64 {
    lo + (hi - lo) * sigmoid(u)
}

/// Numerically stable logistic function.
fn sigmoid(u: f64) -> f64 {
    if u >= 0.0 {
        1.0 / (1.0 + (-u).exp())
    } else {
        let e = u.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_interior_points() {
        for &x in &[0.1, 0.5, 0.9] {
            let u = to_unbounded(x, 0.0, 1.0);
            assert!((to_bounded(u, 0.0, 1.0) - x).abs() < 1e-12);
        }
        for &x in &[-3.0, 0.0, 7.5] {
            let u = to_unbounded(x, -5.0, 10.0);
            assert!((to_bounded(u, -5.0, 10.0) - x).abs() < 1e-9);
        }
    }

    #[test]
    fn edges_stay_finite_and_inside() {
        for &x in &[0.0, 1.0, -2.0, 3.0] {
            let u = to_unbounded(x, 0.0, 1.0);
            assert!(u.is_finite());
            let back = to_bounded(u, 0.0, 1.0);
            assert!(back > 0.0 && back < 1.0);
        }
    }

    #[test]
    fn decode_is_monotone() {
        let mut prev = to_bounded(-30.0, 2.0, 4.0);
        for k in -29..=30 {
            let cur = to_bounded(k as f64, 2.0, 4.0);
            assert!(cur >= prev);
            prev = cur;
        }
    }

    #[test]
    fn extreme_unbounded_values_saturate() {
        assert!((to_bounded(80.0, 0.0, 1.0) - 1.0).abs() < 1e-12);
        assert!(to_bounded(-80.0, 0.0, 1.0).abs() < 1e-12);
    }
}

//! The per-bin fit state machine.
//!
//! Each bin runs Init -> (optional fixed-nuisance fit -> release fit) ->
//! profile scan -> result:
//!
//! - bins with no passing rows (or no failing rows) resolve through a
//!   deterministic shortcut without ever invoking the optimizer
//! - asymmetric efficiency errors come from the profile likelihood at
//!   `delta(-lnL) = 1/2` in every policy, extended to the physical bound
//!   when no crossing exists inside it
//! - a bin whose fitted sub-sample carries zero weight on one side (possible
//!   with weighted rows even when raw counts are not zero) is overridden
//!   post-fit from the fitted `nTot * fSig`
//! - convergence problems are recorded on the result and never retried
//!
//! The warm-start protocol fits the union sample once (designated parameters
//! fixed, then released) and snapshots the designated values; per-bin fits
//! consume the snapshot read-only.

use crate::domain::{EngineOptions, FitStatus, NuisancePolicy};
use crate::error::AppError;
use crate::fit::model::{BinModel, BinObjective, BinSample, IDX_EFFICIENCY, IDX_FSIG, IDX_NTOT};
use crate::math::{
    beta_quantile, minimize, one_sigma_alpha, profile_interval, MinimizeOptions, MinimizeStatus,
    ProfileOptions,
};

/// Fitted nuisance values from the one-time union fit, applied as starting
/// values to every subsequent bin fit.
#[derive(Debug, Clone)]
pub struct NuisanceSnapshot {
    entries: Vec<(String, f64)>,
}

impl NuisanceSnapshot {
    pub fn entries(&self) -> &[(String, f64)] {
        &self.entries
    }

    pub fn value_of(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, v)| v)
    }
}

/// Outcome of one bin fit.
#[derive(Debug, Clone, PartialEq)]
pub struct BinFit {
    /// Efficiency estimate in `[0, 1]`.
    pub efficiency: f64,
    /// Signed distance to the interval's lower edge (`<= 0`).
    pub err_lo: f64,
    /// Signed distance to the interval's upper edge (`>= 0`).
    pub err_hi: f64,
    pub status: FitStatus,
    /// Final parameter vector; empty when the shortcut resolved the bin.
    pub theta: Vec<f64>,
    pub nll: f64,
    pub iterations: usize,
}

pub struct FitEngine {
    opts: EngineOptions,
    mopts: MinimizeOptions,
    popts: ProfileOptions,
}

impl FitEngine {
    pub fn new(opts: EngineOptions) -> Self {
        let mopts = MinimizeOptions::for_strategy(opts.strategy);
        let popts = ProfileOptions::for_strategy(opts.strategy);
        Self { opts, mopts, popts }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.opts
    }

    /// Resolve the fix list against a model and check it against the policy.
    ///
    /// Every name must be a declared parameter other than `efficiency`; the
    /// `fix`/`warm` policies require a non-empty list and `float` an empty
    /// one.
    pub fn validate(&self, model: &BinModel) -> Result<Vec<usize>, AppError> {
        let mut fixed = Vec::with_capacity(self.opts.fixed_params.len());
        for name in &self.opts.fixed_params {
            if name == "efficiency" {
                return Err(AppError::config(
                    "'efficiency' is the measured parameter and cannot be in the fix list",
                ));
            }
            let idx = model.param_index(name).ok_or_else(|| {
                AppError::config(format!("fix list names unknown parameter '{name}'"))
            })?;
            if !fixed.contains(&idx) {
                fixed.push(idx);
            }
        }
        match self.opts.nuisance_policy {
            NuisancePolicy::Float if !fixed.is_empty() => Err(AppError::config(
                "a fix list requires the fix or warm nuisance policy",
            )),
            NuisancePolicy::Fix | NuisancePolicy::Warm if fixed.is_empty() => {
                Err(AppError::config(format!(
                    "the {:?} nuisance policy needs a non-empty fix list",
                    self.opts.nuisance_policy
                )))
            }
            _ => Ok(fixed),
        }
    }

    /// One-time union fit for the warm policy: designated parameters held at
    /// their declared initial values, then released, with the final values
    /// snapshotted.
    pub fn warm_start(
        &self,
        model: &BinModel,
        union: &BinSample,
    ) -> Result<NuisanceSnapshot, AppError> {
        let fixed = self.validate(model)?;
        let (init, bounds) = self.seed_parameters(model, union);
        let obj = BinObjective::new(model, union, self.opts.nll_chunk);

        let mut frozen = vec![false; init.len()];
        for &i in &fixed {
            frozen[i] = true;
        }
        let held = minimize(&obj, &init, &bounds, &frozen, &self.mopts);
        let released = minimize(
            &obj,
            &held.theta,
            &bounds,
            &vec![false; init.len()],
            &self.mopts,
        );

        let entries = fixed
            .iter()
            .map(|&i| (model.params()[i].name.clone(), released.theta[i]))
            .collect();
        Ok(NuisanceSnapshot { entries })
    }

    /// Fit one bin. `warm` must be present exactly when the policy is `warm`.
    pub fn fit_bin(
        &self,
        model: &BinModel,
        sample: &BinSample,
        warm: Option<&NuisanceSnapshot>,
    ) -> Result<BinFit, AppError> {
        if sample.pass_count == 0 {
            return self.degenerate(sample, false);
        }
        if sample.fail_count == 0 {
            return self.degenerate(sample, true);
        }

        let fixed = self.validate(model)?;
        let (mut init, bounds) = self.seed_parameters(model, sample);
        if matches!(self.opts.nuisance_policy, NuisancePolicy::Warm) {
            let snapshot = warm.ok_or_else(|| {
                AppError::config("the warm nuisance policy needs a union-fit snapshot")
            })?;
            for (name, value) in snapshot.entries() {
                if let Some(i) = model.param_index(name) {
                    init[i] = *value;
                }
            }
        }

        let obj = BinObjective::new(model, sample, self.opts.nll_chunk);
        let all_free = vec![false; init.len()];
        let result = match self.opts.nuisance_policy {
            NuisancePolicy::Fix => {
                let mut frozen = all_free.clone();
                for &i in &fixed {
                    frozen[i] = true;
                }
                let held = minimize(&obj, &init, &bounds, &frozen, &self.mopts);
                minimize(&obj, &held.theta, &bounds, &all_free, &self.mopts)
            }
            _ => minimize(&obj, &init, &bounds, &all_free, &self.mopts),
        };

        let mut status = match result.status {
            MinimizeStatus::Converged => FitStatus::Converged,
            MinimizeStatus::MaxIterations => FitStatus::MaxIterations,
            MinimizeStatus::Stalled => FitStatus::Stalled,
        };
        let mut efficiency = result.theta[IDX_EFFICIENCY];
        let (mut err_lo, mut err_hi) = profile_interval(
            &obj,
            &result.theta,
            &bounds,
            &all_free,
            IDX_EFFICIENCY,
            result.value,
            &self.popts,
            &self.mopts,
        );

        // Boundary backfill: a vanished side means the interval reaches the
        // physical bound.
        if err_lo == 0.0 && efficiency < 0.5 {
            err_lo = -efficiency;
        }
        if err_hi == 0.0 && efficiency > 0.5 {
            err_hi = 1.0 - efficiency;
        }

        if sample.pass_sum * sample.fail_sum == 0.0 {
            let n_sig = result.theta[IDX_NTOT] * result.theta[IDX_FSIG];
            let bound = if n_sig > 0.0 {
                beta_quantile(1.0 - one_sigma_alpha(), 1.0, n_sig)?
            } else {
                1.0
            };
            if sample.pass_sum <= 0.0 {
                efficiency = 0.0;
                err_lo = 0.0;
                err_hi = bound;
            } else {
                efficiency = 1.0;
                err_lo = -bound;
                err_hi = 0.0;
            }
            status = FitStatus::ZeroSubsample;
        }

        Ok(BinFit {
            efficiency,
            err_lo,
            err_hi,
            status,
            theta: result.theta,
            nll: result.value,
            iterations: result.iterations,
        })
    }

    /// Shortcut for raw one-sided bins. `all_pass` selects the mirrored case.
    fn degenerate(&self, sample: &BinSample, all_pass: bool) -> Result<BinFit, AppError> {
        let alpha = one_sigma_alpha();
        let (efficiency, err_lo, err_hi) = if all_pass {
            let lower = if sample.pass_sum > 0.0 {
                beta_quantile(alpha, sample.pass_sum, 1.0)?
            } else {
                0.0
            };
            (1.0, lower - 1.0, 0.0)
        } else {
            let upper = if sample.fail_sum > 0.0 {
                beta_quantile(1.0 - alpha, 1.0, sample.fail_sum)?
            } else {
                1.0
            };
            (0.0, 0.0, upper)
        };
        Ok(BinFit {
            efficiency,
            err_lo,
            err_hi,
            status: FitStatus::Degenerate,
            theta: Vec::new(),
            nll: 0.0,
            iterations: 0,
        })
    }

    /// Per-bin parameter seeding.
    ///
    /// Total yield starts at the weighted bin total with headroom
    /// `2 * total + 10` as its upper bound; the signal fraction starts from
    /// the expected total signal `pass * signalFractionInPassing /
    /// initialEfficiency`, capped so the implied failing signal never exceeds
    /// the failing total.
    fn seed_parameters(&self, model: &BinModel, sample: &BinSample) -> (Vec<f64>, Vec<(f64, f64)>) {
        let mut init = model.initial_theta();
        let mut bounds = model.bounds();

        let total = sample.pass_sum + sample.fail_sum;
        let eff0 = self.opts.initial_efficiency.clamp(0.0, 1.0);
        let fsig0 = self.opts.signal_fraction_in_passing.clamp(0.0, 1.0);

        init[IDX_EFFICIENCY] = eff0;
        let mut n_sig_all = if eff0 > 0.0 {
            sample.pass_sum * fsig0 / eff0
        } else {
            0.0
        };
        if n_sig_all * (1.0 - eff0) > sample.fail_sum {
            n_sig_all = sample.fail_sum;
        }
        init[IDX_FSIG] = if total > 0.0 {
            (n_sig_all / total).clamp(0.0, 1.0)
        } else {
            fsig0
        };
        init[IDX_NTOT] = total;
        bounds[IDX_NTOT] = (0.0, 2.0 * total + 10.0);

        (init, bounds)
    }
}

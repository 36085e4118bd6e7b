//! Per-bin extended-likelihood model assembly.
//!
//! Each bin fits one joint model over its passing and failing sub-samples.
//! Four core parameters drive the yields:
//!
//! - `nSignalPass = efficiency * fSig * nTot`
//! - `nSignalFail = (1 - efficiency) * fSig * nTot`
//! - `nBkgPass    = effBkg * (1 - fSig) * nTot`
//! - `nBkgFail    = (1 - effBkg) * (1 - fSig) * nTot`
//!
//! Shape parameters follow the core block in the parameter vector; shape
//! parameters with identical names are shared slots. The model is immutable
//! once compiled; per-bin seeding happens on plain vectors in the engine.

use rayon::prelude::*;

use crate::dataset::ProbeTable;
use crate::domain::{ShapeSetSpec, ShapeSpec};
use crate::error::AppError;
use crate::math::Objective;
use crate::models::{param_count_hint, param_count_ok, CompiledShape};

pub const IDX_EFFICIENCY: usize = 0;
pub const IDX_FSIG: usize = 1;
pub const IDX_EFFBKG: usize = 2;
pub const IDX_NTOT: usize = 3;
/// Number of core parameters ahead of the shape block.
pub const N_CORE: usize = 4;

/// Core parameter names, indexable by the `IDX_*` constants. Shape
/// parameters may not reuse them.
pub const CORE_PARAM_NAMES: [&str; N_CORE] = ["efficiency", "fSig", "effBkg", "nTot"];

/// Per-point contribution charged where a mixture density is non-positive,
/// steering the optimizer back to feasible parameters.
const NLL_PENALTY: f64 = 1e6;

/// One named slot of the parameter vector.
#[derive(Debug, Clone)]
pub struct ParamSlot {
    pub name: String,
    pub init: f64,
    pub bounds: (f64, f64),
}

/// A compiled pass/fail mixture model for one shape-catalog label.
#[derive(Debug, Clone)]
pub struct BinModel {
    params: Vec<ParamSlot>,
    signal_pass: CompiledShape,
    signal_fail: CompiledShape,
    background_pass: CompiledShape,
    background_fail: CompiledShape,
}

impl BinModel {
    /// Compile a shape set against the fit window.
    ///
    /// Exactly one of a shared `signal` shape or a `signal_pass` +
    /// `signal_fail` pair must be declared; a shared shape reuses the same
    /// parameter slots on both sides.
    pub fn compile(set: &ShapeSetSpec, window: (f64, f64)) -> Result<Self, AppError> {
        let mut params: Vec<ParamSlot> = CORE_PARAM_NAMES
            .iter()
            .map(|&name| ParamSlot {
                name: name.to_string(),
                init: if name == "nTot" { 1.0 } else { 0.9 },
                // The total-yield slot is reseeded per bin before any fit.
                bounds: (0.0, 1.0),
            })
            .collect();

        let (signal_pass, signal_fail) = match (&set.signal, &set.signal_pass, &set.signal_fail) {
            (Some(shared), None, None) => {
                let s = compile_shape(shared, window, &mut params)?;
                (s.clone(), s)
            }
            (None, Some(pass), Some(fail)) => (
                compile_shape(pass, window, &mut params)?,
                compile_shape(fail, window, &mut params)?,
            ),
            (Some(_), _, _) => {
                return Err(AppError::config(
                    "declare either one 'signal' shape or a 'signal_pass'/'signal_fail' pair, not both",
                ));
            }
            (None, _, _) => {
                return Err(AppError::config(
                    "declare either one 'signal' shape or both 'signal_pass' and 'signal_fail'",
                ));
            }
        };
        let background_pass = compile_shape(&set.background_pass, window, &mut params)?;
        let background_fail = compile_shape(&set.background_fail, window, &mut params)?;

        Ok(Self {
            params,
            signal_pass,
            signal_fail,
            background_pass,
            background_fail,
        })
    }

    pub fn params(&self) -> &[ParamSlot] {
        &self.params
    }

    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| p.name == name)
    }

    pub fn initial_theta(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.init).collect()
    }

    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.params.iter().map(|p| p.bounds).collect()
    }
}

/// Intern one shape's parameters into the shared table and compile it.
fn compile_shape(
    spec: &ShapeSpec,
    window: (f64, f64),
    params: &mut Vec<ParamSlot>,
) -> Result<CompiledShape, AppError> {
    if !param_count_ok(spec.family, spec.params.len()) {
        return Err(AppError::config(format!(
            "{:?} shape declares {} parameter(s), expected {}",
            spec.family,
            spec.params.len(),
            param_count_hint(spec.family)
        )));
    }
    let mut idx = Vec::with_capacity(spec.params.len());
    for p in &spec.params {
        let (lo, hi) = (p.bounds[0], p.bounds[1]);
        if !p.init.is_finite() || !lo.is_finite() || !hi.is_finite() || lo > hi {
            return Err(AppError::config(format!(
                "parameter '{}' needs finite bounds with lo <= hi",
                p.name
            )));
        }
        if CORE_PARAM_NAMES.contains(&p.name.as_str()) {
            return Err(AppError::config(format!(
                "parameter name '{}' is reserved",
                p.name
            )));
        }
        match params.iter().position(|s| s.name == p.name) {
            Some(existing) => {
                let s = &params[existing];
                if s.init != p.init || s.bounds != (lo, hi) {
                    return Err(AppError::config(format!(
                        "parameter '{}' redeclared with different initial value or bounds",
                        p.name
                    )));
                }
                idx.push(existing);
            }
            None => {
                params.push(ParamSlot {
                    name: p.name.clone(),
                    init: p.init,
                    bounds: (lo, hi),
                });
                idx.push(params.len() - 1);
            }
        }
    }
    Ok(CompiledShape::new(spec.family, idx, window))
}

/// One point of a bin's fit sample.
#[derive(Debug, Clone, Copy)]
pub struct FitPoint {
    pub value: f64,
    pub weight: f64,
    pub passing: bool,
}

/// A bin's data in fit-ready form, with raw row counts kept separately from
/// the weighted totals: the degenerate shortcut keys on counts, the post-fit
/// override on weighted sums.
#[derive(Debug, Clone, Default)]
pub struct BinSample {
    pub points: Vec<FitPoint>,
    pub pass_count: usize,
    pub fail_count: usize,
    pub pass_sum: f64,
    pub fail_sum: f64,
}

/// Extract the fit sample for `rows`, preserving their order.
pub fn collect_sample(table: &ProbeTable, rows: &[usize]) -> BinSample {
    let mut sample = BinSample {
        points: Vec::with_capacity(rows.len()),
        ..BinSample::default()
    };
    for &ri in rows {
        let row = &table.rows[ri];
        let passing = table.row_passes(row);
        if passing {
            sample.pass_count += 1;
            sample.pass_sum += row.weight;
        } else {
            sample.fail_count += 1;
            sample.fail_sum += row.weight;
        }
        sample.points.push(FitPoint {
            value: row.values[table.fit_var],
            weight: row.weight,
            passing,
        });
    }
    sample
}

/// The negative joint extended log-likelihood of one bin.
///
/// Point terms are evaluated over fixed-size chunks in parallel and the
/// partials are combined in chunk order, so a given chunk size always
/// produces the identical sum.
pub struct BinObjective<'a> {
    model: &'a BinModel,
    sample: &'a BinSample,
    chunk: usize,
}

impl<'a> BinObjective<'a> {
    pub fn new(model: &'a BinModel, sample: &'a BinSample, chunk: usize) -> Self {
        Self {
            model,
            sample,
            chunk: chunk.max(1),
        }
    }
}

impl Objective for BinObjective<'_> {
    fn value(&self, theta: &[f64]) -> f64 {
        let eff = theta[IDX_EFFICIENCY];
        let fsig = theta[IDX_FSIG];
        let effbkg = theta[IDX_EFFBKG];
        let ntot = theta[IDX_NTOT];

        let n_sig_pass = eff * fsig * ntot;
        let n_sig_fail = (1.0 - eff) * fsig * ntot;
        let n_bkg_pass = effbkg * (1.0 - fsig) * ntot;
        let n_bkg_fail = (1.0 - effbkg) * (1.0 - fsig) * ntot;

        let partials: Vec<f64> = self
            .sample
            .points
            .par_chunks(self.chunk)
            .map(|points| {
                let mut acc = 0.0;
                for p in points {
                    let mu = if p.passing {
                        n_sig_pass * self.model.signal_pass.density(p.value, theta)
                            + n_bkg_pass * self.model.background_pass.density(p.value, theta)
                    } else {
                        n_sig_fail * self.model.signal_fail.density(p.value, theta)
                            + n_bkg_fail * self.model.background_fail.density(p.value, theta)
                    };
                    acc += if mu > 0.0 && mu.is_finite() {
                        -p.weight * mu.ln()
                    } else {
                        // The weight's sign must not turn the penalty into
                        // a reward.
                        NLL_PENALTY * p.weight.abs()
                    };
                }
                acc
            })
            .collect();

        // The yields sum to nTot exactly, which is the extended term.
        ntot + partials.iter().sum::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ParamSpec, ShapeFamily};

    const WINDOW: (f64, f64) = (60.0, 120.0);

    fn param(name: &str, init: f64, lo: f64, hi: f64) -> ParamSpec {
        ParamSpec {
            name: name.into(),
            init,
            bounds: [lo, hi],
        }
    }

    fn gaussian() -> ShapeSpec {
        ShapeSpec {
            family: ShapeFamily::Gaussian,
            params: vec![param("mean", 91.0, 85.0, 97.0), param("sigma", 3.0, 0.5, 10.0)],
        }
    }

    fn uniform() -> ShapeSpec {
        ShapeSpec {
            family: ShapeFamily::Uniform,
            params: vec![],
        }
    }

    fn all_uniform_set() -> ShapeSetSpec {
        ShapeSetSpec {
            signal: Some(uniform()),
            signal_pass: None,
            signal_fail: None,
            background_pass: uniform(),
            background_fail: uniform(),
        }
    }

    #[test]
    fn shared_signal_set_compiles_with_shared_slots() {
        let set = ShapeSetSpec {
            signal: Some(gaussian()),
            signal_pass: None,
            signal_fail: None,
            background_pass: ShapeSpec {
                family: ShapeFamily::Exponential,
                params: vec![param("slope", -0.02, -0.2, 0.2)],
            },
            background_fail: ShapeSpec {
                family: ShapeFamily::Exponential,
                params: vec![param("slope", -0.02, -0.2, 0.2)],
            },
        };
        let model = BinModel::compile(&set, WINDOW).unwrap();
        // 4 core + mean + sigma + one shared slope.
        assert_eq!(model.params().len(), 7);
        assert_eq!(model.param_index("mean"), Some(4));
        assert_eq!(model.param_index("slope"), Some(6));
        assert_eq!(model.param_index("efficiency"), Some(IDX_EFFICIENCY));
    }

    #[test]
    fn both_signal_forms_is_a_config_error() {
        let set = ShapeSetSpec {
            signal: Some(gaussian()),
            signal_pass: Some(gaussian()),
            signal_fail: Some(gaussian()),
            background_pass: uniform(),
            background_fail: uniform(),
        };
        let err = BinModel::compile(&set, WINDOW).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn missing_signal_half_is_a_config_error() {
        let set = ShapeSetSpec {
            signal: None,
            signal_pass: Some(gaussian()),
            signal_fail: None,
            background_pass: uniform(),
            background_fail: uniform(),
        };
        assert!(BinModel::compile(&set, WINDOW).is_err());

        let set = ShapeSetSpec {
            signal: None,
            signal_pass: None,
            signal_fail: None,
            background_pass: uniform(),
            background_fail: uniform(),
        };
        assert!(BinModel::compile(&set, WINDOW).is_err());
    }

    #[test]
    fn conflicting_shared_parameter_is_rejected() {
        let set = ShapeSetSpec {
            signal: Some(gaussian()),
            signal_pass: None,
            signal_fail: None,
            background_pass: ShapeSpec {
                family: ShapeFamily::Gaussian,
                params: vec![param("mean", 91.0, 85.0, 97.0), param("sigma", 5.0, 0.5, 10.0)],
            },
            background_fail: uniform(),
        };
        let err = BinModel::compile(&set, WINDOW).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn reserved_and_malformed_parameters_are_rejected() {
        let reserved = ShapeSetSpec {
            signal: Some(ShapeSpec {
                family: ShapeFamily::Exponential,
                params: vec![param("nTot", 0.0, -1.0, 1.0)],
            }),
            signal_pass: None,
            signal_fail: None,
            background_pass: uniform(),
            background_fail: uniform(),
        };
        assert!(BinModel::compile(&reserved, WINDOW).is_err());

        let inverted = ShapeSetSpec {
            signal: Some(ShapeSpec {
                family: ShapeFamily::Exponential,
                params: vec![param("slope", 0.0, 1.0, -1.0)],
            }),
            signal_pass: None,
            signal_fail: None,
            background_pass: uniform(),
            background_fail: uniform(),
        };
        assert!(BinModel::compile(&inverted, WINDOW).is_err());

        let wrong_count = ShapeSetSpec {
            signal: Some(ShapeSpec {
                family: ShapeFamily::Gaussian,
                params: vec![param("mean", 91.0, 85.0, 97.0)],
            }),
            signal_pass: None,
            signal_fail: None,
            background_pass: uniform(),
            background_fail: uniform(),
        };
        assert!(BinModel::compile(&wrong_count, WINDOW).is_err());
    }

    fn flat_sample(pass: usize, fail: usize) -> BinSample {
        let mut sample = BinSample::default();
        let n = pass + fail;
        for i in 0..n {
            let passing = i < pass;
            let value = WINDOW.0 + (WINDOW.1 - WINDOW.0) * ((i as f64 + 0.5) / n as f64);
            sample.points.push(FitPoint {
                value,
                weight: 1.0,
                passing,
            });
            if passing {
                sample.pass_count += 1;
                sample.pass_sum += 1.0;
            } else {
                sample.fail_count += 1;
                sample.fail_sum += 1.0;
            }
        }
        sample
    }

    #[test]
    fn uniform_mixture_matches_the_closed_form() {
        let model = BinModel::compile(&all_uniform_set(), WINDOW).unwrap();
        let sample = flat_sample(30, 10);
        let obj = BinObjective::new(&model, &sample, 7);

        let (eff, fsig, effbkg, ntot) = (0.7, 0.8, 0.4, 42.0);
        let theta = [eff, fsig, effbkg, ntot];
        let span = WINDOW.1 - WINDOW.0;
        let mu_pass = (eff * fsig + effbkg * (1.0 - fsig)) * ntot / span;
        let mu_fail = ((1.0 - eff) * fsig + (1.0 - effbkg) * (1.0 - fsig)) * ntot / span;
        let expect = ntot - 30.0 * mu_pass.ln() - 10.0 * mu_fail.ln();

        assert!((obj.value(&theta) - expect).abs() < 1e-9);
    }

    #[test]
    fn zero_total_yield_is_penalized() {
        let model = BinModel::compile(&all_uniform_set(), WINDOW).unwrap();
        let sample = flat_sample(5, 5);
        let obj = BinObjective::new(&model, &sample, 4096);
        assert!(obj.value(&[0.5, 0.5, 0.5, 0.0]) >= 10.0 * 1e6);
    }

    #[test]
    fn repeated_evaluation_is_bitwise_identical() {
        let model = BinModel::compile(&all_uniform_set(), WINDOW).unwrap();
        let sample = flat_sample(200, 100);
        let obj = BinObjective::new(&model, &sample, 32);
        let theta = [0.6, 0.7, 0.5, 300.0];
        assert_eq!(obj.value(&theta), obj.value(&theta));
    }

    #[test]
    fn split_signal_sides_are_independent() {
        // All points fail, so the passing-side mean cannot move the value.
        let set = ShapeSetSpec {
            signal: None,
            signal_pass: Some(ShapeSpec {
                family: ShapeFamily::Gaussian,
                params: vec![
                    param("mean_pass", 91.0, 85.0, 97.0),
                    param("sigma_pass", 3.0, 0.5, 10.0),
                ],
            }),
            signal_fail: Some(ShapeSpec {
                family: ShapeFamily::Gaussian,
                params: vec![
                    param("mean_fail", 91.0, 85.0, 97.0),
                    param("sigma_fail", 3.0, 0.5, 10.0),
                ],
            }),
            background_pass: uniform(),
            background_fail: uniform(),
        };
        let model = BinModel::compile(&set, WINDOW).unwrap();
        let sample = flat_sample(0, 20);
        let obj = BinObjective::new(&model, &sample, 4096);

        let mut theta = vec![0.5, 0.8, 0.5, 20.0, 91.0, 3.0, 91.0, 3.0];
        let base = obj.value(&theta);
        theta[model.param_index("mean_pass").unwrap()] = 86.0;
        assert_eq!(obj.value(&theta), base);
        theta[model.param_index("mean_fail").unwrap()] = 86.0;
        assert!(obj.value(&theta) != base);
    }

    #[test]
    fn collect_sample_splits_counts_and_sums() {
        use crate::dataset::{build_table, RawProbe, VariableRegistry};
        use crate::domain::{Category, EfficiencySpec, Variable};

        let mut reg = VariableRegistry::new();
        reg.add_variable(Variable {
            name: "mass".into(),
            lo: 60.0,
            hi: 120.0,
            unit: None,
        })
        .unwrap();
        reg.add_category(Category {
            name: "passing".into(),
            states: vec!["pass".into(), "fail".into()],
        })
        .unwrap();
        let raw = vec![
            RawProbe {
                values: vec![90.0],
                states: vec!["pass".into()],
                weight: 2.0,
            },
            RawProbe {
                values: vec![95.0],
                states: vec!["fail".into()],
                weight: 1.0,
            },
            RawProbe {
                values: vec![88.0],
                states: vec!["pass".into()],
                weight: 0.5,
            },
        ];
        let table = build_table(
            reg,
            &raw,
            &[],
            &[],
            "mass",
            &EfficiencySpec {
                category: "passing".into(),
                pass_state: "pass".into(),
            },
        )
        .unwrap();

        let sample = collect_sample(&table, &[0, 1, 2]);
        assert_eq!(sample.pass_count, 2);
        assert_eq!(sample.fail_count, 1);
        assert!((sample.pass_sum - 2.5).abs() < 1e-12);
        assert!((sample.fail_sum - 1.0).abs() < 1e-12);
        assert_eq!(sample.points.len(), 3);
        assert!(sample.points[0].passing);
        assert_eq!(sample.points[1].value, 95.0);
    }
}

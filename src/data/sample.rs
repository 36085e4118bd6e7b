//! Synthetic tag-and-probe sample generation.
//!
//! Produces probe rows with a known true efficiency curve so the full
//! pipeline can be exercised without external data. The resonance peak is
//! Gaussian, the background is a truncated falling exponential, and the
//! per-probe pass probability follows a logistic turn-on in `pt`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::dataset::RawProbe;
use crate::domain::{
    BinAxis, BinningSpec, Category, ConfigDoc, DerivedExpression, EfficiencySpec, EngineOptions,
    ParamSpec, ShapeFamily, ShapeMap, ShapeSetSpec, ShapeSpec, ThresholdCategory, Variable,
};
use crate::error::AppError;

/// Settings for one synthetic sample.
#[derive(Debug, Clone)]
pub struct SampleConfig {
    pub seed: u64,
    pub probes: usize,
    /// Fit window for the resonance variable.
    pub mass_window: (f64, f64),
    pub peak_mean: f64,
    pub peak_sigma: f64,
    /// Fraction of probes drawn from the background density.
    pub background_fraction: f64,
    /// Exponential slope of the background mass density.
    pub background_slope: f64,
    /// Asymptotic signal efficiency at high `pt`.
    pub plateau: f64,
    /// `pt` of the turn-on midpoint.
    pub turn_on: f64,
    pub turn_on_width: f64,
    /// Pass probability for background probes, flat in `pt`.
    pub background_pass_rate: f64,
    /// Bin edges for the `pt` axis; also the sampled `pt` range.
    pub pt_edges: Vec<f64>,
    pub eta_abs_max: f64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            seed: 17,
            probes: 12_000,
            mass_window: (70.0, 110.0),
            peak_mean: 91.19,
            peak_sigma: 2.6,
            background_fraction: 0.35,
            background_slope: -0.04,
            plateau: 0.92,
            turn_on: 22.0,
            turn_on_width: 4.0,
            background_pass_rate: 0.5,
            pt_edges: vec![15.0, 25.0, 35.0, 50.0, 70.0],
            eta_abs_max: 2.4,
        }
    }
}

/// True signal efficiency at a given `pt`.
pub fn true_efficiency(config: &SampleConfig, pt: f64) -> f64 {
    let z = (pt - config.turn_on) / config.turn_on_width;
    config.plateau / (1.0 + (-z).exp())
}

/// Generate probe rows with values in `demo_config` variable order
/// (`mass`, `pt`, `eta`) and a single `passing` state.
pub fn generate_sample(config: &SampleConfig) -> Result<Vec<RawProbe>, AppError> {
    if config.probes == 0 {
        return Err(AppError::config("sample size must be > 0"));
    }
    let (win_lo, win_hi) = config.mass_window;
    if !(win_lo.is_finite() && win_hi.is_finite() && win_hi > win_lo) {
        return Err(AppError::config("invalid mass window for sample generation"));
    }
    if !(config.peak_mean.is_finite() && config.peak_sigma.is_finite() && config.peak_sigma > 0.0)
    {
        return Err(AppError::config("invalid peak settings for sample generation"));
    }
    if !(0.0..1.0).contains(&config.background_fraction) || !config.background_slope.is_finite() {
        return Err(AppError::config(
            "invalid background settings for sample generation",
        ));
    }
    if !(config.plateau > 0.0 && config.plateau <= 1.0)
        || !(config.turn_on.is_finite() && config.turn_on_width > 0.0)
    {
        return Err(AppError::config("invalid turn-on settings for sample generation"));
    }
    if !(0.0..=1.0).contains(&config.background_pass_rate) {
        return Err(AppError::config(
            "invalid background pass rate for sample generation",
        ));
    }
    if config.pt_edges.len() < 2
        || config.pt_edges.windows(2).any(|w| !(w[0] < w[1]))
        || config.pt_edges.iter().any(|e| !e.is_finite())
    {
        return Err(AppError::config(
            "pt edges must be at least two strictly ascending finite values",
        ));
    }
    if !(config.eta_abs_max > 0.0) {
        return Err(AppError::config("eta range must be > 0"));
    }

    let mut rng = StdRng::seed_from_u64(sample_seed(config));
    let peak = Normal::new(config.peak_mean, config.peak_sigma)
        .map_err(|e| AppError::numeric(format!("peak distribution error: {e}")))?;

    let pt_lo = config.pt_edges[0];
    let pt_hi = config.pt_edges[config.pt_edges.len() - 1];

    let mut probes = Vec::with_capacity(config.probes);
    for _ in 0..config.probes {
        let pt = rng.gen_range(pt_lo..pt_hi);
        let eta = rng.gen_range(-config.eta_abs_max..config.eta_abs_max);
        let is_background = rng.r#gen::<f64>() < config.background_fraction;

        let mass = if is_background {
            truncated_exponential(&mut rng, config.background_slope, win_lo, win_hi)
        } else {
            sample_peak_mass(&mut rng, &peak, config.peak_mean, win_lo, win_hi)
        };

        let pass_prob = if is_background {
            config.background_pass_rate
        } else {
            true_efficiency(config, pt)
        };
        let state = if rng.gen_bool(pass_prob) { "pass" } else { "fail" };

        probes.push(RawProbe {
            values: vec![mass, pt, eta],
            states: vec![state.to_string()],
            weight: 1.0,
        });
    }

    Ok(probes)
}

/// A run configuration aligned with `generate_sample` output.
pub fn demo_config(config: &SampleConfig) -> ConfigDoc {
    let (win_lo, win_hi) = config.mass_window;
    let pt_lo = config.pt_edges[0];
    let pt_hi = config.pt_edges[config.pt_edges.len() - 1];

    let peak_lo = (config.peak_mean - 3.0).max(win_lo);
    let peak_hi = (config.peak_mean + 3.0).min(win_hi);
    let signal = ShapeSpec {
        family: ShapeFamily::Gaussian,
        params: vec![
            ParamSpec {
                name: "mean".into(),
                init: config.peak_mean,
                bounds: [peak_lo, peak_hi],
            },
            ParamSpec {
                name: "sigma".into(),
                init: config.peak_sigma,
                bounds: [0.8, 6.0],
            },
        ],
    };
    let background = |label: &str| ShapeSpec {
        family: ShapeFamily::Exponential,
        params: vec![ParamSpec {
            name: format!("slope_{label}"),
            init: config.background_slope,
            bounds: [-0.5, 0.5],
        }],
    };
    let mut catalog = std::collections::BTreeMap::new();
    catalog.insert(
        "peak".to_string(),
        ShapeSetSpec {
            signal: Some(signal),
            signal_pass: None,
            signal_fail: None,
            background_pass: background("pass"),
            background_fail: background("fail"),
        },
    );

    ConfigDoc {
        variables: vec![
            Variable {
                name: "mass".into(),
                lo: win_lo,
                hi: win_hi,
                unit: Some("GeV".into()),
            },
            Variable {
                name: "pt".into(),
                lo: pt_lo,
                hi: pt_hi,
                unit: Some("GeV".into()),
            },
            Variable {
                name: "eta".into(),
                lo: -config.eta_abs_max,
                hi: config.eta_abs_max,
                unit: None,
            },
        ],
        categories: vec![Category {
            name: "passing".into(),
            states: vec!["pass".into(), "fail".into()],
        }],
        expressions: vec![DerivedExpression {
            name: "abseta".into(),
            formula: "abs(eta)".into(),
            args: vec!["eta".into()],
        }],
        thresholds: vec![ThresholdCategory {
            name: "central".into(),
            source: "abseta".into(),
            cutoff: 1.2,
        }],
        fit_variable: "mass".into(),
        efficiency: EfficiencySpec {
            category: "passing".into(),
            pass_state: "pass".into(),
        },
        bins: BinningSpec {
            variables: vec![BinAxis {
                variable: "pt".into(),
                edges: config.pt_edges.clone(),
            }],
            categories: vec!["central".into()],
        },
        shapes: ShapeMap {
            default: "peak".into(),
            catalog,
            overrides: std::collections::BTreeMap::new(),
        },
        options: EngineOptions::default(),
    }
}

fn sample_seed(config: &SampleConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    config.seed.hash(&mut hasher);
    config.probes.hash(&mut hasher);
    config.mass_window.0.to_bits().hash(&mut hasher);
    config.mass_window.1.to_bits().hash(&mut hasher);
    config.peak_mean.to_bits().hash(&mut hasher);
    config.peak_sigma.to_bits().hash(&mut hasher);
    config.background_fraction.to_bits().hash(&mut hasher);
    config.background_slope.to_bits().hash(&mut hasher);
    config.plateau.to_bits().hash(&mut hasher);
    config.turn_on.to_bits().hash(&mut hasher);
    config.turn_on_width.to_bits().hash(&mut hasher);
    config.background_pass_rate.to_bits().hash(&mut hasher);
    for edge in &config.pt_edges {
        edge.to_bits().hash(&mut hasher);
    }
    config.eta_abs_max.to_bits().hash(&mut hasher);
    hasher.finish()
}

/// Draw from the peak, restricted to the window. The peak sits well inside
/// the window for any sane configuration, so the retry cap is never the
/// deciding path; it only bounds the loop.
fn sample_peak_mass(rng: &mut StdRng, peak: &Normal<f64>, mean: f64, lo: f64, hi: f64) -> f64 {
    for _ in 0..64 {
        let m = peak.sample(rng);
        if m >= lo && m <= hi {
            return m;
        }
    }
    mean.clamp(lo, hi)
}

/// Inverse-CDF draw from `exp(slope * m)` truncated to `[lo, hi]`.
fn truncated_exponential(rng: &mut StdRng, slope: f64, lo: f64, hi: f64) -> f64 {
    let u: f64 = rng.r#gen();
    let span = hi - lo;
    if slope.abs() < 1e-9 {
        return lo + u * span;
    }
    lo + ((1.0 + u * ((slope * span).exp() - 1.0)).ln()) / slope
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_signal_config() -> SampleConfig {
        SampleConfig {
            probes: 4_000,
            background_fraction: 0.0,
            // Midpoint far below the sampled range, so the curve sits on its
            // plateau everywhere.
            turn_on: -50.0,
            turn_on_width: 1.0,
            ..SampleConfig::default()
        }
    }

    #[test]
    fn identical_configs_generate_identical_samples() {
        let config = SampleConfig::default();
        let a = generate_sample(&config).unwrap();
        let b = generate_sample(&config).unwrap();
        assert_eq!(a.len(), b.len());
        for (ra, rb) in a.iter().zip(&b).take(25) {
            assert_eq!(ra.values, rb.values);
            assert_eq!(ra.states, rb.states);
        }
        assert_eq!(a[a.len() - 1].values, b[b.len() - 1].values);
    }

    #[test]
    fn values_stay_inside_their_declared_ranges() {
        let config = SampleConfig::default();
        let probes = generate_sample(&config).unwrap();
        let (lo, hi) = config.mass_window;
        for p in &probes {
            assert!(p.values[0] >= lo && p.values[0] <= hi);
            assert!(p.values[1] >= config.pt_edges[0] && p.values[1] < 70.0);
            assert!(p.values[2].abs() <= config.eta_abs_max);
            assert!(p.states[0] == "pass" || p.states[0] == "fail");
            assert_eq!(p.weight, 1.0);
        }
    }

    #[test]
    fn pure_signal_pass_rate_matches_the_plateau() {
        let config = flat_signal_config();
        let probes = generate_sample(&config).unwrap();
        let passed = probes.iter().filter(|p| p.states[0] == "pass").count();
        let rate = passed as f64 / probes.len() as f64;
        assert!(
            (rate - config.plateau).abs() < 0.02,
            "pass rate {rate:.3} vs plateau {}",
            config.plateau
        );
    }

    #[test]
    fn turn_on_separates_low_and_high_pt_pass_rates() {
        let config = SampleConfig {
            probes: 6_000,
            background_fraction: 0.0,
            ..SampleConfig::default()
        };
        let probes = generate_sample(&config).unwrap();
        let rate_in = |lo: f64, hi: f64| {
            let in_range: Vec<_> = probes
                .iter()
                .filter(|p| p.values[1] >= lo && p.values[1] < hi)
                .collect();
            let passed = in_range.iter().filter(|p| p.states[0] == "pass").count();
            passed as f64 / in_range.len() as f64
        };
        let low = rate_in(15.0, 25.0);
        let high = rate_in(50.0, 70.0);
        assert!(
            low + 0.1 < high,
            "expected a rising turn-on, got {low:.3} -> {high:.3}"
        );
        assert!((high - config.plateau).abs() < 0.03);
    }

    #[test]
    fn invalid_settings_are_config_errors() {
        let zero = SampleConfig {
            probes: 0,
            ..SampleConfig::default()
        };
        assert_eq!(generate_sample(&zero).unwrap_err().exit_code(), 2);

        let bad_edges = SampleConfig {
            pt_edges: vec![30.0, 20.0],
            ..SampleConfig::default()
        };
        assert_eq!(generate_sample(&bad_edges).unwrap_err().exit_code(), 2);

        let bad_fraction = SampleConfig {
            background_fraction: 1.5,
            ..SampleConfig::default()
        };
        assert_eq!(generate_sample(&bad_fraction).unwrap_err().exit_code(), 2);
    }

    #[test]
    fn true_efficiency_rises_to_the_plateau() {
        let config = SampleConfig::default();
        let at_turn_on = true_efficiency(&config, config.turn_on);
        assert!((at_turn_on - config.plateau / 2.0).abs() < 1e-12);
        assert!(true_efficiency(&config, 15.0) < at_turn_on);
        let high = true_efficiency(&config, 200.0);
        assert!((high - config.plateau).abs() < 1e-6);
    }

    #[test]
    fn demo_config_aligns_with_generated_probes() {
        use crate::dataset::{VariableRegistry, build_table};

        let config = SampleConfig {
            probes: 300,
            ..SampleConfig::default()
        };
        let doc = demo_config(&config);
        assert_eq!(doc.fit_variable, "mass");
        assert_eq!(doc.bins.variables[0].variable, "pt");
        assert!(doc.shapes.catalog.contains_key(&doc.shapes.default));

        let probes = generate_sample(&config).unwrap();
        let mut registry = VariableRegistry::new();
        for v in &doc.variables {
            registry.add_variable(v.clone()).unwrap();
        }
        for c in &doc.categories {
            registry.add_category(c.clone()).unwrap();
        }
        let table = build_table(
            registry,
            &probes,
            &doc.expressions,
            &doc.thresholds,
            &doc.fit_variable,
            &doc.efficiency,
        )
        .unwrap();
        assert_eq!(table.stats.rows_kept, 300);
        assert_eq!(table.registry.variable_index("abseta"), Some(3));
        assert_eq!(table.registry.category_index("central"), Some(1));
    }
}

//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - declared in a JSON config document and validated up front
//! - used in-memory during binning and fitting
//! - exported to JSON/CSV alongside the efficiency tables

use std::collections::BTreeMap;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Optimizer effort preset.
///
/// Controls the density of the seed scan and the iteration budget of the
/// quasi-Newton refinement. `Standard` is the default; `Thorough` roughly
/// doubles both and is useful for low-statistics bins with flat likelihoods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Fast,
    Standard,
    Thorough,
}

/// How designated nuisance parameters are treated across bin fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NuisancePolicy {
    /// All shape parameters float freely in every bin fit.
    Float,
    /// Per bin: fix the listed parameters at their initial values, fit,
    /// release them, fit again.
    Fix,
    /// One fit of the union dataset (listed parameters fixed, then released)
    /// seeds the listed parameters for every subsequent bin fit.
    Warm,
}

/// Which estimator produced an efficiency table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorKind {
    /// Simultaneous signal+background maximum-likelihood fit.
    Fit,
    /// Counting ratio with exact Clopper-Pearson bounds.
    Count,
}

impl EstimatorKind {
    /// Column-header label for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            EstimatorKind::Fit => "fit",
            EstimatorKind::Count => "cnt",
        }
    }
}

/// Outcome attached to each efficiency record.
///
/// Only `MaxIterations` and `Stalled` are convergence warnings; they are
/// reported in the run summary but never abort the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStatus {
    /// Optimizer met its tolerance.
    Converged,
    /// Iteration cap reached before the tolerance was met.
    MaxIterations,
    /// Line search stopped making progress.
    Stalled,
    /// One-sided bin resolved by the deterministic shortcut (no optimizer ran).
    Degenerate,
    /// Post-fit override applied because the fitted sub-sample was one-sided.
    ZeroSubsample,
    /// Counting estimator record (no likelihood fit involved).
    Counted,
}

impl FitStatus {
    /// True for statuses surfaced as convergence warnings.
    pub fn is_warning(self) -> bool {
        matches!(self, FitStatus::MaxIterations | FitStatus::Stalled)
    }

    /// Fixed-width label for terminal tables and CSV cells.
    pub fn display_name(self) -> &'static str {
        match self {
            FitStatus::Converged => "converged",
            FitStatus::MaxIterations => "max_iterations",
            FitStatus::Stalled => "stalled",
            FitStatus::Degenerate => "degenerate",
            FitStatus::ZeroSubsample => "zero_subsample",
            FitStatus::Counted => "counted",
        }
    }
}

/// A continuous variable with its physical range.
///
/// Rows whose value falls outside `[lo, hi]` on a *binned* variable land in
/// the unmapped bucket; the fit variable's range doubles as the fit window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub lo: f64,
    pub hi: f64,
    #[serde(default)]
    pub unit: Option<String>,
}

/// A categorical variable with a finite, ordered state list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub states: Vec<String>,
}

/// A derived continuous column computed per row from a formula.
///
/// `args` lists the variables the formula may reference; referencing anything
/// else (or listing an undeclared variable) is a configuration error raised
/// before any row is evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedExpression {
    pub name: String,
    pub formula: String,
    pub args: Vec<String>,
}

/// A derived two-state category from a threshold cut.
///
/// `value <= cutoff` maps to `below`, otherwise `above`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdCategory {
    pub name: String,
    pub source: String,
    pub cutoff: f64,
}

/// Names of a threshold category's states, in declaration order.
pub const THRESHOLD_STATES: [&str; 2] = ["below", "above"];

/// Which category/state marks a probe as passing the selection under study.
///
/// Rows in any other state of that category count as failing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EfficiencySpec {
    pub category: String,
    pub pass_state: String,
}

/// One binned-variable axis of the partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinAxis {
    pub variable: String,
    /// Ascending bin edges; `n` edges define `n-1` half-open intervals
    /// `[e[i], e[i+1])`, with the last interval closed on the right.
    pub edges: Vec<f64>,
}

/// Binning axes: binned variables first, then categories, each in declared order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BinningSpec {
    #[serde(default)]
    pub variables: Vec<BinAxis>,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// One coordinate of a bin descriptor.
///
/// Numeric edges are intentionally not stored here so descriptors stay
/// hashable; edges are recoverable from the binning spec and from the
/// covariate spans on each record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinCoord {
    /// `index`-th interval of a binned variable.
    Range { variable: String, index: usize },
    /// A category state.
    State { category: String, state: String },
}

/// Identifies one fit unit: ordered coordinates, one per partition axis.
///
/// Two descriptors are equal iff all coordinates match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinDescriptor {
    pub coords: Vec<BinCoord>,
}

impl BinDescriptor {
    /// Stable composite name, e.g. `pt_bin0__charge_plus`.
    pub fn label(&self) -> String {
        let parts: Vec<String> = self
            .coords
            .iter()
            .map(|c| match c {
                BinCoord::Range { variable, index } => format!("{variable}_bin{index}"),
                BinCoord::State { category, state } => format!("{category}_{state}"),
            })
            .collect();
        parts.join("__")
    }
}

/// Weighted mean of one binned variable over the rows of a bin, with
/// asymmetric spans to the bin edges (`err_lo = lo - mean`, `err_hi = hi - mean`).
///
/// An empty bin reports the bin center with half-width spans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinCovariate {
    pub name: String,
    pub mean: f64,
    pub err_lo: f64,
    pub err_hi: f64,
}

/// One row of an efficiency table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EfficiencyRecord {
    pub bin: BinDescriptor,
    pub covariates: Vec<BinCovariate>,
    /// Efficiency estimate in `[0, 1]`.
    pub value: f64,
    /// Signed distance to the interval's lower edge (always `<= 0`).
    pub err_lo: f64,
    /// Signed distance to the interval's upper edge (always `>= 0`).
    pub err_hi: f64,
    /// Weighted passing total of the bin.
    pub pass_sum: f64,
    /// Weighted failing total of the bin.
    pub fail_sum: f64,
    pub status: FitStatus,
}

/// Shape families available to the model catalog.
///
/// Every density is analytically normalized over the fit window, so mixture
/// fractions stay interpretable as yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeFamily {
    Gaussian,
    Exponential,
    Chebyshev,
    Uniform,
}

/// A named shape parameter with its initial value and box bounds.
///
/// Parameters with identical names are shared across the shapes of one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub init: f64,
    pub bounds: [f64; 2],
}

/// A shape declaration: family plus its parameter list.
///
/// Expected parameter counts: Gaussian 2 (mean, sigma), Exponential 1
/// (slope), Chebyshev 1-2 (coefficients), Uniform 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeSpec {
    pub family: ShapeFamily,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

/// Raw shape set for one catalog label, before validation.
///
/// Exactly one of `signal` xor (`signal_pass` + `signal_fail`) must be
/// declared; both or neither is a configuration error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeSetSpec {
    #[serde(default)]
    pub signal: Option<ShapeSpec>,
    #[serde(default)]
    pub signal_pass: Option<ShapeSpec>,
    #[serde(default)]
    pub signal_fail: Option<ShapeSpec>,
    pub background_pass: ShapeSpec,
    pub background_fail: ShapeSpec,
}

/// Reserved shape label: bins resolving to it are skipped entirely.
pub const SKIP_SHAPE_LABEL: &str = "all";

/// Shape assignment: a default catalog label plus exact-bin-name overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeMap {
    pub default: String,
    pub catalog: BTreeMap<String, ShapeSetSpec>,
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
}

/// Engine knobs, all defaulted; deserialized from the config document and
/// overridable from the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub strategy: Strategy,
    pub nuisance_policy: NuisancePolicy,
    /// Parameter names designated by `Fix`/`Warm` policies.
    pub fixed_params: Vec<String>,
    /// Starting efficiency for non-degenerate fits.
    pub initial_efficiency: f64,
    /// Assumed signal fraction of the passing sub-sample, used only to seed
    /// the total-yield and signal-fraction parameters.
    pub signal_fraction_in_passing: f64,
    /// Rows per likelihood chunk; partials are combined in chunk order so
    /// repeated runs produce identical sums.
    pub nll_chunk: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::Standard,
            nuisance_policy: NuisancePolicy::Float,
            fixed_params: Vec::new(),
            initial_efficiency: 0.9,
            signal_fraction_in_passing: 0.9,
            nll_chunk: 4096,
        }
    }
}

/// The full run configuration as declared in the JSON config document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDoc {
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub expressions: Vec<DerivedExpression>,
    #[serde(default)]
    pub thresholds: Vec<ThresholdCategory>,
    /// Variable fitted in each bin (its range is the fit window).
    pub fit_variable: String,
    pub efficiency: EfficiencySpec,
    pub bins: BinningSpec,
    pub shapes: ShapeMap,
    #[serde(default)]
    pub options: EngineOptions,
}

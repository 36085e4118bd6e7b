//! Probe-table construction.
//!
//! Takes raw probes (one value per declared variable, one state string per
//! declared category, a weight) and produces the table every later stage
//! works from:
//!
//! - derived value columns are computed from compiled formulas
//! - threshold categories are appended (`value <= cutoff` -> `below`)
//! - rows outside the fit variable's window are dropped, with counts kept
//! - category states are resolved to indices; unknown states survive as
//!   `None` so the partitioner can route them to the unmapped bucket
//!
//! All name validation happens before the first row is touched.

use crate::dataset::expr::{self, Expr};
use crate::dataset::registry::VariableRegistry;
use crate::domain::{
    DerivedExpression, EfficiencySpec, ThresholdCategory, Variable, THRESHOLD_STATES,
};
use crate::error::AppError;

/// One probe as delivered by ingest or the synthetic generator, aligned with
/// the base registry's declaration order.
#[derive(Debug, Clone)]
pub struct RawProbe {
    pub values: Vec<f64>,
    pub states: Vec<String>,
    pub weight: f64,
}

/// One fully-built row: base plus derived columns, states as indices.
#[derive(Debug, Clone)]
pub struct ProbeRow {
    pub values: Vec<f64>,
    /// `None` marks a state string with no declared counterpart.
    pub states: Vec<Option<usize>>,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TableStats {
    pub rows_in: usize,
    pub rows_kept: usize,
    pub rows_outside_window: usize,
    pub rows_bad_weight: usize,
}

/// The built probe table plus everything resolved against it.
#[derive(Debug, Clone)]
pub struct ProbeTable {
    pub registry: VariableRegistry,
    pub rows: Vec<ProbeRow>,
    /// Column index of the fit variable.
    pub fit_var: usize,
    pub eff_category: usize,
    pub pass_state: usize,
    pub stats: TableStats,
}

impl ProbeTable {
    /// Fit window, taken from the fit variable's declared range.
    pub fn window(&self) -> (f64, f64) {
        let v = &self.registry.variables()[self.fit_var];
        (v.lo, v.hi)
    }

    /// Whether a row passes the selection under study. Rows in any other
    /// state of the efficiency category (including unknown states) fail.
    pub fn row_passes(&self, row: &ProbeRow) -> bool {
        row.states[self.eff_category] == Some(self.pass_state)
    }
}

/// Build the probe table from raw rows.
///
/// `base` must already hold every ingested variable and category; derived
/// columns and threshold categories are appended here.
pub fn build_table(
    base: VariableRegistry,
    raw: &[RawProbe],
    expressions: &[DerivedExpression],
    thresholds: &[ThresholdCategory],
    fit_variable: &str,
    efficiency: &EfficiencySpec,
) -> Result<ProbeTable, AppError> {
    let base_var_count = base.variables().len();
    let base_cat_count = base.categories().len();

    let fit_var = base.variable_index(fit_variable).ok_or_else(|| {
        AppError::config(format!(
            "fit variable '{fit_variable}' must be a declared variable with an explicit range"
        ))
    })?;
    let (win_lo, win_hi) = {
        let v = &base.variables()[fit_var];
        (v.lo, v.hi)
    };

    // Name resolution happens against this growing list, so an expression can
    // reference derived columns declared before it.
    let mut var_names: Vec<String> = base.variables().iter().map(|v| v.name.clone()).collect();
    let name_free = |name: &str, var_names: &[String], base: &VariableRegistry| -> bool {
        !var_names.iter().any(|n| n == name) && base.category_index(name).is_none()
    };

    let mut compiled: Vec<(String, Expr)> = Vec::with_capacity(expressions.len());
    for ex in expressions {
        for arg in &ex.args {
            if !var_names.iter().any(|n| n == arg) {
                return Err(AppError::config(format!(
                    "expression '{}': argument '{arg}' is not a declared variable",
                    ex.name
                )));
            }
        }
        if !name_free(&ex.name, &var_names, &base) {
            return Err(AppError::config(format!(
                "expression '{}' reuses a declared name",
                ex.name
            )));
        }
        let resolve = |name: &str| -> Option<usize> {
            if ex.args.iter().any(|a| a == name) {
                var_names.iter().position(|n| n == name)
            } else {
                None
            }
        };
        let tree = expr::compile(&ex.formula, &resolve)?;
        var_names.push(ex.name.clone());
        compiled.push((ex.name.clone(), tree));
    }

    let mut threshold_cols: Vec<(String, usize, f64)> = Vec::with_capacity(thresholds.len());
    for th in thresholds {
        let src = var_names.iter().position(|n| n == &th.source).ok_or_else(|| {
            AppError::config(format!(
                "threshold '{}': source '{}' is not a declared variable",
                th.name, th.source
            ))
        })?;
        if !name_free(&th.name, &var_names, &base)
            || threshold_cols.iter().any(|(n, _, _)| n == &th.name)
        {
            return Err(AppError::config(format!(
                "threshold '{}' reuses a declared name",
                th.name
            )));
        }
        threshold_cols.push((th.name.clone(), src, th.cutoff));
    }

    let mut stats = TableStats {
        rows_in: raw.len(),
        ..TableStats::default()
    };
    let mut rows: Vec<ProbeRow> = Vec::with_capacity(raw.len());
    for probe in raw {
        if probe.values.len() != base_var_count || probe.states.len() != base_cat_count {
            return Err(AppError::data(format!(
                "probe row has {} values / {} states, expected {} / {}",
                probe.values.len(),
                probe.states.len(),
                base_var_count,
                base_cat_count
            )));
        }
        if !probe.weight.is_finite() {
            stats.rows_bad_weight += 1;
            continue;
        }

        let mut values = Vec::with_capacity(base_var_count + compiled.len());
        values.extend_from_slice(&probe.values);
        for (_, tree) in &compiled {
            let v = tree.eval(&values);
            values.push(v);
        }

        let fit_value = values[fit_var];
        if !(win_lo..=win_hi).contains(&fit_value) {
            stats.rows_outside_window += 1;
            continue;
        }

        let mut states: Vec<Option<usize>> =
            Vec::with_capacity(base_cat_count + threshold_cols.len());
        for (ci, raw_state) in probe.states.iter().enumerate() {
            let cat = &base.categories()[ci];
            states.push(cat.states.iter().position(|s| s == raw_state));
        }
        for &(_, src, cutoff) in &threshold_cols {
            let below = values[src] <= cutoff;
            states.push(Some(if below { 0 } else { 1 }));
        }

        rows.push(ProbeRow {
            values,
            states,
            weight: probe.weight,
        });
        stats.rows_kept += 1;
    }

    let mut registry = base;
    for (di, (name, _)) in compiled.iter().enumerate() {
        let col = base_var_count + di;
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for row in &rows {
            let v = row.values[col];
            if v.is_finite() {
                lo = lo.min(v);
                hi = hi.max(v);
            }
        }
        let (lo, hi) = if lo < hi { (lo, hi) } else { (0.0, 1.0) };
        registry.add_variable(Variable {
            name: name.clone(),
            lo,
            hi,
            unit: None,
        })?;
    }
    for (name, _, _) in &threshold_cols {
        registry.add_category(crate::domain::Category {
            name: name.clone(),
            states: THRESHOLD_STATES.iter().map(|s| s.to_string()).collect(),
        })?;
    }

    let eff_category = registry.require_category(&efficiency.category)?;
    let pass_state = registry.require_state(eff_category, &efficiency.pass_state)?;

    Ok(ProbeTable {
        registry,
        rows,
        fit_var,
        eff_category,
        pass_state,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Category;

    fn base_registry() -> VariableRegistry {
        let mut reg = VariableRegistry::new();
        for (name, lo, hi) in [("mass", 60.0, 120.0), ("pt", 0.0, 100.0), ("eta", -2.5, 2.5)] {
            reg.add_variable(Variable {
                name: name.into(),
                lo,
                hi,
                unit: None,
            })
            .unwrap();
        }
        reg.add_category(Category {
            name: "passing".into(),
            states: vec!["pass".into(), "fail".into()],
        })
        .unwrap();
        reg
    }

    fn probe(mass: f64, pt: f64, eta: f64, state: &str) -> RawProbe {
        RawProbe {
            values: vec![mass, pt, eta],
            states: vec![state.into()],
            weight: 1.0,
        }
    }

    fn spec() -> EfficiencySpec {
        EfficiencySpec {
            category: "passing".into(),
            pass_state: "pass".into(),
        }
    }

    #[test]
    fn derived_and_threshold_columns_are_appended() {
        let exprs = vec![DerivedExpression {
            name: "abseta".into(),
            formula: "abs(eta)".into(),
            args: vec!["eta".into()],
        }];
        let ths = vec![ThresholdCategory {
            name: "central".into(),
            source: "abseta".into(),
            cutoff: 1.2,
        }];
        let raw = vec![probe(91.0, 30.0, -0.5, "pass"), probe(92.0, 40.0, 2.0, "fail")];
        let table = build_table(base_registry(), &raw, &exprs, &ths, "mass", &spec()).unwrap();

        assert_eq!(table.registry.variable_index("abseta"), Some(3));
        assert_eq!(table.registry.category_index("central"), Some(1));
        assert!((table.rows[0].values[3] - 0.5).abs() < 1e-12);
        assert_eq!(table.rows[0].states[1], Some(0)); // below
        assert_eq!(table.rows[1].states[1], Some(1)); // above
        assert!(table.row_passes(&table.rows[0]));
        assert!(!table.row_passes(&table.rows[1]));
    }

    #[test]
    fn chained_expressions_see_earlier_columns() {
        let exprs = vec![
            DerivedExpression {
                name: "abseta".into(),
                formula: "abs(eta)".into(),
                args: vec!["eta".into()],
            },
            DerivedExpression {
                name: "ptrel".into(),
                formula: "pt / (1 + abseta)".into(),
                args: vec!["pt".into(), "abseta".into()],
            },
        ];
        let raw = vec![probe(91.0, 30.0, -1.0, "pass")];
        let table = build_table(base_registry(), &raw, &exprs, &[], "mass", &spec()).unwrap();
        assert!((table.rows[0].values[4] - 15.0).abs() < 1e-12);
    }

    #[test]
    fn rows_outside_the_fit_window_are_dropped() {
        let raw = vec![probe(91.0, 30.0, 0.0, "pass"), probe(200.0, 30.0, 0.0, "pass")];
        let table = build_table(base_registry(), &raw, &[], &[], "mass", &spec()).unwrap();
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.stats.rows_outside_window, 1);
        assert_eq!(table.stats.rows_kept, 1);
        assert_eq!(table.window(), (60.0, 120.0));
    }

    #[test]
    fn unknown_state_is_kept_but_unresolved() {
        let raw = vec![probe(91.0, 30.0, 0.0, "mystery")];
        let table = build_table(base_registry(), &raw, &[], &[], "mass", &spec()).unwrap();
        assert_eq!(table.rows[0].states[0], None);
        assert!(!table.row_passes(&table.rows[0]));
    }

    #[test]
    fn bad_names_are_config_errors() {
        let missing_arg = vec![DerivedExpression {
            name: "d".into(),
            formula: "q * 2".into(),
            args: vec!["q".into()],
        }];
        let err = build_table(base_registry(), &[], &missing_arg, &[], "mass", &spec()).unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let clash = vec![DerivedExpression {
            name: "pt".into(),
            formula: "eta".into(),
            args: vec!["eta".into()],
        }];
        assert!(build_table(base_registry(), &[], &clash, &[], "mass", &spec()).is_err());

        assert!(build_table(base_registry(), &[], &[], &[], "nope", &spec()).is_err());

        let bad_spec = EfficiencySpec {
            category: "passing".into(),
            pass_state: "maybe".into(),
        };
        assert!(build_table(base_registry(), &[], &[], &[], "mass", &bad_spec).is_err());
    }

    #[test]
    fn non_finite_weights_are_skipped() {
        let mut bad = probe(91.0, 30.0, 0.0, "pass");
        bad.weight = f64::NAN;
        let table = build_table(base_registry(), &[bad], &[], &[], "mass", &spec()).unwrap();
        assert_eq!(table.rows.len(), 0);
        assert_eq!(table.stats.rows_bad_weight, 1);
    }
}

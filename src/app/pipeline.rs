//! Shared run pipeline used by every subcommand.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! registry build -> probe table -> partition -> counting -> per-bin fits
//!
//! The CLI front-end then focuses on argument handling and presentation.

use std::collections::BTreeMap;

use crate::binning::{Partition, bin_covariates, partition};
use crate::dataset::{ProbeTable, RawProbe, TableStats, VariableRegistry, build_table};
use crate::domain::{
    ConfigDoc, EfficiencyRecord, EstimatorKind, FitStatus, NuisancePolicy, SKIP_SHAPE_LABEL,
};
use crate::error::AppError;
use crate::fit::{BinModel, FitEngine, NuisanceSnapshot, collect_sample, count_bin};
use crate::report::EfficiencyTable;

/// All computed outputs of a single run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub stats: TableStats,
    pub unmapped_rows: usize,
    /// Bins resolving to the reserved skip label; counted, never fitted.
    pub skipped_bins: usize,
    pub count_table: EfficiencyTable,
    pub fit_table: Option<EfficiencyTable>,
}

impl RunOutput {
    /// Tables in presentation order (fit first when present).
    pub fn tables(&self) -> Vec<&EfficiencyTable> {
        let mut out = Vec::new();
        if let Some(fit) = &self.fit_table {
            out.push(fit);
        }
        out.push(&self.count_table);
        out
    }
}

/// Execute the pipeline. With `with_fit` unset only the counting estimator
/// runs, and the shape catalog is not validated against the fit policy.
pub fn run_pipeline(
    doc: &ConfigDoc,
    raw: &[RawProbe],
    with_fit: bool,
) -> Result<RunOutput, AppError> {
    // 1) Declare base columns.
    let mut registry = VariableRegistry::new();
    for v in &doc.variables {
        registry.add_variable(v.clone())?;
    }
    for c in &doc.categories {
        registry.add_category(c.clone())?;
    }

    // 2) Build the probe table (derived columns, window filter, weights).
    let table = build_table(
        registry,
        raw,
        &doc.expressions,
        &doc.thresholds,
        &doc.fit_variable,
        &doc.efficiency,
    )?;
    if table.rows.is_empty() {
        return Err(AppError::data(
            "no probe rows survive the fit window and weight checks",
        ));
    }

    // 3) Partition rows into bins and resolve shape labels.
    let part = partition(&table, &doc.bins, &doc.shapes)?;

    // 4) Compile every catalog model up front so configuration errors
    //    surface before any fit starts.
    let engine = FitEngine::new(doc.options.clone());
    let mut models: BTreeMap<String, BinModel> = BTreeMap::new();
    if with_fit {
        for (label, set) in &doc.shapes.catalog {
            let model = BinModel::compile(set, table.window())
                .map_err(|e| AppError::config(format!("shape set '{label}': {e}")))?;
            engine.validate(&model)?;
            models.insert(label.clone(), model);
        }
    }

    // 5) Counting estimator over every bin.
    let mut count_table = EfficiencyTable::new(EstimatorKind::Count);
    for bin in &part.bins {
        let sample = collect_sample(&table, &bin.rows);
        let counted = count_bin(sample.pass_sum, sample.fail_sum)?;
        count_table.push(EfficiencyRecord {
            bin: bin.descriptor.clone(),
            covariates: bin_covariates(&table, &part, bin),
            value: counted.value,
            err_lo: counted.err_lo,
            err_hi: counted.err_hi,
            pass_sum: sample.pass_sum,
            fail_sum: sample.fail_sum,
            status: FitStatus::Counted,
        })?;
    }

    if !with_fit {
        let skipped_bins = skip_count(&part);
        return Ok(RunOutput {
            stats: table.stats,
            unmapped_rows: part.unmapped.len(),
            skipped_bins,
            count_table,
            fit_table: None,
        });
    }

    // 6) Warm policy: one union fit over the fittable rows seeds every bin.
    let warm = warm_snapshot(&engine, &doc.shapes.default, &models, &table, &part)?;

    // 7) Per-bin maximum-likelihood fits, in partition order.
    let mut fit_table = EfficiencyTable::new(EstimatorKind::Fit);
    let mut skipped_bins = 0usize;
    for bin in &part.bins {
        if bin.shape_label == SKIP_SHAPE_LABEL {
            skipped_bins += 1;
            continue;
        }
        let model = models.get(&bin.shape_label).ok_or_else(|| {
            AppError::config(format!("unresolved shape label '{}'", bin.shape_label))
        })?;
        let sample = collect_sample(&table, &bin.rows);
        let fit = engine.fit_bin(model, &sample, warm.as_ref())?;
        fit_table.push(EfficiencyRecord {
            bin: bin.descriptor.clone(),
            covariates: bin_covariates(&table, &part, bin),
            value: fit.efficiency,
            err_lo: fit.err_lo,
            err_hi: fit.err_hi,
            pass_sum: sample.pass_sum,
            fail_sum: sample.fail_sum,
            status: fit.status,
        })?;
    }

    Ok(RunOutput {
        stats: table.stats,
        unmapped_rows: part.unmapped.len(),
        skipped_bins,
        count_table,
        fit_table: Some(fit_table),
    })
}

fn skip_count(part: &Partition) -> usize {
    part.bins
        .iter()
        .filter(|b| b.shape_label == SKIP_SHAPE_LABEL)
        .count()
}

/// Union fit for the warm policy. The snapshot is taken with the default
/// shape set over the rows of every fittable bin.
fn warm_snapshot(
    engine: &FitEngine,
    default_label: &str,
    models: &BTreeMap<String, BinModel>,
    table: &ProbeTable,
    part: &Partition,
) -> Result<Option<NuisanceSnapshot>, AppError> {
    if !matches!(engine.options().nuisance_policy, NuisancePolicy::Warm) {
        return Ok(None);
    }
    let model = models.get(default_label).ok_or_else(|| {
        AppError::config("the warm nuisance policy needs a fittable default shape set")
    })?;
    let rows: Vec<usize> = part
        .bins
        .iter()
        .filter(|b| b.shape_label != SKIP_SHAPE_LABEL)
        .flat_map(|b| b.rows.iter().copied())
        .collect();
    let union = collect_sample(table, &rows);
    Ok(Some(engine.warm_start(model, &union)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SampleConfig, demo_config, generate_sample};
    use crate::domain::Strategy;

    fn small_setup() -> (ConfigDoc, Vec<RawProbe>) {
        let sample = SampleConfig {
            probes: 1_500,
            pt_edges: vec![15.0, 35.0, 70.0],
            ..SampleConfig::default()
        };
        let mut doc = demo_config(&sample);
        doc.options.strategy = Strategy::Fast;
        let raw = generate_sample(&sample).unwrap();
        (doc, raw)
    }

    #[test]
    fn demo_dataset_round_trips_through_the_pipeline() {
        let (doc, raw) = small_setup();
        let out = run_pipeline(&doc, &raw, true).unwrap();

        assert_eq!(out.stats.rows_kept, 1_500);
        assert_eq!(out.unmapped_rows, 0);
        assert_eq!(out.skipped_bins, 0);
        // 2 pt intervals x 2 centrality states.
        assert_eq!(out.count_table.len(), 4);
        let fit = out.fit_table.as_ref().unwrap();
        assert_eq!(fit.len(), 4);
        for record in fit.records() {
            assert!((0.0..=1.0).contains(&record.value));
            assert!(record.err_lo <= 0.0 && record.err_hi >= 0.0);
            assert!(!record.covariates.is_empty());
        }
        for (fitted, counted) in fit.records().iter().zip(out.count_table.records()) {
            assert_eq!(fitted.bin, counted.bin);
            assert_eq!(counted.status, FitStatus::Counted);
        }
    }

    #[test]
    fn counting_only_runs_skip_fitting() {
        let (doc, raw) = small_setup();
        let out = run_pipeline(&doc, &raw, false).unwrap();
        assert!(out.fit_table.is_none());
        assert_eq!(out.count_table.len(), 4);
        assert!(out
            .count_table
            .records()
            .iter()
            .all(|r| r.status == FitStatus::Counted));
    }

    #[test]
    fn skip_label_bins_are_counted_but_never_fitted() {
        let (mut doc, raw) = small_setup();
        doc.shapes
            .overrides
            .insert("pt_bin0__central_below".into(), SKIP_SHAPE_LABEL.into());
        let out = run_pipeline(&doc, &raw, true).unwrap();
        assert_eq!(out.skipped_bins, 1);
        assert_eq!(out.count_table.len(), 4);
        let fit = out.fit_table.as_ref().unwrap();
        assert_eq!(fit.len(), 3);
        assert!(fit
            .records()
            .iter()
            .all(|r| r.bin.label() != "pt_bin0__central_below"));
    }

    #[test]
    fn empty_dataset_is_a_data_error() {
        let (doc, mut raw) = small_setup();
        for probe in &mut raw {
            probe.values[0] = 500.0; // push every mass outside the window
        }
        let err = run_pipeline(&doc, &raw, true).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn unknown_fix_parameter_fails_before_any_fit() {
        let (mut doc, raw) = small_setup();
        doc.options.nuisance_policy = NuisancePolicy::Fix;
        doc.options.fixed_params = vec!["nope".into()];
        let err = run_pipeline(&doc, &raw, true).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn warm_policy_requires_a_fittable_default() {
        let (mut doc, raw) = small_setup();
        doc.shapes.default = SKIP_SHAPE_LABEL.into();
        doc.shapes
            .overrides
            .insert("pt_bin0__central_below".into(), "peak".into());
        doc.options.nuisance_policy = NuisancePolicy::Warm;
        doc.options.fixed_params = vec!["sigma".into()];
        let err = run_pipeline(&doc, &raw, true).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("default"));
    }
}

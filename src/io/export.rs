//! Result export: efficiency tables as CSV and a combined JSON run document.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{EfficiencyRecord, EstimatorKind};
use crate::error::AppError;
use crate::report::EfficiencyTable;

/// Tool identifier stamped into exported JSON documents.
pub const EXPORT_TOOL: &str = "tnp-eff";

/// Top-level schema of the JSON run document.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultFile {
    pub tool: String,
    pub generated: DateTime<Utc>,
    pub probes: ProbeAccounting,
    pub tables: Vec<TableSection>,
}

/// Row accounting carried into the JSON document.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProbeAccounting {
    pub rows_read: usize,
    pub rows_kept: usize,
    pub rows_outside_window: usize,
    pub rows_bad_weight: usize,
    pub unmapped_rows: usize,
    pub skipped_bins: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TableSection {
    pub estimator: EstimatorKind,
    pub records: Vec<EfficiencyRecord>,
}

/// Write every table into one JSON document.
pub fn write_result_json(
    path: &Path,
    probes: ProbeAccounting,
    tables: &[&EfficiencyTable],
) -> Result<(), AppError> {
    let doc = ResultFile {
        tool: EXPORT_TOOL.to_string(),
        generated: Utc::now(),
        probes,
        tables: tables
            .iter()
            .map(|t| TableSection {
                estimator: t.estimator(),
                records: t.records().to_vec(),
            })
            .collect(),
    };
    let file = File::create(path).map_err(|e| {
        AppError::config(format!("failed to create '{}': {e}", path.display()))
    })?;
    serde_json::to_writer_pretty(file, &doc)
        .map_err(|e| AppError::config(format!("failed to write '{}': {e}", path.display())))?;
    Ok(())
}

/// Write one efficiency table as CSV.
///
/// Covariate columns come from the first record; every record of a table
/// shares the same binned axes, so the layout is uniform.
pub fn write_table_csv(path: &Path, table: &EfficiencyTable) -> Result<(), AppError> {
    let mut file = File::create(path).map_err(|e| {
        AppError::config(format!("failed to create '{}': {e}", path.display()))
    })?;

    let mut header = String::from("bin");
    if let Some(first) = table.records().first() {
        for cov in &first.covariates {
            header.push_str(&format!(
                ",{name}_mean,{name}_err_lo,{name}_err_hi",
                name = cov.name
            ));
        }
    }
    header.push_str(",eff,err_lo,err_hi,pass,fail,status");
    writeln!(file, "{header}")
        .map_err(|e| AppError::config(format!("failed to write '{}': {e}", path.display())))?;

    for record in table.records() {
        writeln!(file, "{}", format_record(record))
            .map_err(|e| AppError::config(format!("failed to write '{}': {e}", path.display())))?;
    }
    Ok(())
}

fn format_record(record: &EfficiencyRecord) -> String {
    let mut line = record.bin.label();
    for cov in &record.covariates {
        line.push_str(&format!(
            ",{:.6},{:.6},{:.6}",
            cov.mean, cov.err_lo, cov.err_hi
        ));
    }
    line.push_str(&format!(
        ",{:.6},{:.6},{:.6},{:.3},{:.3},{}",
        record.value,
        record.err_lo,
        record.err_hi,
        record.pass_sum,
        record.fail_sum,
        record.status.display_name()
    ));
    line
}

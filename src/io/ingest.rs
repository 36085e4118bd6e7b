//! Probe CSV ingest and config loading.
//!
//! The probe file carries one column per declared variable, one per declared
//! category, and an optional `weight` column (default 1). Design goals:
//!
//! - **Strict schema** for declared columns (clear errors + exit code 2)
//! - **Row-level validation** (skip bad rows, but report what happened)
//! - **Deterministic behavior** (rows keep file order)
//! - **Separation of concerns**: no binning or fitting logic here

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use csv::StringRecord;

use crate::dataset::RawProbe;
use crate::domain::{Category, ConfigDoc, Variable};
use crate::error::AppError;

/// A row-level problem encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Ingest output: raw probes in file order plus row diagnostics.
#[derive(Debug, Clone)]
pub struct IngestedProbes {
    pub probes: Vec<RawProbe>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

/// Read and validate the run configuration document.
pub fn read_config_json(path: &Path) -> Result<ConfigDoc, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::config(format!("failed to open config '{}': {e}", path.display()))
    })?;
    let doc: ConfigDoc = serde_json::from_reader(file)
        .map_err(|e| AppError::config(format!("invalid config '{}': {e}", path.display())))?;
    Ok(doc)
}

/// Load probe rows, aligned with the declared variable/category order.
pub fn load_probes(
    path: &Path,
    variables: &[Variable],
    categories: &[Category],
) -> Result<IngestedProbes, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::config(format!("failed to open probes '{}': {e}", path.display()))
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| AppError::config(format!("failed to read probe headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    let mut var_cols = Vec::with_capacity(variables.len());
    for v in variables {
        var_cols.push(require_column(&header_map, &v.name)?);
    }
    let mut cat_cols = Vec::with_capacity(categories.len());
    for c in categories {
        cat_cols.push(require_column(&header_map, &c.name)?);
    }
    let weight_col = header_map.get("weight").copied();

    let mut probes = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // +2 because:
        // - records() starts at line 1 after headers
        // - CSV is 1-based line numbers
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        match parse_probe(&record, variables, &var_cols, categories, &cat_cols, weight_col) {
            Ok(probe) => probes.push(probe),
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    if probes.is_empty() {
        return Err(AppError::data(format!(
            "no usable probe rows in '{}' ({} read, {} rejected)",
            path.display(),
            rows_read,
            row_errors.len()
        )));
    }

    Ok(IngestedProbes {
        probes,
        row_errors,
        rows_read,
    })
}

fn parse_probe(
    record: &StringRecord,
    variables: &[Variable],
    var_cols: &[usize],
    categories: &[Category],
    cat_cols: &[usize],
    weight_col: Option<usize>,
) -> Result<RawProbe, String> {
    let mut values = Vec::with_capacity(variables.len());
    for (v, &col) in variables.iter().zip(var_cols) {
        let cell = get_cell(record, col)
            .ok_or_else(|| format!("missing value for `{}`", v.name))?;
        let parsed = cell
            .parse::<f64>()
            .map_err(|_| format!("invalid `{}` value '{cell}'", v.name))?;
        if !parsed.is_finite() {
            return Err(format!("non-finite `{}` value", v.name));
        }
        values.push(parsed);
    }

    let mut states = Vec::with_capacity(categories.len());
    for (c, &col) in categories.iter().zip(cat_cols) {
        let cell = get_cell(record, col)
            .ok_or_else(|| format!("missing state for `{}`", c.name))?;
        states.push(cell.to_string());
    }

    let weight = match weight_col.and_then(|col| get_cell(record, col)) {
        Some(cell) => cell
            .parse::<f64>()
            .map_err(|_| format!("invalid `weight` value '{cell}'"))?,
        None => 1.0,
    };

    Ok(RawProbe {
        values,
        states,
        weight,
    })
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet tools sometimes emit UTF-8 CSVs with a BOM prefix on the
    // first header. If we don't strip it, schema validation will incorrectly
    // report missing columns.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn require_column(header_map: &HashMap<String, usize>, name: &str) -> Result<usize, AppError> {
    header_map
        .get(&normalize_header_name(name))
        .copied()
        .ok_or_else(|| AppError::config(format!("missing required column `{name}`")))
}

fn get_cell(record: &StringRecord, col: usize) -> Option<&str> {
    record.get(col).map(str::trim).filter(|s| !s.is_empty())
}

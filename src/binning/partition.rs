//! Deterministic bin partitioning.
//!
//! The bin set is the full cross product of every binned-variable axis and
//! every category axis, enumerated with the first declared axis slowest so
//! the order is lexicographic over the declared axis order. Every row lands
//! in exactly one bin or in the unmapped bucket (out-of-range value on a
//! binned variable, or a state with no declared counterpart); the unmapped
//! bucket is not part of the bin set. Empty bins are legal.

use crate::dataset::ProbeTable;
use crate::domain::{BinCoord, BinCovariate, BinDescriptor, BinningSpec, ShapeMap, SKIP_SHAPE_LABEL};
use crate::error::AppError;

/// One axis of the partition, resolved against the probe table.
#[derive(Debug, Clone)]
pub enum PartitionAxis {
    Variable {
        name: String,
        column: usize,
        edges: Vec<f64>,
    },
    Category {
        name: String,
        column: usize,
        states: Vec<String>,
    },
}

impl PartitionAxis {
    fn len(&self) -> usize {
        match self {
            PartitionAxis::Variable { edges, .. } => edges.len() - 1,
            PartitionAxis::Category { states, .. } => states.len(),
        }
    }
}

/// One produced bin: identity, resolved shape label, member rows.
#[derive(Debug, Clone)]
pub struct BinUnit {
    pub descriptor: BinDescriptor,
    pub shape_label: String,
    pub rows: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct Partition {
    pub axes: Vec<PartitionAxis>,
    pub bins: Vec<BinUnit>,
    /// Row indices excluded from every bin.
    pub unmapped: Vec<usize>,
}

/// Interval lookup over ascending edges: half-open `[e[i], e[i+1])`, with the
/// last interval closed on the right.
fn find_interval(edges: &[f64], v: f64) -> Option<usize> {
    if !v.is_finite() {
        return None;
    }
    let last = edges.len() - 1;
    if v < edges[0] || v > edges[last] {
        return None;
    }
    if v == edges[last] {
        return Some(last - 1);
    }
    (0..last).find(|&i| v < edges[i + 1])
}

/// Build the partition and assign every row.
pub fn partition(
    table: &ProbeTable,
    spec: &BinningSpec,
    shapes: &ShapeMap,
) -> Result<Partition, AppError> {
    let mut axes: Vec<PartitionAxis> = Vec::new();
    for axis in &spec.variables {
        let column = table.registry.require_variable(&axis.variable)?;
        if axis.edges.len() < 2 {
            return Err(AppError::config(format!(
                "binning for '{}' needs at least two edges",
                axis.variable
            )));
        }
        for w in axis.edges.windows(2) {
            if !(w[0] < w[1]) || !w[0].is_finite() || !w[1].is_finite() {
                return Err(AppError::config(format!(
                    "binning for '{}' must have strictly ascending finite edges",
                    axis.variable
                )));
            }
        }
        if axes.iter().any(|a| matches!(a, PartitionAxis::Variable { column: c, .. } if *c == column)) {
            return Err(AppError::config(format!(
                "variable '{}' appears twice in the binning",
                axis.variable
            )));
        }
        axes.push(PartitionAxis::Variable {
            name: axis.variable.clone(),
            column,
            edges: axis.edges.clone(),
        });
    }
    for name in &spec.categories {
        let column = table.registry.require_category(name)?;
        if axes.iter().any(|a| matches!(a, PartitionAxis::Category { column: c, .. } if *c == column)) {
            return Err(AppError::config(format!(
                "category '{name}' appears twice in the binning"
            )));
        }
        axes.push(PartitionAxis::Category {
            name: name.clone(),
            column,
            states: table.registry.categories()[column].states.clone(),
        });
    }
    if axes.is_empty() {
        return Err(AppError::config("binning declares no axes"));
    }

    let known_label = |label: &str| label == SKIP_SHAPE_LABEL || shapes.catalog.contains_key(label);
    if !known_label(&shapes.default) {
        return Err(AppError::config(format!(
            "default shape label '{}' is not in the catalog",
            shapes.default
        )));
    }
    for label in shapes.overrides.values() {
        if !known_label(label) {
            return Err(AppError::config(format!(
                "override shape label '{label}' is not in the catalog"
            )));
        }
    }

    // First axis slowest: linear order is lexicographic over declared axes.
    let total: usize = axes.iter().map(PartitionAxis::len).product();
    let mut strides = vec![1usize; axes.len()];
    for i in (0..axes.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * axes[i + 1].len();
    }

    let mut bins: Vec<BinUnit> = Vec::with_capacity(total);
    for linear in 0..total {
        let coords: Vec<BinCoord> = axes
            .iter()
            .enumerate()
            .map(|(ai, axis)| {
                let idx = (linear / strides[ai]) % axis.len();
                match axis {
                    PartitionAxis::Variable { name, .. } => BinCoord::Range {
                        variable: name.clone(),
                        index: idx,
                    },
                    PartitionAxis::Category { name, states, .. } => BinCoord::State {
                        category: name.clone(),
                        state: states[idx].clone(),
                    },
                }
            })
            .collect();
        let descriptor = BinDescriptor { coords };
        let label = descriptor.label();
        let shape_label = shapes
            .overrides
            .get(&label)
            .cloned()
            .unwrap_or_else(|| shapes.default.clone());
        bins.push(BinUnit {
            descriptor,
            shape_label,
            rows: Vec::new(),
        });
    }

    for key in shapes.overrides.keys() {
        if !bins.iter().any(|b| b.descriptor.label() == *key) {
            return Err(AppError::config(format!(
                "shape override '{key}' matches no bin"
            )));
        }
    }

    let mut unmapped: Vec<usize> = Vec::new();
    'rows: for (ri, row) in table.rows.iter().enumerate() {
        let mut linear = 0usize;
        for (ai, axis) in axes.iter().enumerate() {
            let idx = match axis {
                PartitionAxis::Variable { column, edges, .. } => {
                    match find_interval(edges, row.values[*column]) {
                        Some(i) => i,
                        None => {
                            unmapped.push(ri);
                            continue 'rows;
                        }
                    }
                }
                PartitionAxis::Category { column, .. } => match row.states[*column] {
                    Some(s) => s,
                    None => {
                        unmapped.push(ri);
                        continue 'rows;
                    }
                },
            };
            linear += idx * strides[ai];
        }
        bins[linear].rows.push(ri);
    }

    Ok(Partition { axes, bins, unmapped })
}

/// Weighted means of the binned variables over one bin's rows, with spans to
/// the bin edges. An empty bin (or zero weight sum) reports the bin center.
pub fn bin_covariates(table: &ProbeTable, part: &Partition, bin: &BinUnit) -> Vec<BinCovariate> {
    let mut out = Vec::new();
    for (ai, axis) in part.axes.iter().enumerate() {
        let PartitionAxis::Variable { name, column, edges } = axis else {
            continue;
        };
        let BinCoord::Range { index, .. } = &bin.descriptor.coords[ai] else {
            continue;
        };
        let (lo, hi) = (edges[*index], edges[*index + 1]);
        let mut w_sum = 0.0;
        let mut wx_sum = 0.0;
        for &ri in &bin.rows {
            let row = &table.rows[ri];
            w_sum += row.weight;
            wx_sum += row.weight * row.values[*column];
        }
        let mean = if w_sum > 0.0 { wx_sum / w_sum } else { 0.5 * (lo + hi) };
        out.push(BinCovariate {
            name: name.clone(),
            mean,
            err_lo: lo - mean,
            err_hi: hi - mean,
        });
    }
    out
}

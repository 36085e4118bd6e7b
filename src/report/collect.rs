//! Ordered accumulation of per-bin efficiency records.
//!
//! One table per estimator. Records keep the order they are pushed in, which
//! the pipeline guarantees is the partition order, so the same inputs always
//! produce the identical table.

use std::collections::HashSet;

use crate::domain::{BinDescriptor, EfficiencyRecord, EstimatorKind};
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct EfficiencyTable {
    estimator: EstimatorKind,
    records: Vec<EfficiencyRecord>,
    seen: HashSet<BinDescriptor>,
}

impl EfficiencyTable {
    pub fn new(estimator: EstimatorKind) -> Self {
        Self {
            estimator,
            records: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn estimator(&self) -> EstimatorKind {
        self.estimator
    }

    /// Append a record; a second record for the same bin descriptor is
    /// rejected.
    pub fn push(&mut self, record: EfficiencyRecord) -> Result<(), AppError> {
        if !self.seen.insert(record.bin.clone()) {
            return Err(AppError::config(format!(
                "duplicate efficiency record for bin '{}'",
                record.bin.label()
            )));
        }
        self.records.push(record);
        Ok(())
    }

    pub fn records(&self) -> &[EfficiencyRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records whose status is surfaced as a convergence warning.
    pub fn warnings(&self) -> Vec<&EfficiencyRecord> {
        self.records.iter().filter(|r| r.status.is_warning()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BinCoord, FitStatus};

    fn record(label_index: usize, status: FitStatus) -> EfficiencyRecord {
        EfficiencyRecord {
            bin: BinDescriptor {
                coords: vec![BinCoord::Range {
                    variable: "pt".into(),
                    index: label_index,
                }],
            },
            covariates: vec![],
            value: 0.5,
            err_lo: -0.1,
            err_hi: 0.1,
            pass_sum: 10.0,
            fail_sum: 10.0,
            status,
        }
    }

    #[test]
    fn records_keep_push_order() {
        let mut table = EfficiencyTable::new(EstimatorKind::Fit);
        for i in [2, 0, 1] {
            table.push(record(i, FitStatus::Converged)).unwrap();
        }
        let labels: Vec<String> = table.records().iter().map(|r| r.bin.label()).collect();
        assert_eq!(labels, vec!["pt_bin2", "pt_bin0", "pt_bin1"]);
    }

    #[test]
    fn duplicate_descriptors_are_rejected() {
        let mut table = EfficiencyTable::new(EstimatorKind::Count);
        table.push(record(0, FitStatus::Counted)).unwrap();
        let err = table.push(record(0, FitStatus::Counted)).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn warnings_filter_on_status() {
        let mut table = EfficiencyTable::new(EstimatorKind::Fit);
        table.push(record(0, FitStatus::Converged)).unwrap();
        table.push(record(1, FitStatus::MaxIterations)).unwrap();
        table.push(record(2, FitStatus::Degenerate)).unwrap();
        table.push(record(3, FitStatus::Stalled)).unwrap();
        let warn: Vec<String> = table.warnings().iter().map(|r| r.bin.label()).collect();
        assert_eq!(warn, vec!["pt_bin1", "pt_bin3"]);
    }
}

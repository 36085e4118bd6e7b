//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the binning/fitting code stays clean and testable
//! - output changes are localized (important for future snapshot tests)

use crate::dataset::TableStats;
use crate::domain::EstimatorKind;
use crate::report::collect::EfficiencyTable;

/// Format the full run summary (dataset stats + efficiency tables + warnings).
pub fn format_run_summary(
    stats: &TableStats,
    unmapped: usize,
    skipped_bins: usize,
    tables: &[&EfficiencyTable],
) -> String {
    let mut out = String::new();

    out.push_str("=== tnp - Tag-and-Probe Efficiency Fit ===\n");
    out.push_str(&format!(
        "Probes: read={} | kept={} | outside window={} | bad weight={}\n",
        stats.rows_in, stats.rows_kept, stats.rows_outside_window, stats.rows_bad_weight
    ));
    let bins = tables.first().map(|t| t.len()).unwrap_or(0);
    out.push_str(&format!(
        "Bins: {bins} measured | skipped={skipped_bins} | unmapped rows={unmapped}\n"
    ));

    for table in tables {
        out.push('\n');
        out.push_str(&format_table(table));
    }

    let mut warn_lines = Vec::new();
    for table in tables {
        for r in table.warnings() {
            warn_lines.push(format!(
                "- {} ({}): {}\n",
                r.bin.label(),
                table.estimator().display_name(),
                r.status.display_name()
            ));
        }
    }
    if !warn_lines.is_empty() {
        out.push_str("\nConvergence warnings:\n");
        for line in warn_lines {
            out.push_str(&line);
        }
    }

    out
}

/// Format one estimator's efficiency table.
pub fn format_table(table: &EfficiencyTable) -> String {
    let mut out = String::new();

    let title = match table.estimator() {
        EstimatorKind::Fit => "Efficiency table (maximum-likelihood fit):",
        EstimatorKind::Count => "Efficiency table (counting):",
    };
    out.push_str(title);
    out.push('\n');

    out.push_str(
        format!(
            "{:<36} {:>8} {:>9} {:>9} {:>10} {:>10}  {:<14}\n",
            "bin", "eff", "err_lo", "err_hi", "pass", "fail", "status"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(
        format!(
            "{:-<36} {:-<8} {:-<9} {:-<9} {:-<10} {:-<10}  {:-<14}\n",
            "", "", "", "", "", "", ""
        )
        .trim_end(),
    );
    out.push('\n');

    for r in table.records() {
        out.push_str(
            format!(
                "{:<36} {:>8.4} {:>+9.4} {:>+9.4} {:>10.1} {:>10.1}  {:<14}\n",
                truncate(&r.bin.label(), 36),
                r.value,
                r.err_lo,
                r.err_hi,
                r.pass_sum,
                r.fail_sum,
                r.status.display_name(),
            )
            .trim_end(),
        );
        out.push('\n');
    }

    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

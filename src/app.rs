//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - loads the run configuration and probe rows
//! - runs the binning + fitting pipeline
//! - prints the run summary
//! - writes optional exports

use clap::Parser;

use crate::cli::{Command, DemoArgs, FitArgs};
use crate::data::{SampleConfig, demo_config, generate_sample};
use crate::domain::ConfigDoc;
use crate::error::AppError;
use crate::io::ProbeAccounting;

pub mod pipeline;

/// Entry point for the `tnp` binary.
pub fn run() -> Result<(), AppError> {
    // We want a bare `tnp` (and `tnp -n 5000`) to behave like `tnp demo ...`
    // so the tool works out of the box without input files.
    //
    // Clap requires a subcommand name, so we do a small, explicit rewrite of
    // the argv list before parsing.
    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);

    match cli.command {
        Command::Fit(args) => handle_fit(args, true),
        Command::Count(args) => handle_fit(args, false),
        Command::Demo(args) => handle_demo(args),
    }
}

fn handle_fit(args: FitArgs, with_fit: bool) -> Result<(), AppError> {
    let mut doc = crate::io::read_config_json(&args.config)?;
    apply_overrides(&mut doc, &args);

    let ingest = crate::io::load_probes(&args.probes, &doc.variables, &doc.categories)?;
    let run = pipeline::run_pipeline(&doc, &ingest.probes, with_fit)?;

    if !ingest.row_errors.is_empty() {
        let first = &ingest.row_errors[0];
        println!(
            "Note: {} malformed probe rows skipped (e.g. line {}: {}).\n",
            ingest.row_errors.len(),
            first.line,
            first.message
        );
    }
    println!(
        "{}",
        crate::report::format_run_summary(
            &run.stats,
            run.unmapped_rows,
            run.skipped_bins,
            &run.tables(),
        )
    );

    write_exports(&args.export_csv, &args.export_json, &run, ingest.rows_read)
}

fn handle_demo(args: DemoArgs) -> Result<(), AppError> {
    let sample = SampleConfig {
        seed: args.seed,
        probes: args.probes,
        background_fraction: args.background_fraction,
        plateau: args.plateau,
        ..SampleConfig::default()
    };
    let mut doc = demo_config(&sample);
    doc.options.strategy = args.strategy;

    let raw = generate_sample(&sample)?;
    let run = pipeline::run_pipeline(&doc, &raw, true)?;

    println!(
        "Generated {} probes (seed {}); true plateau efficiency {:.3}.\n",
        raw.len(),
        sample.seed,
        sample.plateau
    );
    println!(
        "{}",
        crate::report::format_run_summary(
            &run.stats,
            run.unmapped_rows,
            run.skipped_bins,
            &run.tables(),
        )
    );

    write_exports(&args.export_csv, &args.export_json, &run, raw.len())
}

fn write_exports(
    export_csv: &Option<std::path::PathBuf>,
    export_json: &Option<std::path::PathBuf>,
    run: &pipeline::RunOutput,
    rows_read: usize,
) -> Result<(), AppError> {
    if let Some(path) = export_csv {
        let primary = run.fit_table.as_ref().unwrap_or(&run.count_table);
        crate::io::write_table_csv(path, primary)?;
    }
    if let Some(path) = export_json {
        let probes = ProbeAccounting {
            rows_read,
            rows_kept: run.stats.rows_kept,
            rows_outside_window: run.stats.rows_outside_window,
            rows_bad_weight: run.stats.rows_bad_weight,
            unmapped_rows: run.unmapped_rows,
            skipped_bins: run.skipped_bins,
        };
        crate::io::write_result_json(path, probes, &run.tables())?;
    }
    Ok(())
}

fn apply_overrides(doc: &mut ConfigDoc, args: &FitArgs) {
    if let Some(strategy) = args.strategy {
        doc.options.strategy = strategy;
    }
    if let Some(policy) = args.policy {
        doc.options.nuisance_policy = policy;
    }
    if !args.fixed.is_empty() {
        doc.options.fixed_params = args.fixed.clone();
    }
}

/// Rewrite argv so `tnp` defaults to `tnp demo`.
///
/// Rules:
/// - `tnp`                      -> `tnp demo`
/// - `tnp -n 5000 ...`          -> `tnp demo -n 5000 ...`
/// - `tnp --help/--version/-h`  -> unchanged (show top-level help/version)
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    let Some(arg1) = argv.get(1).cloned() else {
        argv.push("demo".to_string());
        return argv;
    };

    let is_top_level_help_or_version = matches!(
        arg1.as_str(),
        "-h" | "--help" | "-V" | "--version" | "help"
    );
    if is_top_level_help_or_version {
        return argv;
    }

    let is_subcommand = matches!(arg1.as_str(), "fit" | "count" | "demo");
    if is_subcommand {
        return argv;
    }

    // If the first token is a flag, treat it as "demo flags".
    if arg1.starts_with('-') {
        argv.insert(1, "demo".to_string());
        return argv;
    }

    // Otherwise, leave as-is.
    argv
}

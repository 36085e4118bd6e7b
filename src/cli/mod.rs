//! Command-line parsing for the tag-and-probe efficiency fitter.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the binning/fitting code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::{NuisancePolicy, Strategy};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "tnp", version, about = "Tag-and-Probe Selection Efficiency Fitter")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit per-bin efficiencies from a probe CSV and a JSON run configuration.
    Fit(FitArgs),
    /// Counting-only efficiencies (Clopper-Pearson bounds, no likelihood fits).
    Count(FitArgs),
    /// Run the full pipeline on a seeded synthetic sample.
    Demo(DemoArgs),
}

/// Common options for fit and count runs.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Probe rows: CSV with one column per declared variable and category,
    /// plus an optional `weight` column.
    #[arg(short = 'p', long, value_name = "CSV")]
    pub probes: PathBuf,

    /// Run configuration (JSON).
    #[arg(short = 'c', long, value_name = "JSON")]
    pub config: PathBuf,

    /// Override the optimizer strategy declared in the config.
    #[arg(long, value_enum)]
    pub strategy: Option<Strategy>,

    /// Override the nuisance policy declared in the config.
    #[arg(long, value_enum)]
    pub policy: Option<NuisancePolicy>,

    /// Replace the designated nuisance-parameter list (repeatable).
    #[arg(long = "fix", value_name = "PARAM")]
    pub fixed: Vec<String>,

    /// Export the primary efficiency table to CSV.
    #[arg(long = "export-csv", value_name = "CSV")]
    pub export_csv: Option<PathBuf>,

    /// Export every table plus row accounting to JSON.
    #[arg(long = "export-json", value_name = "JSON")]
    pub export_json: Option<PathBuf>,
}

/// Options for the synthetic demo run.
#[derive(Debug, Parser, Clone)]
pub struct DemoArgs {
    /// Random seed for sample generation.
    #[arg(long, default_value_t = 17)]
    pub seed: u64,

    /// Number of probe rows to generate.
    #[arg(short = 'n', long, default_value_t = 12_000)]
    pub probes: usize,

    /// Fraction of probes drawn from the background density.
    #[arg(long, default_value_t = 0.35)]
    pub background_fraction: f64,

    /// Asymptotic signal efficiency at high pt.
    #[arg(long, default_value_t = 0.92)]
    pub plateau: f64,

    /// Optimizer strategy for the demo fits.
    #[arg(long, value_enum, default_value_t = Strategy::Standard)]
    pub strategy: Strategy,

    /// Export the fitted efficiency table to CSV.
    #[arg(long = "export-csv", value_name = "CSV")]
    pub export_csv: Option<PathBuf>,

    /// Export every table plus row accounting to JSON.
    #[arg(long = "export-json", value_name = "JSON")]
    pub export_json: Option<PathBuf>,
}

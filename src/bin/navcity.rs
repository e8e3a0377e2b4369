//! NavCity CLI - Command-line interface for NavCity Metrics
//!
//! Commands:
//! - run: Batch-process data folders into result tables
//! - session: Compute statistics for a single session log
//! - correct: Null one value of a merged table and refresh the averages
//! - combine: Label cohort tables and concatenate them
//! - config: Print the effective configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use navcity_metrics::correction::correct_tables;
use navcity_metrics::pipeline::{process_session_file, run_batches, BatchStep};
use navcity_metrics::types::{AveragedRow, MergedRow, MetricField, StatisticsRecord};
use navcity_metrics::{combine_cohorts, store, AnalysisConfig, ComputeError, Correction, VERSION};

/// NavCity - Navigation statistics for virtual-city wayfinding sessions
#[derive(Parser)]
#[command(name = "navcity")]
#[command(version = VERSION)]
#[command(about = "Compute navigation metrics from NavCity task logs", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Batch-process one or more data folders
    Run {
        /// Data folder holding participant folders (repeatable)
        #[arg(short, long = "data-folder", required = true)]
        data_folders: Vec<PathBuf>,

        /// Write tables here instead of next to the raw logs
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Steps to run, in order
        #[arg(long, value_enum, value_delimiter = ',', default_values_t = [Step::Metrics, Step::Merge, Step::Average, Step::Trajectories])]
        steps: Vec<Step>,

        /// Write the run manifest to a file instead of stdout
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// Compute statistics for a single session log
    Session {
        /// Raw session log
        #[arg(short, long)]
        input: PathBuf,

        /// Output format
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Null one merged-table value and recompute its session average
    Correct {
        /// Merged table to correct (rewritten in place)
        #[arg(long)]
        merged: PathBuf,

        /// Averaged table to refresh (rewritten in place)
        #[arg(long)]
        averaged: PathBuf,

        /// Cohort label, for tables written by `combine`
        #[arg(long)]
        cohort: Option<String>,

        #[arg(long)]
        participant: String,

        #[arg(long)]
        block: u32,

        #[arg(long)]
        destination: String,

        /// Statistic column, e.g. Orientation_Time
        #[arg(long)]
        field: String,
    },

    /// Label cohort tables and concatenate them
    Combine {
        /// Cohort label and output folder, as LABEL=DIR (repeatable)
        #[arg(long = "cohort", required = true)]
        cohorts: Vec<String>,

        /// Folder for the combined tables
        #[arg(short, long)]
        output_dir: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum Step {
    Metrics,
    Merge,
    Average,
    Trajectories,
}

impl From<Step> for BatchStep {
    fn from(step: Step) -> Self {
        match step {
            Step::Metrics => BatchStep::Metrics,
            Step::Merge => BatchStep::Merge,
            Step::Average => BatchStep::Average,
            Step::Trajectories => BatchStep::Trajectories,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Results table, one row per destination
    Csv,
    /// JSON array of records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

const COMBINED_MERGED_FILE: &str = "combined_merged_results.csv";
const COMBINED_AVERAGED_FILE: &str = "combined_averaged_results.csv";

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<(), NavCliError> {
    let config = match &cli.config {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };

    match cli.command {
        Commands::Run {
            data_folders,
            output_dir,
            steps,
            manifest,
        } => cmd_run(&config, &data_folders, output_dir.as_deref(), &steps, manifest.as_deref()),

        Commands::Session { input, format } => cmd_session(&config, &input, format),

        Commands::Correct {
            merged,
            averaged,
            cohort,
            participant,
            block,
            destination,
            field,
        } => {
            let correction = Correction {
                cohort,
                participant,
                block,
                destination,
                field: field.parse::<MetricField>()?,
            };
            cmd_correct(&merged, &averaged, &correction)
        }

        Commands::Combine { cohorts, output_dir } => cmd_combine(&config, &cohorts, &output_dir),

        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn cmd_run(
    config: &AnalysisConfig,
    data_folders: &[PathBuf],
    output_dir: Option<&Path>,
    steps: &[Step],
    manifest: Option<&Path>,
) -> Result<(), NavCliError> {
    let steps: Vec<BatchStep> = steps.iter().map(|&s| s.into()).collect();
    let reports = run_batches(config, data_folders, output_dir, &steps);

    let output = serde_json::to_string_pretty(&reports)?;
    match manifest {
        Some(path) => fs::write(path, output)?,
        None => println!("{}", output),
    }
    Ok(())
}

fn cmd_session(config: &AnalysisConfig, input: &Path, format: OutputFormat) -> Result<(), NavCliError> {
    let records: Vec<StatisticsRecord> = process_session_file(input, config)?;
    if records.is_empty() {
        return Err(NavCliError::NoRecords);
    }

    let mut stdout = io::stdout();
    match format {
        OutputFormat::Csv => store::write_session_results(&mut stdout, &records)?,
        OutputFormat::Json => writeln!(stdout, "{}", serde_json::to_string(&records)?)?,
        OutputFormat::JsonPretty => writeln!(stdout, "{}", serde_json::to_string_pretty(&records)?)?,
    }
    Ok(())
}

fn cmd_correct(merged_path: &Path, averaged_path: &Path, correction: &Correction) -> Result<(), NavCliError> {
    let merged = store::read_merged(store::open_file(merged_path)?)?;
    let averaged = store::read_averaged(store::open_file(averaged_path)?)?;

    let (merged, averaged) = correct_tables(&merged, &averaged, correction)?;

    store::write_merged(store::create_file(merged_path)?, &merged)?;
    store::write_averaged(store::create_file(averaged_path)?, &averaged)?;
    Ok(())
}

fn cmd_combine(config: &AnalysisConfig, cohorts: &[String], output_dir: &Path) -> Result<(), NavCliError> {
    let mut merged_tables: Vec<(String, Vec<MergedRow>)> = Vec::new();
    let mut averaged_tables: Vec<(String, Vec<AveragedRow>)> = Vec::new();

    for entry in cohorts {
        let (label, dir) = parse_cohort(entry)?;

        let merged_path = config.layout.merged_path(&dir);
        match store::open_file(&merged_path) {
            Ok(file) => merged_tables.push((label.clone(), store::read_merged(file)?)),
            Err(ComputeError::MissingFile(path)) => {
                tracing::warn!(cohort = %label, path = %path.display(), "Missing merged table, skipping");
            }
            Err(e) => return Err(e.into()),
        }

        let averaged_path = config.layout.averaged_path(&dir);
        match store::open_file(&averaged_path) {
            Ok(file) => averaged_tables.push((label.clone(), store::read_averaged(file)?)),
            Err(ComputeError::MissingFile(path)) => {
                tracing::warn!(cohort = %label, path = %path.display(), "Missing averaged table, skipping");
            }
            Err(e) => return Err(e.into()),
        }
    }

    if merged_tables.is_empty() && averaged_tables.is_empty() {
        return Err(NavCliError::NoRecords);
    }

    if !merged_tables.is_empty() {
        let path = output_dir.join(COMBINED_MERGED_FILE);
        store::write_merged(store::create_file(&path)?, &combine_cohorts(merged_tables))?;
        tracing::info!(path = %path.display(), "Wrote combined merged table");
    }
    if !averaged_tables.is_empty() {
        let path = output_dir.join(COMBINED_AVERAGED_FILE);
        store::write_averaged(store::create_file(&path)?, &combine_cohorts(averaged_tables))?;
        tracing::info!(path = %path.display(), "Wrote combined averaged table");
    }
    Ok(())
}

// Helper functions

fn parse_cohort(entry: &str) -> Result<(String, PathBuf), NavCliError> {
    match entry.split_once('=') {
        Some((label, dir)) if !label.trim().is_empty() && !dir.trim().is_empty() => {
            Ok((label.trim().to_string(), PathBuf::from(dir.trim())))
        }
        _ => Err(NavCliError::Usage(format!("Expected LABEL=DIR, got {:?}", entry))),
    }
}

// Error types

#[derive(Debug)]
enum NavCliError {
    Io(io::Error),
    Compute(ComputeError),
    Json(serde_json::Error),
    NoRecords,
    Usage(String),
}

impl From<io::Error> for NavCliError {
    fn from(e: io::Error) -> Self {
        NavCliError::Io(e)
    }
}

impl From<ComputeError> for NavCliError {
    fn from(e: ComputeError) -> Self {
        NavCliError::Compute(e)
    }
}

impl From<serde_json::Error> for NavCliError {
    fn from(e: serde_json::Error) -> Self {
        NavCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<NavCliError> for CliError {
    fn from(e: NavCliError) -> Self {
        match e {
            NavCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            NavCliError::Compute(e) => compute_error(e),
            NavCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            NavCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No statistics produced".to_string(),
                hint: Some("Check that the input names destinations from the configured list".to_string()),
            },
            NavCliError::Usage(msg) => CliError {
                code: "USAGE_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'navcity --help' for usage".to_string()),
            },
        }
    }
}

fn compute_error(e: ComputeError) -> CliError {
    let (code, hint) = match &e {
        ComputeError::MalformedInput(_) | ComputeError::Csv(_) => {
            ("MALFORMED_INPUT", Some("Check the file's columns and numeric values"))
        }
        ComputeError::MissingFile(_) => ("MISSING_FILE", Some("Check the data folder layout")),
        ComputeError::UnknownDestination(_) => (
            "UNKNOWN_DESTINATION",
            Some("Add the destination to the configuration or use unknown_destinations = \"drop\""),
        ),
        ComputeError::CorrectionTargetNotFound(_) => (
            "CORRECTION_TARGET_NOT_FOUND",
            Some("Check participant, block and destination against the merged table"),
        ),
        ComputeError::UnknownField(_) => ("UNKNOWN_FIELD", Some("Use a statistic column name such as Orientation_Time")),
        ComputeError::ConfigError(_) => ("CONFIG_ERROR", Some("Run 'navcity config' to see the expected format")),
        ComputeError::Io(_) => ("IO_ERROR", Some("Check file paths and permissions")),
        ComputeError::JsonError(_) => ("JSON_ERROR", None),
    };
    CliError {
        code: code.to_string(),
        message: e.to_string(),
        hint: hint.map(str::to_string),
    }
}

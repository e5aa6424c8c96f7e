#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::uninlined_format_args)]

use clap::{Parser, Subcommand, ValueEnum};
use regional_outliers::csv_reader::{CsvData, Delimiter};
use regional_outliers::ml;
use regional_outliers::ml::pipeline::{CorrectionConfig, MultivariateConfig, UnivariateConfig};
use regional_outliers::structs::{
    DecisionRule, DemographicTable, Method, OutlierError, Result, Table,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Regional outlier detection for neuroimaging summary tables
#[derive(Parser, Debug)]
#[command(name = "regional-outliers")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Per-region z-scores without covariate correction
    Zscores {
        /// Subjects x regions table; first column holds subject ids
        #[arg(short, long)]
        input: PathBuf,

        /// Field delimiter of the input
        #[arg(short, long, value_enum, default_value_t = Delimiter::Comma)]
        delimiter: Delimiter,

        /// Acceptable deviation in standard deviations
        #[arg(long, default_value = "2")]
        num_std: f64,

        /// Summary threshold on |zscore|
        #[arg(long, default_value = "2")]
        extent: f64,

        /// Table to print
        #[arg(long, value_enum, default_value_t = ZscoreOutput::Zscores)]
        emit: ZscoreOutput,
    },

    /// Regress out covariates fitted on a control group, then score residuals
    Correct {
        /// Subjects x regions table; first column holds subject ids
        #[arg(short, long)]
        input: PathBuf,

        /// Demographic table; first column holds subject ids
        #[arg(long)]
        demographics: PathBuf,

        /// Field delimiter of both inputs
        #[arg(short, long, value_enum, default_value_t = Delimiter::Comma)]
        delimiter: Delimiter,

        /// Control selection, e.g. "group == 'control' and age > 40"
        #[arg(short, long)]
        control: String,

        /// Demographic covariates entered in the model
        #[arg(long, value_delimiter = ',', required = true)]
        covariates: Vec<String>,

        /// Regions to correct (default: every non-covariate region)
        #[arg(long, value_delimiter = ',')]
        regions: Option<Vec<String>>,

        /// Acceptable deviation in standard deviations
        #[arg(long, default_value = "2")]
        num_std: f64,

        /// Summary threshold on |zscore|
        #[arg(long, default_value = "2")]
        extent: f64,

        /// Table or report to print
        #[arg(long, value_enum, default_value_t = CorrectionOutput::Zscores)]
        emit: CorrectionOutput,
    },

    /// Composite anomaly score per subject across all regions
    Multivariate {
        /// Subjects x regions table; first column holds subject ids
        #[arg(short, long)]
        input: PathBuf,

        /// Field delimiter of the input
        #[arg(short, long, value_enum, default_value_t = Delimiter::Comma)]
        delimiter: Delimiter,

        #[arg(short, long, value_enum, default_value_t = Method::Mahalanobis)]
        method: Method,

        /// Lower percentile bound (default: 0 for mahalanobis, 3 for isolation-forest)
        #[arg(long)]
        low: Option<f64>,

        /// Upper percentile bound (default: 80 for mahalanobis, 97 for isolation-forest)
        #[arg(long)]
        high: Option<f64>,

        /// How the bounds are applied to the score
        #[arg(long, value_enum, default_value_t = DecisionRule::Percentile)]
        rule: DecisionRule,

        /// Isolation forest size
        #[arg(long, default_value = "100")]
        trees: usize,

        /// Isolation forest contamination
        #[arg(long, default_value = "0.05")]
        contamination: f64,

        /// Isolation forest seed
        #[arg(long, default_value = "123456")]
        seed: u64,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ZscoreOutput {
    Zscores,
    Subjects,
    Regions,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CorrectionOutput {
    Combined,
    Controls,
    Corrected,
    Residuals,
    Zscores,
    Subjects,
    Regions,
    Models,
    Summary,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Commands::Zscores {
            input,
            delimiter,
            num_std,
            extent,
            emit,
        }) => run_zscores(
            &input,
            delimiter,
            &UnivariateConfig { num_std, extent },
            emit,
        ),

        Some(Commands::Correct {
            input,
            demographics,
            delimiter,
            control,
            covariates,
            regions,
            num_std,
            extent,
            emit,
        }) => run_correct(
            &input,
            &demographics,
            delimiter,
            &CorrectionConfig {
                control,
                covariates,
                regions,
                num_std,
                extent,
            },
            emit,
        ),

        Some(Commands::Multivariate {
            input,
            delimiter,
            method,
            low,
            high,
            rule,
            trees,
            contamination,
            seed,
        }) => run_multivariate(
            &input,
            delimiter,
            &MultivariateConfig {
                method,
                low_pct: low,
                high_pct: high,
                rule,
                n_estimators: trees,
                contamination,
                seed,
            },
        ),

        None => {
            eprintln!("No subcommand provided. Use 'zscores', 'correct' or 'multivariate'.");
            eprintln!("Run 'regional-outliers --help' for usage information.");
            std::process::exit(1);
        }
    }
}

fn read_csv(path: &Path, delimiter: Delimiter) -> Result<CsvData> {
    if !path.exists() {
        return Err(OutlierError::Config(format!(
            "File not found: {}",
            path.display()
        )));
    }
    let data = CsvData::from_file(path, delimiter)?;
    tracing::info!(
        "Loaded {}: {} rows x {} columns",
        path.display(),
        data.row_count(),
        data.col_count()
    );
    Ok(data)
}

fn load_table(path: &Path, delimiter: Delimiter) -> Result<Table> {
    Table::from_csv(&read_csv(path, delimiter)?)
}

/// Score each region of the input table
fn run_zscores(
    input: &Path,
    delimiter: Delimiter,
    config: &UnivariateConfig,
    emit: ZscoreOutput,
) -> Result<()> {
    let table = load_table(input, delimiter)?;
    let report = ml::pipeline::run_univariate(&table, config)?;

    let stdout = std::io::stdout().lock();
    match emit {
        ZscoreOutput::Zscores => ml::output::write_table(stdout, &report.zscores),
        ZscoreOutput::Subjects => ml::output::write_subject_summary(stdout, &report.by_subject),
        ZscoreOutput::Regions => ml::output::write_region_summary(stdout, &report.by_region),
    }
}

/// Correct for covariates and score the residuals
fn run_correct(
    input: &Path,
    demographics: &Path,
    delimiter: Delimiter,
    config: &CorrectionConfig,
    emit: CorrectionOutput,
) -> Result<()> {
    let table = load_table(input, delimiter)?;
    let demographics = DemographicTable::from_csv(&read_csv(demographics, delimiter)?)?;
    let report = ml::pipeline::run_correction(&table, &demographics, config)?;

    for failure in &report.outcome.failures {
        eprintln!("Warning: {failure}");
    }

    let mut stdout = std::io::stdout().lock();
    match emit {
        CorrectionOutput::Combined => ml::output::write_combined(stdout, &report.combined),
        CorrectionOutput::Controls => ml::output::write_combined(stdout, &report.controls),
        CorrectionOutput::Corrected => ml::output::write_table(stdout, &report.outcome.corrected),
        CorrectionOutput::Residuals => ml::output::write_table(stdout, &report.outcome.residuals),
        CorrectionOutput::Zscores => ml::output::write_table(stdout, &report.zscores),
        CorrectionOutput::Subjects => ml::output::write_subject_summary(stdout, &report.by_subject),
        CorrectionOutput::Regions => ml::output::write_region_summary(stdout, &report.by_region),
        CorrectionOutput::Models => ml::output::write_models_json(stdout, &report.outcome.models),
        CorrectionOutput::Summary => {
            stdout.write_all(ml::output::build_summary(&report).as_bytes())?;
            Ok(())
        }
    }
}

/// Composite scores with outlier flags
fn run_multivariate(input: &Path, delimiter: Delimiter, config: &MultivariateConfig) -> Result<()> {
    let table = load_table(input, delimiter)?;
    let result = ml::pipeline::run_multivariate(&table, config)?;

    tracing::info!(
        "Scored {} subjects on {} regions; outliers: {}",
        result.ids.len(),
        result.features.len(),
        result.outlier_ids().join(", ")
    );
    ml::output::write_multivariate(std::io::stdout().lock(), &table.id_column, &result)
}

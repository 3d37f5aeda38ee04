// ========================================================================================
//
//                      The run orchestrator: mortality
//
// ========================================================================================
//
// This binary drives one analysis from a configuration file to a directory of outputs.
// It owns no numerics of its own; every stage is a call into the `mortality` library:
//
// 1.  Load the TOML configuration and the raw measurement file it points at. A relative
//     data path is resolved against the directory holding the configuration file.
//
// 2.  Build the processor and write the scaled, cleaned and mortality series as TSV.
//
// 3.  Fit each requested failure model on the configured time window, then write the
//     fitted curves and a `fits.toml` summary.

use clap::{Parser, Subcommand};
use mortality::config::{AnalysisConfig, FitSection};
use mortality::data::{self, DataOptions};
use mortality::fit::{self, FitTarget};
use mortality::models::ModelKind;
use mortality::processor::{FitWindow, Series, SurvivalProcessor};
use mortality::report::{self, FitReport};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

#[derive(Parser)]
#[command(
    name = "mortality",
    about = "Clean survival curves and estimate mortality rates",
    long_about = "Normalizes, downsamples and smooths a measured survival curve, derives its \
                  mortality rate, and fits Weibull and Gompertz failure models to the result."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a survival measurement and fit failure models
    #[command(about = "Run an analysis (outputs: scaled.tsv, clean.tsv, mortality.tsv, fits.toml)")]
    Run {
        /// Path to the analysis configuration (.toml)
        #[arg(long)]
        config: PathBuf,

        /// Directory the outputs are written to
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Write a configuration file holding every default value
    #[command(about = "Write a default configuration file")]
    Template {
        /// Where to write the configuration
        path: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Run { config, output_dir } => run_command(&config, &output_dir),
        Commands::Template { path } => template_command(&path),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn template_command(path: &Path) -> Result<(), Box<dyn Error>> {
    AnalysisConfig::default().save(path)?;
    println!("Default configuration written to '{}'", path.display());
    Ok(())
}

fn run_command(config_path: &Path, output_dir: &Path) -> Result<(), Box<dyn Error>> {
    let overall_start_time = Instant::now();

    log::info!("Loading configuration from '{}'", config_path.display());
    let config = AnalysisConfig::load(config_path)?;

    let data_path = resolve_data_path(config_path, &config.data.path);
    let options = DataOptions {
        delimiter: config.data.delimiter as u8,
        has_header: config.data.has_header,
    };
    let raw = data::load_series(&data_path, &options)?;

    let processor = SurvivalProcessor::new(raw.t, raw.s, config.processor_config()?)?;
    fs::create_dir_all(output_dir)?;
    let time_label = config.data.unit_time.as_str();

    let scaled = Series::new(processor.time().to_owned(), processor.scaled()?)?;
    report::write_series(&output_dir.join("scaled.tsv"), time_label, "survival", &scaled)?;

    let clean = processor.clean()?;
    report::write_series(&output_dir.join("clean.tsv"), time_label, "survival", &clean)?;
    log::info!("Cleaned curve has {} samples", clean.len());

    let mortality = processor.mortality()?;
    report::write_series(
        &output_dir.join("mortality.tsv"),
        time_label,
        "mortality",
        &mortality,
    )?;
    log::info!("Mortality curve has {} samples", mortality.len());

    let fit_section = &config.fit;
    let (window, slice) = fit_slice(fit_section, &clean, &mortality);

    let mut reports = Vec::new();
    for kind in fit_section.run.models() {
        log::info!(
            "Fitting {} model to {} samples [{}, {})",
            kind,
            slice.len(),
            window.start,
            window.end
        );
        let result = fit::fit_model(
            kind,
            fit_section.target,
            slice.t.view(),
            slice.s.view(),
            fit_section.initial_guess(kind),
            &fit_section.options(),
        )?;
        log::info!("{}", describe_parameters(kind, result.model.parameters()));

        report::write_model_curve(
            &output_dir.join(curve_file_name(kind, fit_section.target)),
            time_label,
            &result,
            fit_section.start_time,
            fit_section.end_time,
        )?;
        reports.push(FitReport::new(
            &result,
            window,
            fit_section.start_time,
            fit_section.end_time,
        ));
    }

    if !reports.is_empty() {
        let fits_path = output_dir.join("fits.toml");
        report::save_reports(&fits_path, &reports)?;
        log::info!("Fit summary written to '{}'", fits_path.display());
    }

    log::info!(
        "Analysis finished in {:.2?}; outputs in '{}'",
        overall_start_time.elapsed(),
        output_dir.display()
    );
    Ok(())
}

/// Selects the samples a fit runs on. The window indices come from the time axis of
/// the fitted series itself, so a mortality fit is windowed on the mortality axis.
fn fit_slice(
    fit_section: &FitSection,
    clean: &Series,
    mortality: &Series,
) -> (FitWindow, Series) {
    let target_series = match fit_section.target {
        FitTarget::Survival => clean,
        FitTarget::Mortality => mortality,
    };
    let window = FitWindow::from_times(
        target_series.t.view(),
        fit_section.start_time,
        fit_section.end_time,
    );
    (window, target_series.window(window))
}

fn resolve_data_path(config_path: &Path, data_path: &Path) -> PathBuf {
    if data_path.is_absolute() {
        return data_path.to_path_buf();
    }
    match config_path.parent() {
        Some(dir) => dir.join(data_path),
        None => data_path.to_path_buf(),
    }
}

/// `Weibull: k = 1.5, lambda = 50`
fn describe_parameters(kind: ModelKind, values: [f64; 2]) -> String {
    let [first, second] = kind.parameter_names();
    format!(
        "{}: {} = {}, {} = {}",
        kind.name(),
        first,
        values[0],
        second,
        values[1]
    )
}

fn curve_file_name(kind: ModelKind, target: FitTarget) -> String {
    let target = match target {
        FitTarget::Survival => "survival",
        FitTarget::Mortality => "mortality",
    };
    format!("{}_{}.tsv", kind.name().to_lowercase(), target)
}

//! # Run Outputs
//!
//! Everything a plotting tool needs after a run: each intermediate series as a TSV,
//! the fitted model curves sampled on a fine grid, and a TOML summary of every fit.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fit::{FitResult, FitTarget};
use crate::models::FailureModel;
use crate::processor::{FitWindow, Series};

/// Spacing of the grid the fitted curves are sampled on.
pub const CURVE_GRID_STEP: f64 = 0.01;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to write delimited output: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Failed to serialize fit report to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Failed to parse TOML fit report: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

/// Summary of one fitted model, as stored in `fits.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub model: FailureModel,
    pub target: FitTarget,
    pub window: FitWindow,
    pub start_time: f64,
    pub end_time: f64,
    pub points: usize,
    pub iterations: usize,
    pub residual_sum_of_squares: f64,
    /// Row-major parameter covariance.
    pub covariance: Vec<Vec<f64>>,
}

impl FitReport {
    pub fn new(result: &FitResult, window: FitWindow, start_time: f64, end_time: f64) -> Self {
        Self {
            model: result.model,
            target: result.target,
            window,
            start_time,
            end_time,
            points: result.points,
            iterations: result.iterations,
            residual_sum_of_squares: result.residual_sum_of_squares,
            covariance: result
                .covariance
                .rows()
                .into_iter()
                .map(|row| row.to_vec())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct FitReports {
    fits: Vec<FitReport>,
}

/// Writes every report to a single TOML file as an array of `[[fits]]` tables.
pub fn save_reports(path: &Path, reports: &[FitReport]) -> Result<(), ReportError> {
    let bundle = FitReports {
        fits: reports.to_vec(),
    };
    let toml_string = toml::to_string_pretty(&bundle)?;
    let mut file = BufWriter::new(fs::File::create(path)?);
    file.write_all(toml_string.as_bytes())?;
    file.flush()?;
    Ok(())
}

/// Reads back a file written by `save_reports`, for tools that post-process a run.
pub fn load_reports(path: &Path) -> Result<Vec<FitReport>, ReportError> {
    let toml_string = fs::read_to_string(path)?;
    let bundle: FitReports = toml::from_str(&toml_string)?;
    Ok(bundle.fits)
}

/// Writes a series as a two-column TSV with the given headers.
pub fn write_series(
    path: &Path,
    time_label: &str,
    value_label: &str,
    series: &Series,
) -> Result<(), ReportError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)?;
    writer.write_record([time_label, value_label])?;
    for (t, s) in series.t.iter().zip(series.s.iter()) {
        writer.serialize((t, s))?;
    }
    writer.flush()?;
    Ok(())
}

/// Grid `start, start + step, ...` strictly below `end`, like a half-open range.
///
/// The bounds are used as given; they are not truncated to whole time units.
pub fn curve_grid(start: f64, end: f64, step: f64) -> Array1<f64> {
    if step.is_nan() || step <= 0.0 || end.is_nan() || end <= start {
        return Array1::zeros(0);
    }
    let count = ((end - start) / step).ceil() as usize + 1;
    Array1::from_iter(
        (0..count)
            .map(|i| start + i as f64 * step)
            .take_while(|&x| x < end),
    )
}

/// Samples the fitted curve on `[start, end)` and writes it with `write_series`.
pub fn write_model_curve(
    path: &Path,
    time_label: &str,
    result: &FitResult,
    start: f64,
    end: f64,
) -> Result<(), ReportError> {
    let t = curve_grid(start, end, CURVE_GRID_STEP);
    let s = result.target.curve(&result.model, t.view());
    let value_label = format!("{} {}", result.model.kind().name(), target_label(result.target));
    write_series(path, time_label, &value_label, &Series { t, s })
}

fn target_label(target: FitTarget) -> &'static str {
    match target {
        FitTarget::Survival => "survival",
        FitTarget::Mortality => "mortality",
    }
}

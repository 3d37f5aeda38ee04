//! # Configuration
//!
//! Two layers live here. `ProcessorConfig` is the immutable, validated pair of
//! integers (plus the boundary flag) that a `SurvivalProcessor` is built with.
//! `AnalysisConfig` is the human-edited TOML file driving a full run: where the data
//! lives, how to clean it, and which models to fit over which time window.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fit::{FitOptions, FitTarget};
use crate::models::ModelKind;
use crate::processor::ProcessorError;

/// Immutable cleaning parameters shared by every derived computation of a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    downsample_factor: usize,
    window_size: usize,
    extrapolate_boundary: bool,
}

impl ProcessorConfig {
    /// Both integers must be at least 1.
    pub fn new(
        downsample_factor: usize,
        window_size: usize,
        extrapolate_boundary: bool,
    ) -> Result<Self, ProcessorError> {
        if downsample_factor == 0 {
            return Err(ProcessorError::InvalidConfiguration {
                field: "downsample_factor",
                value: downsample_factor,
            });
        }
        if window_size == 0 {
            return Err(ProcessorError::InvalidConfiguration {
                field: "window_size",
                value: window_size,
            });
        }
        Ok(Self {
            downsample_factor,
            window_size,
            extrapolate_boundary,
        })
    }

    /// Keep every Nth sample.
    pub fn downsample_factor(&self) -> usize {
        self.downsample_factor
    }

    /// Moving-average span in samples.
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn extrapolate_boundary(&self) -> bool {
        self.extrapolate_boundary
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error(transparent)]
    Processor(#[from] ProcessorError),
}

/// Which parametric models a run should fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunFit {
    None,
    Weibull,
    Gompertz,
    #[default]
    Both,
}

impl RunFit {
    pub fn models(&self) -> Vec<ModelKind> {
        match self {
            RunFit::None => Vec::new(),
            RunFit::Weibull => vec![ModelKind::Weibull],
            RunFit::Gompertz => vec![ModelKind::Gompertz],
            RunFit::Both => vec![ModelKind::Weibull, ModelKind::Gompertz],
        }
    }
}

/// The full run configuration, stored as TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub data: DataSection,
    pub processing: ProcessingSection,
    #[serde(default)]
    pub fit: FitSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSection {
    /// Two-column file: time, survival.
    pub path: PathBuf,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub has_header: bool,
    /// Label of the time axis, used as the time column header of written series.
    #[serde(default = "default_unit_time")]
    pub unit_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSection {
    /// `b`: keep every b-th sample.
    pub downsample_factor: usize,
    /// `m`: moving-average window.
    pub window_size: usize,
    #[serde(default)]
    pub extrapolate_boundary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSection {
    #[serde(default)]
    pub run: RunFit,
    #[serde(default)]
    pub target: FitTarget,
    /// Start of the fit, in real time units.
    pub start_time: f64,
    /// End of the fit, in real time units.
    pub end_time: f64,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    pub weibull: WeibullGuess,
    pub gompertz: GompertzGuess,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeibullGuess {
    pub k0: f64,
    pub lambda0: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GompertzGuess {
    pub a0: f64,
    pub b0: f64,
}

fn default_delimiter() -> char {
    '\t'
}

fn default_unit_time() -> String {
    "time".to_string()
}

fn default_tolerance() -> f64 {
    FitOptions::default().tolerance
}

fn default_max_iterations() -> usize {
    FitOptions::default().max_iterations
}

impl Default for FitSection {
    fn default() -> Self {
        let options = FitOptions::default();
        Self {
            run: RunFit::default(),
            target: FitTarget::default(),
            start_time: 0.0,
            end_time: 100.0,
            tolerance: options.tolerance,
            max_iterations: options.max_iterations,
            weibull: WeibullGuess {
                k0: 1.5,
                lambda0: 50.0,
            },
            gompertz: GompertzGuess { a0: 0.01, b0: 0.05 },
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            data: DataSection {
                path: PathBuf::from("survival.tsv"),
                delimiter: default_delimiter(),
                has_header: false,
                unit_time: default_unit_time(),
            },
            processing: ProcessingSection {
                downsample_factor: 10,
                window_size: 5,
                extrapolate_boundary: false,
            },
            fit: FitSection::default(),
        }
    }
}

impl FitSection {
    /// Initial parameter vector for `kind`, in the order of `FailureModel::parameters`.
    pub fn initial_guess(&self, kind: ModelKind) -> [f64; 2] {
        match kind {
            ModelKind::Weibull => [self.weibull.k0, self.weibull.lambda0],
            ModelKind::Gompertz => [self.gompertz.a0, self.gompertz.b0],
        }
    }

    pub fn options(&self) -> FitOptions {
        FitOptions {
            tolerance: self.tolerance,
            max_iterations: self.max_iterations,
        }
    }
}

impl AnalysisConfig {
    /// Loads and validates a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn processor_config(&self) -> Result<ProcessorConfig, ProcessorError> {
        ProcessorConfig::new(
            self.processing.downsample_factor,
            self.processing.window_size,
            self.processing.extrapolate_boundary,
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.processor_config()?;

        if !self.data.delimiter.is_ascii() {
            return Err(ConfigError::InvalidValue {
                key: "data.delimiter",
                reason: format!("'{}' is not a single-byte character", self.data.delimiter),
            });
        }

        let fit = &self.fit;
        if !fit.start_time.is_finite() || !fit.end_time.is_finite() {
            return Err(ConfigError::InvalidValue {
                key: "fit.start_time",
                reason: "fit boundaries must be finite".to_string(),
            });
        }
        if fit.start_time > fit.end_time {
            return Err(ConfigError::InvalidValue {
                key: "fit.end_time",
                reason: format!(
                    "end time {} precedes start time {}",
                    fit.end_time, fit.start_time
                ),
            });
        }
        if !(fit.tolerance.is_finite() && fit.tolerance > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "fit.tolerance",
                reason: format!("{} is not a positive number", fit.tolerance),
            });
        }
        if fit.max_iterations == 0 {
            return Err(ConfigError::InvalidValue {
                key: "fit.max_iterations",
                reason: "at least one iteration is required".to_string(),
            });
        }
        for kind in fit.run.models() {
            kind.validate_parameters(fit.initial_guess(kind))
                .map_err(|e| ConfigError::InvalidValue {
                    key: kind.config_key(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }
}

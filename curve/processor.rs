//! # Survival Curve Cleaning and Mortality Derivation
//!
//! This module turns a raw, high-resolution survival measurement into the smoothed
//! curve and the mortality (hazard) rate that the fitting stage consumes. Every
//! transform is a pure function over `ndarray` vectors; nothing here touches the
//! filesystem or keeps state between calls.
//!
//! The canonical pipeline is:
//!
//! 1. `normalize`: rescale survival so the first sample is exactly 1.
//! 2. `downsample`: keep every `b`-th sample, starting with the first.
//! 3. `moving_average`: trailing average over `m` points, applied identically to the
//!    time axis and the survival axis so both carry the same shift.
//! 4. `derivative_central` of `-ln S` on the cleaned curve gives `h(t)`.
//!
//! Fit windows are located on a cleaned time axis with `time_index`, which never
//! fails and falls back to index 0 when nothing brackets the query.

use itertools::Itertools;
use ndarray::{Array1, ArrayView1, s};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ProcessorConfig;

/// Failures raised by the cleaning and differentiation pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessorError {
    #[error("Invalid configuration: '{field}' must be at least 1, but was {value}.")]
    InvalidConfiguration { field: &'static str, value: usize },

    #[error("Time and value arrays must have the same length (time: {time}, value: {value}).")]
    DimensionMismatch { time: usize, value: usize },

    #[error("The {operation} needs at least {required} points, but only {found} are available.")]
    InsufficientData {
        operation: &'static str,
        required: usize,
        found: usize,
    },

    #[error("Time values must be strictly increasing, but t[{index}] does not exceed the sample before it.")]
    NonIncreasingTime { index: usize },

    #[error("Non-finite value {value} found at index {index}.")]
    NonFiniteValue { index: usize, value: f64 },

    #[error("The first survival value is {0}; a curve cannot be normalized by it.")]
    ZeroBaseline(f64),

    #[error(
        "Smoothed survival is {value} at index {index}; the logarithm is undefined. Truncate the tail before computing mortality."
    )]
    DomainError { index: usize, value: f64 },
}

/// An ordered pair of equally long vectors: a time axis and the values sampled on it.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub t: Array1<f64>,
    pub s: Array1<f64>,
}

impl Series {
    pub fn new(t: Array1<f64>, s: Array1<f64>) -> Result<Self, ProcessorError> {
        check_lengths(t.view(), s.view())?;
        Ok(Self { t, s })
    }

    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    /// Returns the half-open slice `[start, end)` of both axes. Bounds past the end are
    /// clamped and an inverted window yields an empty series.
    pub fn window(&self, window: FitWindow) -> Series {
        let end = window.end.min(self.len());
        let start = window.start.min(end);
        Series {
            t: self.t.slice(s![start..end]).to_owned(),
            s: self.s.slice(s![start..end]).to_owned(),
        }
    }

    /// Inserts a point ahead of the first sample.
    fn prepend(&self, t0: f64, s0: f64) -> Series {
        let t = std::iter::once(t0).chain(self.t.iter().copied()).collect();
        let s = std::iter::once(s0).chain(self.s.iter().copied()).collect();
        Series { t, s }
    }
}

/// A pair of indices into a time axis selecting the samples used for a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitWindow {
    pub start: usize,
    pub end: usize,
}

impl FitWindow {
    /// Translates real-valued time boundaries into indices on `t` via `time_index`.
    pub fn from_times(t: ArrayView1<'_, f64>, start_time: f64, end_time: f64) -> Self {
        Self {
            start: time_index(t, start_time),
            end: time_index(t, end_time),
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owns one raw survival measurement and the configuration used to clean it.
///
/// All derived series are recomputed on every call and never alias the stored inputs.
#[derive(Debug, Clone)]
pub struct SurvivalProcessor {
    t: Array1<f64>,
    s: Array1<f64>,
    config: ProcessorConfig,
}

impl SurvivalProcessor {
    /// Validates the raw series: equal lengths, at least one sample, finite values and a
    /// strictly increasing time axis.
    pub fn new(
        t: Array1<f64>,
        s: Array1<f64>,
        config: ProcessorConfig,
    ) -> Result<Self, ProcessorError> {
        check_lengths(t.view(), s.view())?;
        if t.is_empty() {
            return Err(ProcessorError::InsufficientData {
                operation: "survival processor",
                required: 1,
                found: 0,
            });
        }
        check_finite(t.view())?;
        check_finite(s.view())?;
        if let Some(position) = t.iter().tuple_windows().position(|(a, b)| b <= a) {
            return Err(ProcessorError::NonIncreasingTime {
                index: position + 1,
            });
        }
        Ok(Self { t, s, config })
    }

    pub fn time(&self) -> ArrayView1<'_, f64> {
        self.t.view()
    }

    pub fn survival(&self) -> ArrayView1<'_, f64> {
        self.s.view()
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// The survival curve divided by its first sample.
    pub fn scaled(&self) -> Result<Array1<f64>, ProcessorError> {
        normalize(self.s.view())
    }

    /// Normalizes, downsamples and smooths the stored series.
    ///
    /// Normalization runs first so the scale comes from the true first sample, and
    /// downsampling runs before smoothing so the window spans the same support on both
    /// axes.
    pub fn clean(&self) -> Result<Series, ProcessorError> {
        let scaled = self.scaled()?;
        let binned = downsample(
            self.t.view(),
            scaled.view(),
            self.config.downsample_factor(),
        )?;
        log::debug!(
            "Downsampled {} samples to {} (factor {})",
            self.t.len(),
            binned.len(),
            self.config.downsample_factor()
        );
        let window = self.config.window_size();
        let clean = Series {
            t: moving_average(binned.t.view(), window)?,
            s: moving_average(binned.s.view(), window)?,
        };
        log::debug!(
            "Moving average over {} points left {} clean samples",
            window,
            clean.len()
        );
        Ok(clean)
    }

    /// Mortality rate `h(t) = -d/dt ln S(t)` of the cleaned curve, by central difference.
    ///
    /// Every smoothed survival value must be strictly positive. With
    /// `extrapolate_boundary` enabled a point at `t = 0` is prepended, estimated by a
    /// one-sided difference over the first two clean samples.
    pub fn mortality(&self) -> Result<Series, ProcessorError> {
        let clean = self.clean()?;
        if let Some((index, &value)) = clean
            .s
            .iter()
            .enumerate()
            .find(|&(_, v)| v.is_nan() || *v <= 0.0)
        {
            return Err(ProcessorError::DomainError { index, value });
        }

        let cumulative_hazard = clean.s.mapv(|v| -v.ln());
        let hazard = derivative_central(clean.t.view(), cumulative_hazard.view())?;

        if self.config.extrapolate_boundary() {
            let boundary = (cumulative_hazard[1] - cumulative_hazard[0])
                / (clean.t[1] - clean.t[0]);
            log::debug!("Prepending boundary mortality {boundary:.6e} at t = 0");
            return Ok(hazard.prepend(0.0, boundary));
        }
        Ok(hazard)
    }
}

/// Divides every element by the first one, so the result starts at exactly 1.
pub fn normalize(s: ArrayView1<'_, f64>) -> Result<Array1<f64>, ProcessorError> {
    let Some(&baseline) = s.first() else {
        return Err(ProcessorError::InsufficientData {
            operation: "normalization",
            required: 1,
            found: 0,
        });
    };
    if baseline == 0.0 || !baseline.is_finite() {
        return Err(ProcessorError::ZeroBaseline(baseline));
    }
    Ok(s.mapv(|v| v / baseline))
}

/// Keeps every `b`-th sample starting at index 0, `floor(len / b)` samples in total.
///
/// A factor larger than the series yields an empty series rather than an error.
pub fn downsample(
    x: ArrayView1<'_, f64>,
    y: ArrayView1<'_, f64>,
    b: usize,
) -> Result<Series, ProcessorError> {
    check_lengths(x, y)?;
    if b == 0 {
        return Err(ProcessorError::InvalidConfiguration {
            field: "downsample_factor",
            value: b,
        });
    }
    let kept = x.len() / b;
    let stop = kept * b;
    Ok(Series {
        t: x.slice(s![..stop;b]).to_owned(),
        s: y.slice(s![..stop;b]).to_owned(),
    })
}

/// Trailing moving average over `m` points, computed from differences of the running sum.
///
/// `x_avg[i]` is the mean of `x[i..i + m]`, so the output has `len(x) - m + 1` points
/// and is aligned with the last sample of each window.
pub fn moving_average(x: ArrayView1<'_, f64>, m: usize) -> Result<Array1<f64>, ProcessorError> {
    if m == 0 {
        return Err(ProcessorError::InvalidConfiguration {
            field: "window_size",
            value: m,
        });
    }
    if x.len() < m {
        return Err(ProcessorError::InsufficientData {
            operation: "moving average",
            required: m,
            found: x.len(),
        });
    }
    if m == 1 {
        return Ok(x.to_owned());
    }

    let mut cumulative = Array1::<f64>::zeros(x.len());
    let mut running = 0.0;
    for (slot, &value) in cumulative.iter_mut().zip(x.iter()) {
        running += value;
        *slot = running;
    }

    let width = m as f64;
    let averaged = (m - 1..x.len())
        .map(|last| {
            let leading = if last >= m { cumulative[last - m] } else { 0.0 };
            (cumulative[last] - leading) / width
        })
        .collect();
    Ok(averaged)
}

/// First-order forward difference, aligned with `x[..n-1]`.
pub fn derivative(
    x: ArrayView1<'_, f64>,
    y: ArrayView1<'_, f64>,
) -> Result<Series, ProcessorError> {
    check_lengths(x, y)?;
    let n = x.len();
    if n < 2 {
        return Err(ProcessorError::InsufficientData {
            operation: "forward difference",
            required: 2,
            found: n,
        });
    }
    let slope = x
        .windows(2)
        .into_iter()
        .zip(y.windows(2))
        .map(|(xw, yw)| (yw[1] - yw[0]) / (xw[1] - xw[0]))
        .collect();
    Ok(Series {
        t: x.slice(s![..n - 1]).to_owned(),
        s: slope,
    })
}

/// Second-order central difference, aligned with `x[1..n-1]`.
pub fn derivative_central(
    x: ArrayView1<'_, f64>,
    y: ArrayView1<'_, f64>,
) -> Result<Series, ProcessorError> {
    check_lengths(x, y)?;
    let n = x.len();
    if n < 3 {
        return Err(ProcessorError::InsufficientData {
            operation: "central difference",
            required: 3,
            found: n,
        });
    }
    let slope = x
        .windows(3)
        .into_iter()
        .zip(y.windows(3))
        .map(|(xw, yw)| (yw[2] - yw[0]) / (xw[2] - xw[0]))
        .collect();
    Ok(Series {
        t: x.slice(s![1..n - 1]).to_owned(),
        s: slope,
    })
}

/// Index `i` of the first interval with `t[i] <= t_real <= t[i + 1]`.
///
/// Queries beyond the last sample map to the last index. Anything else that is not
/// bracketed (below the first sample, NaN, an empty axis) maps to 0.
pub fn time_index(t: ArrayView1<'_, f64>, t_real: f64) -> usize {
    let n = t.len();
    if n == 0 {
        log::warn!("time_index called on an empty time axis; using index 0");
        return 0;
    }

    let t_max = t.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if t_real > t_max {
        return n - 1;
    }

    if let Some(index) = t
        .iter()
        .tuple_windows()
        .position(|(&lo, &hi)| lo <= t_real && t_real <= hi)
    {
        return index;
    }

    if t_real != t[0] {
        log::warn!(
            "Time {t_real} is not bracketed by the time axis [{}, {t_max}]; using index 0",
            t[0]
        );
    }
    0
}

fn check_lengths(x: ArrayView1<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), ProcessorError> {
    if x.len() != y.len() {
        return Err(ProcessorError::DimensionMismatch {
            time: x.len(),
            value: y.len(),
        });
    }
    Ok(())
}

fn check_finite(values: ArrayView1<'_, f64>) -> Result<(), ProcessorError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(ProcessorError::NonFiniteValue {
            index,
            value: values[index],
        }),
        None => Ok(()),
    }
}

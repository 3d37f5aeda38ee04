// curve/fit.rs

//! # Nonlinear Least-Squares Fitting
//!
//! Fits a Weibull or Gompertz model to a slice of the cleaned survival curve or of the
//! mortality curve by minimizing the residual sum of squares
//!
//! ```text
//! SSR(p) = Σ_i (y_i - f(x_i; p))^2
//! ```
//!
//! with BFGS. Strictly positive parameters are optimized on the log scale so the line
//! search can never step outside the model's domain; the Gompertz rate `b` stays on
//! its natural scale. Once converged, the parameter covariance is estimated the usual
//! way for least squares, `(JᵀJ)⁻¹ · SSR / (n - p)`, with `J` the Jacobian of the
//! model with respect to its natural parameters.

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wolfe_bfgs::{Bfgs, BfgsSolution};

use crate::models::{FailureModel, ModelError, ModelKind};

/// Cost handed to the optimizer when a trial point makes the objective non-finite.
const NON_FINITE_PENALTY: f64 = 1e10;
/// Number of parameters of every supported model.
const NUM_PARAMS: usize = 2;
/// Determinants of `JᵀJ` below this (relative to its diagonal) count as singular.
const SINGULAR_RELATIVE_DETERMINANT: f64 = 1e-14;

/// Which curve the model is fitted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FitTarget {
    /// The cleaned survival curve, against `S(x)`.
    #[default]
    Survival,
    /// The mortality curve, against `h(x)`.
    Mortality,
}

impl FitTarget {
    pub fn evaluate(&self, model: &FailureModel, x: f64) -> f64 {
        match self {
            FitTarget::Survival => model.survival(x),
            FitTarget::Mortality => model.hazard(x),
        }
    }

    pub fn gradient(&self, model: &FailureModel, x: f64) -> [f64; 2] {
        match self {
            FitTarget::Survival => model.survival_gradient(x),
            FitTarget::Mortality => model.hazard_gradient(x),
        }
    }

    pub fn curve(&self, model: &FailureModel, x: ArrayView1<'_, f64>) -> Array1<f64> {
        match self {
            FitTarget::Survival => model.survival_curve(x),
            FitTarget::Mortality => model.hazard_curve(x),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    /// Gradient-norm tolerance of the optimizer.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 500,
        }
    }
}

/// Fitted parameters and their covariance.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub model: FailureModel,
    pub target: FitTarget,
    /// Covariance of the natural parameters, in `ModelKind::parameter_names` order.
    /// Infinite when it cannot be estimated.
    pub covariance: Array2<f64>,
    pub residual_sum_of_squares: f64,
    pub iterations: usize,
    pub points: usize,
}

#[derive(Error, Debug)]
pub enum FitError {
    #[error("x and y must have the same length (x: {x}, y: {y}).")]
    DimensionMismatch { x: usize, y: usize },
    #[error("Fitting {model} needs at least {required} points, but the window holds {found}.")]
    InsufficientData {
        model: ModelKind,
        required: usize,
        found: usize,
    },
    #[error("Fit data contains a non-finite value at index {0}.")]
    NonFiniteData(usize),
    #[error("Invalid initial guess: {0}")]
    InvalidInitialGuess(#[from] ModelError),
    #[error("The objective is not finite at the initial guess {0:?}.")]
    NonFiniteObjective([f64; 2]),
    #[error("Least-squares optimization failed: {0}")]
    OptimizationFailed(String),
}

/// Fits `kind` to `(x, y)` starting from `initial` (in `parameter_names` order).
pub fn fit_model(
    kind: ModelKind,
    target: FitTarget,
    x: ArrayView1<'_, f64>,
    y: ArrayView1<'_, f64>,
    initial: [f64; 2],
    options: &FitOptions,
) -> Result<FitResult, FitError> {
    if x.len() != y.len() {
        return Err(FitError::DimensionMismatch {
            x: x.len(),
            y: y.len(),
        });
    }
    if x.len() < NUM_PARAMS {
        return Err(FitError::InsufficientData {
            model: kind,
            required: NUM_PARAMS,
            found: x.len(),
        });
    }
    if let Some(index) = x
        .iter()
        .zip(y.iter())
        .position(|(a, b)| !a.is_finite() || !b.is_finite())
    {
        return Err(FitError::NonFiniteData(index));
    }
    let initial_model = kind.with_parameters(initial)?;
    if objective(&initial_model, target, x, y).is_none() {
        return Err(FitError::NonFiniteObjective(initial));
    }

    let positive = kind.positive_parameters();
    let theta0 = internal::to_unconstrained(initial, positive);
    log::info!(
        "Fitting {} to {} points of the {:?} curve from {:?}",
        kind,
        x.len(),
        target,
        initial
    );

    let xs = x.to_owned();
    let ys = y.to_owned();
    let cost_and_grad = move |theta: &Array1<f64>| -> (f64, Array1<f64>) {
        let params = internal::from_unconstrained(theta, positive);
        let evaluated = kind
            .with_parameters(params)
            .ok()
            .and_then(|model| objective(&model, target, xs.view(), ys.view()));
        match evaluated {
            Some((cost, grad)) => {
                let chained = Array1::from_iter((0..NUM_PARAMS).map(|j| {
                    if positive[j] {
                        grad[j] * params[j]
                    } else {
                        grad[j]
                    }
                }));
                (cost, chained)
            }
            None => {
                log::warn!(
                    "Non-finite least-squares cost at {:?}; returning large finite value",
                    params
                );
                (NON_FINITE_PENALTY, Array1::zeros(NUM_PARAMS))
            }
        }
    };

    let BfgsSolution {
        final_point,
        final_value,
        iterations,
        ..
    } = Bfgs::new(theta0, cost_and_grad)
        .with_tolerance(options.tolerance)
        .with_max_iterations(options.max_iterations)
        .run()
        .map_err(|e| FitError::OptimizationFailed(format!("BFGS failed: {:?}", e)))?;

    let params = internal::from_unconstrained(&final_point, positive);
    let model = kind.with_parameters(params)?;
    log::debug!(
        "{} fit converged in {} iterations with SSR {:.6e}",
        kind,
        iterations,
        final_value
    );

    let jtj = internal::normal_matrix(&model, target, x);
    let covariance = internal::covariance(&jtj, final_value, x.len());

    Ok(FitResult {
        model,
        target,
        covariance,
        residual_sum_of_squares: final_value,
        iterations,
        points: x.len(),
    })
}

/// Residual sum of squares and its gradient in the natural parameters, or `None`
/// when either is not finite.
fn objective(
    model: &FailureModel,
    target: FitTarget,
    x: ArrayView1<'_, f64>,
    y: ArrayView1<'_, f64>,
) -> Option<(f64, [f64; 2])> {
    let mut cost = 0.0;
    let mut grad = [0.0; NUM_PARAMS];
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        let residual = yi - target.evaluate(model, xi);
        let partials = target.gradient(model, xi);
        cost += residual * residual;
        for (g, p) in grad.iter_mut().zip(partials) {
            *g -= 2.0 * residual * p;
        }
    }
    if cost.is_finite() && grad.iter().all(|g| g.is_finite()) {
        Some((cost, grad))
    } else {
        None
    }
}

mod internal {
    use super::*;

    pub(super) fn to_unconstrained(params: [f64; 2], positive: [bool; 2]) -> Array1<f64> {
        Array1::from_iter(
            params
                .iter()
                .zip(positive)
                .map(|(&p, log_scale)| if log_scale { p.ln() } else { p }),
        )
    }

    pub(super) fn from_unconstrained(theta: &Array1<f64>, positive: [bool; 2]) -> [f64; 2] {
        let mut params = [0.0; NUM_PARAMS];
        for ((slot, &t), log_scale) in params.iter_mut().zip(theta.iter()).zip(positive) {
            *slot = if log_scale { t.exp() } else { t };
        }
        params
    }

    /// `JᵀJ` for the Jacobian of the fitted curve with respect to the natural parameters.
    pub(super) fn normal_matrix(
        model: &FailureModel,
        target: FitTarget,
        x: ArrayView1<'_, f64>,
    ) -> Array2<f64> {
        let mut jtj = Array2::<f64>::zeros((NUM_PARAMS, NUM_PARAMS));
        for &xi in x.iter() {
            let row = target.gradient(model, xi);
            for i in 0..NUM_PARAMS {
                for j in 0..NUM_PARAMS {
                    jtj[[i, j]] += row[i] * row[j];
                }
            }
        }
        jtj
    }

    /// `(JᵀJ)⁻¹ · SSR / (n - p)`, or an infinite matrix when the system is singular or
    /// there are no residual degrees of freedom.
    pub(super) fn covariance(jtj: &Array2<f64>, ssr: f64, n: usize) -> Array2<f64> {
        let unavailable = Array2::from_elem((NUM_PARAMS, NUM_PARAMS), f64::INFINITY);
        if n <= NUM_PARAMS {
            log::warn!("Covariance of the parameters could not be estimated: {n} points for {NUM_PARAMS} parameters");
            return unavailable;
        }

        let (a, b, c, d) = (jtj[[0, 0]], jtj[[0, 1]], jtj[[1, 0]], jtj[[1, 1]]);
        let det = a * d - b * c;
        let scale = (a * d).abs().max(f64::MIN_POSITIVE);
        if !det.is_finite() || det.abs() <= SINGULAR_RELATIVE_DETERMINANT * scale {
            log::warn!("Covariance of the parameters could not be estimated: singular Jacobian");
            return unavailable;
        }

        let variance = ssr / (n - NUM_PARAMS) as f64;
        let mut inverse = Array2::<f64>::zeros((NUM_PARAMS, NUM_PARAMS));
        inverse[[0, 0]] = d / det;
        inverse[[0, 1]] = -b / det;
        inverse[[1, 0]] = -c / det;
        inverse[[1, 1]] = a / det;
        inverse * variance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{gompertz, gompertz_mortality, weibull, weibull_mortality};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn grid(start: f64, stop: f64, n: usize) -> Array1<f64> {
        Array1::linspace(start, stop, n)
    }

    fn assert_relative(actual: f64, expected: f64, tolerance: f64) {
        let relative = ((actual - expected) / expected).abs();
        assert!(
            relative < tolerance,
            "expected {expected}, got {actual} (relative error {relative})"
        );
    }

    #[test]
    fn recovers_weibull_from_exact_survival() {
        let x = grid(0.5, 20.0, 40);
        let y = x.mapv(|v| weibull(v, 1.5, 10.0));
        let result = fit_model(
            ModelKind::Weibull,
            FitTarget::Survival,
            x.view(),
            y.view(),
            [1.0, 8.0],
            &FitOptions::default(),
        )
        .unwrap();

        let [k, lambda] = result.model.parameters();
        assert_relative(k, 1.5, 1e-2);
        assert_relative(lambda, 10.0, 1e-2);
        assert!(result.residual_sum_of_squares < 1e-6);
        assert_eq!(result.points, 40);
        assert_eq!(result.covariance.dim(), (2, 2));
        assert!(result.covariance.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn recovers_gompertz_from_exact_mortality() {
        let x = grid(0.0, 20.0, 41);
        let y = x.mapv(|v| gompertz_mortality(v, 0.01, 0.2));
        let result = fit_model(
            ModelKind::Gompertz,
            FitTarget::Mortality,
            x.view(),
            y.view(),
            [0.02, 0.15],
            &FitOptions::default(),
        )
        .unwrap();

        let [a, b] = result.model.parameters();
        assert_relative(a, 0.01, 1e-2);
        assert_relative(b, 0.2, 1e-2);
        assert_eq!(result.target, FitTarget::Mortality);
    }

    #[test]
    fn recovers_gompertz_from_exact_survival() {
        let x = grid(0.0, 15.0, 31);
        let y = x.mapv(|v| gompertz(v, 0.05, 0.25));
        let result = fit_model(
            ModelKind::Gompertz,
            FitTarget::Survival,
            x.view(),
            y.view(),
            [0.1, 0.2],
            &FitOptions::default(),
        )
        .unwrap();
        let [a, b] = result.model.parameters();
        assert_relative(a, 0.05, 1e-2);
        assert_relative(b, 0.25, 1e-2);
    }

    #[test]
    fn recovers_weibull_from_exact_mortality() {
        let x = grid(1.0, 30.0, 30);
        let y = x.mapv(|v| weibull_mortality(v, 2.0, 15.0));
        let result = fit_model(
            ModelKind::Weibull,
            FitTarget::Mortality,
            x.view(),
            y.view(),
            [1.5, 10.0],
            &FitOptions::default(),
        )
        .unwrap();
        let [k, lambda] = result.model.parameters();
        assert_relative(k, 2.0, 1e-2);
        assert_relative(lambda, 15.0, 1e-2);
    }

    #[test]
    fn rejects_mismatched_and_short_inputs() {
        let x = array![1.0, 2.0, 3.0];
        let y = array![0.9, 0.8];
        assert!(matches!(
            fit_model(
                ModelKind::Weibull,
                FitTarget::Survival,
                x.view(),
                y.view(),
                [1.0, 1.0],
                &FitOptions::default()
            ),
            Err(FitError::DimensionMismatch { x: 3, y: 2 })
        ));

        let short = array![1.0];
        assert!(matches!(
            fit_model(
                ModelKind::Gompertz,
                FitTarget::Mortality,
                short.view(),
                short.view(),
                [0.1, 0.1],
                &FitOptions::default()
            ),
            Err(FitError::InsufficientData {
                required: 2,
                found: 1,
                ..
            })
        ));
    }

    #[test]
    fn rejects_invalid_initial_guess() {
        let x = array![1.0, 2.0, 3.0];
        let y = array![0.9, 0.8, 0.7];
        assert!(matches!(
            fit_model(
                ModelKind::Weibull,
                FitTarget::Survival,
                x.view(),
                y.view(),
                [1.0, -2.0],
                &FitOptions::default()
            ),
            Err(FitError::InvalidInitialGuess(_))
        ));
    }

    #[test]
    fn rejects_non_finite_data() {
        let x = array![1.0, 2.0, 3.0];
        let y = array![0.9, f64::NAN, 0.7];
        assert!(matches!(
            fit_model(
                ModelKind::Weibull,
                FitTarget::Survival,
                x.view(),
                y.view(),
                [1.0, 2.0],
                &FitOptions::default()
            ),
            Err(FitError::NonFiniteData(1))
        ));
    }

    #[test]
    fn log_scale_applies_only_to_positive_parameters() {
        let theta = internal::to_unconstrained([2.0, -0.5], [true, false]);
        assert_abs_diff_eq!(theta[0], 2.0_f64.ln(), epsilon = 1e-15);
        assert_eq!(theta[1], -0.5);
        let params = internal::from_unconstrained(&theta, [true, false]);
        assert_abs_diff_eq!(params[0], 2.0, epsilon = 1e-15);
        assert_eq!(params[1], -0.5);
    }

    #[test]
    fn covariance_scales_inverse_normal_matrix() {
        let jtj = array![[4.0, 1.0], [1.0, 2.0]];
        // det = 7, residual variance = 14 / (9 - 2) = 2.
        let cov = internal::covariance(&jtj, 14.0, 9);
        let expected = array![[2.0 / 7.0, -1.0 / 7.0], [-1.0 / 7.0, 4.0 / 7.0]] * 2.0;
        assert_abs_diff_eq!(cov, expected, epsilon = 1e-12);
    }

    #[test]
    fn covariance_is_infinite_without_degrees_of_freedom() {
        let jtj = array![[4.0, 1.0], [1.0, 2.0]];
        assert!(internal::covariance(&jtj, 1.0, 2).iter().all(|v| v.is_infinite()));
        let singular = array![[1.0, 2.0], [2.0, 4.0]];
        assert!(internal::covariance(&singular, 1.0, 10).iter().all(|v| v.is_infinite()));
    }

    #[test]
    fn normal_matrix_is_symmetric() {
        let model = FailureModel::weibull(1.2, 6.0).unwrap();
        let x = grid(0.5, 10.0, 12);
        let jtj = internal::normal_matrix(&model, FitTarget::Survival, x.view());
        assert_eq!(jtj[[0, 1]], jtj[[1, 0]]);
        assert!(jtj[[0, 0]] > 0.0 && jtj[[1, 1]] > 0.0);
    }
}

//! # Parametric Failure Models
//!
//! Weibull and Gompertz survival curves together with their analytic hazard rates.
//!
//! ```text
//! Weibull:   S(x) = exp(-(x/λ)^k)           h(x) = (k/λ) (x/λ)^(k-1)
//! Gompertz:  S(x) = exp(-a (exp(b x) - 1))  h(x) = a b exp(b x)
//! ```
//!
//! In both families `h = -d/dx ln S`. The free functions are the raw formulas with no
//! parameter checks; `FailureModel` carries a validated parameter pair and is what
//! the fitter and the report work with.

use std::fmt;

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Weibull survival `exp(-(x/λ)^k)`.
#[inline]
pub fn weibull(x: f64, k: f64, lambda: f64) -> f64 {
    (-(x / lambda).powf(k)).exp()
}

/// Gompertz survival `exp(-a (exp(b x) - 1))`.
#[inline]
pub fn gompertz(x: f64, a: f64, b: f64) -> f64 {
    (-a * (b * x).exp_m1()).exp()
}

/// Weibull hazard `(k/λ) (x/λ)^(k-1)`.
#[inline]
pub fn weibull_mortality(x: f64, k: f64, lambda: f64) -> f64 {
    (k / lambda) * (x / lambda).powf(k - 1.0)
}

/// Gompertz hazard `a b exp(b x)`.
#[inline]
pub fn gompertz_mortality(x: f64, a: f64, b: f64) -> f64 {
    a * b * (b * x).exp()
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("{model} parameter '{name}' must be {requirement}, but was {value}.")]
    InvalidParameter {
        model: ModelKind,
        name: &'static str,
        requirement: &'static str,
        value: f64,
    },
}

/// The closed set of supported model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Weibull,
    Gompertz,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Weibull => "Weibull",
            ModelKind::Gompertz => "Gompertz",
        }
    }

    pub fn parameter_names(&self) -> [&'static str; 2] {
        match self {
            ModelKind::Weibull => ["k", "lambda"],
            ModelKind::Gompertz => ["a", "b"],
        }
    }

    /// Section of the analysis configuration holding this model's initial guess.
    pub fn config_key(&self) -> &'static str {
        match self {
            ModelKind::Weibull => "fit.weibull",
            ModelKind::Gompertz => "fit.gompertz",
        }
    }

    /// Parameters that must stay strictly positive, in `parameter_names` order.
    pub fn positive_parameters(&self) -> [bool; 2] {
        match self {
            ModelKind::Weibull => [true, true],
            ModelKind::Gompertz => [true, false],
        }
    }

    pub fn validate_parameters(&self, params: [f64; 2]) -> Result<(), ModelError> {
        let names = self.parameter_names();
        for ((&value, name), positive) in params
            .iter()
            .zip(names)
            .zip(self.positive_parameters())
        {
            if !value.is_finite() {
                return Err(ModelError::InvalidParameter {
                    model: *self,
                    name,
                    requirement: "finite",
                    value,
                });
            }
            if positive && value <= 0.0 {
                return Err(ModelError::InvalidParameter {
                    model: *self,
                    name,
                    requirement: "strictly positive",
                    value,
                });
            }
        }
        Ok(())
    }

    /// Builds a model of this family from a parameter pair in `parameter_names` order.
    pub fn with_parameters(&self, params: [f64; 2]) -> Result<FailureModel, ModelError> {
        match self {
            ModelKind::Weibull => FailureModel::weibull(params[0], params[1]),
            ModelKind::Gompertz => FailureModel::gompertz(params[0], params[1]),
        }
    }
}

/// A model family together with one parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "lowercase")]
pub enum FailureModel {
    Weibull { k: f64, lambda: f64 },
    Gompertz { a: f64, b: f64 },
}

impl FailureModel {
    pub fn weibull(k: f64, lambda: f64) -> Result<Self, ModelError> {
        ModelKind::Weibull.validate_parameters([k, lambda])?;
        Ok(FailureModel::Weibull { k, lambda })
    }

    pub fn gompertz(a: f64, b: f64) -> Result<Self, ModelError> {
        ModelKind::Gompertz.validate_parameters([a, b])?;
        Ok(FailureModel::Gompertz { a, b })
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            FailureModel::Weibull { .. } => ModelKind::Weibull,
            FailureModel::Gompertz { .. } => ModelKind::Gompertz,
        }
    }

    pub fn parameters(&self) -> [f64; 2] {
        match *self {
            FailureModel::Weibull { k, lambda } => [k, lambda],
            FailureModel::Gompertz { a, b } => [a, b],
        }
    }

    pub fn survival(&self, x: f64) -> f64 {
        match *self {
            FailureModel::Weibull { k, lambda } => weibull(x, k, lambda),
            FailureModel::Gompertz { a, b } => gompertz(x, a, b),
        }
    }

    pub fn hazard(&self, x: f64) -> f64 {
        match *self {
            FailureModel::Weibull { k, lambda } => weibull_mortality(x, k, lambda),
            FailureModel::Gompertz { a, b } => gompertz_mortality(x, a, b),
        }
    }

    pub fn survival_curve(&self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        x.mapv(|v| self.survival(v))
    }

    pub fn hazard_curve(&self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        x.mapv(|v| self.hazard(v))
    }

    /// Partial derivatives of `S(x)` with respect to the two parameters.
    pub fn survival_gradient(&self, x: f64) -> [f64; 2] {
        match *self {
            FailureModel::Weibull { k, lambda } => {
                if x <= 0.0 {
                    return [0.0, 0.0];
                }
                let u = x / lambda;
                let p = u.powf(k);
                let s = (-p).exp();
                [-s * p * u.ln(), s * p * k / lambda]
            }
            FailureModel::Gompertz { a, b } => {
                let s = gompertz(x, a, b);
                [-s * (b * x).exp_m1(), -s * a * x * (b * x).exp()]
            }
        }
    }

    /// Partial derivatives of `h(x)` with respect to the two parameters.
    ///
    /// At `x <= 0` the Weibull logarithmic term is dropped.
    pub fn hazard_gradient(&self, x: f64) -> [f64; 2] {
        match *self {
            FailureModel::Weibull { k, lambda } => {
                let h = weibull_mortality(x, k, lambda);
                let log_u = if x > 0.0 { (x / lambda).ln() } else { 0.0 };
                [h * (1.0 / k + log_u), -h * k / lambda]
            }
            FailureModel::Gompertz { a, b } => {
                let growth = (b * x).exp();
                [b * growth, a * growth * (1.0 + b * x)]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn weibull_survival_at_scale_is_inverse_e() {
        for k in [0.5, 1.0, 2.0, 3.5] {
            assert_abs_diff_eq!(weibull(40.0, k, 40.0), (-1.0_f64).exp(), epsilon = 1e-15);
        }
        assert_eq!(weibull(0.0, 2.0, 10.0), 1.0);
    }

    #[test]
    fn gompertz_starts_at_one() {
        assert_eq!(gompertz(0.0, 0.3, 0.1), 1.0);
        assert_abs_diff_eq!(
            gompertz(2.0, 0.5, 0.25),
            (-0.5 * ((0.5_f64).exp() - 1.0)).exp(),
            epsilon = 1e-15
        );
    }

    #[test]
    fn exponential_special_case() {
        // k = 1 is a constant hazard of 1/λ.
        for x in [0.5, 3.0, 12.0] {
            assert_abs_diff_eq!(weibull_mortality(x, 1.0, 4.0), 0.25, epsilon = 1e-15);
        }
        assert_abs_diff_eq!(gompertz_mortality(7.0, 0.2, 0.0), 0.0, epsilon = 1e-15);
    }

    fn log_derivative_error(model: FailureModel, x: f64, h: f64) -> f64 {
        let cumulative = |v: f64| -model.survival(v).ln();
        let numeric = (cumulative(x + h) - cumulative(x - h)) / (2.0 * h);
        (numeric - model.hazard(x)).abs()
    }

    #[test]
    fn hazard_is_log_derivative_of_survival() {
        let models = [
            FailureModel::weibull(1.7, 12.0).unwrap(),
            FailureModel::weibull(0.8, 3.0).unwrap(),
            FailureModel::gompertz(0.02, 0.15).unwrap(),
            FailureModel::gompertz(0.5, -0.1).unwrap(),
        ];
        for model in models {
            for x in [0.5, 2.0, 9.0] {
                let coarse = log_derivative_error(model, x, 1e-2);
                let fine = log_derivative_error(model, x, 1e-3);
                assert!(fine <= coarse + 1e-9, "{model:?} at {x}: {fine} > {coarse}");
                assert!(fine < 1e-5, "{model:?} at {x}: {fine}");
            }
        }
    }

    #[test]
    fn gradients_match_finite_differences() {
        let models = [
            FailureModel::weibull(1.7, 12.0).unwrap(),
            FailureModel::gompertz(0.02, 0.15).unwrap(),
        ];
        let step = 1e-6;
        for model in models {
            let params = model.parameters();
            for x in [0.7, 4.0, 15.0] {
                let survival = model.survival_gradient(x);
                let hazard = model.hazard_gradient(x);
                for j in 0..2 {
                    let mut up = params;
                    let mut down = params;
                    up[j] += step;
                    down[j] -= step;
                    let up = model.kind().with_parameters(up).unwrap();
                    let down = model.kind().with_parameters(down).unwrap();
                    let ds = (up.survival(x) - down.survival(x)) / (2.0 * step);
                    let dh = (up.hazard(x) - down.hazard(x)) / (2.0 * step);
                    assert_abs_diff_eq!(survival[j], ds, epsilon = 1e-6);
                    assert_abs_diff_eq!(hazard[j], dh, epsilon = 1e-6);
                }
            }
        }
    }

    #[test]
    fn survival_gradient_vanishes_at_origin() {
        let model = FailureModel::weibull(2.0, 5.0).unwrap();
        assert_eq!(model.survival_gradient(0.0), [0.0, 0.0]);
    }

    #[test]
    fn curves_evaluate_elementwise() {
        let model = FailureModel::gompertz(0.1, 0.3).unwrap();
        let x = array![0.0, 1.0, 2.0];
        let survival = model.survival_curve(x.view());
        let hazard = model.hazard_curve(x.view());
        for i in 0..x.len() {
            assert_eq!(survival[i], gompertz(x[i], 0.1, 0.3));
            assert_eq!(hazard[i], gompertz_mortality(x[i], 0.1, 0.3));
        }
    }

    #[test]
    fn constructors_validate_parameters() {
        assert_eq!(
            FailureModel::weibull(2.0, 0.0),
            Err(ModelError::InvalidParameter {
                model: ModelKind::Weibull,
                name: "lambda",
                requirement: "strictly positive",
                value: 0.0,
            })
        );
        assert!(FailureModel::weibull(-1.0, 3.0).is_err());
        assert!(FailureModel::gompertz(0.0, 0.1).is_err());
        assert!(FailureModel::gompertz(0.1, f64::NAN).is_err());
        assert!(FailureModel::gompertz(0.1, -0.4).is_ok());
    }

    #[test]
    fn parameters_round_trip_through_kind() {
        let model = FailureModel::weibull(1.3, 20.0).unwrap();
        assert_eq!(model.kind(), ModelKind::Weibull);
        assert_eq!(model.kind().with_parameters(model.parameters()).unwrap(), model);
        assert_eq!(ModelKind::Gompertz.to_string(), "Gompertz");
    }
}

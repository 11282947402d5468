//! A module for covariance functions (kernels) k(x, x') of the GP model.
//!
//! The following kernels are implemented:
//! * squared exponential,
//! * white noise,
//! * additive composition of kernels.
//!
//! Matern kernels are not supported.
//!
//! A [CovarianceFunction] is a [Kernel] expression tree evaluated against a shared
//! [Hyperparameters] table. Analytic derivatives with respect to each hyperparameter
//! kind are available for the marginal likelihood optimization.

use crate::errors::{GpError, Result};
use crate::hyperparameters::{HyperparamKind, Hyperparameter, Hyperparameters};
use crate::utils::same_point;
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Data, Ix1, Ix2};
use ndarray_stats::DeviationExt;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Add;

/// Kernel expression evaluated against hyperparameter values
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Kernel {
    /// `sigma_f^2 * exp(-|a - b|^2 / (2 * l^2))`
    SquaredExponential,
    /// `sigma_j^2` when `a == b`, 0 otherwise
    WhiteNoise,
    /// Sum of two kernels
    Sum(Box<Kernel>, Box<Kernel>),
}

// Missing hyperparameters read as NaN so that any downstream result is rejected
// by the numerical checks instead of silently computed.
fn param(params: &BTreeMap<HyperparamKind, f64>, kind: HyperparamKind) -> f64 {
    params.get(&kind).copied().unwrap_or(f64::NAN)
}

// Points of different dimensions have no distance, NaN as well.
fn squared_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    a.sq_l2_dist(b).unwrap_or(f64::NAN)
}

impl Kernel {
    /// Hyperparameter kinds the kernel depends on
    pub fn kinds(&self) -> Vec<HyperparamKind> {
        match self {
            Kernel::SquaredExponential => {
                vec![HyperparamKind::LengthScale, HyperparamKind::SignalVariance]
            }
            Kernel::WhiteNoise => vec![HyperparamKind::JitterVariance],
            Kernel::Sum(k1, k2) => {
                let mut kinds = k1.kinds();
                k2.kinds().into_iter().for_each(|k| {
                    if !kinds.contains(&k) {
                        kinds.push(k)
                    }
                });
                kinds
            }
        }
    }

    /// Kernel value k(a, b)
    pub fn value(
        &self,
        a: &ArrayView1<f64>,
        b: &ArrayView1<f64>,
        params: &BTreeMap<HyperparamKind, f64>,
    ) -> f64 {
        match self {
            Kernel::SquaredExponential => {
                let l = param(params, HyperparamKind::LengthScale);
                let sigma_f = param(params, HyperparamKind::SignalVariance);
                sigma_f * sigma_f * (-squared_distance(a, b) / (2. * l * l)).exp()
            }
            Kernel::WhiteNoise => {
                if same_point(a, b) {
                    let sigma_j = param(params, HyperparamKind::JitterVariance);
                    sigma_j * sigma_j
                } else {
                    0.
                }
            }
            Kernel::Sum(k1, k2) => k1.value(a, b, params) + k2.value(a, b, params),
        }
    }

    /// Partial derivative dk(a, b)/dtheta where theta is the hyperparameter of given `kind`,
    /// zero when the kernel does not depend on it
    pub fn derivative(
        &self,
        kind: HyperparamKind,
        a: &ArrayView1<f64>,
        b: &ArrayView1<f64>,
        params: &BTreeMap<HyperparamKind, f64>,
    ) -> f64 {
        match (self, kind) {
            (Kernel::SquaredExponential, HyperparamKind::LengthScale) => {
                let l = param(params, HyperparamKind::LengthScale);
                let sigma_f = param(params, HyperparamKind::SignalVariance);
                let d2 = squared_distance(a, b);
                sigma_f * sigma_f * (-d2 / (2. * l * l)).exp() * d2 / (l * l * l)
            }
            (Kernel::SquaredExponential, HyperparamKind::SignalVariance) => {
                let l = param(params, HyperparamKind::LengthScale);
                let sigma_f = param(params, HyperparamKind::SignalVariance);
                2. * sigma_f * (-squared_distance(a, b) / (2. * l * l)).exp()
            }
            (Kernel::WhiteNoise, HyperparamKind::JitterVariance) => {
                if same_point(a, b) {
                    2. * param(params, HyperparamKind::JitterVariance)
                } else {
                    0.
                }
            }
            (Kernel::Sum(k1, k2), kind) => {
                k1.derivative(kind, a, b, params) + k2.derivative(kind, a, b, params)
            }
            _ => 0.,
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Kernel::SquaredExponential => write!(f, "SquaredExponential"),
            Kernel::WhiteNoise => write!(f, "WhiteNoise"),
            Kernel::Sum(k1, k2) => write!(f, "{k1} + {k2}"),
        }
    }
}

/// A covariance function: a kernel expression bound to a hyperparameter table.
///
/// Cloning a covariance function shares its hyperparameter table.
#[derive(Clone, Debug)]
pub struct CovarianceFunction {
    kernel: Kernel,
    params: Hyperparameters,
}

impl CovarianceFunction {
    /// Covariance function from a kernel expression and its hyperparameters.
    ///
    /// Fails when a hyperparameter required by the kernel is missing.
    pub fn new(kernel: Kernel, params: Hyperparameters) -> Result<Self> {
        if let Some(missing) = kernel.kinds().iter().find(|k| !params.contains(**k)) {
            return Err(GpError::InvalidInput(format!(
                "kernel {kernel} requires a {missing} hyperparameter"
            )));
        }
        Ok(CovarianceFunction { kernel, params })
    }

    /// Squared exponential kernel `sigma_f^2 * exp(-|a - b|^2 / (2 * l^2))`
    pub fn squared_exponential(length_scale: f64, signal_variance: f64) -> Self {
        CovarianceFunction {
            kernel: Kernel::SquaredExponential,
            params: Hyperparameters::from_params(&[
                Hyperparameter::length_scale(length_scale),
                Hyperparameter::signal_variance(signal_variance),
            ]),
        }
    }

    /// White noise kernel `sigma_j^2` when both points are equal, 0 otherwise
    pub fn white_noise(jitter_variance: f64) -> Self {
        CovarianceFunction {
            kernel: Kernel::WhiteNoise,
            params: Hyperparameters::from_params(&[Hyperparameter::jitter_variance(
                jitter_variance,
            )]),
        }
    }

    /// Matern kernel is not implemented
    pub fn matern(_degrees_of_freedom: f64, _length_scale: f64) -> Result<Self> {
        Err(GpError::NotSupported(
            "Matern covariance function is not implemented".to_string(),
        ))
    }

    /// Additive composition `f1 + f2`.
    ///
    /// The result holds the union of both hyperparameter tables (values of `f1` win for
    /// kinds present in both) and `f1` and `f2` are repointed to that unified table, so that
    /// a later update made through any of the three functions is seen by all of them.
    pub fn combine(f1: &mut CovarianceFunction, f2: &mut CovarianceFunction) -> Self {
        let params = f1.params.union(&f2.params);
        f1.params = params.clone();
        f2.params = params.clone();
        CovarianceFunction {
            kernel: Kernel::Sum(Box::new(f1.kernel.clone()), Box::new(f2.kernel.clone())),
            params,
        }
    }

    /// Kernel expression
    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Shared hyperparameter table
    pub fn parameters(&self) -> &Hyperparameters {
        &self.params
    }

    /// Hyperparameter kinds held by the table
    pub fn kinds(&self) -> Vec<HyperparamKind> {
        self.params.kinds()
    }

    /// Covariance value k(a, b)
    pub fn evaluate(
        &self,
        a: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        b: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    ) -> f64 {
        self.params
            .with(|p| self.kernel.value(&a.view(), &b.view(), p))
    }

    /// Partial derivative dk(a, b)/dtheta for the hyperparameter of given `kind`
    pub fn derivative(
        &self,
        kind: HyperparamKind,
        a: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        b: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    ) -> f64 {
        if !self.params.contains(kind) {
            return 0.;
        }
        self.params
            .with(|p| self.kernel.derivative(kind, &a.view(), &b.view(), p))
    }

    /// Derivative function `(a, b) -> dk(a, b)/dtheta` for the hyperparameter of given `kind`.
    ///
    /// Returns the zero function when `kind` is not a hyperparameter of this function.
    pub fn differentiate(
        &self,
        kind: HyperparamKind,
    ) -> impl Fn(ArrayView1<f64>, ArrayView1<f64>) -> f64 + '_ {
        move |a, b| self.derivative(kind, &a, &b)
    }

    /// Covariance matrix between all rows of `x` (n, nx)
    pub fn matrix(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Array2<f64> {
        let n = x.nrows();
        self.params.with(|p| {
            let mut k = Array2::zeros((n, n));
            for i in 0..n {
                for j in 0..=i {
                    let v = self.kernel.value(&x.row(i), &x.row(j), p);
                    k[[i, j]] = v;
                    k[[j, i]] = v;
                }
            }
            k
        })
    }

    /// Matrix of derivatives dk(x_i, x_j)/dtheta between all rows of `x` (n, nx)
    pub fn matrix_derivative(
        &self,
        kind: HyperparamKind,
        x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Array2<f64> {
        let n = x.nrows();
        if !self.params.contains(kind) {
            return Array2::zeros((n, n));
        }
        self.params.with(|p| {
            let mut dk = Array2::zeros((n, n));
            for i in 0..n {
                for j in 0..=i {
                    let v = self.kernel.derivative(kind, &x.row(i), &x.row(j), p);
                    dk[[i, j]] = v;
                    dk[[j, i]] = v;
                }
            }
            dk
        })
    }

    /// Covariance vector between `x0` and every row of `x` (n, nx)
    pub fn cross(
        &self,
        x0: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Array1<f64> {
        let x0 = x0.view();
        self.params.with(|p| {
            x.rows()
                .into_iter()
                .map(|xi| self.kernel.value(&x0, &xi, p))
                .collect()
        })
    }
}

impl Add for CovarianceFunction {
    type Output = CovarianceFunction;

    /// Additive composition consuming both operands, see [CovarianceFunction::combine]
    /// to keep handles on the operands.
    fn add(mut self, mut rhs: CovarianceFunction) -> CovarianceFunction {
        CovarianceFunction::combine(&mut self, &mut rhs)
    }
}

impl fmt::Display for CovarianceFunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.kernel, self.params)
    }
}

//! Hyperparameters estimation by maximization of the log marginal likelihood
//!
//! `L(theta) = -1/2 Y' K^-1 Y - 1/2 log|K| - n/2 log(2 pi)`
//!
//! The optimizer uses a resilient propagation scheme: each hyperparameter moves by its own
//! step size in the direction of the gradient sign, the step grows while the sign is kept
//! and shrinks when it flips. Hyperparameters are updated in place through the shared
//! table of the covariance function, then the covariance matrix is recalculated.

use crate::covariance_matrix::CovarianceMatrix;
use crate::errors::{GpError, Result};
use crate::hyperparameters::{HyperparamBounds, HyperparamKind};
use crate::utils::sign;

use log::{debug, info, warn};
use ndarray::{Array1, Axis};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const LN_2PI: f64 = 1.8378770664093453;

/// Resilient propagation parameters
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct RpropParams {
    pub(crate) initial_step: f64,
    pub(crate) step_up: f64,
    pub(crate) step_down: f64,
    pub(crate) grad_tol: f64,
    pub(crate) max_iters: usize,
}

impl Default for RpropParams {
    fn default() -> Self {
        RpropParams {
            initial_step: 0.1,
            step_up: 1.15,
            step_down: 0.5,
            grad_tol: 0.001,
            max_iters: 200,
        }
    }
}

impl RpropParams {
    /// Set initial step size of every hyperparameter
    pub fn initial_step(mut self, initial_step: f64) -> Self {
        self.initial_step = initial_step;
        self
    }

    /// Set growth ratio (> 1) applied to a step when the gradient sign is kept
    pub fn step_up(mut self, step_up: f64) -> Self {
        self.step_up = step_up;
        self
    }

    /// Set shrink ratio (in ]0, 1[) applied to a step when the gradient sign flips
    pub fn step_down(mut self, step_down: f64) -> Self {
        self.step_down = step_down;
        self
    }

    /// Set gradient magnitude below which every hyperparameter is considered optimal
    pub fn grad_tol(mut self, grad_tol: f64) -> Self {
        self.grad_tol = grad_tol;
        self
    }

    /// Set maximum number of iterations
    pub fn max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }
}

/// Outcome of an optimization
#[derive(Clone, Debug)]
pub struct OptimizationReport {
    /// Number of iterations performed
    pub n_iters: usize,
    /// Whether every gradient component fell below the threshold
    pub converged: bool,
    /// Log marginal likelihood at each iteration, the last one is computed
    /// with the final hyperparameters
    pub log_likelihoods: Vec<f64>,
    /// Final hyperparameter values
    pub hyperparameters: BTreeMap<HyperparamKind, f64>,
}

/// Log marginal likelihood of the training targets under the GP prior
pub fn log_marginal_likelihood(matrix: &CovarianceMatrix) -> f64 {
    let n = matrix.n_obs() as f64;
    let alpha = matrix.alpha();
    -0.5 * matrix.targets().dot(&alpha) - 0.5 * matrix.log_det() - 0.5 * n * LN_2PI
}

/// Partial derivative of the log marginal likelihood with respect to the hyperparameter of
/// given `kind`: `1/2 tr((alpha alpha' - K^-1) dK/dtheta)` with `alpha = K^-1 Y`
pub fn log_marginal_likelihood_derivative(
    matrix: &CovarianceMatrix,
    kind: HyperparamKind,
) -> Result<f64> {
    let dk = matrix
        .covariance_function()
        .matrix_derivative(kind, matrix.inputs());
    let alpha = matrix.alpha();
    let aat = alpha
        .view()
        .insert_axis(Axis(1))
        .dot(&alpha.view().insert_axis(Axis(0)));
    let trace = ((aat - matrix.inverse()) * dk.t()).sum();
    if trace.is_nan() {
        return Err(GpError::NumericalInstability(format!(
            "log marginal likelihood derivative wrt {kind} is NaN"
        )));
    }
    Ok(0.5 * trace)
}

/// Gradient ascent of the log marginal likelihood over the hyperparameters of
/// the covariance function of a covariance matrix
pub struct MarginalLikelihoodOptimizer<'a> {
    matrix: &'a mut CovarianceMatrix,
    bounds: HyperparamBounds,
    params: RpropParams,
}

impl<'a> MarginalLikelihoodOptimizer<'a> {
    /// Constructor, hyperparameters are kept within `bounds`
    pub fn new(matrix: &'a mut CovarianceMatrix, bounds: HyperparamBounds) -> Self {
        MarginalLikelihoodOptimizer {
            matrix,
            bounds,
            params: RpropParams::default(),
        }
    }

    /// Set step adaptation parameters
    pub fn params(mut self, params: RpropParams) -> Self {
        self.params = params;
        self
    }

    /// Current log marginal likelihood
    pub fn log_marginal_likelihood(&self) -> f64 {
        log_marginal_likelihood(self.matrix)
    }

    /// Current log marginal likelihood derivative wrt the hyperparameter of given `kind`
    pub fn gradient(&self, kind: HyperparamKind) -> Result<f64> {
        log_marginal_likelihood_derivative(self.matrix, kind)
    }

    /// Run the gradient ascent until every gradient component magnitude is below the
    /// threshold or the maximum number of iterations is reached.
    ///
    /// The covariance matrix is left recalculated with the final hyperparameters.
    pub fn optimize(&mut self) -> Result<OptimizationReport> {
        if self.matrix.n_obs() == 0 {
            return Err(GpError::InvalidInput(
                "cannot optimize hyperparameters without observations".to_string(),
            ));
        }
        self.matrix.recalculate()?;
        let params = self.matrix.covariance_function().parameters().clone();
        let kinds = params.kinds();
        let RpropParams {
            initial_step,
            step_up,
            step_down,
            grad_tol,
            max_iters,
        } = self.params;

        let mut steps = vec![initial_step; kinds.len()];
        let mut previous: Option<Vec<f64>> = None;
        let mut log_likelihoods = Vec::new();
        let mut converged = false;
        let mut n_iters = 0;

        while n_iters < max_iters {
            let lml = self.log_marginal_likelihood();
            log_likelihoods.push(lml);
            let grads = kinds
                .iter()
                .map(|k| self.gradient(*k))
                .collect::<Result<Vec<_>>>()?;
            n_iters += 1;
            debug!(
                "Iter {}: log marginal likelihood = {}, gradient = {:?}",
                n_iters, lml, grads
            );
            if grads.iter().all(|g| g.abs() < grad_tol) {
                converged = true;
                break;
            }

            if let Some(previous) = &previous {
                steps
                    .iter_mut()
                    .zip(grads.iter().zip(previous))
                    .for_each(|(step, (g, prev))| {
                        if sign(*g) == sign(*prev) {
                            *step *= step_up
                        } else {
                            *step *= step_down
                        }
                    });
            }
            let snapshot = params.values();
            for ((kind, g), step) in kinds.iter().zip(&grads).zip(&steps) {
                if let Some(v) = params.get(*kind) {
                    let v = self.bounds.clamp(*kind, v + sign(*g) as f64 * step);
                    params.set(*kind, v);
                }
            }
            previous = Some(grads);
            debug!("Iter {}: hyperparameters = {}", n_iters, params);
            if let Err(err) = self.matrix.recalculate() {
                warn!(
                    "Iter {}: cannot recalculate covariance matrix ({}), restore {:?}",
                    n_iters, err, snapshot
                );
                snapshot
                    .into_iter()
                    .for_each(|(kind, value)| params.set(kind, value));
                self.matrix.recalculate()?;
                return Err(err);
            }
        }

        if converged {
            info!(
                "Hyperparameters optimization converged in {} iterations: {}",
                n_iters, params
            );
        } else {
            log_likelihoods.push(self.log_marginal_likelihood());
            warn!(
                "Hyperparameters optimization not converged after {} iterations: {}",
                n_iters, params
            );
        }
        Ok(OptimizationReport {
            n_iters,
            converged,
            log_likelihoods,
            hyperparameters: params.values(),
        })
    }

    /// Evaluate the log marginal likelihood over the cartesian product of linear ranges
    /// `(kind, lower, upper)` sampled with `n_steps` values each (bounds included).
    ///
    /// Hyperparameter values are restored afterwards.
    pub fn log_likelihood_grid(
        &mut self,
        ranges: &[(HyperparamKind, f64, f64)],
        n_steps: usize,
    ) -> Result<Vec<(BTreeMap<HyperparamKind, f64>, f64)>> {
        if ranges.is_empty() || n_steps == 0 {
            return Err(GpError::InvalidValueError(
                "log likelihood grid requires at least one range and one step".to_string(),
            ));
        }
        let params = self.matrix.covariance_function().parameters().clone();
        if let Some((kind, _, _)) = ranges.iter().find(|(k, _, _)| !params.contains(*k)) {
            return Err(GpError::InvalidInput(format!(
                "{kind} is not a hyperparameter of the covariance function"
            )));
        }
        let original = params.values();
        let grid = self.scan(ranges, n_steps);
        original
            .into_iter()
            .for_each(|(kind, value)| params.set(kind, value));
        self.matrix.recalculate()?;
        grid
    }

    fn scan(
        &mut self,
        ranges: &[(HyperparamKind, f64, f64)],
        n_steps: usize,
    ) -> Result<Vec<(BTreeMap<HyperparamKind, f64>, f64)>> {
        let params = self.matrix.covariance_function().parameters().clone();
        let axes: Vec<Array1<f64>> = ranges
            .iter()
            .map(|(_, lo, up)| Array1::linspace(*lo, *up, n_steps))
            .collect();
        let mut index = vec![0; ranges.len()];
        let mut grid = Vec::new();
        loop {
            for ((kind, _, _), (axis, &i)) in ranges.iter().zip(axes.iter().zip(&index)) {
                params.set(*kind, axis[i]);
            }
            self.matrix.recalculate()?;
            grid.push((params.values(), self.log_marginal_likelihood()));

            let mut d = 0;
            loop {
                if d == index.len() {
                    return Ok(grid);
                }
                index[d] += 1;
                if index[d] < n_steps {
                    break;
                }
                index[d] = 0;
                d += 1;
            }
        }
    }
}

//! Input dependent noise with the most likely heteroscedastic approach
//! (Kersting et al., "Most likely heteroscedastic Gaussian process regression", ICML 2007).
//!
//! A [HeteroscedasticCovarianceMatrix] wraps the [CovarianceMatrix] of the training set with an
//! auxiliary covariance matrix regressing the logarithm of the noise standard deviation onto
//! the inputs. [HeteroscedasticCovarianceMatrix::refine_noise_estimate] alternates between
//! sampling the current posterior at training inputs to get empirical noise levels, fitting
//! the auxiliary model on them and updating the noise diagonal of the training matrix.

use crate::covariance_functions::CovarianceFunction;
use crate::covariance_matrix::CovarianceMatrix;
use crate::errors::{GpError, Result};
use crate::hyperparameters::HyperparamKind;
use crate::types::{Observation, Posterior};

use log::{debug, info, warn};
use ndarray::{Array1, ArrayBase, Data, Ix1};
use ndarray_rand::rand::{Rng, SeedableRng};
use ndarray_rand::rand_distr::{Distribution, Normal};
use rand_xoshiro::Xoshiro256Plus;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Noise refinement parameters
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct NoiseParams {
    /// Maximum number of refinement iterations
    pub(crate) max_iters: usize,
    /// Number of posterior samples drawn per training point
    pub(crate) n_samples: usize,
    /// Relative change of the summed squared log noise below which refinement stops
    pub(crate) tol: f64,
    /// Indicative noise scale used to initialize the noise model,
    /// defaults to half the standard deviation of training targets
    pub(crate) sigma_f: Option<f64>,
    /// Signal variance of the noise model kernel
    pub(crate) signal_variance: f64,
    /// Jitter variance of the noise model kernel
    pub(crate) jitter_variance: f64,
}

impl Default for NoiseParams {
    fn default() -> Self {
        NoiseParams {
            max_iters: 100,
            n_samples: 20,
            tol: 0.03,
            sigma_f: None,
            signal_variance: 1.,
            jitter_variance: 0.1,
        }
    }
}

impl NoiseParams {
    /// Set maximum number of refinement iterations
    pub fn max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    /// Set number of posterior samples drawn per training point
    pub fn n_samples(mut self, n_samples: usize) -> Self {
        self.n_samples = n_samples;
        self
    }

    /// Set convergence threshold on the relative change of the summed squared log noise
    pub fn tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set indicative noise scale
    pub fn sigma_f(mut self, sigma_f: f64) -> Self {
        self.sigma_f = Some(sigma_f);
        self
    }

    /// Set signal and jitter variances of the noise model kernel
    pub fn noise_kernel(mut self, signal_variance: f64, jitter_variance: f64) -> Self {
        self.signal_variance = signal_variance;
        self.jitter_variance = jitter_variance;
        self
    }

    /// Get maximum number of refinement iterations
    pub fn max_iters_value(&self) -> usize {
        self.max_iters
    }

    /// Get number of samples per training point
    pub fn n_samples_value(&self) -> usize {
        self.n_samples
    }

    /// Get convergence threshold
    pub fn tol_value(&self) -> f64 {
        self.tol
    }

    /// Get indicative noise scale if set
    pub fn sigma_f_value(&self) -> Option<f64> {
        self.sigma_f
    }
}

/// Outcome of a noise refinement
#[derive(Clone, Debug, PartialEq)]
pub struct RefinementReport {
    /// Number of iterations performed
    pub n_iters: usize,
    /// Whether the relative change fell below the threshold before the iteration cap
    pub converged: bool,
    /// Last relative change of the summed squared log noise estimates
    pub relative_change: f64,
}

/// Covariance matrix with input dependent noise estimated by an auxiliary GP on log noise
#[derive(Clone, Debug)]
pub struct HeteroscedasticCovarianceMatrix {
    matrix: CovarianceMatrix,
    noise_model: CovarianceMatrix,
    params: NoiseParams,
    sigma_f: f64,
}

impl HeteroscedasticCovarianceMatrix {
    /// Wrap `matrix` with a noise model initialized on `(x, sigma_f)` for every training input.
    ///
    /// The noise model kernel reuses the length scale of `matrix` covariance function with
    /// its own signal and jitter variances taken from `params`.
    /// Noise is not refined here, see [HeteroscedasticCovarianceMatrix::refine_noise_estimate].
    pub fn new(mut matrix: CovarianceMatrix, sigma_f: f64, params: NoiseParams) -> Result<Self> {
        if matrix.n_obs() == 0 {
            return Err(GpError::InvalidInput(
                "heteroscedastic covariance matrix requires observations".to_string(),
            ));
        }
        let length_scale = matrix
            .covariance_function()
            .parameters()
            .get(HyperparamKind::LengthScale)
            .ok_or_else(|| {
                GpError::InvalidInput(
                    "heteroscedastic noise model requires a covariance function with a length scale"
                        .to_string(),
                )
            })?;
        let noise_fn = CovarianceFunction::squared_exponential(length_scale, params.signal_variance)
            + CovarianceFunction::white_noise(params.jitter_variance);
        let seed = matrix.rng_mut().gen::<u64>();
        let initial = matrix
            .observations()
            .iter()
            .map(|o| Observation::new(o.x().to_owned(), sigma_f))
            .collect();
        let noise_model = CovarianceMatrix::new(noise_fn, initial)?
            .delta(matrix.perturbation())
            .with_rng(Xoshiro256Plus::seed_from_u64(seed));
        Ok(HeteroscedasticCovarianceMatrix {
            matrix,
            noise_model,
            params,
            sigma_f,
        })
    }

    fn sync_length_scale(&self) {
        if let Some(l) = self
            .matrix
            .covariance_function()
            .parameters()
            .get(HyperparamKind::LengthScale)
        {
            self.noise_model
                .covariance_function()
                .parameters()
                .set(HyperparamKind::LengthScale, l);
        }
    }

    /// Empirical log noise standard deviation at each training input, estimated from
    /// samples of the current posterior
    fn empirical_log_noise(&mut self) -> Result<Vec<Observation>> {
        let observations = self.matrix.observations().to_vec();
        let n_samples = self.params.n_samples;
        let mut noise = Vec::with_capacity(observations.len());
        for obs in observations.iter() {
            let post = self.matrix.posterior(&obs.x())?;
            let normal = Normal::new(post.mean(), post.sd()).map_err(|e| {
                GpError::NumericalInstability(format!("cannot sample posterior {post}: {e}"))
            })?;
            let rng = self.matrix.rng_mut();
            let mut sq_res = 0.;
            for _ in 0..n_samples {
                let s = normal.sample(rng);
                sq_res += (obs.y() - s) * (obs.y() - s);
            }
            let var = 0.5 * sq_res / n_samples as f64;
            noise.push(Observation::new(obs.x().to_owned(), var.sqrt().ln()));
        }
        Ok(noise)
    }

    /// Iteratively re-estimate the input dependent noise.
    ///
    /// Stops when the relative change of the summed squared log noise estimates falls
    /// below the threshold or at the iteration cap, the latter is not an error: the last
    /// estimate is kept.
    pub fn refine_noise_estimate(&mut self) -> Result<RefinementReport> {
        self.sync_length_scale();
        let mut previous = 0.;
        let mut relative_change = f64::INFINITY;
        let mut converged = false;
        let mut n_iters = 0;

        while n_iters < self.params.max_iters && !converged {
            let noise = self.empirical_log_noise()?;
            let next: f64 = noise.iter().map(|n| n.y() * n.y()).sum();
            relative_change = (previous - next).abs() / next;
            debug!(
                "Heteroscedastic iter {}: sum of squared log noise = {}, relative change = {}",
                n_iters, next, relative_change
            );
            if relative_change < self.params.tol {
                converged = true;
            } else {
                previous = next;
            }

            self.noise_model.replace_observations(noise)?;
            let k_diag = self
                .matrix
                .observations()
                .iter()
                .map(|o| self.noise_model.posterior(&o.x()).map(|p| p.mean().exp()))
                .collect::<Result<Array1<f64>>>()?;
            self.matrix.set_noise_diagonal(k_diag)?;
            n_iters += 1;
        }

        if converged {
            info!(
                "Heteroscedastic noise converged in {} iterations (relative change = {})",
                n_iters, relative_change
            );
        } else {
            warn!(
                "Heteroscedastic noise not converged after {} iterations (relative change = {})",
                n_iters, relative_change
            );
        }
        Ok(RefinementReport {
            n_iters,
            converged,
            relative_change,
        })
    }

    /// Posterior at `x0` with the noise model contribution:
    /// `sd = sqrt(sd_0^2 + exp(m(x0))^2)` where `m` is the noise model posterior mean
    pub fn posterior(&mut self, x0: &ArrayBase<impl Data<Elem = f64>, Ix1>) -> Result<Posterior> {
        let post = self.matrix.posterior(x0)?;
        let noise_sd = self.noise_model.posterior(x0)?.mean().exp();
        let sd = (post.variance() + noise_sd * noise_sd).sqrt();
        if !sd.is_finite() {
            return Err(GpError::NumericalInstability(format!(
                "unlikely heteroscedastic posterior standard deviation {sd}"
            )));
        }
        Ok(Posterior::new(post.mean(), sd))
    }

    /// Recalculate the training matrix and the noise model after hyperparameters of the
    /// covariance function were changed. The noise model follows the new length scale.
    pub fn recalculate(&mut self) -> Result<()> {
        self.matrix.recalculate()?;
        self.sync_length_scale();
        self.noise_model.recalculate()
    }

    /// Append observations to the training matrix.
    ///
    /// The noise model is left untouched until the next refinement.
    pub fn add_observations(&mut self, batch: Vec<Observation>) -> Result<()> {
        self.matrix.add_observations(batch)
    }

    /// Training covariance matrix
    pub fn matrix(&self) -> &CovarianceMatrix {
        &self.matrix
    }

    /// Mutable training covariance matrix
    pub fn matrix_mut(&mut self) -> &mut CovarianceMatrix {
        &mut self.matrix
    }

    /// Auxiliary covariance matrix over `(x, log sd)`
    pub fn noise_model(&self) -> &CovarianceMatrix {
        &self.noise_model
    }

    /// Indicative noise scale the noise model was initialized with
    pub fn sigma_f(&self) -> f64 {
        self.sigma_f
    }

    /// Noise refinement parameters
    pub fn noise_params(&self) -> &NoiseParams {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::same_point;
    use ndarray::array;

    fn noisy_matrix() -> CovarianceMatrix {
        let mut rng = Xoshiro256Plus::seed_from_u64(7);
        let obs = (0..15)
            .map(|i| {
                let x = i as f64 * 0.5;
                let noise = Normal::new(0., 0.05 + 0.1 * x).unwrap().sample(&mut rng);
                Observation::new(array![x], x.sin() + noise)
            })
            .collect();
        let cov_fn = CovarianceFunction::squared_exponential(1., 1.)
            + CovarianceFunction::white_noise(0.1);
        CovarianceMatrix::new(cov_fn, obs)
            .unwrap()
            .with_rng(Xoshiro256Plus::seed_from_u64(42))
    }

    #[test]
    fn test_requires_length_scale() {
        let obs = vec![Observation::new(array![0.], 1.)];
        let m = CovarianceMatrix::new(CovarianceFunction::white_noise(0.1), obs).unwrap();
        assert!(matches!(
            HeteroscedasticCovarianceMatrix::new(m, 0.5, NoiseParams::default()),
            Err(GpError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_noise_model_initialization() {
        let h = HeteroscedasticCovarianceMatrix::new(noisy_matrix(), 0.3, NoiseParams::default())
            .unwrap();
        assert_eq!(h.matrix().n_obs(), h.noise_model().n_obs());
        assert!(h.noise_model().targets().iter().all(|&y| y == 0.3));
        assert_eq!(
            h.matrix().covariance_function().parameters().get(HyperparamKind::LengthScale),
            h.noise_model()
                .covariance_function()
                .parameters()
                .get(HyperparamKind::LengthScale)
        );
        assert_eq!(
            Some(0.1),
            h.noise_model()
                .covariance_function()
                .parameters()
                .get(HyperparamKind::JitterVariance)
        );
    }

    #[test]
    fn test_refine_noise_estimate() {
        let mut h =
            HeteroscedasticCovarianceMatrix::new(noisy_matrix(), 0.3, NoiseParams::default())
                .unwrap();
        let report = h.refine_noise_estimate().unwrap();
        assert!(report.n_iters >= 1 && report.n_iters <= 100);
        assert!(h.matrix().noise_diagonal().iter().all(|&v| v > 0.));
        h.matrix()
            .observations()
            .iter()
            .zip(h.noise_model().observations())
            .for_each(|(o, n)| assert!(same_point(&o.x(), &n.x())));

        let p = h.posterior(&array![1.25]).unwrap();
        assert!(p.sd().is_finite() && p.sd() > 0.);
    }

    #[test]
    fn test_refinement_stops_at_iteration_cap() {
        let mut h = HeteroscedasticCovarianceMatrix::new(
            noisy_matrix(),
            0.3,
            NoiseParams::default().max_iters(1),
        )
        .unwrap();
        let report = h.refine_noise_estimate().unwrap();
        assert_eq!(1, report.n_iters);
        assert!(!report.converged);
    }

    #[test]
    fn test_posterior_adds_noise() {
        let mut h =
            HeteroscedasticCovarianceMatrix::new(noisy_matrix(), 0.3, NoiseParams::default())
                .unwrap();
        let x0 = array![2.3];
        let base = h.matrix_mut().posterior(&x0).unwrap();
        let p = h.posterior(&x0).unwrap();
        assert_eq!(base.mean(), p.mean());
        assert!(p.sd() > base.sd());
    }
}

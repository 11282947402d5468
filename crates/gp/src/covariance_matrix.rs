//! Covariance matrix of a training set and posterior inference.
//!
//! A [CovarianceMatrix] owns the training observations, the Gram matrix `K_base` of the
//! covariance function over the training inputs, a diagonal noise term `K_diag` and the
//! decomposition of `K = K_base + diag(K_diag)` (Cholesky factor, inverse, log-determinant).
//! Every structural change (new observations, new noise diagonal, new hyperparameter values
//! followed by [CovarianceMatrix::recalculate]) rebuilds the whole decomposition.

use crate::covariance_functions::CovarianceFunction;
use crate::errors::{GpError, Result};
use crate::types::{Observation, Posterior};
use crate::utils::{check_new_observations, inputs_matrix, perturb, same_point, targets_vector};

use linfa_linalg::{cholesky::*, triangular::*};
use ndarray::{s, Array1, Array2, ArrayBase, ArrayView1, Data, Ix1};
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;

/// Default shift applied to a query point equal to a training input
pub const DEFAULT_PERTURBATION: f64 = 5e-4;

/// Decomposition of a symmetric positive definite matrix
#[derive(Clone, Debug)]
struct Decomposition {
    chol: Array2<f64>,
    inv: Array2<f64>,
    log_det: f64,
}

fn singular() -> GpError {
    GpError::NumericalInstability("singular covariance matrix".to_string())
}

/// Cholesky based decomposition, fails when the matrix is singular
fn decompose(k: &Array2<f64>) -> Result<Decomposition> {
    let chol = k.cholesky().map_err(|_| singular())?;
    let log_det = 2. * chol.diag().mapv(f64::ln).sum();
    if !log_det.is_finite() {
        return Err(singular());
    }
    let n = k.nrows();
    let chol_inv = chol.solve_triangular(&Array2::<f64>::eye(n), UPLO::Lower)?;
    let inv = chol_inv.t().dot(&chol_inv);
    if inv.iter().any(|v| !v.is_finite()) {
        return Err(singular());
    }
    Ok(Decomposition { chol, inv, log_det })
}

/// Matrices derived from the training set, committed all at once
struct Gram {
    xt: Array2<f64>,
    yt: Array1<f64>,
    k_base: Array2<f64>,
    k: Array2<f64>,
    dec: Decomposition,
}

/// Covariance matrix `K = K_base + diag(K_diag)` over an append-only training set
#[derive(Clone, Debug)]
pub struct CovarianceMatrix {
    cov_fn: CovarianceFunction,
    observations: Vec<Observation>,
    xt: Array2<f64>,
    yt: Array1<f64>,
    k_base: Array2<f64>,
    k_diag: Array1<f64>,
    k: Array2<f64>,
    dec: Decomposition,
    delta: f64,
    rng: Xoshiro256Plus,
}

impl CovarianceMatrix {
    /// Covariance matrix without observations.
    ///
    /// The random generator used for query point perturbation is seeded from entropy,
    /// use [CovarianceMatrix::with_rng] to get reproducible posteriors.
    pub fn empty(cov_fn: CovarianceFunction) -> Self {
        CovarianceMatrix {
            cov_fn,
            observations: Vec::new(),
            xt: Array2::zeros((0, 0)),
            yt: Array1::zeros(0),
            k_base: Array2::zeros((0, 0)),
            k_diag: Array1::zeros(0),
            k: Array2::zeros((0, 0)),
            dec: Decomposition {
                chol: Array2::zeros((0, 0)),
                inv: Array2::zeros((0, 0)),
                log_det: 0.,
            },
            delta: DEFAULT_PERTURBATION,
            rng: Xoshiro256Plus::from_entropy(),
        }
    }

    /// Covariance matrix built from initial observations.
    ///
    /// Fails when two observations share the same input or when `K` is singular.
    pub fn new(cov_fn: CovarianceFunction, observations: Vec<Observation>) -> Result<Self> {
        let mut matrix = Self::empty(cov_fn);
        if !observations.is_empty() {
            matrix.add_observations(observations)?;
        }
        Ok(matrix)
    }

    /// Set the perturbation applied to query points equal to a training input
    pub fn delta(mut self, delta: f64) -> Self {
        self.delta = delta;
        self
    }

    /// Set the random generator used for query point perturbation
    pub fn with_rng(mut self, rng: Xoshiro256Plus) -> Self {
        self.rng = rng;
        self
    }

    fn compute(&self, observations: &[Observation], k_diag: &Array1<f64>) -> Result<Gram> {
        let dim = observations.first().map_or(0, |o| o.dim());
        let xt = inputs_matrix(observations, dim);
        let yt = targets_vector(observations);
        let k_base = self.cov_fn.matrix(&xt);
        let k = &k_base + &Array2::from_diag(k_diag);
        let dec = decompose(&k)?;
        Ok(Gram {
            xt,
            yt,
            k_base,
            k,
            dec,
        })
    }

    fn commit(&mut self, gram: Gram) {
        self.xt = gram.xt;
        self.yt = gram.yt;
        self.k_base = gram.k_base;
        self.k = gram.k;
        self.dec = gram.dec;
    }

    /// Append a batch of observations and rebuild the whole matrix.
    ///
    /// Rejects an empty batch, an input already in the training set, an input duplicated
    /// within the batch or of a different dimension. New observations get a zero noise
    /// diagonal entry. On failure the matrix is left unchanged.
    pub fn add_observations(&mut self, batch: Vec<Observation>) -> Result<()> {
        check_new_observations(&self.observations, &batch)?;
        let mut observations = self.observations.clone();
        observations.extend(batch);
        let mut k_diag = Array1::zeros(observations.len());
        k_diag
            .slice_mut(s![..self.k_diag.len()])
            .assign(&self.k_diag);
        let gram = self.compute(&observations, &k_diag)?;
        self.commit(gram);
        self.observations = observations;
        self.k_diag = k_diag;
        Ok(())
    }

    /// Replace the whole training set, the noise diagonal is reset to zero
    pub fn replace_observations(&mut self, observations: Vec<Observation>) -> Result<()> {
        check_new_observations(&[], &observations)?;
        let k_diag = Array1::zeros(observations.len());
        let gram = self.compute(&observations, &k_diag)?;
        self.commit(gram);
        self.observations = observations;
        self.k_diag = k_diag;
        Ok(())
    }

    /// Rebuild `K_base`, `K` and its decomposition from the current training set and
    /// hyperparameter values. Does nothing when there is no observation.
    pub fn recalculate(&mut self) -> Result<()> {
        if self.observations.is_empty() {
            return Ok(());
        }
        let gram = self.compute(&self.observations, &self.k_diag)?;
        self.commit(gram);
        Ok(())
    }

    fn refactor(&mut self, k_diag: Array1<f64>) -> Result<()> {
        if self.observations.is_empty() {
            return Ok(());
        }
        let k = &self.k_base + &Array2::from_diag(&k_diag);
        let dec = decompose(&k)?;
        self.k = k;
        self.dec = dec;
        self.k_diag = k_diag;
        Ok(())
    }

    /// Add noise values to the diagonal entries of the training inputs equal to the given
    /// `x` (values accumulate). Observations whose input is not in the training set are
    /// ignored.
    pub fn update_noise_diagonal(&mut self, noise: &[Observation]) -> Result<()> {
        let mut k_diag = self.k_diag.clone();
        for n in noise {
            if let Some(i) = self.position(&n.x()) {
                k_diag[i] += n.y();
            }
        }
        self.refactor(k_diag)
    }

    /// Overwrite the noise diagonal, one value per training observation
    pub fn set_noise_diagonal(&mut self, k_diag: Array1<f64>) -> Result<()> {
        if k_diag.len() != self.n_obs() {
            return Err(GpError::InvalidInput(format!(
                "noise diagonal of length {} given for {} observations",
                k_diag.len(),
                self.n_obs()
            )));
        }
        self.refactor(k_diag)
    }

    /// Posterior normal distribution at `x0`.
    ///
    /// When `x0` equals a training input, each of its components is shifted by `delta`
    /// with a random sign before inference: the returned posterior is the one of a
    /// neighbouring point.
    pub fn posterior(&mut self, x0: &ArrayBase<impl Data<Elem = f64>, Ix1>) -> Result<Posterior> {
        if self.observations.is_empty() {
            return Err(GpError::InvalidInput(
                "cannot compute posterior without observations".to_string(),
            ));
        }
        if x0.len() != self.dim() {
            return Err(GpError::InvalidInput(format!(
                "query point dimension {} does not match training dimension {}",
                x0.len(),
                self.dim()
            )));
        }
        let x0 = if self.contains(x0) {
            perturb(x0, self.delta, &mut self.rng)
        } else {
            x0.to_owned()
        };
        let k1 = self.cov_fn.cross(&x0, &self.xt);
        let k0 = self.cov_fn.evaluate(&x0, &x0);
        let w = self.dec.inv.dot(&k1);
        let mean = w.dot(&self.yt);
        let variance = k0 - w.dot(&k1);
        if !mean.is_finite() {
            return Err(GpError::NumericalInstability(format!(
                "unlikely posterior mean {mean} at {x0}"
            )));
        }
        if !variance.is_finite() || variance < 0. {
            return Err(GpError::NumericalInstability(format!(
                "unlikely posterior variance {variance} at {x0}"
            )));
        }
        Ok(Posterior::new(mean, variance.sqrt()))
    }

    fn position(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix1>) -> Option<usize> {
        self.observations.iter().position(|o| same_point(&o.x(), x))
    }

    /// Whether `x` is a training input
    pub fn contains(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix1>) -> bool {
        self.position(x).is_some()
    }

    /// Covariance function
    pub fn covariance_function(&self) -> &CovarianceFunction {
        &self.cov_fn
    }

    /// Training observations in insertion order
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Number of training observations
    pub fn n_obs(&self) -> usize {
        self.observations.len()
    }

    /// Dimension of the training inputs, 0 when empty
    pub fn dim(&self) -> usize {
        self.xt.ncols()
    }

    /// Training inputs (n, dim)
    pub fn inputs(&self) -> &Array2<f64> {
        &self.xt
    }

    /// Training targets (n,)
    pub fn targets(&self) -> &Array1<f64> {
        &self.yt
    }

    /// `K = K_base + diag(K_diag)`
    pub fn gram(&self) -> &Array2<f64> {
        &self.k
    }

    /// `K_base`, the covariance function over the training inputs
    pub fn base_gram(&self) -> &Array2<f64> {
        &self.k_base
    }

    /// `K_diag`
    pub fn noise_diagonal(&self) -> &Array1<f64> {
        &self.k_diag
    }

    /// Lower Cholesky factor of `K`
    pub fn cholesky(&self) -> &Array2<f64> {
        &self.dec.chol
    }

    /// `K^-1`
    pub fn inverse(&self) -> &Array2<f64> {
        &self.dec.inv
    }

    /// `log|K|`
    pub fn log_det(&self) -> f64 {
        self.dec.log_det
    }

    /// `K^-1 Y`
    pub fn alpha(&self) -> Array1<f64> {
        self.dec.inv.dot(&self.yt)
    }

    /// Perturbation applied to query points equal to a training input
    pub fn perturbation(&self) -> f64 {
        self.delta
    }

    pub(crate) fn rng_mut(&mut self) -> &mut Xoshiro256Plus {
        &mut self.rng
    }

    /// Training input `i`
    pub fn input(&self, i: usize) -> ArrayView1<f64> {
        self.xt.row(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array};
    use ndarray_rand::rand::Rng;

    fn square_observations() -> Vec<Observation> {
        (0..5)
            .map(|i| Observation::new(array![i as f64], (i * i) as f64))
            .collect()
    }

    fn cov_fn(jitter: f64) -> CovarianceFunction {
        CovarianceFunction::squared_exponential(2., 10.) + CovarianceFunction::white_noise(jitter)
    }

    fn matrix(jitter: f64) -> CovarianceMatrix {
        CovarianceMatrix::empty(cov_fn(jitter))
            .with_rng(Xoshiro256Plus::seed_from_u64(42))
    }

    #[test]
    fn test_inverse() {
        let mut m = matrix(0.1);
        m.add_observations(square_observations()).unwrap();
        assert_eq!(5, m.n_obs());
        assert_eq!(1, m.dim());
        assert_abs_diff_eq!(
            m.gram().dot(m.inverse()),
            Array2::<f64>::eye(5),
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(
            m.cholesky().dot(&m.cholesky().t()),
            m.gram(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_duplicated_inputs_rejected() {
        let obs = vec![
            Observation::new(array![1., 2.], 1.),
            Observation::new(array![1., 2.], 3.),
        ];
        assert!(matches!(
            CovarianceMatrix::new(cov_fn(0.1), obs),
            Err(GpError::InvalidInput(_))
        ));

        let mut m = matrix(0.1);
        m.add_observations(square_observations()).unwrap();
        let res = m.add_observations(vec![
            Observation::new(array![7.], 1.),
            Observation::new(array![3.], 1.),
        ]);
        assert!(matches!(res, Err(GpError::InvalidInput(_))));
        assert_eq!(5, m.n_obs());
        assert!(matches!(
            m.add_observations(vec![]),
            Err(GpError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_empty_posterior_fails() {
        let mut m = matrix(0.1);
        assert!(matches!(
            m.posterior(&array![0.]),
            Err(GpError::InvalidInput(_))
        ));
        m.recalculate().unwrap();
        assert_eq!(0, m.n_obs());
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut m = matrix(0.1);
        m.add_observations(square_observations()).unwrap();
        assert!(m.posterior(&array![0., 1.]).is_err());
        assert!(m
            .add_observations(vec![Observation::new(array![5., 5.], 1.)])
            .is_err());
    }

    #[test]
    fn test_singular_matrix() {
        let obs = vec![
            Observation::new(array![0.], 0.),
            Observation::new(array![1e-12], 1.),
        ];
        let res = CovarianceMatrix::new(CovarianceFunction::squared_exponential(1., 1.), obs);
        assert!(matches!(res, Err(GpError::NumericalInstability(_))));
    }

    #[test]
    fn test_recalculate_is_idempotent() {
        let mut m = matrix(0.1);
        m.add_observations(square_observations()).unwrap();
        m.recalculate().unwrap();
        let (k, k_inv) = (m.gram().clone(), m.inverse().clone());
        m.recalculate().unwrap();
        assert_eq!(&k, m.gram());
        assert_eq!(&k_inv, m.inverse());
    }

    #[test]
    fn test_recalculate_after_hyperparameter_change() {
        let mut m = matrix(0.1);
        m.add_observations(square_observations()).unwrap();
        let k = m.gram().clone();
        m.covariance_function()
            .parameters()
            .set(crate::hyperparameters::HyperparamKind::LengthScale, 1.);
        assert_eq!(&k, m.gram());
        m.recalculate().unwrap();
        assert_abs_diff_eq!(m.gram()[[0, 1]], 100. * (-0.5f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_posterior_near_training_input() {
        let mut m = matrix(0.01);
        m.add_observations(square_observations()).unwrap();
        let p = m.posterior(&array![2.]).unwrap();
        assert_abs_diff_eq!(p.mean(), 4., epsilon = 0.1);
        assert!(p.sd() < 0.1);
    }

    #[test]
    fn test_posterior_far_from_data() {
        let mut m = matrix(0.1);
        m.add_observations(square_observations()).unwrap();
        let p = m.posterior(&array![100.]).unwrap();
        assert_abs_diff_eq!(p.mean(), 0., epsilon = 1e-6);
        // prior sd: sqrt(sigma_f^2 + sigma_j^2)
        assert_abs_diff_eq!(p.sd(), 100.01f64.sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn test_posterior_variance_is_non_negative() {
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let obs: Vec<Observation> = (0..20)
            .map(|i| {
                let x = array![i as f64 * 0.5, rng.gen_range(-1.0..1.0)];
                let y = x[0].sin() + x[1];
                Observation::new(x, y)
            })
            .collect();
        let mut m = CovarianceMatrix::new(cov_fn(0.1), obs)
            .unwrap()
            .with_rng(Xoshiro256Plus::seed_from_u64(1));
        for x0 in Array::linspace(-2., 12., 30).iter() {
            let p = m.posterior(&array![*x0, 0.3]).unwrap();
            assert!(p.sd() >= 0.);
        }
        let x = m.input(3).to_owned();
        assert!(m.posterior(&x).unwrap().sd().is_finite());
    }

    #[test]
    fn test_update_noise_diagonal_accumulates() {
        let mut m = matrix(0.1);
        m.add_observations(square_observations()).unwrap();
        let noise = vec![
            Observation::new(array![1.], 0.5),
            Observation::new(array![42.], 0.5),
        ];
        m.update_noise_diagonal(&noise).unwrap();
        m.update_noise_diagonal(&noise).unwrap();
        assert_eq!(&array![0., 1., 0., 0., 0.], m.noise_diagonal());
        assert_abs_diff_eq!(
            m.gram()[[1, 1]] - m.base_gram()[[1, 1]],
            1.,
            epsilon = 1e-12
        );
        m.recalculate().unwrap();
        assert_eq!(&array![0., 1., 0., 0., 0.], m.noise_diagonal());

        m.add_observations(vec![Observation::new(array![5.], 25.)])
            .unwrap();
        assert_eq!(&array![0., 1., 0., 0., 0., 0.], m.noise_diagonal());
        assert!(m.set_noise_diagonal(array![1.]).is_err());
    }
}

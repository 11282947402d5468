use crate::covariance_functions::CovarianceFunction;
use crate::covariance_matrix::CovarianceMatrix;
use crate::errors::{GpError, Result};
use crate::heteroscedastic::{HeteroscedasticCovarianceMatrix, RefinementReport};
use crate::hyperparameters::HyperparamKind;
use crate::optimization::{log_marginal_likelihood, MarginalLikelihoodOptimizer, OptimizationReport};
use crate::parameters::{GpParams, GpValidParams};
use crate::types::{Observation, Posterior, QueryPoint};

use linfa::prelude::{DatasetBase, Fit};
use linfa::ParamGuard;
use log::{debug, info, warn};
use ndarray::{ArrayBase, Data, Ix1, Ix2};
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use std::fmt;
use std::time::Instant;

/// Covariance matrix used by a [GaussianProcess]
#[derive(Clone, Debug)]
pub enum CovarianceModel {
    /// Constant noise given by the covariance function
    Homoscedastic(CovarianceMatrix),
    /// Input dependent noise estimated by an auxiliary GP
    Heteroscedastic(HeteroscedasticCovarianceMatrix),
}

impl CovarianceModel {
    /// Covariance matrix of the training set
    pub fn matrix(&self) -> &CovarianceMatrix {
        match self {
            CovarianceModel::Homoscedastic(m) => m,
            CovarianceModel::Heteroscedastic(h) => h.matrix(),
        }
    }

    fn matrix_mut(&mut self) -> &mut CovarianceMatrix {
        match self {
            CovarianceModel::Homoscedastic(m) => m,
            CovarianceModel::Heteroscedastic(h) => h.matrix_mut(),
        }
    }

    /// Posterior at `x0`
    pub fn posterior(&mut self, x0: &ArrayBase<impl Data<Elem = f64>, Ix1>) -> Result<Posterior> {
        match self {
            CovarianceModel::Homoscedastic(m) => m.posterior(x0),
            CovarianceModel::Heteroscedastic(h) => h.posterior(x0),
        }
    }

    fn add_observations(&mut self, batch: Vec<Observation>) -> Result<()> {
        match self {
            CovarianceModel::Homoscedastic(m) => m.add_observations(batch),
            CovarianceModel::Heteroscedastic(h) => h.add_observations(batch),
        }
    }

    fn recalculate(&mut self) -> Result<()> {
        match self {
            CovarianceModel::Homoscedastic(m) => m.recalculate(),
            CovarianceModel::Heteroscedastic(h) => h.recalculate(),
        }
    }

    fn refine(&mut self) -> Result<Option<RefinementReport>> {
        match self {
            CovarianceModel::Homoscedastic(_) => Ok(None),
            CovarianceModel::Heteroscedastic(h) => h.refine_noise_estimate().map(Some),
        }
    }
}

/// A GP regression models the observed values as a realization of a Gaussian process
/// governed by a prior covariance function `k(x, x')` depending on some hyperparameters.
///
/// Given observations `(x_i, y_i)`, the prediction at a query point `x0` is the posterior
/// normal distribution:
///
/// * `mean(x0) = k1' K^-1 Y`
/// * `var(x0) = k(x0, x0) - k1' K^-1 k1`
///
/// where `K` is the covariance matrix of the training inputs (plus a diagonal noise term)
/// and `k1` the covariance vector between `x0` and the training inputs.
///
/// # Implementation
///
/// * Covariance functions are squared exponential and white noise kernels
///   combined additively, see [CovarianceFunction].
/// * Hyperparameters can be estimated by maximization of the log marginal likelihood
///   using a resilient propagation gradient ascent, see [MarginalLikelihoodOptimizer].
/// * Noise can be modelled as input dependent following the most likely heteroscedastic
///   approach, see [HeteroscedasticCovarianceMatrix].
/// * Training points can be added incrementally, predictions at configured query points
///   are cached until the next modification.
///
/// # Example
///
/// ```no_run
/// use hetgp::{CovarianceFunction, GaussianProcess, Observation, QueryPoint};
/// use ndarray::array;
///
/// let observations = (0..5)
///     .map(|i| Observation::new(array![i as f64], (i * i) as f64))
///     .collect();
/// let query_points = vec![QueryPoint::new(0, array![2.5])];
/// let cov_fn = CovarianceFunction::squared_exponential(2., 10.)
///     + CovarianceFunction::white_noise(0.1);
///
/// let mut gp = GaussianProcess::params(cov_fn)
///     .seed(Some(42))
///     .fit_observations(observations, query_points)
///     .expect("GP fitted");
/// for (q, posterior) in gp.predict().expect("GP prediction") {
///     println!("{} -> {}", q.x(), posterior);
/// }
/// ```
///
/// # Reference
///
/// Kersting, K., Plagemann, C., Pfaff, P., & Burgard, W. (2007).
/// Most likely heteroscedastic Gaussian process regression.
/// In Proceedings of the 24th International Conference on Machine Learning (pp. 393-400).
#[derive(Debug)]
pub struct GaussianProcess {
    /// Parameters used to fit this model
    params: GpValidParams,
    /// Training covariance matrix
    model: CovarianceModel,
    /// Points where predictions are requested
    query_points: Vec<QueryPoint>,
    /// Cached predictions, None when invalidated
    predictions: Option<Vec<(QueryPoint, Posterior)>>,
    /// Number of points added since last optimization
    n_added: usize,
    /// Last optimization outcome
    optimization: Option<OptimizationReport>,
    /// Last noise refinement outcome
    refinement: Option<RefinementReport>,
}

impl fmt::Display for GaussianProcess {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "GP(kernel={}, hyperparameters={}, n_obs={}, heteroscedastic={}, likelihood={})",
            self.params.cov_fn.kernel(),
            self.params.cov_fn.parameters(),
            self.model.matrix().n_obs(),
            self.params.heteroscedastic,
            self.log_marginal_likelihood(),
        )
    }
}

fn run_optimizer(matrix: &mut CovarianceMatrix, params: &GpValidParams) -> Result<OptimizationReport> {
    let now = Instant::now();
    let report = MarginalLikelihoodOptimizer::new(matrix, params.bounds.clone())
        .params(params.optimizer.clone())
        .optimize()?;
    debug!("Hyperparameters optimization elapsed time: {:?}", now.elapsed());
    Ok(report)
}

impl GaussianProcess {
    /// Gp parameters contructor
    pub fn params(cov_fn: CovarianceFunction) -> GpParams {
        GpParams::new(cov_fn)
    }

    /// Posterior at every query point, computed once and cached until the next modification
    pub fn predict(&mut self) -> Result<&[(QueryPoint, Posterior)]> {
        let predictions = match self.predictions.take() {
            Some(predictions) => predictions,
            None => self
                .query_points
                .iter()
                .map(|q| self.model.posterior(&q.x()).map(|p| (q.clone(), p)))
                .collect::<Result<Vec<_>>>()?,
        };
        Ok(self.predictions.insert(predictions).as_slice())
    }

    /// Posterior at `x`, not cached
    pub fn predict_at(&mut self, x: &ArrayBase<impl Data<Elem = f64>, Ix1>) -> Result<Posterior> {
        self.model.posterior(x)
    }

    /// Add a training observation, see [GaussianProcess::add_points]
    pub fn add_point(&mut self, observation: Observation) -> Result<()> {
        self.add_points(vec![observation])
    }

    /// Add training observations.
    ///
    /// Invalidates cached predictions, re-runs the optimizer when the configured number of
    /// added points is reached and refines the noise estimate of an heteroscedastic model.
    pub fn add_points(&mut self, observations: Vec<Observation>) -> Result<()> {
        let n = observations.len();
        self.model.add_observations(observations)?;
        self.predictions = None;
        self.n_added += n;
        if let Some(every) = self.params.reoptimize_every {
            if self.n_added >= every {
                info!("Re-optimize hyperparameters after {} added points", self.n_added);
                self.n_added = 0;
                self.optimization = Some(run_optimizer(self.model.matrix_mut(), &self.params)?);
            }
        }
        if let Some(report) = self.model.refine()? {
            self.refinement = Some(report);
        }
        Ok(())
    }

    /// Run the hyperparameters optimizer on the current training set, then refine the noise
    /// estimate of an heteroscedastic model. Invalidates cached predictions.
    pub fn optimize(&mut self) -> Result<&OptimizationReport> {
        self.predictions = None;
        self.n_added = 0;
        let report = run_optimizer(self.model.matrix_mut(), &self.params)?;
        if let Some(refinement) = self.model.refine()? {
            self.refinement = Some(refinement);
        }
        Ok(self.optimization.insert(report))
    }

    /// Set a hyperparameter value of the covariance function and recalculate the covariance
    /// matrix. Invalidates cached predictions.
    ///
    /// When the covariance matrix cannot be rebuilt with the new value, the previous value
    /// is restored and the error returned.
    pub fn set_hyperparameter(&mut self, kind: HyperparamKind, value: f64) -> Result<()> {
        let params = self.params.cov_fn.parameters().clone();
        let previous = params.get(kind).ok_or_else(|| {
            GpError::InvalidInput(format!(
                "{kind} is not a hyperparameter of the covariance function"
            ))
        })?;
        params.set(kind, value);
        if let Err(err) = self.recalculate() {
            warn!("Cannot set {kind} to {value}, restore {previous}: {err}");
            params.set(kind, previous);
            self.recalculate()?;
            return Err(err);
        }
        Ok(())
    }

    /// Recalculate the covariance matrix after hyperparameters were changed through a shared
    /// covariance function. Invalidates cached predictions.
    pub fn recalculate(&mut self) -> Result<()> {
        self.predictions = None;
        self.model.recalculate()
    }

    /// Replace the query points. Invalidates cached predictions.
    pub fn set_query_points(&mut self, query_points: Vec<QueryPoint>) {
        self.predictions = None;
        self.query_points = query_points;
    }

    /// Query points
    pub fn query_points(&self) -> &[QueryPoint] {
        &self.query_points
    }

    /// Training observations
    pub fn observations(&self) -> &[Observation] {
        self.model.matrix().observations()
    }

    /// Covariance function, sharing its hyperparameters with the covariance matrix
    pub fn covariance_function(&self) -> &CovarianceFunction {
        &self.params.cov_fn
    }

    /// Covariance model
    pub fn model(&self) -> &CovarianceModel {
        &self.model
    }

    /// Training covariance matrix
    pub fn matrix(&self) -> &CovarianceMatrix {
        self.model.matrix()
    }

    /// Parameters used to fit this model
    pub fn gp_params(&self) -> &GpValidParams {
        &self.params
    }

    /// Current log marginal likelihood of the training set
    pub fn log_marginal_likelihood(&self) -> f64 {
        log_marginal_likelihood(self.model.matrix())
    }

    /// Outcome of the last hyperparameters optimization if any
    pub fn optimization_report(&self) -> Option<&OptimizationReport> {
        self.optimization.as_ref()
    }

    /// Outcome of the last noise refinement if any
    pub fn refinement_report(&self) -> Option<&RefinementReport> {
        self.refinement.as_ref()
    }

    /// Whether predictions are currently cached
    pub fn has_cached_predictions(&self) -> bool {
        self.predictions.is_some()
    }
}

impl GpValidParams {
    /// Fit a GP on `observations` to predict at `query_points`.
    ///
    /// Hyperparameters are estimated first (if requested) under the constant noise
    /// assumption, then the noise of an heteroscedastic model is refined.
    pub fn fit_observations(
        &self,
        observations: Vec<Observation>,
        query_points: Vec<QueryPoint>,
    ) -> Result<GaussianProcess> {
        let rng = match self.seed {
            Some(seed) => Xoshiro256Plus::seed_from_u64(seed),
            None => Xoshiro256Plus::from_entropy(),
        };
        let mut matrix = CovarianceMatrix::empty(self.cov_fn.clone())
            .delta(self.delta)
            .with_rng(rng);
        if !observations.is_empty() {
            matrix.add_observations(observations)?;
        }

        let optimization = if self.estimate_hyperparameters {
            Some(run_optimizer(&mut matrix, self)?)
        } else {
            None
        };

        let (model, refinement) = if self.heteroscedastic {
            let sigma_f = match self.noise.sigma_f {
                Some(sigma_f) => sigma_f,
                None if matrix.n_obs() > 1 => 0.5 * matrix.targets().std(1.),
                None => f64::NAN,
            };
            if !(sigma_f.is_finite() && sigma_f > 0.) {
                return Err(GpError::InvalidInput(format!(
                    "cannot initialize noise model with noise scale {sigma_f}, \
                     at least two distinct training targets are required"
                )));
            }
            let mut hetero =
                HeteroscedasticCovarianceMatrix::new(matrix, sigma_f, self.noise.clone())?;
            let report = hetero.refine_noise_estimate()?;
            (CovarianceModel::Heteroscedastic(hetero), Some(report))
        } else {
            (CovarianceModel::Homoscedastic(matrix), None)
        };

        Ok(GaussianProcess {
            params: self.clone(),
            model,
            query_points,
            predictions: None,
            n_added: 0,
            optimization,
            refinement,
        })
    }
}

impl GpParams {
    /// Check parameters and fit a GP, see [GpValidParams::fit_observations]
    pub fn fit_observations(
        &self,
        observations: Vec<Observation>,
        query_points: Vec<QueryPoint>,
    ) -> Result<GaussianProcess> {
        self.check_ref()?
            .fit_observations(observations, query_points)
    }
}

impl<D: Data<Elem = f64>> Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, GpError> for GpValidParams {
    type Object = GaussianProcess;

    /// Fit GP on training data `(x, y)` without query points,
    /// see [GaussianProcess::set_query_points]
    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>>,
    ) -> Result<Self::Object> {
        let x = dataset.records();
        let y = dataset.targets();
        let observations = x
            .rows()
            .into_iter()
            .zip(y.iter())
            .map(|(xi, yi)| Observation::new(xi.to_owned(), *yi))
            .collect();
        self.fit_observations(observations, vec![])
    }
}

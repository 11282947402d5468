use crate::covariance_functions::CovarianceFunction;
use crate::covariance_matrix::DEFAULT_PERTURBATION;
use crate::errors::{GpError, Result};
use crate::heteroscedastic::NoiseParams;
use crate::hyperparameters::{HyperparamBounds, Hyperparameter};
use crate::optimization::RpropParams;
use linfa::ParamGuard;

/// A set of validated GP parameters.
#[derive(Clone, Debug)]
pub struct GpValidParams {
    /// Covariance function k(x, x'), its hyperparameters are tuned in place when estimated
    pub(crate) cov_fn: CovarianceFunction,
    /// Whether noise is modelled as input dependent
    pub(crate) heteroscedastic: bool,
    /// Whether hyperparameters are estimated by marginal likelihood maximization
    pub(crate) estimate_hyperparameters: bool,
    /// Hyperparameters bounds used by the optimizer
    pub(crate) bounds: HyperparamBounds,
    /// Shift applied to query points equal to a training input
    pub(crate) delta: f64,
    /// Seed of the random generator, entropy when None
    pub(crate) seed: Option<u64>,
    /// Re-run the optimizer every given number of added points
    pub(crate) reoptimize_every: Option<usize>,
    /// Optimizer parameters
    pub(crate) optimizer: RpropParams,
    /// Noise refinement parameters
    pub(crate) noise: NoiseParams,
}

impl GpValidParams {
    /// Get covariance function
    pub fn covariance_function(&self) -> &CovarianceFunction {
        &self.cov_fn
    }

    /// Whether noise is input dependent
    pub fn heteroscedastic(&self) -> bool {
        self.heteroscedastic
    }

    /// Whether hyperparameters are estimated
    pub fn estimate_hyperparameters(&self) -> bool {
        self.estimate_hyperparameters
    }

    /// Get hyperparameters bounds
    pub fn bounds(&self) -> &HyperparamBounds {
        &self.bounds
    }

    /// Get query point perturbation
    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// Get random generator seed
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Get the number of added points triggering a re-optimization
    pub fn reoptimize_every(&self) -> Option<usize> {
        self.reoptimize_every
    }

    /// Get optimizer parameters
    pub fn optimizer(&self) -> &RpropParams {
        &self.optimizer
    }

    /// Get noise refinement parameters
    pub fn noise(&self) -> &NoiseParams {
        &self.noise
    }
}

#[derive(Clone, Debug)]
/// The set of hyperparameters that can be specified for the execution of
/// the [GP algorithm](struct.GaussianProcess.html).
pub struct GpParams(GpValidParams);

impl GpParams {
    /// A constructor for GP parameters given a covariance function
    pub fn new(cov_fn: CovarianceFunction) -> GpParams {
        Self(GpValidParams {
            cov_fn,
            heteroscedastic: false,
            estimate_hyperparameters: false,
            bounds: HyperparamBounds::default(),
            delta: DEFAULT_PERTURBATION,
            seed: None,
            reoptimize_every: None,
            optimizer: RpropParams::default(),
            noise: NoiseParams::default(),
        })
    }

    /// A constructor for GP parameters from validated parameters
    pub fn new_from_valid(params: &GpValidParams) -> Self {
        Self(params.clone())
    }

    /// Set covariance function
    pub fn covariance_function(mut self, cov_fn: CovarianceFunction) -> Self {
        self.0.cov_fn = cov_fn;
        self
    }

    /// Model noise as input dependent or not
    pub fn heteroscedastic(mut self, heteroscedastic: bool) -> Self {
        self.0.heteroscedastic = heteroscedastic;
        self
    }

    /// Estimate hyperparameters by maximizing the marginal likelihood or not
    pub fn estimate_hyperparameters(mut self, estimate: bool) -> Self {
        self.0.estimate_hyperparameters = estimate;
        self
    }

    /// Set hyperparameters bounds
    pub fn bounds(mut self, bounds: HyperparamBounds) -> Self {
        self.0.bounds = bounds;
        self
    }

    /// Set hyperparameters bounds from lists of min and max values,
    /// kinds not given keep their default bounds
    pub fn bounds_from_lists(
        mut self,
        min_bounds: &[Hyperparameter],
        max_bounds: &[Hyperparameter],
    ) -> Self {
        self.0.bounds = HyperparamBounds::from_lists(min_bounds, max_bounds);
        self
    }

    /// Set perturbation applied to query points equal to a training input
    pub fn delta(mut self, delta: f64) -> Self {
        self.0.delta = delta;
        self
    }

    /// Set the random generator seed for reproducibility
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.0.seed = seed;
        self
    }

    /// Re-run the optimizer every `n` added points, never when None
    pub fn reoptimize_every(mut self, n: Option<usize>) -> Self {
        self.0.reoptimize_every = n;
        self
    }

    /// Set optimizer parameters
    pub fn optimizer(mut self, optimizer: RpropParams) -> Self {
        self.0.optimizer = optimizer;
        self
    }

    /// Set noise refinement parameters
    pub fn noise(mut self, noise: NoiseParams) -> Self {
        self.0.noise = noise;
        self
    }
}

impl From<GpValidParams> for GpParams {
    fn from(valid: GpValidParams) -> Self {
        GpParams(valid)
    }
}

impl ParamGuard for GpParams {
    type Checked = GpValidParams;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        let params = &self.0;
        if !(params.delta > 0.) {
            return Err(GpError::InvalidValueError(format!(
                "`delta` should be strictly positive, got {}",
                params.delta
            )));
        }
        if let Some((kind, (lo, up))) = params.bounds.iter().find(|(_, (lo, up))| !(lo <= up)) {
            return Err(GpError::InvalidValueError(format!(
                "{kind} lower bound {lo} is greater than upper bound {up}"
            )));
        }
        if params.reoptimize_every == Some(0) {
            return Err(GpError::InvalidValueError(
                "`reoptimize_every` cannot be 0!".to_string(),
            ));
        }

        let opt = &params.optimizer;
        if !(opt.initial_step > 0.) {
            return Err(GpError::InvalidValueError(
                "optimizer initial step should be strictly positive".to_string(),
            ));
        }
        if !(opt.step_up > 1.) {
            return Err(GpError::InvalidValueError(
                "optimizer step up ratio should be greater than 1".to_string(),
            ));
        }
        if !(opt.step_down > 0. && opt.step_down < 1.) {
            return Err(GpError::InvalidValueError(
                "optimizer step down ratio should be in ]0, 1[".to_string(),
            ));
        }
        if !(opt.grad_tol > 0.) || opt.max_iters == 0 {
            return Err(GpError::InvalidValueError(
                "optimizer gradient tolerance and max iterations should be strictly positive"
                    .to_string(),
            ));
        }

        let noise = &params.noise;
        if noise.n_samples == 0 || noise.max_iters == 0 || !(noise.tol > 0.) {
            return Err(GpError::InvalidValueError(
                "noise refinement samples, max iterations and tolerance should be strictly positive"
                    .to_string(),
            ));
        }
        if let Some(sigma_f) = noise.sigma_f {
            if !(sigma_f > 0.) {
                return Err(GpError::InvalidValueError(format!(
                    "noise scale `sigma_f` should be strictly positive, got {sigma_f}"
                )));
            }
        }
        if !(noise.signal_variance > 0. && noise.jitter_variance > 0.) {
            return Err(GpError::InvalidValueError(
                "noise model kernel variances should be strictly positive".to_string(),
            ));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperparameters::HyperparamKind;
    use paste::paste;

    fn params() -> GpParams {
        GpParams::new(CovarianceFunction::squared_exponential(1., 1.))
    }

    #[test]
    fn test_default_params_are_valid() {
        let valid = params().check().unwrap();
        assert_eq!(DEFAULT_PERTURBATION, valid.delta());
        assert!(!valid.heteroscedastic());
        assert!(!valid.estimate_hyperparameters());
        assert_eq!(None, valid.reoptimize_every());
        assert_eq!(&RpropParams::default(), valid.optimizer());
        assert_eq!(20, valid.noise().n_samples_value());
    }

    #[test]
    fn test_bounds_from_lists() {
        let valid = params()
            .bounds_from_lists(&[Hyperparameter::length_scale(0.5)], &[])
            .check()
            .unwrap();
        assert_eq!((0.5, 1000.), valid.bounds().get(HyperparamKind::LengthScale));
    }

    macro_rules! test_invalid_params {
        ($name:ident, $params:expr) => {
            paste! {
                #[test]
                fn [<test_invalid_ $name>]() {
                    let res = $params.check_ref().map(|_| ());
                    assert!(matches!(res, Err(GpError::InvalidValueError(_))));
                }
            }
        };
    }

    test_invalid_params!(delta, params().delta(0.));
    test_invalid_params!(
        bounds,
        params().bounds(HyperparamBounds::default().with(HyperparamKind::LengthScale, 2., 1.))
    );
    test_invalid_params!(reoptimize_every, params().reoptimize_every(Some(0)));
    test_invalid_params!(
        initial_step,
        params().optimizer(RpropParams::default().initial_step(0.))
    );
    test_invalid_params!(step_up, params().optimizer(RpropParams::default().step_up(0.9)));
    test_invalid_params!(
        step_down,
        params().optimizer(RpropParams::default().step_down(1.))
    );
    test_invalid_params!(
        max_iters,
        params().optimizer(RpropParams::default().max_iters(0))
    );
    test_invalid_params!(n_samples, params().noise(NoiseParams::default().n_samples(0)));
    test_invalid_params!(sigma_f, params().noise(NoiseParams::default().sigma_f(-1.)));
    test_invalid_params!(
        noise_kernel,
        params().noise(NoiseParams::default().noise_kernel(1., 0.))
    );
}

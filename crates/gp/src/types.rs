use libm::erfc;
use ndarray::{Array1, ArrayView1};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

const SQRT_2PI: f64 = 2.5066282746310007;

/// Quantile of the standard normal distribution used for 95% confidence bounds
pub const CONFIDENCE_95: f64 = 1.96;

/// A training sample: an input point `x` and its noisy scalar observation `y`
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Observation {
    x: Array1<f64>,
    y: f64,
}

impl Observation {
    /// Constructor
    pub fn new(x: Array1<f64>, y: f64) -> Self {
        Observation { x, y }
    }

    /// Input point
    pub fn x(&self) -> ArrayView1<f64> {
        self.x.view()
    }

    /// Observed value
    pub fn y(&self) -> f64 {
        self.y
    }

    /// Dimension of the input point
    pub fn dim(&self) -> usize {
        self.x.len()
    }
}

/// A point where a prediction is requested.
///
/// `id` only lets callers relate predictions to their own records.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct QueryPoint {
    id: usize,
    x: Array1<f64>,
}

impl QueryPoint {
    /// Constructor
    pub fn new(id: usize, x: Array1<f64>) -> Self {
        QueryPoint { id, x }
    }

    /// Caller identifier
    pub fn id(&self) -> usize {
        self.id
    }

    /// Query input point
    pub fn x(&self) -> ArrayView1<f64> {
        self.x.view()
    }
}

/// Normal distribution predicted at a query point
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Posterior {
    mean: f64,
    sd: f64,
}

impl Posterior {
    /// Constructor from mean and standard deviation
    pub fn new(mean: f64, sd: f64) -> Self {
        Posterior { mean, sd }
    }

    /// Predicted mean
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Predicted standard deviation
    pub fn sd(&self) -> f64 {
        self.sd
    }

    /// Predicted variance
    pub fn variance(&self) -> f64 {
        self.sd * self.sd
    }

    /// Lower bound of the 95% confidence interval
    pub fn lower_bound(&self) -> f64 {
        self.mean - CONFIDENCE_95 * self.sd
    }

    /// Upper bound of the 95% confidence interval
    pub fn upper_bound(&self) -> f64 {
        self.mean + CONFIDENCE_95 * self.sd
    }

    /// Probability density function at `x`.
    ///
    /// A posterior with zero standard deviation is a point mass at its mean:
    /// the density is infinite at the mean and zero elsewhere.
    pub fn pdf(&self, x: f64) -> f64 {
        if self.sd == 0. {
            return if x == self.mean { f64::INFINITY } else { 0. };
        }
        let u = (x - self.mean) / self.sd;
        (-0.5 * u * u).exp() / (SQRT_2PI * self.sd)
    }

    /// Cumulative distribution function at `x`, ie P(X <= x)
    pub fn cdf(&self, x: f64) -> f64 {
        if self.sd == 0. {
            return if x >= self.mean { 1. } else { 0. };
        }
        0.5 * erfc(-(x - self.mean) / (self.sd * std::f64::consts::SQRT_2))
    }

    /// Survival function at `x`, ie P(X > x)
    pub fn sf(&self, x: f64) -> f64 {
        if self.sd == 0. {
            return if x < self.mean { 1. } else { 0. };
        }
        0.5 * erfc((x - self.mean) / (self.sd * std::f64::consts::SQRT_2))
    }
}

impl fmt::Display for Posterior {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Normal({}, {})", self.mean, self.sd)
    }
}

//! This library implements [Gaussian Process](https://en.wikipedia.org/wiki/Gaussian_process) regression
//! with composable covariance functions, hyperparameters estimation by marginal likelihood
//! maximization and input dependent (heteroscedastic) noise modelling.
//!
//! Given noisy scalar observations at vector inputs, a GP predicts a posterior normal
//! distribution (mean, standard deviation) at any query point.
//!
//! GP regression is implemented by [GaussianProcess] parameterized by [GpParams].
//! The building blocks are available on their own:
//!
//! * [CovarianceFunction]: squared exponential and white noise kernels, additive composition
//!   sharing hyperparameters, analytic derivatives wrt hyperparameters,
//! * [CovarianceMatrix]: training set covariance matrix and posterior inference,
//! * [HeteroscedasticCovarianceMatrix]: most likely heteroscedastic noise estimation,
//! * [MarginalLikelihoodOptimizer]: hyperparameters estimation.
//!
//! Delimited text ingestion and prediction rendering are available in the [io] module.
//!
//! # Features
//!
//! ## serializable
//!
//! The `serializable` feature enables the serialization of configuration and value types
//! (observations, query points, posteriors, optimizer and noise parameters) using the
//! [`serde crate`](https://serde.rs/).
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod algorithm;
mod covariance_functions;
mod covariance_matrix;
mod errors;
mod heteroscedastic;
mod hyperparameters;
mod optimization;
mod parameters;
mod types;
mod utils;

pub mod io;

pub use algorithm::*;
pub use covariance_functions::*;
pub use covariance_matrix::*;
pub use errors::*;
pub use heteroscedastic::*;
pub use hyperparameters::*;
pub use optimization::*;
pub use parameters::*;
pub use types::*;
pub use utils::same_point;

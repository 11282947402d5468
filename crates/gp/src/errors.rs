use thiserror::Error;

/// A result type for GP regression algorithm
pub type Result<T> = std::result::Result<T, GpError>;

/// An error when using [`GaussianProcess`](crate::GaussianProcess) or one of its covariance matrices
#[derive(Error, Debug)]
pub enum GpError {
    /// When given data is rejected: empty batch, duplicated input, dimension mismatch...
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// When a computation gives a singular matrix or a non finite result
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),
    /// When a kernel family is requested but not implemented
    #[error("Not supported: {0}")]
    NotSupported(String),
    /// When a parameter value is invalid
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
    #[error(transparent)]
    /// When linear algebra computation fails
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When a linfa error occurs, required to implement linfa `Fit`
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
    /// When reading or writing delimited text fails
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    /// When delimited text is malformed
    #[error(transparent)]
    CsvError(#[from] csv::Error),
}

use thiserror::Error;

/// Errors that stop a solve before a result is produced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolnpError {
    /// Malformed input, detected before (or on) the first objective evaluation.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// A factorization hit a zero pivot.
    #[error("singular matrix: {0}")]
    Singular(String),
}

pub type Result<T> = std::result::Result<T, SolnpError>;

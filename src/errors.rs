use thiserror::Error;

#[derive(Error, Debug)]
pub enum NeuriteError {
    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch { expected: Vec<usize>, found: Vec<usize> },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("numeric overflow: {0}")]
    NumericOverflow(String),
    #[error("graph error: {0}")]
    GraphError(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type NeuriteResult<T> = Result<T, NeuriteError>;

impl NeuriteError {
    /// Shorthand for the shape-mismatch variant, used by every kernel precondition.
    pub fn shapes(expected: &[usize], found: &[usize]) -> Self {
        NeuriteError::ShapeMismatch {
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }
}

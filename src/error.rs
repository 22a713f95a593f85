use thiserror::Error;

/// Failure kinds a caller may want to tell apart.
///
/// Library functions return `anyhow::Result`; recover these with
/// `err.downcast_ref::<HmmError>()`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HmmError {
    #[error("invalid state count: {k}")]
    InvalidStateCount { k: usize },
    #[error("unknown estimation method {0:?} (expected em, vb or multimer)")]
    UnknownMethod(String),
    #[error("length mismatch: expected {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("sequence of length {len} is too short (need at least 2 frames)")]
    SequenceTooShort { len: usize },
    #[error("{what} is not a probability vector (sum = {sum})")]
    NotSimplex { what: String, sum: f64 },
    #[error("state {state} has no support in the data; K is not supported by this sequence")]
    DegenerateState { state: usize },
    #[error("observation likelihood is zero at frame {frame}")]
    ZeroLikelihood { frame: usize },
    #[error("invalid parameter {name}: {message}")]
    InvalidParameter { name: &'static str, message: String },
    #[error("training was cancelled")]
    Cancelled,
}

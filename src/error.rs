use std::path::PathBuf;
use thiserror::Error;

/// Why a single threshold pair produced no usable transform.
///
/// These never abort a pair: the search simply moves on to the next offset.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimationFailure {
    #[error("{stage} fit needs at least {required} correspondences, found {found}")]
    TooFewCorrespondences {
        stage: &'static str,
        found: usize,
        required: usize,
    },
    #[error("{stage} fit is degenerate for the given correspondences")]
    DegenerateGeometry { stage: &'static str },
}

#[derive(Error, Debug)]
pub enum AlignError {
    #[error("cannot load image '{}': {reason}", path.display())]
    ImageLoad { path: PathBuf, reason: String },

    #[error("image is empty or malformed: {0}")]
    MalformedImage(String),

    #[error("transform estimation failed: {0}")]
    Estimation(#[from] EstimationFailure),

    #[error("alignment unsuccessful after {attempts} threshold combinations")]
    AlignmentUnsuccessful { attempts: usize },

    #[error("setup failed: {0}")]
    Setup(String),

    #[error("invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    #[error("cannot write '{}': {reason}", path.display())]
    Output { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AlignError {
    /// True for failures that only invalidate one threshold combination.
    pub fn is_estimation_failure(&self) -> bool {
        matches!(self, AlignError::Estimation(_))
    }
}

pub type AlignResult<T> = std::result::Result<T, AlignError>;

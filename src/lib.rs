pub mod algorithms;
pub mod batch;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod utils;

pub use algorithms::{binarize, BinaryMask, Correspondence, FeatureMatcher, OrbDetector, TransformEstimator};
pub use config::{Config, ScaleBounds};
pub use data::{ImagePair, PairPaths, PairSource};
pub use error::{AlignError, AlignResult, EstimationFailure};
pub use pipeline::{
    Aligner, AlignmentResult, Compositor, RigidTransform, SearchState, SearchStatus, ThresholdGrid,
    ThresholdProbe, ThresholdSearchController,
};

pub type Result<T> = anyhow::Result<T>;

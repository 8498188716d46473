pub mod binarize;
pub mod estimator;
pub mod matcher;
pub mod orb;

pub use binarize::{binarize, BinaryMask};
pub use estimator::TransformEstimator;
pub use matcher::{Correspondence, FeatureMatcher};
pub use orb::{Descriptor, Feature, Keypoint, OrbDetector};

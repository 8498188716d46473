pub mod ransac;

pub use ransac::{ransac, Homography, PointPair, RansacFit, RansacModel, RansacParams, Similarity};

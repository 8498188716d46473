use super::matcher::Correspondence;
use crate::config::RansacConfig;
use crate::error::EstimationFailure;
use crate::pipeline::types::RigidTransform;
use crate::utils::ransac::{ransac, Homography, PointPair, RansacParams, Similarity};

/// Homography consistency gate followed by a robust similarity fit.
#[derive(Debug, Clone, Default)]
pub struct TransformEstimator {
    config: RansacConfig,
}

impl TransformEstimator {
    pub fn new(config: RansacConfig) -> Self {
        Self { config }
    }

    fn homography_params(&self) -> RansacParams {
        RansacParams {
            max_iterations: self.config.max_iterations,
            threshold: self.config.homography_threshold,
            confidence: self.config.homography_confidence,
            seed: self.config.seed,
        }
    }

    fn similarity_params(&self) -> RansacParams {
        RansacParams {
            max_iterations: self.config.max_iterations,
            threshold: self.config.similarity_threshold,
            confidence: self.config.similarity_confidence,
            seed: self.config.seed,
        }
    }

    /// Map target keypoints onto reference keypoints.
    ///
    /// The homography only has to be fittable; its inliers are not reused.
    pub fn estimate(
        &self,
        correspondences: &[Correspondence],
    ) -> Result<RigidTransform, EstimationFailure> {
        let pairs: Vec<PointPair> = correspondences
            .iter()
            .map(|c| {
                PointPair::new(
                    [c.target.x as f64, c.target.y as f64],
                    [c.reference.x as f64, c.reference.y as f64],
                )
            })
            .collect();

        let gate = ransac::<Homography>(&pairs, &self.homography_params())?;
        tracing::trace!(
            inliers = gate.inlier_count,
            total = pairs.len(),
            "Homography gate passed"
        );

        let fit = ransac::<Similarity>(&pairs, &self.similarity_params())?;
        let transform = RigidTransform::from_affine(fit.model.matrix());
        tracing::trace!(
            rotation = transform.rotation_degrees,
            scale = transform.scale_factor,
            inliers = fit.inlier_count,
            "Similarity fitted"
        );
        Ok(transform)
    }
}

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::EstimationFailure;

/// Similarity transform mapping target coordinates onto the reference.
///
/// `matrix` is the 2x3 affine form `[[m00, m01, tx], [m10, m11, ty]]`.
/// The angle and scale are derived from the first row, so the scale factor
/// carries the sign of `m00`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    pub rotation_degrees: f64,
    pub scale_factor: f64,
    pub matrix: [[f64; 3]; 2],
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self::from_affine([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]])
    }

    pub fn from_affine(matrix: [[f64; 3]; 2]) -> Self {
        let (m00, m01) = (matrix[0][0], matrix[0][1]);
        let rotation_degrees = (-m01).atan2(m00).to_degrees();
        let scale_factor = m00.signum() * m00.hypot(m01);
        Self {
            rotation_degrees,
            scale_factor,
            matrix,
        }
    }

    /// Rotation by `degrees` and uniform `scale` about the origin, then translation.
    pub fn from_parts(degrees: f64, scale: f64, tx: f64, ty: f64) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        let (a, b) = (scale * cos, scale * sin);
        Self::from_affine([[a, -b, tx], [b, a, ty]])
    }

    /// Rotation and scale that leave `(cx, cy)` fixed.
    pub fn about_center(degrees: f64, scale: f64, cx: f64, cy: f64) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        let (a, b) = (scale * cos, scale * sin);
        let tx = cx - (a * cx - b * cy);
        let ty = cy - (b * cx + a * cy);
        Self::from_affine([[a, -b, tx], [b, a, ty]])
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let m = &self.matrix;
        (
            m[0][0] * x + m[0][1] * y + m[0][2],
            m[1][0] * x + m[1][1] * y + m[1][2],
        )
    }

    /// `None` when the linear part is singular.
    pub fn inverse(&self) -> Option<Self> {
        let m = &self.matrix;
        let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
        if det.abs() <= 1e-12 || !det.is_finite() {
            return None;
        }

        let i00 = m[1][1] / det;
        let i01 = -m[0][1] / det;
        let i10 = -m[1][0] / det;
        let i11 = m[0][0] / det;
        let itx = -(i00 * m[0][2] + i01 * m[1][2]);
        let ity = -(i10 * m[0][2] + i11 * m[1][2]);
        Some(Self::from_affine([[i00, i01, itx], [i10, i11, ity]]))
    }
}

/// Outcome of estimating a transform at one threshold combination.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Estimated(RigidTransform),
    Invalid(EstimationFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentAttempt {
    pub reference_threshold: u8,
    pub target_threshold: u8,
    pub outcome: AttemptOutcome,
}

impl AlignmentAttempt {
    pub fn transform(&self) -> Option<&RigidTransform> {
        match &self.outcome {
            AttemptOutcome::Estimated(transform) => Some(transform),
            AttemptOutcome::Invalid(_) => None,
        }
    }
}

/// The attempt that ended the search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcceptedAttempt {
    pub reference_threshold: u8,
    pub target_threshold: u8,
    pub transform: RigidTransform,
}

/// A successfully aligned pair. Failures surface as
/// [`AlignError::AlignmentUnsuccessful`](crate::error::AlignError::AlignmentUnsuccessful).
#[derive(Debug, Clone)]
pub struct AlignmentResult {
    pub accepted: AcceptedAttempt,
    /// Threshold combinations evaluated, the accepted one included.
    pub attempts: usize,
    pub transformed: RgbImage,
    pub overlay: Option<RgbImage>,
}

impl AlignmentResult {
    pub fn transform(&self) -> &RigidTransform {
        &self.accepted.transform
    }
}

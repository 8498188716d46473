use crate::error::AlignResult;
use crate::pipeline::types::RigidTransform;

/// Estimates a transform for one (reference, target) threshold combination.
///
/// Returning [`AlignError::Estimation`](crate::error::AlignError::Estimation)
/// marks the combination invalid and lets the search continue; any other error
/// aborts the pair.
pub trait ThresholdProbe {
    fn probe(&self, reference_threshold: u8, target_threshold: u8) -> AlignResult<RigidTransform>;
}

impl<F> ThresholdProbe for F
where
    F: Fn(u8, u8) -> AlignResult<RigidTransform>,
{
    fn probe(&self, reference_threshold: u8, target_threshold: u8) -> AlignResult<RigidTransform> {
        self(reference_threshold, target_threshold)
    }
}

use image::GrayImage;
use rayon::prelude::*;

use super::binarize::BinaryMask;
use super::orb::{Descriptor, Feature, Keypoint, OrbDetector};
use crate::config::OrbConfig;

/// Share of the sorted correspondences kept, as a fraction `KEEP_NUM / KEEP_DEN`.
const KEEP_NUM: usize = 9;
const KEEP_DEN: usize = 10;

/// One-to-one match between a target keypoint and a reference keypoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub target: Keypoint,
    pub reference: Keypoint,
    pub target_index: usize,
    pub reference_index: usize,
    /// Hamming distance between the two descriptors.
    pub distance: u32,
}

/// Index of the nearest descriptor; ties resolve to the lowest index.
fn nearest(query: &Descriptor, candidates: &[Descriptor]) -> Option<(usize, u32)> {
    candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| (index, query.hamming(candidate)))
        .min_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)))
}

/// Brute-force Hamming matching with the mutual-best-match constraint.
///
/// Returns `(target_index, reference_index, distance)` in target order.
pub fn match_descriptors(target: &[Descriptor], reference: &[Descriptor]) -> Vec<(usize, usize, u32)> {
    if target.is_empty() || reference.is_empty() {
        return Vec::new();
    }

    let forward: Vec<Option<(usize, u32)>> =
        target.par_iter().map(|d| nearest(d, reference)).collect();
    let backward: Vec<Option<(usize, u32)>> =
        reference.par_iter().map(|d| nearest(d, target)).collect();

    forward
        .into_iter()
        .enumerate()
        .filter_map(|(t, best)| {
            let (r, distance) = best?;
            match backward[r] {
                Some((back, _)) if back == t => Some((t, r, distance)),
                _ => None,
            }
        })
        .collect()
}

/// Stable sort by ascending distance, then keep the best `floor(0.9 * N)`.
pub fn retain_best(correspondences: &mut Vec<Correspondence>) {
    correspondences.sort_by_key(|c| c.distance);
    let keep = correspondences.len() * KEEP_NUM / KEEP_DEN;
    correspondences.truncate(keep);
}

/// Detects ORB features on two masks and pairs them up.
#[derive(Debug, Clone, Default)]
pub struct FeatureMatcher {
    detector: OrbDetector,
}

impl FeatureMatcher {
    pub fn new(config: OrbConfig) -> Self {
        Self {
            detector: OrbDetector::new(config),
        }
    }

    pub fn detect(&self, image: &GrayImage) -> Vec<Feature> {
        self.detector.detect_and_compute(image)
    }

    /// Detect on both masks and match. Zero keypoints on either side yields
    /// an empty set.
    pub fn match_masks(&self, target: &BinaryMask, reference: &BinaryMask) -> Vec<Correspondence> {
        let target_features = self.detect(target.image());
        let reference_features = self.detect(reference.image());
        self.match_features(&target_features, &reference_features)
    }

    /// Cross-checked matches between precomputed features, sorted and truncated.
    pub fn match_features(&self, target: &[Feature], reference: &[Feature]) -> Vec<Correspondence> {
        let target_descriptors: Vec<Descriptor> = target.iter().map(|f| f.descriptor).collect();
        let reference_descriptors: Vec<Descriptor> =
            reference.iter().map(|f| f.descriptor).collect();

        let mut correspondences: Vec<Correspondence> =
            match_descriptors(&target_descriptors, &reference_descriptors)
                .into_iter()
                .map(|(t, r, distance)| Correspondence {
                    target: target[t].keypoint,
                    reference: reference[r].keypoint,
                    target_index: t,
                    reference_index: r,
                    distance,
                })
                .collect();

        let matched = correspondences.len();
        retain_best(&mut correspondences);
        tracing::debug!(
            target_features = target.len(),
            reference_features = reference.len(),
            matched,
            kept = correspondences.len(),
            "Cross-checked matches"
        );
        correspondences
    }
}

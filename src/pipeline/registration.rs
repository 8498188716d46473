use image::RgbImage;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::algorithms::{binarize, Feature, FeatureMatcher, TransformEstimator};
use crate::config::Config;
use crate::data::ImagePair;
use crate::error::{AlignError, AlignResult};
use crate::pipeline::composite::Compositor;
use crate::pipeline::search::{SearchState, SearchStatus, ThresholdSearchController};
use crate::pipeline::traits::ThresholdProbe;
use crate::pipeline::types::{AlignmentResult, RigidTransform};

type FeatureCache = RefCell<HashMap<u8, Rc<Vec<Feature>>>>;

/// Feature-based probe over one image pair.
///
/// Masks and features are computed once per threshold and reused for every
/// combination that needs them.
pub struct FeatureRegistration<'a> {
    reference: &'a RgbImage,
    target: &'a RgbImage,
    matcher: &'a FeatureMatcher,
    estimator: &'a TransformEstimator,
    reference_features: FeatureCache,
    target_features: FeatureCache,
}

impl<'a> FeatureRegistration<'a> {
    pub fn new(
        reference: &'a RgbImage,
        target: &'a RgbImage,
        matcher: &'a FeatureMatcher,
        estimator: &'a TransformEstimator,
    ) -> Self {
        Self {
            reference,
            target,
            matcher,
            estimator,
            reference_features: RefCell::new(HashMap::new()),
            target_features: RefCell::new(HashMap::new()),
        }
    }

    fn features(&self, cache: &FeatureCache, image: &RgbImage, threshold: u8) -> AlignResult<Rc<Vec<Feature>>> {
        if let Some(features) = cache.borrow().get(&threshold) {
            return Ok(Rc::clone(features));
        }

        let mask = binarize(image, threshold)?;
        let features = Rc::new(self.matcher.detect(mask.image()));
        cache.borrow_mut().insert(threshold, Rc::clone(&features));
        Ok(features)
    }
}

impl ThresholdProbe for FeatureRegistration<'_> {
    fn probe(&self, reference_threshold: u8, target_threshold: u8) -> AlignResult<RigidTransform> {
        let reference = self.features(&self.reference_features, self.reference, reference_threshold)?;
        let target = self.features(&self.target_features, self.target, target_threshold)?;
        let correspondences = self.matcher.match_features(&target, &reference);
        Ok(self.estimator.estimate(&correspondences)?)
    }
}

/// End-to-end alignment of one pair with a fixed configuration.
#[derive(Debug, Clone)]
pub struct Aligner {
    config: Config,
    matcher: FeatureMatcher,
    estimator: TransformEstimator,
    controller: ThresholdSearchController,
    compositor: Compositor,
}

impl Aligner {
    pub fn new(config: Config) -> Self {
        Self {
            matcher: FeatureMatcher::new(config.orb.clone()),
            estimator: TransformEstimator::new(config.ransac.clone()),
            controller: ThresholdSearchController::new(&config.search),
            compositor: Compositor::new(config.output.overlay),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn controller(&self) -> &ThresholdSearchController {
        &self.controller
    }

    /// Threshold search only; the state is terminal.
    pub fn search(&self, reference: &RgbImage, target: &RgbImage) -> AlignResult<SearchState> {
        let probe = FeatureRegistration::new(reference, target, &self.matcher, &self.estimator);
        self.controller.run(&probe)
    }

    /// Search, then resample the target onto the reference frame.
    pub fn align_images(&self, reference: &RgbImage, target: &RgbImage) -> AlignResult<AlignmentResult> {
        let state = self.search(reference, target)?;
        let attempts = state.attempt_count();

        let accepted = match state.status {
            SearchStatus::Accepted(accepted) => accepted,
            SearchStatus::Failed | SearchStatus::Searching => {
                return Err(AlignError::AlignmentUnsuccessful { attempts });
            }
        };

        let (transformed, overlay) = self
            .compositor
            .compose(target, &accepted.transform, reference)?;

        Ok(AlignmentResult {
            accepted,
            attempts,
            transformed,
            overlay,
        })
    }

    pub fn align_pair(&self, pair: &ImagePair) -> AlignResult<AlignmentResult> {
        self.align_images(&pair.reference, &pair.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_features_are_computed_once_per_threshold() {
        let image = RgbImage::from_fn(120, 120, |x, y| {
            let v = if (x / 30 + y / 30) % 2 == 0 { 20 } else { 230 };
            Rgb([v, v, v])
        });
        let matcher = FeatureMatcher::default();
        let estimator = TransformEstimator::default();
        let registration = FeatureRegistration::new(&image, &image, &matcher, &estimator);

        let first = registration
            .features(&registration.reference_features, &image, 128)
            .unwrap();
        let second = registration
            .features(&registration.reference_features, &image, 128)
            .unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(registration.reference_features.borrow().len(), 1);
        assert!(registration.target_features.borrow().is_empty());
    }

    #[test]
    fn test_blank_pair_is_unsuccessful() {
        let mut config = Config::default();
        config.search.threshold_max_change = 4;
        let aligner = Aligner::new(config);

        let blank = RgbImage::from_pixel(100, 100, Rgb([255, 255, 255]));
        match aligner.align_images(&blank, &blank) {
            Err(AlignError::AlignmentUnsuccessful { attempts }) => assert_eq!(attempts, 9),
            other => panic!("unexpected {:?}", other.map(|r| r.accepted)),
        }
    }
}
